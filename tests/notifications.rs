//! Notification Tests
//!
//! Covers who gets mailed about new issues and comments, the settings
//! routes, and the emailed settings links.

mod common;

use axum::http::StatusCode;
use common::{app, settings, TestApp, TestUser};
use dataset_issues::config::IssueSettings;
use dataset_issues::domain::catalog::Organization;
use serde_json::json;
use time::{Duration, OffsetDateTime};

struct Catalog {
    organization: Organization,
    editor: TestUser,
    author: TestUser,
}

fn catalog(app: &TestApp) -> Catalog {
    let organization = app.create_organization("water-board");
    app.create_dataset("rivers", &organization);
    let editor = app.create_user("editor");
    app.add_member(&organization, &editor, "editor");
    let author = app.create_user("author");
    Catalog {
        organization,
        editor,
        author,
    }
}

/// The settings code embedded in an email body.
fn settings_code(body: &str) -> String {
    let start = body.find("token=").expect("no settings link in email") + "token=".len();
    body[start..]
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect()
}

fn recipients(app: &TestApp) -> Vec<String> {
    app.outbox.sent().into_iter().map(|email| email.to).collect()
}

// ===========================================================================
// Recipients
// ===========================================================================

#[tokio::test]
async fn editors_are_notified_of_new_issues_by_default() {
    let app = app().await;
    let catalog = catalog(&app);
    let member = app.create_user("member");
    app.add_member(&catalog.organization, &member, "member");

    app.create_issue("rivers", &catalog.author, "Broken CSV").await;

    assert_eq!(recipients(&app), vec!["editor@example.org".to_string()]);
    let email = &app.outbox.sent()[0];
    assert_eq!(email.subject, "[Open Data Test] rivers issue #1: Broken CSV");
    assert_eq!(email.from, "issues@example.org");
    assert!(email.body.contains("https://data.example.org/dataset/rivers/issues/1"));
    assert!(email
        .body
        .contains("https://data.example.org/notification-settings?token="));
}

#[tokio::test]
async fn opted_in_users_are_notified_first() {
    let app = app().await;
    let catalog = catalog(&app);
    let watcher = app.create_user("watcher");
    let fan = app.create_user("fan");

    let resp = app
        .post(
            "/notification-settings/publishers/water-board",
            Some(&watcher.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    let resp = app
        .put_json(
            "/notification-settings",
            json!({ "all_publishers": true }),
            Some(&fan.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);

    app.create_issue("rivers", &catalog.author, "Broken CSV").await;

    assert_eq!(
        recipients(&app),
        vec![
            "fan@example.org".to_string(),
            "watcher@example.org".to_string(),
            "editor@example.org".to_string(),
        ]
    );
}

#[tokio::test]
async fn editors_can_opt_out() {
    let app = app().await;
    let catalog = catalog(&app);

    let resp = app
        .put_json(
            "/notification-settings",
            json!({ "all_where_editor_admin": false }),
            Some(&catalog.editor.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);

    app.create_issue("rivers", &catalog.author, "Broken CSV").await;

    assert!(app.outbox.sent().is_empty());
}

#[tokio::test]
async fn comments_are_notified_too() {
    let app = app().await;
    let catalog = catalog(&app);
    let number = app.create_issue("rivers", &catalog.author, "Broken CSV").await;

    app.create_comment("rivers", number, &catalog.author, "Row 12 in particular")
        .await;

    let sent = app.outbox.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent[1].body.contains("author commented on issue #1:"));
    assert!(sent[1].body.contains("Row 12 in particular"));
}

#[tokio::test]
async fn nothing_is_sent_when_notifications_are_off() {
    let app = TestApp::with_settings(IssueSettings {
        send_email_notifications: false,
        ..settings()
    });
    let catalog = catalog(&app);

    app.create_issue("rivers", &catalog.author, "Broken CSV").await;

    assert!(app.outbox.sent().is_empty());
}

// ===========================================================================
// Settings Routes
// ===========================================================================

#[tokio::test]
async fn settings_require_a_caller() {
    let app = app().await;

    let resp = app.get("/notification-settings", None).await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);

    let resp = app.get("/notification-settings?token=bogus", None).await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
    assert_eq!(resp.error_message(), "invalid or expired token");
}

#[tokio::test]
async fn first_read_materializes_default_settings() {
    let app = app().await;
    let user = app.create_user("reader");

    let resp = app
        .get("/notification-settings", Some(&user.access_token))
        .await;

    assert_eq!(resp.status, StatusCode::OK);
    let body = resp.json();
    assert_eq!(body["user_id"].as_str().unwrap(), user.id.to_string());
    assert_eq!(body["all_where_editor_admin"], true);
    assert_eq!(body["all_publishers"], false);
    assert!(body["include_publishers"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn update_deduplicates_publishers() {
    let app = app().await;
    let catalog = catalog(&app);
    let other = app.create_organization("roads-agency");
    let user = app.create_user("reader");

    let resp = app
        .put_json(
            "/notification-settings",
            json!({
                "include_publishers": [
                    other.id.to_string(),
                    catalog.organization.id.to_string(),
                    other.id.to_string()
                ]
            }),
            Some(&user.access_token),
        )
        .await;

    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(
        resp.json()["include_publishers"],
        json!([other.id.to_string(), catalog.organization.id.to_string()])
    );
}

#[tokio::test]
async fn update_rejects_unknown_fields() {
    let app = app().await;
    let user = app.create_user("reader");

    let resp = app
        .put_json(
            "/notification-settings",
            json!({ "user_id": uuid::Uuid::new_v4().to_string() }),
            Some(&user.access_token),
        )
        .await;

    assert_eq!(resp.status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn adding_a_publisher_is_idempotent() {
    let app = app().await;
    let catalog = catalog(&app);
    let user = app.create_user("reader");

    app.post(
        "/notification-settings/publishers/water-board",
        Some(&user.access_token),
    )
    .await;
    let resp = app
        .post(
            &format!(
                "/notification-settings/publishers/{}",
                catalog.organization.id
            ),
            Some(&user.access_token),
        )
        .await;

    assert_eq!(resp.status, StatusCode::OK);
    let body = resp.json();
    assert_eq!(
        body["include_publishers"],
        json!([catalog.organization.id.to_string()])
    );
    assert_eq!(body["all_where_editor_admin"], false);

    let resp = app
        .post(
            "/notification-settings/publishers/nobody",
            Some(&user.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
}

// ===========================================================================
// Emailed Settings Links
// ===========================================================================

#[tokio::test]
async fn emailed_code_opens_recipient_settings() {
    let app = app().await;
    let catalog = catalog(&app);
    app.create_issue("rivers", &catalog.author, "Broken CSV").await;
    let code = settings_code(&app.outbox.sent()[0].body);

    let resp = app
        .get(&format!("/notification-settings?token={}", code), None)
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(
        resp.json()["user_id"].as_str().unwrap(),
        catalog.editor.id.to_string()
    );

    let resp = app
        .put_json(
            &format!("/notification-settings?token={}", code),
            json!({ "all_where_editor_admin": false }),
            None,
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.json()["all_where_editor_admin"], false);
}

#[tokio::test]
async fn newer_email_invalidates_older_code() {
    let app = app().await;
    let catalog = catalog(&app);
    app.create_issue("rivers", &catalog.author, "Broken CSV").await;
    app.create_issue("rivers", &catalog.author, "Wrong units").await;
    let sent = app.outbox.sent();
    let old_code = settings_code(&sent[0].body);
    let new_code = settings_code(&sent[1].body);

    let resp = app
        .get(&format!("/notification-settings?token={}", old_code), None)
        .await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);

    let resp = app
        .get(&format!("/notification-settings?token={}", new_code), None)
        .await;
    assert_eq!(resp.status, StatusCode::OK);
}

#[tokio::test]
async fn codes_expire_after_thirty_days() {
    let app = app().await;
    let user = app.create_user("reader");
    let tokens = app.state.token_service();

    let fresh = tokens
        .issue_at(user.id, OffsetDateTime::now_utc() - Duration::days(30))
        .await
        .unwrap();
    let resp = app
        .get(&format!("/notification-settings?token={}", fresh.code), None)
        .await;
    assert_eq!(resp.status, StatusCode::OK);

    let stale = tokens
        .issue_at(user.id, OffsetDateTime::now_utc() - Duration::days(31))
        .await
        .unwrap();
    let resp = app
        .get(&format!("/notification-settings?token={}", stale.code), None)
        .await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
}
