//! Postgres Store Tests
//!
//! Runs the moderation, numbering, search, token and preference paths
//! against `PgStore` and `PgDirectory`. Each test creates its own database
//! and returns early when no server is configured.

mod common;

use std::collections::HashSet;

use axum::http::StatusCode;
use common::pg::{pg_app, PgTestApp};
use common::{settings, TestUser};
use dataset_issues::app::notifications::NotificationService;
use dataset_issues::config::IssueSettings;
use dataset_issues::domain::catalog::Organization;
use dataset_issues::domain::issue::IssueDraft;
use dataset_issues::domain::notification::NewPreference;
use serde_json::Value;
use uuid::Uuid;

struct Catalog {
    organization: Organization,
    editor: TestUser,
    author: TestUser,
}

async fn catalog(app: &PgTestApp) -> Catalog {
    let organization = app.create_organization("water-board").await;
    app.create_dataset("rivers", &organization).await;
    let editor = app.create_user("editor").await;
    app.add_member(&organization, &editor, "editor").await;
    let author = app.create_user("author").await;
    Catalog {
        organization,
        editor,
        author,
    }
}

fn report_path(number: i64) -> String {
    format!("/datasets/rivers/issues/{}/report", number)
}

fn titles(body: &Value) -> Vec<String> {
    body["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|issue| issue["title"].as_str().unwrap().to_string())
        .collect()
}

// ===========================================================================
// Abuse Reports
// ===========================================================================

#[tokio::test]
async fn strikes_hide_at_threshold_and_clear_unhides() {
    let Some(app) = PgTestApp::with_settings(IssueSettings {
        max_strikes: Some(2),
        ..settings()
    })
    .await
    else {
        return;
    };
    let catalog = catalog(&app).await;
    let number = app.create_issue("rivers", &catalog.author, "Buy pills").await;
    let first = app.create_user("first").await;
    let second = app.create_user("second").await;

    let resp = app.post(&report_path(number), Some(&first.access_token)).await;
    assert_eq!(resp.status, StatusCode::CREATED);
    assert_eq!(resp.json()["report_count"], 1);
    assert_eq!(resp.json()["visibility"], "visible");

    let resp = app.post(&report_path(number), Some(&second.access_token)).await;
    let body = resp.json();
    assert_eq!(body["report_count"], 2);
    assert_eq!(body["visibility"], "hidden");
    assert_eq!(body["abuse_status"], "unset");

    let resp = app.get("/datasets/rivers/issues", None).await;
    assert_eq!(resp.json()["count"], 0);

    let resp = app.delete(&report_path(number), Some(&second.access_token)).await;
    assert_eq!(resp.status, StatusCode::OK);
    let body = resp.json();
    assert_eq!(body["report_count"], 1);
    assert_eq!(body["visibility"], "visible");

    let resp = app.delete(&report_path(number), Some(&catalog.editor.access_token)).await;
    let body = resp.json();
    assert_eq!(body["report_count"], 0);
    assert_eq!(body["abuse_status"], "not_abuse");

    app.finish().await;
}

#[tokio::test]
async fn duplicate_report_is_a_conflict() {
    let Some(app) = pg_app().await else {
        return;
    };
    let catalog = catalog(&app).await;
    let number = app.create_issue("rivers", &catalog.author, "Broken CSV").await;
    let reporter = app.create_user("reporter").await;

    let resp = app.post(&report_path(number), Some(&reporter.access_token)).await;
    assert_eq!(resp.status, StatusCode::CREATED);
    let resp = app.post(&report_path(number), Some(&reporter.access_token)).await;
    assert_eq!(resp.status, StatusCode::CONFLICT);
    assert_eq!(
        resp.error_message(),
        "Issue has already been reported by this user"
    );

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM abuse_reports")
        .fetch_one(app.pool())
        .await
        .unwrap();
    assert_eq!(count, 1);

    app.finish().await;
}

#[tokio::test]
async fn moderator_report_on_comment_hides_it() {
    let Some(app) = pg_app().await else {
        return;
    };
    let catalog = catalog(&app).await;
    let number = app.create_issue("rivers", &catalog.author, "Broken CSV").await;
    app.create_comment("rivers", number, &catalog.author, "spam").await;
    let issue = app
        .get(&format!("/datasets/rivers/issues/{}", number), None)
        .await
        .json();
    let comment_id = issue["comments"][0]["id"].as_str().unwrap().to_string();

    let resp = app
        .post(
            &format!("/datasets/rivers/issues/{}/comments/{}/report", number, comment_id),
            Some(&catalog.editor.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::CREATED);
    assert_eq!(resp.json()["visibility"], "hidden");
    assert_eq!(resp.json()["abuse_status"], "abuse");

    let resp = app
        .get(
            "/organizations/water-board/reported-comments",
            Some(&catalog.editor.access_token),
        )
        .await;
    let items = resp.json()["items"].as_array().unwrap().clone();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["id"], comment_id.as_str());

    app.finish().await;
}

// ===========================================================================
// Issues and Search
// ===========================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_issues_get_distinct_numbers() {
    let Some(app) = pg_app().await else {
        return;
    };
    let catalog = catalog(&app).await;

    let handles: Vec<_> = (0..8)
        .map(|n| {
            let service = app.state.issue_service();
            let author = catalog.author.id;
            tokio::spawn(async move {
                service
                    .create_issue(
                        author,
                        "rivers",
                        IssueDraft {
                            title: format!("Issue {}", n),
                            ..Default::default()
                        },
                    )
                    .await
            })
        })
        .collect();

    let mut numbers = Vec::new();
    for handle in handles {
        numbers.push(handle.await.unwrap().unwrap().number);
    }
    numbers.sort();
    assert_eq!(numbers, (1..=8).collect::<Vec<i32>>());

    app.finish().await;
}

#[tokio::test]
async fn search_sorts_on_comment_aggregates() {
    let Some(app) = pg_app().await else {
        return;
    };
    let catalog = catalog(&app).await;
    let quiet = app.create_issue("rivers", &catalog.author, "Quiet").await;
    let busy = app.create_issue("rivers", &catalog.author, "Busy").await;
    let recent = app.create_issue("rivers", &catalog.author, "Recent").await;
    assert_eq!(quiet, 1);
    app.create_comment("rivers", busy, &catalog.editor, "one").await;
    app.create_comment("rivers", busy, &catalog.editor, "two").await;
    app.create_comment("rivers", recent, &catalog.editor, "three").await;

    let resp = app.get("/datasets/rivers/issues?sort=most_commented", None).await;
    let body = resp.json();
    assert_eq!(titles(&body), vec!["Busy", "Recent", "Quiet"]);
    assert_eq!(body["results"][0]["comment_count"], 2);

    let resp = app.get("/datasets/rivers/issues?sort=recently_updated", None).await;
    assert_eq!(titles(&resp.json()), vec!["Recent", "Busy", "Quiet"]);

    let resp = app
        .get("/datasets/rivers/issues?sort=least_recently_updated", None)
        .await;
    assert_eq!(titles(&resp.json()), vec!["Quiet", "Busy", "Recent"]);

    let resp = app.get("/datasets/rivers/issues?q=%25", None).await;
    assert_eq!(resp.json()["count"], 0);

    let resp = app
        .get("/datasets/rivers/issues?q=bus&include_datasets=true", None)
        .await;
    let body = resp.json();
    assert_eq!(titles(&body), vec!["Busy"]);
    assert_eq!(body["results"][0]["dataset"]["name"], "rivers");

    app.finish().await;
}

#[tokio::test]
async fn autocomplete_reads_catalog_memberships() {
    let Some(app) = pg_app().await else {
        return;
    };
    let catalog = catalog(&app).await;
    let admin = app.create_user("edna").await;
    app.add_member(&catalog.organization, &admin, "admin").await;
    let member = app.create_user("edgar").await;
    app.add_member(&catalog.organization, &member, "member").await;

    let resp = app
        .get(
            "/organizations/water-board/users/autocomplete?q=ED",
            Some(&catalog.author.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    let items = resp.json()["items"].as_array().unwrap().clone();
    let names: Vec<&str> = items.iter().map(|user| user["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["editor", "edna"]);
    assert_eq!(items[1]["fullname"], "edna (test)");

    let resp = app
        .get(
            "/organizations/water-board/users/autocomplete?q=e_",
            Some(&catalog.author.access_token),
        )
        .await;
    assert_eq!(resp.json()["items"].as_array().unwrap().len(), 0);

    app.finish().await;
}

// ===========================================================================
// Notification Settings
// ===========================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_tokens_leave_one_live_code() {
    let Some(app) = pg_app().await else {
        return;
    };
    let user_id = Uuid::new_v4();
    let tokens = app.state.token_service();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let tokens = tokens.clone();
            tokio::spawn(async move { tokens.issue(user_id).await })
        })
        .collect();
    let mut codes = Vec::new();
    for handle in handles {
        codes.push(handle.await.unwrap().unwrap().code);
    }

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notification_tokens WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(app.pool())
        .await
        .unwrap();
    assert_eq!(rows, 1);

    let mut live = 0;
    for code in &codes {
        if tokens.validate(code).await.unwrap() == Some(user_id) {
            live += 1;
        }
    }
    assert_eq!(live, 1);

    app.finish().await;
}

#[tokio::test]
async fn reissued_token_replaces_previous_code() {
    let Some(app) = pg_app().await else {
        return;
    };
    let user_id = Uuid::new_v4();
    let tokens = app.state.token_service();

    let first = tokens.issue(user_id).await.unwrap();
    let second = tokens.issue(user_id).await.unwrap();

    assert_eq!(tokens.validate(&first.code).await.unwrap(), None);
    assert_eq!(tokens.validate(&second.code).await.unwrap(), Some(user_id));

    app.finish().await;
}

#[tokio::test]
async fn recipients_follow_settings_then_membership() {
    let Some(app) = pg_app().await else {
        return;
    };
    let catalog = catalog(&app).await;
    let fan = app.create_user("fan").await;
    let watcher = app.create_user("watcher").await;
    let preferences = app.state.preference_service();
    preferences
        .create(NewPreference {
            user_id: Some(fan.id),
            all_publishers: true,
            ..Default::default()
        })
        .await
        .unwrap();
    preferences
        .add_publisher(watcher.id, catalog.organization.id)
        .await
        .unwrap();

    let notifications = NotificationService::new(
        app.state.preference_service(),
        app.state.token_service(),
        app.state.directory.clone(),
        app.state.mailer.clone(),
        app.state.settings.clone(),
    );
    let recipients = notifications
        .resolve_recipients(catalog.organization.id)
        .await
        .unwrap();

    assert_eq!(recipients, vec![fan.id, watcher.id, catalog.editor.id]);

    app.finish().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_publisher_opt_ins_are_all_kept() {
    let Some(app) = pg_app().await else {
        return;
    };
    let user_id = Uuid::new_v4();
    let publishers: Vec<Uuid> = (0..12).map(|_| Uuid::new_v4()).collect();
    let preferences = app.state.preference_service();

    let handles: Vec<_> = publishers
        .iter()
        .map(|publisher| {
            let preferences = preferences.clone();
            let publisher = *publisher;
            tokio::spawn(async move { preferences.add_publisher(user_id, publisher).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let stored: HashSet<Uuid> = preferences
        .find(user_id)
        .await
        .unwrap()
        .unwrap()
        .include_publishers
        .into_iter()
        .collect();
    assert_eq!(stored, publishers.into_iter().collect::<HashSet<Uuid>>());

    app.finish().await;
}
