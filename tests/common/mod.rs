#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use dataset_issues::app::auth::AuthService;
use dataset_issues::config::{AppConfig, IssueSettings, StoreBackend};
use dataset_issues::domain::catalog::{Dataset, Organization};
use dataset_issues::infra::mail::Outbox;
use dataset_issues::infra::memory::{MemoryDirectory, MemoryStore};
use dataset_issues::AppState;

pub mod pg;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

// Test-only key, never used outside this harness.
const TEST_PASETO_ACCESS_KEY: [u8; 32] = *b"0123456789abcdef0123456789abcdef";
const TEST_TOKEN_ISSUER: &str = "catalog-test";

/// Config shared by both backends. Each harness fills in the store fields.
pub fn test_config(issues: IssueSettings) -> AppConfig {
    AppConfig {
        http_addr: "127.0.0.1:0".to_string(),
        store_backend: StoreBackend::Memory,
        database_url: None,
        db_max_connections: 1,
        db_connect_timeout_seconds: 1,
        db_idle_timeout_seconds: 0,
        db_max_lifetime_seconds: 60,
        paseto_access_key: TEST_PASETO_ACCESS_KEY,
        token_issuer: TEST_TOKEN_ISSUER.to_string(),
        mail_queue: None,
        issues,
    }
}

/// Mints an access token for the user the way the catalog does.
pub fn test_user(id: Uuid, name: &str) -> TestUser {
    let access_token = AuthService::new(TEST_PASETO_ACCESS_KEY, TEST_TOKEN_ISSUER)
        .issue_access_token(id, 15)
        .expect("failed to issue access token");
    TestUser {
        id,
        name: name.to_string(),
        access_token,
    }
}

// ---------------------------------------------------------------------------
// Low-level request helper
// ---------------------------------------------------------------------------

pub async fn send(
    router: &Router,
    method: Method,
    path: &str,
    body: Option<Value>,
    token: Option<&str>,
) -> TestResponse {
    let mut builder = Request::builder()
        .method(method)
        .uri(path)
        .header("host", "localhost");

    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }

    let request = if let Some(body) = body {
        builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap()
    } else {
        builder.body(Body::empty()).unwrap()
    };

    let response = router
        .clone()
        .oneshot(request)
        .await
        .expect("oneshot failed");

    let status = response.status();
    let body_bytes = response
        .into_body()
        .collect()
        .await
        .expect("failed to collect body")
        .to_bytes();

    TestResponse { status, body_bytes }
}

// ---------------------------------------------------------------------------
// TestApp: one fresh in-memory backend per test
// ---------------------------------------------------------------------------

pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub directory: Arc<MemoryDirectory>,
    pub outbox: Arc<Outbox>,
}

pub struct TestResponse {
    pub status: StatusCode,
    body_bytes: bytes::Bytes,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body_bytes).unwrap_or(Value::Null)
    }

    pub fn error_message(&self) -> String {
        self.json()["error"].as_str().unwrap_or("").to_string()
    }
}

pub struct TestUser {
    pub id: Uuid,
    pub name: String,
    pub access_token: String,
}

/// Default settings with email notifications switched on.
pub fn settings() -> IssueSettings {
    IssueSettings {
        send_email_notifications: true,
        site_title: "Open Data Test".to_string(),
        site_url: "https://data.example.org".to_string(),
        mail_from: "issues@example.org".to_string(),
        ..IssueSettings::default()
    }
}

pub async fn app() -> TestApp {
    TestApp::with_settings(settings())
}

impl TestApp {
    pub fn with_settings(issues: IssueSettings) -> Self {
        let config = test_config(issues);

        let store = Arc::new(MemoryStore::new());
        let directory = Arc::new(MemoryDirectory::new(
            config.issues.update_dataset_roles.clone(),
        ));
        let outbox = Arc::new(Outbox::new());
        let state = AppState::memory(store.clone(), directory.clone(), outbox.clone(), &config);
        let router = dataset_issues::http::router(state.clone());

        TestApp {
            router,
            state,
            store,
            directory,
            outbox,
        }
    }

    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> TestResponse {
        send(&self.router, method, path, body, token).await
    }

    // ------------------------------------------------------------------
    // Convenience HTTP helpers
    // ------------------------------------------------------------------
    pub async fn get(&self, path: &str, token: Option<&str>) -> TestResponse {
        self.request(Method::GET, path, None, token).await
    }

    pub async fn post(&self, path: &str, token: Option<&str>) -> TestResponse {
        self.request(Method::POST, path, None, token).await
    }

    pub async fn post_json(&self, path: &str, body: Value, token: Option<&str>) -> TestResponse {
        self.request(Method::POST, path, Some(body), token).await
    }

    pub async fn patch_json(&self, path: &str, body: Value, token: Option<&str>) -> TestResponse {
        self.request(Method::PATCH, path, Some(body), token).await
    }

    pub async fn put_json(&self, path: &str, body: Value, token: Option<&str>) -> TestResponse {
        self.request(Method::PUT, path, Some(body), token).await
    }

    pub async fn delete(&self, path: &str, token: Option<&str>) -> TestResponse {
        self.request(Method::DELETE, path, None, token).await
    }

    // ------------------------------------------------------------------
    // Test data helpers
    // ------------------------------------------------------------------

    /// Registers a catalog user and mints an access token for them the way
    /// the catalog does.
    pub fn create_user(&self, name: &str) -> TestUser {
        let user = self.directory.add_user(name);
        self.user_with_token(user.id, name)
    }

    pub fn create_sysadmin(&self, name: &str) -> TestUser {
        let user = self.directory.add_sysadmin(name);
        self.user_with_token(user.id, name)
    }

    fn user_with_token(&self, id: Uuid, name: &str) -> TestUser {
        test_user(id, name)
    }

    pub fn create_organization(&self, name: &str) -> Organization {
        self.directory.add_organization(name)
    }

    pub fn create_dataset(&self, name: &str, organization: &Organization) -> Dataset {
        self.directory.add_dataset(name, Some(organization.id))
    }

    pub fn add_member(&self, organization: &Organization, user: &TestUser, capacity: &str) {
        self.directory.add_member(organization.id, user.id, capacity);
    }

    /// Opens an issue through the API and returns its number.
    pub async fn create_issue(&self, dataset: &str, user: &TestUser, title: &str) -> i64 {
        let resp = self
            .post_json(
                &format!("/datasets/{}/issues", dataset),
                json!({ "title": title }),
                Some(&user.access_token),
            )
            .await;
        assert_eq!(resp.status, StatusCode::CREATED, "{}", resp.error_message());
        resp.json()["number"].as_i64().unwrap()
    }

    /// Comments on an issue through the API and returns the comment id.
    pub async fn create_comment(
        &self,
        dataset: &str,
        number: i64,
        user: &TestUser,
        comment: &str,
    ) -> String {
        let resp = self
            .post_json(
                &format!("/datasets/{}/issues/{}/comments", dataset, number),
                json!({ "comment": comment }),
                Some(&user.access_token),
            )
            .await;
        assert_eq!(resp.status, StatusCode::CREATED, "{}", resp.error_message());
        resp.json()["id"].as_str().unwrap().to_string()
    }
}
