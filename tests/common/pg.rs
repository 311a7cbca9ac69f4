//! Harness over a real Postgres server. Every test gets its own database,
//! migrated from scratch, plus the catalog tables `PgDirectory` reads.
//!
//! Set `TEST_DATABASE_URL` (or `DATABASE_URL`) to any database on the
//! server; the harness connects to its `postgres` database to create the
//! per-test ones. Without either variable the tests return early.

use std::sync::Arc;

use axum::http::Method;
use axum::Router;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use dataset_issues::config::{IssueSettings, StoreBackend};
use dataset_issues::domain::catalog::{Dataset, Organization};
use dataset_issues::infra::db::Db;
use dataset_issues::infra::mail::Outbox;
use dataset_issues::AppState;

use super::{send, settings, test_config, test_user, TestResponse, TestUser};

// Normally owned by the catalog. Only the columns the directory reads.
const CATALOG_SCHEMA: &str = r#"
CREATE TABLE "user" (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    fullname TEXT,
    email TEXT,
    sysadmin BOOLEAN NOT NULL DEFAULT false,
    state TEXT NOT NULL DEFAULT 'active'
);
CREATE TABLE "group" (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    is_organization BOOLEAN NOT NULL DEFAULT true,
    state TEXT NOT NULL DEFAULT 'active'
);
CREATE TABLE package (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    title TEXT,
    owner_org TEXT,
    state TEXT NOT NULL DEFAULT 'active'
);
CREATE TABLE member (
    id SERIAL PRIMARY KEY,
    table_id TEXT NOT NULL,
    table_name TEXT NOT NULL,
    group_id TEXT NOT NULL,
    capacity TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'active'
);
"#;

pub struct PgTestApp {
    router: Router,
    pub state: AppState,
    pub db: Db,
    pub outbox: Arc<Outbox>,
    base_url: String,
    database: String,
}

fn server_url() -> Option<String> {
    std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .ok()
        .filter(|url| !url.trim().is_empty())
}

/// `None` when no server is configured.
pub async fn pg_app() -> Option<PgTestApp> {
    PgTestApp::with_settings(settings()).await
}

impl PgTestApp {
    pub async fn with_settings(issues: IssueSettings) -> Option<Self> {
        let Some(url) = server_url() else {
            eprintln!("TEST_DATABASE_URL not set, skipping postgres test");
            return None;
        };
        let base_url = url
            .split('?')
            .next()
            .and_then(|url| url.rsplit_once('/'))
            .map(|(base, _)| base.to_string())
            .expect("database url must name a database");
        let database = format!("issues_test_{}", Uuid::new_v4().simple());

        // ---- Create the per-test database ----
        let admin_pool = PgPool::connect(&format!("{}/postgres", base_url))
            .await
            .expect("cannot connect to postgres admin database");
        // CREATE DATABASE cannot run inside a transaction
        sqlx::query(&format!("CREATE DATABASE \"{}\"", database))
            .execute(&admin_pool)
            .await
            .expect("failed to create test database");
        admin_pool.close().await;

        // ---- Connect and migrate ----
        let mut config = test_config(issues);
        config.store_backend = StoreBackend::Postgres;
        config.database_url = Some(format!("{}/{}", base_url, database));
        config.db_max_connections = 8;
        config.db_connect_timeout_seconds = 5;

        let db = Db::connect(&config)
            .await
            .expect("cannot connect to test database");
        db.migrate().await.expect("migrations failed");
        sqlx::raw_sql(CATALOG_SCHEMA)
            .execute(db.pool())
            .await
            .expect("failed to create catalog tables");

        let outbox = Arc::new(Outbox::new());
        let state = AppState::postgres(db.clone(), outbox.clone(), &config);
        let router = dataset_issues::http::router(state.clone());

        Some(PgTestApp {
            router,
            state,
            db,
            outbox,
            base_url,
            database,
        })
    }

    /// Closes the pool and drops the test database.
    pub async fn finish(self) {
        self.db.pool().close().await;
        let admin_pool = PgPool::connect(&format!("{}/postgres", self.base_url))
            .await
            .expect("cannot connect to postgres admin database");
        sqlx::query(&format!("DROP DATABASE IF EXISTS \"{}\"", self.database))
            .execute(&admin_pool)
            .await
            .expect("failed to drop test database");
        admin_pool.close().await;
    }

    pub fn pool(&self) -> &PgPool {
        self.db.pool()
    }

    // ------------------------------------------------------------------
    // HTTP helpers
    // ------------------------------------------------------------------
    pub async fn get(&self, path: &str, token: Option<&str>) -> TestResponse {
        send(&self.router, Method::GET, path, None, token).await
    }

    pub async fn post(&self, path: &str, token: Option<&str>) -> TestResponse {
        send(&self.router, Method::POST, path, None, token).await
    }

    pub async fn post_json(&self, path: &str, body: Value, token: Option<&str>) -> TestResponse {
        send(&self.router, Method::POST, path, Some(body), token).await
    }

    pub async fn delete(&self, path: &str, token: Option<&str>) -> TestResponse {
        send(&self.router, Method::DELETE, path, None, token).await
    }

    // ------------------------------------------------------------------
    // Catalog rows
    // ------------------------------------------------------------------
    pub async fn create_user(&self, name: &str) -> TestUser {
        self.insert_user(name, false).await
    }

    pub async fn create_sysadmin(&self, name: &str) -> TestUser {
        self.insert_user(name, true).await
    }

    async fn insert_user(&self, name: &str, sysadmin: bool) -> TestUser {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO \"user\" (id, name, fullname, email, sysadmin) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(id.to_string())
        .bind(name)
        .bind(format!("{} (test)", name))
        .bind(format!("{}@example.org", name))
        .bind(sysadmin)
        .execute(self.pool())
        .await
        .expect("failed to insert user");
        test_user(id, name)
    }

    pub async fn create_organization(&self, name: &str) -> Organization {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO \"group\" (id, name) VALUES ($1, $2)")
            .bind(id.to_string())
            .bind(name)
            .execute(self.pool())
            .await
            .expect("failed to insert organization");
        Organization {
            id,
            name: name.to_string(),
        }
    }

    pub async fn create_dataset(&self, name: &str, organization: &Organization) -> Dataset {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO package (id, name, owner_org) VALUES ($1, $2, $3)")
            .bind(id.to_string())
            .bind(name)
            .bind(organization.id.to_string())
            .execute(self.pool())
            .await
            .expect("failed to insert dataset");
        Dataset {
            id,
            name: name.to_string(),
            title: None,
            owner_org: Some(organization.id),
        }
    }

    pub async fn add_member(&self, organization: &Organization, user: &TestUser, capacity: &str) {
        sqlx::query(
            "INSERT INTO member (table_id, table_name, group_id, capacity) VALUES ($1, 'user', $2, $3)",
        )
        .bind(user.id.to_string())
        .bind(organization.id.to_string())
        .bind(capacity)
        .execute(self.pool())
        .await
        .expect("failed to insert member");
    }

    /// Opens an issue through the API and returns its number.
    pub async fn create_issue(&self, dataset: &str, user: &TestUser, title: &str) -> i64 {
        let resp = self
            .post_json(
                &format!("/datasets/{}/issues", dataset),
                serde_json::json!({ "title": title }),
                Some(&user.access_token),
            )
            .await;
        assert_eq!(resp.status.as_u16(), 201, "{}", resp.error_message());
        resp.json()["number"].as_i64().unwrap()
    }

    pub async fn create_comment(&self, dataset: &str, number: i64, user: &TestUser, comment: &str) {
        let resp = self
            .post_json(
                &format!("/datasets/{}/issues/{}/comments", dataset, number),
                serde_json::json!({ "comment": comment }),
                Some(&user.access_token),
            )
            .await;
        assert_eq!(resp.status.as_u16(), 201, "{}", resp.error_message());
    }
}
