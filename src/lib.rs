pub mod app;
pub mod config;
pub mod domain;
pub mod http;
pub mod infra;

use std::sync::Arc;

use crate::app::directory::Directory;
use crate::app::issues::IssueService;
use crate::app::mailer::Mailer;
use crate::app::moderation::ModerationService;
use crate::app::notifications::NotificationService;
use crate::app::preferences::PreferenceService;
use crate::app::store::{IssueStore, PreferenceStore, ReportStore, TokenStore};
use crate::app::tokens::TokenService;
use crate::config::{AppConfig, IssueSettings};
use crate::infra::db::Db;
use crate::infra::memory::{MemoryDirectory, MemoryStore};
use crate::infra::postgres::{PgDirectory, PgStore};

#[derive(Clone)]
pub struct AppState {
    pub issues: Arc<dyn IssueStore>,
    pub reports: Arc<dyn ReportStore>,
    pub preferences: Arc<dyn PreferenceStore>,
    pub tokens: Arc<dyn TokenStore>,
    pub directory: Arc<dyn Directory>,
    pub mailer: Arc<dyn Mailer>,
    /// Set for the postgres backend; checked by `/health`.
    pub db: Option<Db>,
    pub settings: IssueSettings,
    pub paseto_access_key: [u8; 32],
    pub token_issuer: String,
}

impl AppState {
    pub fn postgres(db: Db, mailer: Arc<dyn Mailer>, config: &AppConfig) -> Self {
        let store = Arc::new(PgStore::new(db.clone()));
        let directory = Arc::new(PgDirectory::new(
            db.clone(),
            config.issues.update_dataset_roles.clone(),
        ));
        Self {
            issues: store.clone(),
            reports: store.clone(),
            preferences: store.clone(),
            tokens: store,
            directory,
            mailer,
            db: Some(db),
            settings: config.issues.clone(),
            paseto_access_key: config.paseto_access_key,
            token_issuer: config.token_issuer.clone(),
        }
    }

    pub fn memory(
        store: Arc<MemoryStore>,
        directory: Arc<MemoryDirectory>,
        mailer: Arc<dyn Mailer>,
        config: &AppConfig,
    ) -> Self {
        Self {
            issues: store.clone(),
            reports: store.clone(),
            preferences: store.clone(),
            tokens: store,
            directory,
            mailer,
            db: None,
            settings: config.issues.clone(),
            paseto_access_key: config.paseto_access_key,
            token_issuer: config.token_issuer.clone(),
        }
    }

    pub fn preference_service(&self) -> PreferenceService {
        PreferenceService::new(self.preferences.clone())
    }

    pub fn token_service(&self) -> TokenService {
        TokenService::new(self.tokens.clone(), self.settings.notification_token_ttl_days)
    }

    pub fn moderation_service(&self) -> ModerationService {
        ModerationService::new(
            self.reports.clone(),
            self.directory.clone(),
            self.settings.max_strikes,
        )
    }

    pub fn issue_service(&self) -> IssueService {
        let notifications = NotificationService::new(
            self.preference_service(),
            self.token_service(),
            self.directory.clone(),
            self.mailer.clone(),
            self.settings.clone(),
        );
        IssueService::new(
            self.issues.clone(),
            self.reports.clone(),
            self.directory.clone(),
            notifications,
        )
    }
}
