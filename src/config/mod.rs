use anyhow::{anyhow, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::net::SocketAddr;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "postgres" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            other => Err(anyhow!("unknown STORE_BACKEND: {}", other)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub http_addr: String,
    pub store_backend: StoreBackend,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub db_connect_timeout_seconds: u64,
    pub db_idle_timeout_seconds: u64,
    pub db_max_lifetime_seconds: u64,
    pub paseto_access_key: [u8; 32],
    pub token_issuer: String,
    pub mail_queue: Option<MailQueueConfig>,
    pub issues: IssueSettings,
}

#[derive(Clone, Debug)]
pub struct MailQueueConfig {
    pub endpoint: String,
    pub region: String,
    pub name: String,
}

/// Behaviour switches of the issues service itself.
#[derive(Clone, Debug)]
pub struct IssueSettings {
    /// Reports from non-moderators needed to hide an item. `None` disables
    /// automatic hiding.
    pub max_strikes: Option<u32>,
    pub send_email_notifications: bool,
    /// Organization capacities that grant update rights on datasets.
    pub update_dataset_roles: Vec<String>,
    pub site_title: String,
    pub site_url: String,
    pub mail_from: String,
    pub notification_token_ttl_days: i64,
}

impl Default for IssueSettings {
    fn default() -> Self {
        Self {
            max_strikes: None,
            send_email_notifications: false,
            update_dataset_roles: vec!["admin".to_string(), "editor".to_string()],
            site_title: "Data Catalog".to_string(),
            site_url: "http://localhost:5000".to_string(),
            mail_from: "noreply@localhost".to_string(),
            notification_token_ttl_days: 30,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let http_addr = env_or("HTTP_ADDR", "0.0.0.0:8080");
        let _parsed_http_addr = SocketAddr::from_str(&http_addr)
            .map_err(|err| anyhow!("invalid HTTP_ADDR: {}", err))?;
        let store_backend: StoreBackend = env_or_parse("STORE_BACKEND", "postgres")?;

        let database_url = std::env::var("DATABASE_URL").ok();
        if store_backend == StoreBackend::Postgres && database_url.is_none() {
            return Err(anyhow!("missing required env var: DATABASE_URL"));
        }

        let mail_queue = match env_non_empty("MAIL_QUEUE_NAME") {
            Some(name) => Some(MailQueueConfig {
                endpoint: env_or_err("MAIL_QUEUE_ENDPOINT")?,
                region: env_or("MAIL_QUEUE_REGION", "fr-par"),
                name,
            }),
            None => None,
        };

        let defaults = IssueSettings::default();
        let issues = IssueSettings {
            max_strikes: parse_max_strikes(std::env::var("MAX_STRIKES").ok().as_deref())?,
            send_email_notifications: env_or_parse("SEND_EMAIL_NOTIFICATIONS", "false")?,
            update_dataset_roles: parse_roles(&env_or("UPDATE_DATASET_ROLES", "admin,editor")),
            site_title: env_or("SITE_TITLE", &defaults.site_title),
            site_url: env_or("SITE_URL", &defaults.site_url),
            mail_from: env_or("MAIL_FROM", &defaults.mail_from),
            notification_token_ttl_days: env_or_parse("NOTIFICATION_TOKEN_TTL_DAYS", "30")?,
        };

        Ok(Self {
            http_addr,
            store_backend,
            database_url,
            db_max_connections: env_or_parse("DB_MAX_CONNECTIONS", "25")?,
            db_connect_timeout_seconds: env_or_parse("DB_CONNECT_TIMEOUT_SECONDS", "5")?,
            db_idle_timeout_seconds: env_or_parse("DB_IDLE_TIMEOUT_SECONDS", "300")?,
            db_max_lifetime_seconds: env_or_parse("DB_MAX_LIFETIME_SECONDS", "1800")?,
            paseto_access_key: env_key_32("PASETO_ACCESS_KEY")?,
            token_issuer: env_or("TOKEN_ISSUER", "catalog"),
            mail_queue,
            issues,
        })
    }
}

/// Empty and zero both mean "no threshold".
pub fn parse_max_strikes(value: Option<&str>) -> Result<Option<u32>> {
    let Some(value) = value.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(None);
    };
    let max = value
        .parse::<u32>()
        .map_err(|err| anyhow!("invalid MAX_STRIKES: {}", err))?;
    Ok(Some(max).filter(|max| *max > 0))
}

fn parse_roles(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|role| !role.is_empty())
        .map(str::to_string)
        .collect()
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn env_or_err(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| anyhow!("missing required env var: {}", key))
}

fn env_or_parse<T>(key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    let value = std::env::var(key).unwrap_or_else(|_| default.to_string());
    value
        .parse::<T>()
        .map_err(|err| anyhow!("invalid {}: {}", key, err))
}

fn env_key_32(key: &str) -> Result<[u8; 32]> {
    let value = env_or_err(key)?;
    let decoded = STANDARD
        .decode(value.as_bytes())
        .map_err(|err| anyhow!("invalid {}: {}", key, err))?;
    if decoded.len() != 32 {
        return Err(anyhow!("invalid {}: expected 32 bytes", key));
    }
    let mut key_bytes = [0u8; 32];
    key_bytes.copy_from_slice(&decoded);
    Ok(key_bytes)
}
