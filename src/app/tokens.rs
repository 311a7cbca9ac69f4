use std::sync::Arc;

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::app::error::ServiceResult;
use crate::app::store::TokenStore;
use crate::domain::notification::{IssuedToken, NotificationToken};

const CODE_LEN: usize = 32;

/// Issues the codes that let a user change their notification settings from
/// an email link without signing in.
#[derive(Clone)]
pub struct TokenService {
    tokens: Arc<dyn TokenStore>,
    ttl_days: i64,
}

impl TokenService {
    pub fn new(tokens: Arc<dyn TokenStore>, ttl_days: i64) -> Self {
        Self { tokens, ttl_days }
    }

    /// Creates a token for the user, invalidating any earlier one.
    pub async fn issue(&self, user_id: Uuid) -> ServiceResult<IssuedToken> {
        self.issue_at(user_id, OffsetDateTime::now_utc()).await
    }

    pub async fn issue_at(
        &self,
        user_id: Uuid,
        created_at: OffsetDateTime,
    ) -> ServiceResult<IssuedToken> {
        let code = generate_code();
        let token = NotificationToken {
            id: Uuid::new_v4(),
            user_id,
            code_hash: hash_code(&code),
            created_at,
        };
        self.tokens.replace_token(&token).await?;

        tracing::debug!(user_id = %user_id, "notification token issued");
        Ok(IssuedToken { code, token })
    }

    /// Returns the owner of a live code. Age is checked here, expired rows
    /// are left in place until the next `issue` for that user.
    pub async fn validate(&self, code: &str) -> ServiceResult<Option<Uuid>> {
        if code.is_empty() {
            return Ok(None);
        }
        let Some(token) = self.tokens.find_token(&hash_code(code)).await? else {
            return Ok(None);
        };

        let age = OffsetDateTime::now_utc() - token.created_at;
        if age.whole_days() > self.ttl_days {
            return Ok(None);
        }
        Ok(Some(token.user_id))
    }

    pub fn ttl(&self) -> Duration {
        Duration::days(self.ttl_days)
    }
}

fn generate_code() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(CODE_LEN)
        .map(char::from)
        .collect()
}

fn hash_code(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    hex::encode(hasher.finalize())
}
