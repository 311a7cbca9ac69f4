use axum::extract::{FromRequestParts, Query};
use axum::http::header;
use axum::http::request::Parts;
use serde::Deserialize;
use uuid::Uuid;

use crate::app::auth::AuthService;
use crate::http::AppError;
use crate::AppState;

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
}

/// Anonymous when no Authorization header is sent. A header that is present
/// but invalid is still rejected.
#[derive(Debug, Clone)]
pub struct MaybeAuthUser(pub Option<AuthUser>);

impl MaybeAuthUser {
    pub fn user_id(&self) -> Option<Uuid> {
        self.0.as_ref().map(|user| user.user_id)
    }
}

/// Caller of the notification settings routes: a bearer token, or the
/// `?token=` code sent in notification emails.
#[derive(Debug, Clone)]
pub struct SettingsUser {
    pub user_id: Uuid,
}

#[derive(Deserialize)]
struct SettingsTokenQuery {
    token: Option<String>,
}

fn bearer_token(parts: &Parts) -> Result<Option<&str>, AppError> {
    let Some(value) = parts.headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| AppError::unauthorized("invalid Authorization header"))?;
    value
        .strip_prefix("Bearer ")
        .map(Some)
        .ok_or_else(|| AppError::unauthorized("invalid Authorization header"))
}

fn authenticate(state: &AppState, token: &str) -> Result<AuthUser, AppError> {
    let service = AuthService::new(state.paseto_access_key, state.token_issuer.clone());
    let session = service.authenticate_access_token(token).map_err(|err| {
        tracing::warn!(error = ?err, "failed to authenticate access token");
        AppError::unauthorized("invalid token")
    })?;

    let session = session.ok_or_else(|| AppError::unauthorized("invalid token"))?;
    Ok(AuthUser {
        user_id: session.user_id,
    })
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?
            .ok_or_else(|| AppError::unauthorized("missing Authorization header"))?;
        authenticate(state, token)
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for MaybeAuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        match bearer_token(parts)? {
            Some(token) => Ok(Self(Some(authenticate(state, token)?))),
            None => Ok(Self(None)),
        }
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for SettingsUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(token) = bearer_token(parts)? {
            let user = authenticate(state, token)?;
            return Ok(Self {
                user_id: user.user_id,
            });
        }

        let Query(query) = Query::<SettingsTokenQuery>::try_from_uri(&parts.uri)
            .map_err(|_| AppError::bad_request("invalid query string"))?;
        let code = query
            .token
            .filter(|code| !code.is_empty())
            .ok_or_else(|| AppError::unauthorized("missing Authorization header or token"))?;

        let user_id = state
            .token_service()
            .validate(&code)
            .await
            .map_err(AppError::from)?
            .ok_or_else(|| AppError::unauthorized("invalid or expired token"))?;
        Ok(Self { user_id })
    }
}
