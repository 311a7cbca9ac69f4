use axum::Router;

use crate::AppState;

mod auth;
mod error;
mod handlers;
mod routes;

pub use auth::{AuthUser, MaybeAuthUser, SettingsUser};
pub use error::AppError;

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(routes::health())
        .merge(routes::issues())
        .merge(routes::moderation())
        .merge(routes::notification_settings())
        .with_state(state)
}
