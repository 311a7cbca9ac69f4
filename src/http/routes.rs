use axum::{routing::get, routing::post, Router};

use crate::AppState;
use crate::http::handlers;

pub fn health() -> Router<AppState> {
    Router::new().route("/health", get(handlers::health))
}

pub fn issues() -> Router<AppState> {
    Router::new()
        .route("/issues", get(handlers::search_issues))
        .route("/organizations/:org/issues", get(handlers::organization_issues))
        .route(
            "/organizations/:org/users/autocomplete",
            get(handlers::assignee_candidates),
        )
        .route(
            "/datasets/:dataset/issues",
            get(handlers::dataset_issues).post(handlers::create_issue),
        )
        .route(
            "/datasets/:dataset/issues/:number",
            get(handlers::show_issue)
                .patch(handlers::update_issue)
                .delete(handlers::delete_issue),
        )
        .route(
            "/datasets/:dataset/issues/:number/comments",
            post(handlers::create_comment),
        )
}

pub fn moderation() -> Router<AppState> {
    Router::new()
        .route(
            "/datasets/:dataset/issues/:number/report",
            get(handlers::list_issue_reports)
                .post(handlers::report_issue)
                .delete(handlers::clear_issue_reports),
        )
        .route(
            "/datasets/:dataset/issues/:number/comments/:comment_id/report",
            get(handlers::list_comment_reports)
                .post(handlers::report_comment)
                .delete(handlers::clear_comment_reports),
        )
        .route(
            "/organizations/:org/reported-comments",
            get(handlers::reported_comments),
        )
}

pub fn notification_settings() -> Router<AppState> {
    Router::new()
        .route(
            "/notification-settings",
            get(handlers::get_notification_settings).put(handlers::update_notification_settings),
        )
        .route(
            "/notification-settings/publishers/:org",
            post(handlers::add_notification_publisher),
        )
}
