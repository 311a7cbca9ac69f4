use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::catalog::UserSummary;
use crate::domain::issue::{
    Issue, IssueComment, IssueDetail, IssueDraft, IssueSearch, IssueUpdate, ReportedComment,
    SearchPage,
};
use crate::domain::notification::{NotificationPreference, PreferenceUpdate};
use crate::domain::report::ModerationState;
use crate::http::{AppError, AuthUser, MaybeAuthUser, SettingsUser};
use crate::AppState;

#[derive(Serialize)]
pub(crate) struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
pub struct ItemsResponse<T> {
    pub items: Vec<T>,
}

#[derive(Serialize)]
pub struct ReportsResponse {
    pub abuse_reports: Vec<Uuid>,
}

#[derive(Deserialize)]
pub struct ShowIssueQuery {
    pub include_reports: Option<bool>,
}

#[derive(Deserialize)]
pub struct CandidateQuery {
    #[serde(default)]
    pub q: String,
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommentRequest {
    pub comment: String,
}

pub(crate) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = match &state.db {
        Some(db) => match db.ping().await {
            Ok(()) => "ok",
            Err(err) => {
                tracing::warn!(error = ?err, "database ping failed");
                "degraded"
            }
        },
        None => "ok",
    };

    Json(HealthResponse { status })
}

pub async fn search_issues(
    auth: MaybeAuthUser,
    State(state): State<AppState>,
    Query(search): Query<IssueSearch>,
) -> Result<Json<SearchPage>, AppError> {
    let page = state.issue_service().search(auth.user_id(), search).await?;
    Ok(Json(page))
}

pub async fn organization_issues(
    Path(org): Path<String>,
    auth: MaybeAuthUser,
    State(state): State<AppState>,
    Query(mut search): Query<IssueSearch>,
) -> Result<Json<SearchPage>, AppError> {
    search.organization = Some(org);
    let page = state.issue_service().search(auth.user_id(), search).await?;
    Ok(Json(page))
}

pub async fn dataset_issues(
    Path(dataset): Path<String>,
    auth: MaybeAuthUser,
    State(state): State<AppState>,
    Query(mut search): Query<IssueSearch>,
) -> Result<Json<SearchPage>, AppError> {
    search.dataset = Some(dataset);
    let page = state.issue_service().search(auth.user_id(), search).await?;
    Ok(Json(page))
}

pub async fn create_issue(
    Path(dataset): Path<String>,
    auth: AuthUser,
    State(state): State<AppState>,
    Json(draft): Json<IssueDraft>,
) -> Result<(StatusCode, Json<Issue>), AppError> {
    let issue = state
        .issue_service()
        .create_issue(auth.user_id, &dataset, draft)
        .await?;
    Ok((StatusCode::CREATED, Json(issue)))
}

pub async fn show_issue(
    Path((dataset, number)): Path<(String, i32)>,
    auth: MaybeAuthUser,
    State(state): State<AppState>,
    Query(query): Query<ShowIssueQuery>,
) -> Result<Json<IssueDetail>, AppError> {
    let detail = state
        .issue_service()
        .show_issue(
            auth.user_id(),
            &dataset,
            number,
            query.include_reports.unwrap_or(false),
        )
        .await?;
    Ok(Json(detail))
}

pub async fn update_issue(
    Path((dataset, number)): Path<(String, i32)>,
    auth: AuthUser,
    State(state): State<AppState>,
    Json(update): Json<IssueUpdate>,
) -> Result<Json<Issue>, AppError> {
    let issue = state
        .issue_service()
        .update_issue(auth.user_id, &dataset, number, update)
        .await?;
    Ok(Json(issue))
}

pub async fn delete_issue(
    Path((dataset, number)): Path<(String, i32)>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    state
        .issue_service()
        .delete_issue(auth.user_id, &dataset, number)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn create_comment(
    Path((dataset, number)): Path<(String, i32)>,
    auth: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CommentRequest>,
) -> Result<(StatusCode, Json<IssueComment>), AppError> {
    let comment = state
        .issue_service()
        .create_comment(auth.user_id, &dataset, number, payload.comment)
        .await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

pub async fn list_issue_reports(
    Path((dataset, number)): Path<(String, i32)>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<ReportsResponse>, AppError> {
    let target = state.issue_service().target(&dataset, number, None).await?;
    let abuse_reports = state
        .moderation_service()
        .list_reports(target, auth.user_id)
        .await?;
    Ok(Json(ReportsResponse { abuse_reports }))
}

pub async fn report_issue(
    Path((dataset, number)): Path<(String, i32)>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<ModerationState>), AppError> {
    let target = state.issue_service().target(&dataset, number, None).await?;
    let moderation = state.moderation_service().report(target, auth.user_id).await?;
    Ok((StatusCode::CREATED, Json(moderation)))
}

pub async fn clear_issue_reports(
    Path((dataset, number)): Path<(String, i32)>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<ModerationState>, AppError> {
    let target = state.issue_service().target(&dataset, number, None).await?;
    let moderation = state.moderation_service().clear(target, auth.user_id).await?;
    Ok(Json(moderation))
}

pub async fn list_comment_reports(
    Path((dataset, number, comment_id)): Path<(String, i32, Uuid)>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<ReportsResponse>, AppError> {
    let target = state
        .issue_service()
        .target(&dataset, number, Some(comment_id))
        .await?;
    let abuse_reports = state
        .moderation_service()
        .list_reports(target, auth.user_id)
        .await?;
    Ok(Json(ReportsResponse { abuse_reports }))
}

pub async fn report_comment(
    Path((dataset, number, comment_id)): Path<(String, i32, Uuid)>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<ModerationState>), AppError> {
    let target = state
        .issue_service()
        .target(&dataset, number, Some(comment_id))
        .await?;
    let moderation = state.moderation_service().report(target, auth.user_id).await?;
    Ok((StatusCode::CREATED, Json(moderation)))
}

pub async fn clear_comment_reports(
    Path((dataset, number, comment_id)): Path<(String, i32, Uuid)>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<ModerationState>, AppError> {
    let target = state
        .issue_service()
        .target(&dataset, number, Some(comment_id))
        .await?;
    let moderation = state.moderation_service().clear(target, auth.user_id).await?;
    Ok(Json(moderation))
}

pub async fn reported_comments(
    Path(org): Path<String>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<ItemsResponse<ReportedComment>>, AppError> {
    let items = state
        .issue_service()
        .reported_comments(auth.user_id, &org)
        .await?;
    Ok(Json(ItemsResponse { items }))
}

pub async fn assignee_candidates(
    Path(org): Path<String>,
    _auth: AuthUser,
    Query(query): Query<CandidateQuery>,
    State(state): State<AppState>,
) -> Result<Json<ItemsResponse<UserSummary>>, AppError> {
    let items = state
        .issue_service()
        .assignee_candidates(&org, &query.q, query.limit)
        .await?;
    Ok(Json(ItemsResponse { items }))
}

pub async fn get_notification_settings(
    user: SettingsUser,
    State(state): State<AppState>,
) -> Result<Json<NotificationPreference>, AppError> {
    let record = state
        .preference_service()
        .find_or_create_default(user.user_id)
        .await?;
    Ok(Json(record))
}

pub async fn update_notification_settings(
    user: SettingsUser,
    State(state): State<AppState>,
    Json(update): Json<PreferenceUpdate>,
) -> Result<Json<NotificationPreference>, AppError> {
    let record = state
        .preference_service()
        .update(user.user_id, update)
        .await?;
    Ok(Json(record))
}

pub async fn add_notification_publisher(
    Path(org): Path<String>,
    user: SettingsUser,
    State(state): State<AppState>,
) -> Result<Json<NotificationPreference>, AppError> {
    let organization = state.issue_service().organization(&org).await?;
    let record = state
        .preference_service()
        .add_publisher(user.user_id, organization.id)
        .await?;
    Ok(Json(record))
}
