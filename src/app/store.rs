//! Persistence seams. `infra::postgres` and `infra::memory` implement every
//! trait here; multi-row writes are atomic in both.

use async_trait::async_trait;
use uuid::Uuid;

use crate::app::error::StoreError;
use crate::app::moderation::StrikePolicy;
use crate::domain::issue::{
    Issue, IssueComment, IssueQuery, IssueSummary, NewComment, NewIssue, ReportedComment,
};
use crate::domain::notification::{NotificationPreference, NotificationToken, PreferenceUpdate};
use crate::domain::report::{ClearScope, ModerationState, ReportTarget};

#[async_trait]
pub trait IssueStore: Send + Sync {
    /// Inserts the issue with the next free number of its dataset.
    async fn create_issue(&self, new: NewIssue) -> Result<Issue, StoreError>;

    async fn find_issue(&self, dataset_id: Uuid, number: i32) -> Result<Option<Issue>, StoreError>;

    /// Persists the caller-editable columns of `issue`.
    async fn save_issue(&self, issue: &Issue) -> Result<(), StoreError>;

    /// Removes the issue together with its comments and reports.
    async fn delete_issue(&self, issue_id: Uuid) -> Result<bool, StoreError>;

    /// Returns one page of matches and the total match count.
    async fn search_issues(
        &self,
        query: &IssueQuery,
    ) -> Result<(Vec<IssueSummary>, i64), StoreError>;

    async fn create_comment(&self, new: NewComment) -> Result<IssueComment, StoreError>;

    async fn find_comment(&self, comment_id: Uuid) -> Result<Option<IssueComment>, StoreError>;

    /// Comments of an issue, oldest first.
    async fn list_comments(&self, issue_id: Uuid) -> Result<Vec<IssueComment>, StoreError>;

    /// Comments with at least one abuse report on issues of the given
    /// datasets, newest first.
    async fn reported_comments(
        &self,
        dataset_ids: &[Uuid],
    ) -> Result<Vec<ReportedComment>, StoreError>;
}

#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn moderation_state(
        &self,
        target: ReportTarget,
    ) -> Result<Option<ModerationState>, StoreError>;

    /// Records the report, then applies `policy.after_report` to the new
    /// count. `StoreError::Conflict` when the reporter already reported the
    /// target.
    async fn add_report(
        &self,
        target: ReportTarget,
        reporter_id: Uuid,
        policy: &StrikePolicy,
    ) -> Result<ModerationState, StoreError>;

    /// Deletes the reports selected by `scope`, then applies
    /// `policy.after_clear` to the remaining count.
    async fn clear_reports(
        &self,
        target: ReportTarget,
        scope: ClearScope,
        policy: &StrikePolicy,
    ) -> Result<ModerationState, StoreError>;

    /// Reporter ids, in report order.
    async fn reporters(&self, target: ReportTarget) -> Result<Vec<Uuid>, StoreError>;
}

#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn find_preference(
        &self,
        user_id: Uuid,
    ) -> Result<Option<NotificationPreference>, StoreError>;

    /// `StoreError::Conflict` when the user already has a record.
    async fn insert_preference(&self, record: &NotificationPreference) -> Result<(), StoreError>;

    /// Applies the given fields to the stored record in one write and
    /// returns the result. `StoreError::NotFound` without a record.
    async fn update_preference(
        &self,
        user_id: Uuid,
        update: &PreferenceUpdate,
    ) -> Result<NotificationPreference, StoreError>;

    /// Appends the publisher unless already listed. `None` without a record.
    async fn add_publisher(
        &self,
        user_id: Uuid,
        publisher_id: Uuid,
    ) -> Result<Option<NotificationPreference>, StoreError>;

    /// Users opted in to every publisher, by record creation order.
    async fn users_with_all_publishers(&self) -> Result<Vec<Uuid>, StoreError>;

    /// Users who listed the publisher explicitly, by record creation order.
    async fn users_including_publisher(&self, publisher_id: Uuid)
        -> Result<Vec<Uuid>, StoreError>;
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Makes `token` the only token of `token.user_id`.
    async fn replace_token(&self, token: &NotificationToken) -> Result<(), StoreError>;

    async fn find_token(&self, code_hash: &str) -> Result<Option<NotificationToken>, StoreError>;
}
