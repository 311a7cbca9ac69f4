use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::catalog::Dataset;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub id: Uuid,
    /// Sequential per dataset, starting at 1.
    pub number: i32,
    pub dataset_id: Uuid,
    pub resource_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub user_id: Uuid,
    pub assignee_id: Option<Uuid>,
    pub status: IssueStatus,
    #[serde(with = "time::serde::rfc3339::option")]
    pub resolved_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub visibility: Visibility,
    pub abuse_status: AbuseStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueComment {
    pub id: Uuid,
    pub issue_id: Uuid,
    pub user_id: Uuid,
    pub comment: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub visibility: Visibility,
    pub abuse_status: AbuseStatus,
}

/// Search row: an issue plus its comment aggregates. `dataset` and
/// `abuse_reports` are attached by the service when asked for.
#[derive(Debug, Clone, Serialize)]
pub struct IssueSummary {
    #[serde(flatten)]
    pub issue: Issue,
    pub comment_count: i64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub updated_at: Option<OffsetDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset: Option<Dataset>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abuse_reports: Option<Vec<Uuid>>,
}

impl IssueSummary {
    pub fn new(issue: Issue, comment_count: i64, updated_at: Option<OffsetDateTime>) -> Self {
        Self {
            issue,
            comment_count,
            updated_at,
            dataset: None,
            abuse_reports: None,
        }
    }
}

/// A reported comment together with the issue coordinates needed to link it.
#[derive(Debug, Clone, Serialize)]
pub struct ReportedComment {
    #[serde(flatten)]
    pub comment: IssueComment,
    pub dataset_id: Uuid,
    pub issue_number: i32,
    pub report_count: i64,
}

#[derive(Debug, Clone)]
pub struct NewIssue {
    pub dataset_id: Uuid,
    pub resource_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub user_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct NewComment {
    pub issue_id: Uuid,
    pub user_id: Uuid,
    pub comment: String,
}

/// Body of an issue creation request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IssueDraft {
    #[serde(default)]
    pub title: String,
    pub description: Option<String>,
    pub resource_id: Option<Uuid>,
}

/// An issue with its comments, as returned by show.
#[derive(Debug, Clone, Serialize)]
pub struct IssueDetail {
    #[serde(flatten)]
    pub issue: Issue,
    pub comments: Vec<CommentDetail>,
    /// Reporter ids the requester may see. Present only when asked for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abuse_reports: Option<Vec<Uuid>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommentDetail {
    #[serde(flatten)]
    pub comment: IssueComment,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abuse_reports: Option<Vec<Uuid>>,
}

/// Search parameters as sent by clients. `dataset` and `organization` take
/// a name or an id.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IssueSearch {
    pub dataset: Option<String>,
    pub organization: Option<String>,
    pub q: Option<String>,
    pub status: Option<IssueStatus>,
    pub visibility: Option<Visibility>,
    pub abuse_status: Option<AbuseStatus>,
    pub sort: Option<IssueSort>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    /// Attach the owning dataset to every result.
    #[serde(default)]
    pub include_datasets: bool,
    /// Attach the reporter ids the requester may see to every result.
    #[serde(default)]
    pub include_reports: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchPage {
    pub count: i64,
    pub results: Vec<IssueSummary>,
}

/// Fields of an issue a caller may change. Anything else (number, author,
/// dataset, moderation state) is fixed after creation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IssueUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub resource_id: Option<Uuid>,
    pub assignee_id: Option<Uuid>,
    pub status: Option<IssueStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    Open,
    Closed,
}

impl IssueStatus {
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "open" => Some(Self::Open),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }

    pub fn as_db(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Visible,
    Hidden,
}

impl Visibility {
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "visible" => Some(Self::Visible),
            "hidden" => Some(Self::Hidden),
            _ => None,
        }
    }

    pub fn as_db(&self) -> &'static str {
        match self {
            Self::Visible => "visible",
            Self::Hidden => "hidden",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbuseStatus {
    Unset,
    Abuse,
    NotAbuse,
}

impl AbuseStatus {
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "unset" => Some(Self::Unset),
            "abuse" => Some(Self::Abuse),
            "not_abuse" => Some(Self::NotAbuse),
            _ => None,
        }
    }

    pub fn as_db(&self) -> &'static str {
        match self {
            Self::Unset => "unset",
            Self::Abuse => "abuse",
            Self::NotAbuse => "not_abuse",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSort {
    #[default]
    Newest,
    Oldest,
    MostCommented,
    LeastCommented,
    RecentlyUpdated,
    LeastRecentlyUpdated,
}

/// Store-level issue query. Visibility rules have already been applied by
/// the caller.
#[derive(Debug, Clone, Default)]
pub struct IssueQuery {
    /// `None` searches every dataset.
    pub dataset_ids: Option<Vec<Uuid>>,
    pub q: Option<String>,
    pub status: Option<IssueStatus>,
    pub visibility: Option<Visibility>,
    pub abuse_status: Option<AbuseStatus>,
    pub sort: IssueSort,
    pub limit: i64,
    pub offset: i64,
}

impl IssueQuery {
    /// Filter half of the query, evaluated row by row by the in-memory store.
    pub fn matches(&self, issue: &Issue) -> bool {
        if let Some(ids) = &self.dataset_ids {
            if !ids.contains(&issue.dataset_id) {
                return false;
            }
        }
        if let Some(q) = self.q.as_deref().filter(|q| !q.is_empty()) {
            if !issue.title.to_lowercase().contains(&q.to_lowercase()) {
                return false;
            }
        }
        if self.status.is_some_and(|status| status != issue.status) {
            return false;
        }
        if self
            .visibility
            .is_some_and(|visibility| visibility != issue.visibility)
        {
            return false;
        }
        if self
            .abuse_status
            .is_some_and(|abuse_status| abuse_status != issue.abuse_status)
        {
            return false;
        }
        true
    }
}
