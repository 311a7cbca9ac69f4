use std::collections::HashMap;
use std::sync::Arc;

use time::OffsetDateTime;
use uuid::Uuid;

use crate::app::directory::Directory;
use crate::app::error::{ServiceError, ServiceResult};
use crate::app::moderation::visible_reporters;
use crate::app::notifications::NotificationService;
use crate::app::store::{IssueStore, ReportStore};
use crate::domain::catalog::{Dataset, HostUser, Organization, Resource, UserSummary};
use crate::domain::issue::{
    CommentDetail, Issue, IssueComment, IssueDetail, IssueDraft, IssueQuery, IssueSearch,
    IssueStatus, IssueUpdate, NewComment, NewIssue, ReportedComment, SearchPage, Visibility,
};
use crate::domain::report::ReportTarget;

pub const MAX_TITLE_LEN: usize = 200;
pub const DEFAULT_SEARCH_LIMIT: i64 = 50;
pub const MAX_SEARCH_LIMIT: i64 = 200;
pub const DEFAULT_CANDIDATE_LIMIT: i64 = 20;
pub const MAX_CANDIDATE_LIMIT: i64 = 100;

#[derive(Clone)]
pub struct IssueService {
    issues: Arc<dyn IssueStore>,
    reports: Arc<dyn ReportStore>,
    directory: Arc<dyn Directory>,
    notifications: NotificationService,
}

impl IssueService {
    pub fn new(
        issues: Arc<dyn IssueStore>,
        reports: Arc<dyn ReportStore>,
        directory: Arc<dyn Directory>,
        notifications: NotificationService,
    ) -> Self {
        Self {
            issues,
            reports,
            directory,
            notifications,
        }
    }

    pub async fn dataset(&self, name_or_id: &str) -> ServiceResult<Dataset> {
        self.directory
            .find_dataset(name_or_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("dataset not found"))
    }

    pub async fn organization(&self, name_or_id: &str) -> ServiceResult<Organization> {
        self.directory
            .find_organization(name_or_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("organization not found"))
    }

    pub async fn issue(&self, dataset: &Dataset, number: i32) -> ServiceResult<Issue> {
        self.issues
            .find_issue(dataset.id, number)
            .await?
            .ok_or_else(|| ServiceError::not_found("issue not found"))
    }

    /// Resolves the item addressed by a report route. A comment must belong
    /// to the addressed issue.
    pub async fn target(
        &self,
        dataset: &str,
        number: i32,
        comment_id: Option<Uuid>,
    ) -> ServiceResult<ReportTarget> {
        let dataset = self.dataset(dataset).await?;
        let issue = self.issue(&dataset, number).await?;
        let Some(comment_id) = comment_id else {
            return Ok(ReportTarget::Issue(issue.id));
        };
        match self.issues.find_comment(comment_id).await? {
            Some(comment) if comment.issue_id == issue.id => Ok(ReportTarget::Comment(comment.id)),
            _ => Err(ServiceError::not_found("comment not found")),
        }
    }

    pub async fn create_issue(
        &self,
        author_id: Uuid,
        dataset: &str,
        draft: IssueDraft,
    ) -> ServiceResult<Issue> {
        let title = validate_title(&draft.title)?;
        let dataset = self.dataset(dataset).await?;
        let author = self.user(author_id).await?;

        let issue = self
            .issues
            .create_issue(NewIssue {
                dataset_id: dataset.id,
                resource_id: draft.resource_id,
                title,
                description: draft.description,
                user_id: author.id,
            })
            .await?;
        tracing::info!(
            issue_id = %issue.id,
            dataset = %dataset.name,
            number = issue.number,
            user_id = %author.id,
            "issue created"
        );

        self.notifications
            .notify_new_issue(&issue, &dataset, &author)
            .await;
        Ok(issue)
    }

    /// Hidden issues and comments are returned too, flagged by their
    /// visibility.
    pub async fn show_issue(
        &self,
        requester_id: Option<Uuid>,
        dataset: &str,
        number: i32,
        include_reports: bool,
    ) -> ServiceResult<IssueDetail> {
        let dataset = self.dataset(dataset).await?;
        let issue = self.issue(&dataset, number).await?;
        let comments = self.issues.list_comments(issue.id).await?;

        if !include_reports {
            return Ok(IssueDetail {
                issue,
                comments: comments
                    .into_iter()
                    .map(|comment| CommentDetail {
                        comment,
                        abuse_reports: None,
                    })
                    .collect(),
                abuse_reports: None,
            });
        }

        let privileged = self
            .can_update(requester_id, Resource::Dataset(dataset.id))
            .await?;
        let mut details = Vec::with_capacity(comments.len());
        for comment in comments {
            let reports = self
                .visible_reports(ReportTarget::Comment(comment.id), privileged, requester_id)
                .await?;
            details.push(CommentDetail {
                comment,
                abuse_reports: Some(reports),
            });
        }
        let reports = self
            .visible_reports(ReportTarget::Issue(issue.id), privileged, requester_id)
            .await?;

        Ok(IssueDetail {
            issue,
            comments: details,
            abuse_reports: Some(reports),
        })
    }

    /// Allowed for the author and for users with update rights on the
    /// dataset. Closing records the closer as assignee.
    pub async fn update_issue(
        &self,
        requester_id: Uuid,
        dataset: &str,
        number: i32,
        update: IssueUpdate,
    ) -> ServiceResult<Issue> {
        let dataset = self.dataset(dataset).await?;
        let mut issue = self.issue(&dataset, number).await?;

        if issue.user_id != requester_id
            && !self
                .can_update(Some(requester_id), Resource::Dataset(dataset.id))
                .await?
        {
            return Err(ServiceError::forbidden("not allowed to update this issue"));
        }

        if let Some(title) = update.title {
            issue.title = validate_title(&title)?;
        }
        if let Some(description) = update.description {
            issue.description = Some(description);
        }
        if let Some(resource_id) = update.resource_id {
            issue.resource_id = Some(resource_id);
        }
        if let Some(assignee_id) = update.assignee_id {
            issue.assignee_id = Some(assignee_id);
        }
        if let Some(status) = update.status.filter(|status| *status != issue.status) {
            issue.status = status;
            match status {
                IssueStatus::Closed => {
                    issue.resolved_at = Some(OffsetDateTime::now_utc());
                    issue.assignee_id = Some(requester_id);
                }
                IssueStatus::Open => issue.resolved_at = None,
            }
            tracing::info!(
                issue_id = %issue.id,
                user_id = %requester_id,
                status = status.as_db(),
                "issue status changed"
            );
        }

        self.issues.save_issue(&issue).await?;
        Ok(issue)
    }

    pub async fn delete_issue(
        &self,
        requester_id: Uuid,
        dataset: &str,
        number: i32,
    ) -> ServiceResult<()> {
        let dataset = self.dataset(dataset).await?;
        if !self
            .can_update(Some(requester_id), Resource::Dataset(dataset.id))
            .await?
        {
            return Err(ServiceError::forbidden("not allowed to delete issues of this dataset"));
        }
        let issue = self.issue(&dataset, number).await?;

        if !self.issues.delete_issue(issue.id).await? {
            return Err(ServiceError::not_found("issue not found"));
        }
        tracing::info!(issue_id = %issue.id, user_id = %requester_id, "issue deleted");
        Ok(())
    }

    pub async fn search(
        &self,
        requester_id: Option<Uuid>,
        search: IssueSearch,
    ) -> ServiceResult<SearchPage> {
        let limit = search.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
        if !(1..=MAX_SEARCH_LIMIT).contains(&limit) {
            return Err(ServiceError::invalid(format!(
                "limit must be between 1 and {}",
                MAX_SEARCH_LIMIT
            )));
        }
        let offset = search.offset.unwrap_or(0);
        if offset < 0 {
            return Err(ServiceError::invalid("offset must not be negative"));
        }

        let organization = match search.organization.as_deref() {
            Some(name) => Some(self.organization(name).await?),
            None => None,
        };
        let dataset = match search.dataset.as_deref() {
            Some(name) => Some(self.dataset(name).await?),
            None => None,
        };

        let privileged = match (&organization, &dataset) {
            (Some(organization), _) => {
                self.can_update(requester_id, Resource::Organization(organization.id))
                    .await?
            }
            (None, Some(dataset)) => {
                self.can_update(requester_id, Resource::Dataset(dataset.id))
                    .await?
            }
            (None, None) => match requester_id {
                Some(user_id) => self.directory.is_sysadmin(user_id).await?,
                None => false,
            },
        };

        let dataset_ids = match (organization, dataset) {
            (Some(organization), dataset) => {
                let mut ids = self
                    .directory
                    .datasets_for_organization(organization.id)
                    .await?;
                if let Some(dataset) = dataset {
                    ids.retain(|id| *id == dataset.id);
                }
                Some(ids)
            }
            (None, Some(dataset)) => Some(vec![dataset.id]),
            (None, None) => None,
        };

        let query = IssueQuery {
            dataset_ids,
            q: search.q.filter(|q| !q.trim().is_empty()),
            status: search.status,
            visibility: if privileged {
                search.visibility
            } else {
                Some(Visibility::Visible)
            },
            abuse_status: search.abuse_status,
            sort: search.sort.unwrap_or_default(),
            limit,
            offset,
        };
        let (mut results, count) = self.issues.search_issues(&query).await?;

        if search.include_datasets {
            let mut datasets: HashMap<Uuid, Option<Dataset>> = HashMap::new();
            for summary in &mut results {
                let dataset_id = summary.issue.dataset_id;
                if !datasets.contains_key(&dataset_id) {
                    let dataset = self.directory.find_dataset(&dataset_id.to_string()).await?;
                    datasets.insert(dataset_id, dataset);
                }
                summary.dataset = datasets.get(&dataset_id).cloned().flatten();
            }
        }
        if search.include_reports {
            for summary in &mut results {
                let reports = self
                    .visible_reports(ReportTarget::Issue(summary.issue.id), privileged, requester_id)
                    .await?;
                summary.abuse_reports = Some(reports);
            }
        }

        Ok(SearchPage { count, results })
    }

    /// Users of the organization who can be assigned issues, matched on a
    /// name prefix.
    pub async fn assignee_candidates(
        &self,
        organization: &str,
        q: &str,
        limit: Option<i64>,
    ) -> ServiceResult<Vec<UserSummary>> {
        let q = q.trim();
        if q.is_empty() {
            return Err(ServiceError::invalid("q is required"));
        }
        let limit = limit.unwrap_or(DEFAULT_CANDIDATE_LIMIT);
        if !(1..=MAX_CANDIDATE_LIMIT).contains(&limit) {
            return Err(ServiceError::invalid(format!(
                "limit must be between 1 and {}",
                MAX_CANDIDATE_LIMIT
            )));
        }
        let organization = self.organization(organization).await?;

        Ok(self
            .directory
            .search_editors(organization.id, q, limit)
            .await?)
    }

    pub async fn create_comment(
        &self,
        author_id: Uuid,
        dataset: &str,
        number: i32,
        comment: String,
    ) -> ServiceResult<IssueComment> {
        if comment.trim().is_empty() {
            return Err(ServiceError::invalid("comment is required"));
        }
        let dataset = self.dataset(dataset).await?;
        let issue = self.issue(&dataset, number).await?;
        let author = self.user(author_id).await?;

        let comment = self
            .issues
            .create_comment(NewComment {
                issue_id: issue.id,
                user_id: author.id,
                comment,
            })
            .await?;
        tracing::info!(
            issue_id = %issue.id,
            comment_id = %comment.id,
            user_id = %author.id,
            "issue comment created"
        );

        self.notifications
            .notify_new_comment(&issue, &comment, &dataset, &author)
            .await;
        Ok(comment)
    }

    /// Moderation queue of an organization: reported comments on its
    /// datasets' issues.
    pub async fn reported_comments(
        &self,
        requester_id: Uuid,
        organization: &str,
    ) -> ServiceResult<Vec<ReportedComment>> {
        let organization = self.organization(organization).await?;
        if !self
            .can_update(Some(requester_id), Resource::Organization(organization.id))
            .await?
        {
            return Err(ServiceError::forbidden(
                "not allowed to moderate this organization",
            ));
        }

        let dataset_ids = self
            .directory
            .datasets_for_organization(organization.id)
            .await?;
        Ok(self.issues.reported_comments(&dataset_ids).await?)
    }

    async fn user(&self, user_id: Uuid) -> ServiceResult<HostUser> {
        self.directory
            .find_user(user_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("user not found"))
    }

    async fn can_update(&self, user_id: Option<Uuid>, resource: Resource) -> ServiceResult<bool> {
        match user_id {
            Some(user_id) => Ok(self.directory.has_update_rights(user_id, resource).await?),
            None => Ok(false),
        }
    }

    async fn visible_reports(
        &self,
        target: ReportTarget,
        privileged: bool,
        requester_id: Option<Uuid>,
    ) -> ServiceResult<Vec<Uuid>> {
        let reporters = self.reports.reporters(target).await?;
        Ok(visible_reporters(reporters, privileged, requester_id))
    }
}

fn validate_title(title: &str) -> ServiceResult<String> {
    let title = title.trim();
    if title.is_empty() {
        return Err(ServiceError::invalid("title is required"));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(ServiceError::invalid(format!(
            "title must be at most {} characters",
            MAX_TITLE_LEN
        )));
    }
    Ok(title.to_string())
}
