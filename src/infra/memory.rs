//! In-process backend used for local runs (`STORE_BACKEND=memory`) and by
//! the test suite. Behaves like the Postgres backend, including the
//! uniqueness rules.
//!
//! Lock order: a `reports` entry may be held while touching one issue or
//! comment, never the other way round. Everything else snapshots before
//! reading a second map.

use std::cmp::Ordering;
use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::app::directory::Directory;
use crate::app::error::StoreError;
use crate::app::moderation::StrikePolicy;
use crate::app::store::{IssueStore, PreferenceStore, ReportStore, TokenStore};
use crate::domain::catalog::{Dataset, HostUser, Organization, Resource, UserSummary};
use crate::domain::issue::{
    AbuseStatus, Issue, IssueComment, IssueQuery, IssueSort, IssueStatus, IssueSummary,
    NewComment, NewIssue, ReportedComment, Visibility,
};
use crate::domain::notification::{NotificationPreference, NotificationToken, PreferenceUpdate};
use crate::domain::report::{
    AbuseReport, ClearScope, ModerationChange, ModerationState, ReportTarget,
};

#[derive(Default)]
pub struct MemoryStore {
    issues: DashMap<Uuid, Issue>,
    /// Per-dataset guard held while an issue number is picked.
    numbering: DashMap<Uuid, ()>,
    comments: DashMap<Uuid, IssueComment>,
    reports: DashMap<ReportTarget, Vec<AbuseReport>>,
    preferences: DashMap<Uuid, NotificationPreference>,
    /// One live token per user.
    tokens: DashMap<Uuid, NotificationToken>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn dataset_of(&self, target: ReportTarget) -> Option<Uuid> {
        match target {
            ReportTarget::Issue(id) => self.issues.get(&id).map(|issue| issue.dataset_id),
            ReportTarget::Comment(id) => {
                let issue_id = self.comments.get(&id).map(|comment| comment.issue_id)?;
                self.issues.get(&issue_id).map(|issue| issue.dataset_id)
            }
        }
    }

    /// Applies `change` to the item and returns its resulting flags.
    fn apply_change(
        &self,
        target: ReportTarget,
        change: ModerationChange,
    ) -> Option<(Visibility, AbuseStatus)> {
        match target {
            ReportTarget::Issue(id) => {
                let mut issue = self.issues.get_mut(&id)?;
                let issue = &mut *issue;
                change.apply(&mut issue.visibility, &mut issue.abuse_status);
                Some((issue.visibility, issue.abuse_status))
            }
            ReportTarget::Comment(id) => {
                let mut comment = self.comments.get_mut(&id)?;
                let comment = &mut *comment;
                change.apply(&mut comment.visibility, &mut comment.abuse_status);
                Some((comment.visibility, comment.abuse_status))
            }
        }
    }

    fn report_count(&self, target: ReportTarget) -> i64 {
        self.reports
            .get(&target)
            .map(|reports| reports.len() as i64)
            .unwrap_or(0)
    }
}

#[async_trait]
impl IssueStore for MemoryStore {
    async fn create_issue(&self, new: NewIssue) -> Result<Issue, StoreError> {
        let _numbering = self.numbering.entry(new.dataset_id).or_default();
        let number = self
            .issues
            .iter()
            .filter(|issue| issue.dataset_id == new.dataset_id)
            .map(|issue| issue.number)
            .max()
            .unwrap_or(0)
            + 1;

        let issue = Issue {
            id: Uuid::new_v4(),
            number,
            dataset_id: new.dataset_id,
            resource_id: new.resource_id,
            title: new.title,
            description: new.description,
            user_id: new.user_id,
            assignee_id: None,
            status: IssueStatus::Open,
            resolved_at: None,
            created_at: OffsetDateTime::now_utc(),
            visibility: Visibility::Visible,
            abuse_status: AbuseStatus::Unset,
        };
        self.issues.insert(issue.id, issue.clone());
        Ok(issue)
    }

    async fn find_issue(&self, dataset_id: Uuid, number: i32) -> Result<Option<Issue>, StoreError> {
        Ok(self
            .issues
            .iter()
            .find(|issue| issue.dataset_id == dataset_id && issue.number == number)
            .map(|issue| issue.clone()))
    }

    async fn save_issue(&self, issue: &Issue) -> Result<(), StoreError> {
        let mut stored = self.issues.get_mut(&issue.id).ok_or(StoreError::NotFound)?;
        stored.title = issue.title.clone();
        stored.description = issue.description.clone();
        stored.resource_id = issue.resource_id;
        stored.assignee_id = issue.assignee_id;
        stored.status = issue.status;
        stored.resolved_at = issue.resolved_at;
        Ok(())
    }

    async fn delete_issue(&self, issue_id: Uuid) -> Result<bool, StoreError> {
        if self.issues.remove(&issue_id).is_none() {
            return Ok(false);
        }
        let comment_ids: Vec<Uuid> = self
            .comments
            .iter()
            .filter(|comment| comment.issue_id == issue_id)
            .map(|comment| comment.id)
            .collect();
        for comment_id in comment_ids {
            self.comments.remove(&comment_id);
            self.reports.remove(&ReportTarget::Comment(comment_id));
        }
        self.reports.remove(&ReportTarget::Issue(issue_id));
        Ok(true)
    }

    async fn search_issues(
        &self,
        query: &IssueQuery,
    ) -> Result<(Vec<IssueSummary>, i64), StoreError> {
        let matching: Vec<Issue> = self
            .issues
            .iter()
            .filter(|issue| query.matches(issue))
            .map(|issue| issue.clone())
            .collect();

        let mut aggregates: HashMap<Uuid, (i64, Option<OffsetDateTime>)> = HashMap::new();
        for comment in self.comments.iter() {
            let entry = aggregates.entry(comment.issue_id).or_insert((0, None));
            entry.0 += 1;
            entry.1 = entry.1.max(Some(comment.created_at));
        }

        let mut summaries: Vec<IssueSummary> = matching
            .into_iter()
            .map(|issue| {
                let (comment_count, updated_at) =
                    aggregates.get(&issue.id).copied().unwrap_or((0, None));
                IssueSummary::new(issue, comment_count, updated_at)
            })
            .collect();
        let total = summaries.len() as i64;

        summaries.sort_by(|a, b| compare_summaries(query.sort, a, b));
        let page = summaries
            .into_iter()
            .skip(query.offset.max(0) as usize)
            .take(query.limit.max(0) as usize)
            .collect();
        Ok((page, total))
    }

    async fn create_comment(&self, new: NewComment) -> Result<IssueComment, StoreError> {
        if !self.issues.contains_key(&new.issue_id) {
            return Err(StoreError::NotFound);
        }
        let comment = IssueComment {
            id: Uuid::new_v4(),
            issue_id: new.issue_id,
            user_id: new.user_id,
            comment: new.comment,
            created_at: OffsetDateTime::now_utc(),
            visibility: Visibility::Visible,
            abuse_status: AbuseStatus::Unset,
        };
        self.comments.insert(comment.id, comment.clone());
        Ok(comment)
    }

    async fn find_comment(&self, comment_id: Uuid) -> Result<Option<IssueComment>, StoreError> {
        Ok(self.comments.get(&comment_id).map(|comment| comment.clone()))
    }

    async fn list_comments(&self, issue_id: Uuid) -> Result<Vec<IssueComment>, StoreError> {
        let mut comments: Vec<IssueComment> = self
            .comments
            .iter()
            .filter(|comment| comment.issue_id == issue_id)
            .map(|comment| comment.clone())
            .collect();
        comments.sort_by_key(|comment| (comment.created_at, comment.id));
        Ok(comments)
    }

    async fn reported_comments(
        &self,
        dataset_ids: &[Uuid],
    ) -> Result<Vec<ReportedComment>, StoreError> {
        let comments: Vec<IssueComment> = self
            .comments
            .iter()
            .map(|comment| comment.clone())
            .collect();

        let mut reported = Vec::new();
        for comment in comments {
            let Some((dataset_id, issue_number)) = self
                .issues
                .get(&comment.issue_id)
                .map(|issue| (issue.dataset_id, issue.number))
            else {
                continue;
            };
            if !dataset_ids.contains(&dataset_id) {
                continue;
            }
            let report_count = self.report_count(ReportTarget::Comment(comment.id));
            if report_count == 0 {
                continue;
            }
            reported.push(ReportedComment {
                comment,
                dataset_id,
                issue_number,
                report_count,
            });
        }
        reported.sort_by(|a, b| {
            (b.comment.created_at, b.comment.id).cmp(&(a.comment.created_at, a.comment.id))
        });
        Ok(reported)
    }
}

fn compare_summaries(sort: IssueSort, a: &IssueSummary, b: &IssueSummary) -> Ordering {
    let newest_first = b
        .issue
        .created_at
        .cmp(&a.issue.created_at)
        .then_with(|| b.issue.number.cmp(&a.issue.number));
    match sort {
        IssueSort::Newest => newest_first,
        IssueSort::Oldest => newest_first.reverse(),
        IssueSort::MostCommented => b.comment_count.cmp(&a.comment_count).then(newest_first),
        IssueSort::LeastCommented => a.comment_count.cmp(&b.comment_count).then(newest_first),
        // Never-commented issues sort last here and first below, as in Postgres.
        IssueSort::RecentlyUpdated => {
            let updated = match (a.updated_at, b.updated_at) {
                (Some(a_at), Some(b_at)) => b_at.cmp(&a_at),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            updated.then(newest_first)
        }
        IssueSort::LeastRecentlyUpdated => a.updated_at.cmp(&b.updated_at).then(newest_first),
    }
}

#[async_trait]
impl ReportStore for MemoryStore {
    async fn moderation_state(
        &self,
        target: ReportTarget,
    ) -> Result<Option<ModerationState>, StoreError> {
        let flags = match target {
            ReportTarget::Issue(id) => self
                .issues
                .get(&id)
                .map(|issue| (issue.dataset_id, issue.visibility, issue.abuse_status)),
            ReportTarget::Comment(id) => {
                let Some(comment) = self.comments.get(&id).map(|comment| comment.clone()) else {
                    return Ok(None);
                };
                self.issues
                    .get(&comment.issue_id)
                    .map(|issue| (issue.dataset_id, comment.visibility, comment.abuse_status))
            }
        };
        let Some((dataset_id, visibility, abuse_status)) = flags else {
            return Ok(None);
        };
        Ok(Some(ModerationState {
            target,
            dataset_id,
            visibility,
            abuse_status,
            report_count: self.report_count(target),
        }))
    }

    async fn add_report(
        &self,
        target: ReportTarget,
        reporter_id: Uuid,
        policy: &StrikePolicy,
    ) -> Result<ModerationState, StoreError> {
        let dataset_id = self.dataset_of(target).ok_or(StoreError::NotFound)?;

        let mut reports = self.reports.entry(target).or_default();
        if reports.iter().any(|report| report.reporter_id == reporter_id) {
            return Err(StoreError::Conflict);
        }
        let report_count = reports.len() as i64 + 1;
        let (visibility, abuse_status) = self
            .apply_change(target, policy.after_report(report_count))
            .ok_or(StoreError::NotFound)?;
        reports.push(AbuseReport {
            reporter_id,
            target,
            created_at: OffsetDateTime::now_utc(),
        });

        Ok(ModerationState {
            target,
            dataset_id,
            visibility,
            abuse_status,
            report_count,
        })
    }

    async fn clear_reports(
        &self,
        target: ReportTarget,
        scope: ClearScope,
        policy: &StrikePolicy,
    ) -> Result<ModerationState, StoreError> {
        let dataset_id = self.dataset_of(target).ok_or(StoreError::NotFound)?;

        let mut reports = self.reports.entry(target).or_default();
        match scope {
            ClearScope::All => reports.clear(),
            ClearScope::Own(user_id) => reports.retain(|report| report.reporter_id != user_id),
        }
        let report_count = reports.len() as i64;
        let (visibility, abuse_status) = self
            .apply_change(target, policy.after_clear(report_count))
            .ok_or(StoreError::NotFound)?;

        Ok(ModerationState {
            target,
            dataset_id,
            visibility,
            abuse_status,
            report_count,
        })
    }

    async fn reporters(&self, target: ReportTarget) -> Result<Vec<Uuid>, StoreError> {
        Ok(self
            .reports
            .get(&target)
            .map(|reports| reports.iter().map(|report| report.reporter_id).collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl PreferenceStore for MemoryStore {
    async fn find_preference(
        &self,
        user_id: Uuid,
    ) -> Result<Option<NotificationPreference>, StoreError> {
        Ok(self.preferences.get(&user_id).map(|record| record.clone()))
    }

    async fn insert_preference(&self, record: &NotificationPreference) -> Result<(), StoreError> {
        match self.preferences.entry(record.user_id) {
            Entry::Occupied(_) => Err(StoreError::Conflict),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(())
            }
        }
    }

    async fn update_preference(
        &self,
        user_id: Uuid,
        update: &PreferenceUpdate,
    ) -> Result<NotificationPreference, StoreError> {
        let mut stored = self.preferences.get_mut(&user_id).ok_or(StoreError::NotFound)?;
        update.apply(&mut stored);
        Ok(stored.clone())
    }

    async fn add_publisher(
        &self,
        user_id: Uuid,
        publisher_id: Uuid,
    ) -> Result<Option<NotificationPreference>, StoreError> {
        let Some(mut stored) = self.preferences.get_mut(&user_id) else {
            return Ok(None);
        };
        if !stored.includes(publisher_id) {
            stored.include_publishers.push(publisher_id);
        }
        Ok(Some(stored.clone()))
    }

    async fn users_with_all_publishers(&self) -> Result<Vec<Uuid>, StoreError> {
        Ok(self.users_where(|record| record.all_publishers))
    }

    async fn users_including_publisher(
        &self,
        publisher_id: Uuid,
    ) -> Result<Vec<Uuid>, StoreError> {
        Ok(self.users_where(|record| record.includes(publisher_id)))
    }
}

impl MemoryStore {
    fn users_where(&self, predicate: impl Fn(&NotificationPreference) -> bool) -> Vec<Uuid> {
        let mut matching: Vec<(OffsetDateTime, Uuid, Uuid)> = self
            .preferences
            .iter()
            .filter(|record| predicate(record))
            .map(|record| (record.created_at, record.id, record.user_id))
            .collect();
        matching.sort();
        matching.into_iter().map(|(_, _, user_id)| user_id).collect()
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn replace_token(&self, token: &NotificationToken) -> Result<(), StoreError> {
        self.tokens.insert(token.user_id, token.clone());
        Ok(())
    }

    async fn find_token(&self, code_hash: &str) -> Result<Option<NotificationToken>, StoreError> {
        Ok(self
            .tokens
            .iter()
            .find(|token| token.code_hash == code_hash)
            .map(|token| token.clone()))
    }
}

/// Host catalog kept in memory. Seeded through the `add_*` helpers.
pub struct MemoryDirectory {
    users: DashMap<Uuid, HostUser>,
    datasets: DashMap<Uuid, Dataset>,
    organizations: DashMap<Uuid, Organization>,
    /// Organization id to `(user id, capacity)` in membership order.
    members: DashMap<Uuid, Vec<(Uuid, String)>>,
    update_roles: Vec<String>,
}

impl MemoryDirectory {
    pub fn new(update_roles: Vec<String>) -> Self {
        Self {
            users: DashMap::new(),
            datasets: DashMap::new(),
            organizations: DashMap::new(),
            members: DashMap::new(),
            update_roles,
        }
    }

    pub fn add_user(&self, name: &str) -> HostUser {
        self.insert_user(name, false)
    }

    pub fn add_sysadmin(&self, name: &str) -> HostUser {
        self.insert_user(name, true)
    }

    fn insert_user(&self, name: &str, sysadmin: bool) -> HostUser {
        let user = HostUser {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: Some(format!("{}@example.org", name)),
            sysadmin,
        };
        self.users.insert(user.id, user.clone());
        user
    }

    pub fn add_organization(&self, name: &str) -> Organization {
        let organization = Organization {
            id: Uuid::new_v4(),
            name: name.to_string(),
        };
        self.organizations.insert(organization.id, organization.clone());
        organization
    }

    pub fn add_dataset(&self, name: &str, owner_org: Option<Uuid>) -> Dataset {
        let dataset = Dataset {
            id: Uuid::new_v4(),
            name: name.to_string(),
            title: None,
            owner_org,
        };
        self.datasets.insert(dataset.id, dataset.clone());
        dataset
    }

    /// Adds the membership, or changes its capacity if it exists.
    pub fn add_member(&self, organization_id: Uuid, user_id: Uuid, capacity: &str) {
        let mut members = self.members.entry(organization_id).or_default();
        match members.iter_mut().find(|(member, _)| *member == user_id) {
            Some((_, existing)) => *existing = capacity.to_string(),
            None => members.push((user_id, capacity.to_string())),
        }
    }

    pub fn remove_member(&self, organization_id: Uuid, user_id: Uuid) {
        if let Some(mut members) = self.members.get_mut(&organization_id) {
            members.retain(|(member, _)| *member != user_id);
        }
    }

    fn capacity(&self, user_id: Uuid, organization_id: Uuid) -> Option<String> {
        self.members.get(&organization_id).and_then(|members| {
            members
                .iter()
                .find(|(member, _)| *member == user_id)
                .map(|(_, capacity)| capacity.clone())
        })
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn find_user(&self, user_id: Uuid) -> Result<Option<HostUser>> {
        Ok(self.users.get(&user_id).map(|user| user.clone()))
    }

    async fn find_dataset(&self, name_or_id: &str) -> Result<Option<Dataset>> {
        if let Ok(id) = Uuid::parse_str(name_or_id) {
            if let Some(dataset) = self.datasets.get(&id) {
                return Ok(Some(dataset.clone()));
            }
        }
        Ok(self
            .datasets
            .iter()
            .find(|dataset| dataset.name == name_or_id)
            .map(|dataset| dataset.clone()))
    }

    async fn find_organization(&self, name_or_id: &str) -> Result<Option<Organization>> {
        if let Ok(id) = Uuid::parse_str(name_or_id) {
            if let Some(organization) = self.organizations.get(&id) {
                return Ok(Some(organization.clone()));
            }
        }
        Ok(self
            .organizations
            .iter()
            .find(|organization| organization.name == name_or_id)
            .map(|organization| organization.clone()))
    }

    async fn datasets_for_organization(&self, organization_id: Uuid) -> Result<Vec<Uuid>> {
        let mut datasets: Vec<(String, Uuid)> = self
            .datasets
            .iter()
            .filter(|dataset| dataset.owner_org == Some(organization_id))
            .map(|dataset| (dataset.name.clone(), dataset.id))
            .collect();
        datasets.sort();
        Ok(datasets.into_iter().map(|(_, id)| id).collect())
    }

    async fn has_update_rights(&self, user_id: Uuid, resource: Resource) -> Result<bool> {
        if self.is_sysadmin(user_id).await? {
            return Ok(true);
        }
        let organization_id = match resource {
            Resource::Organization(id) => Some(id),
            Resource::Dataset(id) => self.datasets.get(&id).and_then(|dataset| dataset.owner_org),
        };
        let Some(organization_id) = organization_id else {
            return Ok(false);
        };
        Ok(self
            .capacity(user_id, organization_id)
            .is_some_and(|capacity| self.update_roles.contains(&capacity)))
    }

    async fn is_sysadmin(&self, user_id: Uuid) -> Result<bool> {
        Ok(self.users.get(&user_id).is_some_and(|user| user.sysadmin))
    }

    async fn users_with_role(&self, organization_id: Uuid, role: &str) -> Result<Vec<Uuid>> {
        Ok(self
            .members
            .get(&organization_id)
            .map(|members| {
                members
                    .iter()
                    .filter(|(_, capacity)| capacity == role)
                    .map(|(user_id, _)| *user_id)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn is_active_member(&self, user_id: Uuid, organization_id: Uuid) -> Result<bool> {
        Ok(self.capacity(user_id, organization_id).is_some())
    }

    async fn search_editors(
        &self,
        organization_id: Uuid,
        prefix: &str,
        limit: i64,
    ) -> Result<Vec<UserSummary>> {
        let prefix = prefix.to_lowercase();
        let editors: Vec<Uuid> = self
            .members
            .get(&organization_id)
            .map(|members| {
                members
                    .iter()
                    .filter(|(_, capacity)| self.update_roles.contains(capacity))
                    .map(|(user_id, _)| *user_id)
                    .collect()
            })
            .unwrap_or_default();

        let mut matches: Vec<UserSummary> = editors
            .into_iter()
            .filter_map(|user_id| self.users.get(&user_id).map(|user| user.clone()))
            .filter(|user| user.name.to_lowercase().starts_with(&prefix))
            .map(|user| UserSummary {
                id: user.id,
                name: user.name,
                fullname: None,
            })
            .collect();
        matches.sort_by(|a, b| a.name.cmp(&b.name));
        matches.truncate(limit.max(0) as usize);
        Ok(matches)
    }
}
