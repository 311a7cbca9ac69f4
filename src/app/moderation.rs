use std::sync::Arc;

use uuid::Uuid;

use crate::app::directory::Directory;
use crate::app::error::{ServiceError, ServiceResult, StoreError};
use crate::app::store::ReportStore;
use crate::domain::catalog::Resource;
use crate::domain::issue::{AbuseStatus, Visibility};
use crate::domain::report::{ClearScope, ModerationChange, ModerationState, ReportTarget};

/// Visibility rules for one reporter or requester acting on one item.
///
/// A privileged user (one with update rights on the owning dataset) decides
/// alone. Everybody else contributes a strike: an item is hidden once its
/// report count reaches `max_strikes` and shown again once it drops to or
/// below it. Without a threshold, strikes never change visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrikePolicy {
    pub privileged: bool,
    pub max_strikes: Option<u32>,
}

impl StrikePolicy {
    pub fn new(privileged: bool, max_strikes: Option<u32>) -> Self {
        Self {
            privileged,
            max_strikes: max_strikes.filter(|max| *max > 0),
        }
    }

    pub fn after_report(&self, report_count: i64) -> ModerationChange {
        if self.privileged {
            return ModerationChange {
                visibility: Some(Visibility::Hidden),
                abuse_status: Some(AbuseStatus::Abuse),
            };
        }
        match self.max_strikes {
            Some(max) if report_count >= i64::from(max) => ModerationChange {
                visibility: Some(Visibility::Hidden),
                abuse_status: None,
            },
            _ => ModerationChange::default(),
        }
    }

    pub fn clear_scope(&self, requester_id: Uuid) -> ClearScope {
        if self.privileged {
            ClearScope::All
        } else {
            ClearScope::Own(requester_id)
        }
    }

    pub fn after_clear(&self, remaining: i64) -> ModerationChange {
        if self.privileged {
            return ModerationChange {
                visibility: Some(Visibility::Visible),
                abuse_status: Some(AbuseStatus::NotAbuse),
            };
        }
        match self.max_strikes {
            Some(max) if remaining <= i64::from(max) => ModerationChange {
                visibility: Some(Visibility::Visible),
                abuse_status: None,
            },
            _ => ModerationChange::default(),
        }
    }
}

/// Reporters a requester is allowed to see.
pub fn visible_reporters(reporters: Vec<Uuid>, privileged: bool, requester_id: Option<Uuid>) -> Vec<Uuid> {
    if privileged {
        return reporters;
    }
    match requester_id {
        Some(requester_id) if reporters.contains(&requester_id) => vec![requester_id],
        _ => Vec::new(),
    }
}

#[derive(Clone)]
pub struct ModerationService {
    reports: Arc<dyn ReportStore>,
    directory: Arc<dyn Directory>,
    max_strikes: Option<u32>,
}

impl ModerationService {
    pub fn new(
        reports: Arc<dyn ReportStore>,
        directory: Arc<dyn Directory>,
        max_strikes: Option<u32>,
    ) -> Self {
        Self {
            reports,
            directory,
            max_strikes,
        }
    }

    pub async fn report(
        &self,
        target: ReportTarget,
        reporter_id: Uuid,
    ) -> ServiceResult<ModerationState> {
        let state = self.state(target).await?;
        let policy = self.policy_for(&state, reporter_id).await?;

        let updated = self
            .reports
            .add_report(target, reporter_id, &policy)
            .await
            .map_err(|err| match err {
                StoreError::Conflict => ServiceError::AlreadyReported(match target {
                    ReportTarget::Issue(_) => "Issue has already been reported by this user",
                    ReportTarget::Comment(_) => "Comment has already been reported by this user",
                }),
                StoreError::NotFound => not_found(target),
                other => other.into(),
            })?;

        log_transition(&state, &updated, reporter_id, "report");
        Ok(updated)
    }

    pub async fn clear(
        &self,
        target: ReportTarget,
        requester_id: Uuid,
    ) -> ServiceResult<ModerationState> {
        let state = self.state(target).await?;
        let policy = self.policy_for(&state, requester_id).await?;

        let updated = self
            .reports
            .clear_reports(target, policy.clear_scope(requester_id), &policy)
            .await
            .map_err(|err| match err {
                StoreError::NotFound => not_found(target),
                other => other.into(),
            })?;

        log_transition(&state, &updated, requester_id, "clear");
        Ok(updated)
    }

    /// Every reporter for moderators; otherwise only the requester, and only
    /// if they reported the item.
    pub async fn list_reports(
        &self,
        target: ReportTarget,
        requester_id: Uuid,
    ) -> ServiceResult<Vec<Uuid>> {
        let state = self.state(target).await?;
        let privileged = self
            .directory
            .has_update_rights(requester_id, Resource::Dataset(state.dataset_id))
            .await?;
        let reporters = self.reports.reporters(target).await?;
        Ok(visible_reporters(reporters, privileged, Some(requester_id)))
    }

    async fn state(&self, target: ReportTarget) -> ServiceResult<ModerationState> {
        self.reports
            .moderation_state(target)
            .await?
            .ok_or_else(|| not_found(target))
    }

    async fn policy_for(
        &self,
        state: &ModerationState,
        user_id: Uuid,
    ) -> ServiceResult<StrikePolicy> {
        let privileged = self
            .directory
            .has_update_rights(user_id, Resource::Dataset(state.dataset_id))
            .await?;
        Ok(StrikePolicy::new(privileged, self.max_strikes))
    }
}

fn not_found(target: ReportTarget) -> ServiceError {
    match target {
        ReportTarget::Issue(_) => ServiceError::not_found("issue not found"),
        ReportTarget::Comment(_) => ServiceError::not_found("comment not found"),
    }
}

fn log_transition(before: &ModerationState, after: &ModerationState, user_id: Uuid, action: &str) {
    if before.visibility != after.visibility || before.abuse_status != after.abuse_status {
        tracing::info!(
            target_kind = before.target.kind(),
            target_id = %before.target.id(),
            user_id = %user_id,
            action,
            visibility = after.visibility.as_db(),
            abuse_status = after.abuse_status.as_db(),
            report_count = after.report_count,
            "moderation state changed"
        );
    }
}
