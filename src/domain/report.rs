use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::issue::{AbuseStatus, Visibility};

/// An issue or a comment: the two kinds of item that can be reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum ReportTarget {
    Issue(Uuid),
    Comment(Uuid),
}

impl ReportTarget {
    pub fn id(&self) -> Uuid {
        match self {
            Self::Issue(id) | Self::Comment(id) => *id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Issue(_) => "issue",
            Self::Comment(_) => "comment",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbuseReport {
    pub reporter_id: Uuid,
    pub target: ReportTarget,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Moderation-relevant view of a reportable item.
#[derive(Debug, Clone, Serialize)]
pub struct ModerationState {
    pub target: ReportTarget,
    /// Dataset the item (or its issue) belongs to.
    pub dataset_id: Uuid,
    pub visibility: Visibility,
    pub abuse_status: AbuseStatus,
    pub report_count: i64,
}

/// Write applied to an item after its reports changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModerationChange {
    pub visibility: Option<Visibility>,
    pub abuse_status: Option<AbuseStatus>,
}

impl ModerationChange {
    pub fn is_empty(&self) -> bool {
        self.visibility.is_none() && self.abuse_status.is_none()
    }

    pub fn apply(&self, visibility: &mut Visibility, abuse_status: &mut AbuseStatus) {
        if let Some(next) = self.visibility {
            *visibility = next;
        }
        if let Some(next) = self.abuse_status {
            *abuse_status = next;
        }
    }
}

/// Which reports a clear removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearScope {
    All,
    Own(Uuid),
}
