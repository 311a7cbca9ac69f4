//! Records owned by the host catalog. The service reads them, never writes.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostUser {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub sysadmin: bool,
}

/// Public view of a user, as offered when picking an assignee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub name: String,
    pub fullname: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub id: Uuid,
    pub name: String,
    pub title: Option<String>,
    /// Publisher owning the dataset, if any.
    pub owner_org: Option<Uuid>,
}

impl Dataset {
    pub fn display_name(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.name)
    }
}

/// Something a user may hold update rights on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Dataset(Uuid),
    Organization(Uuid),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
}
