use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Per-user choice of which publishers trigger notification emails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPreference {
    pub id: Uuid,
    pub user_id: Uuid,
    pub all_publishers: bool,
    pub all_where_editor_admin: bool,
    pub include_publishers: Vec<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl NotificationPreference {
    pub fn includes(&self, publisher_id: Uuid) -> bool {
        self.include_publishers.contains(&publisher_id)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewPreference {
    #[serde(default)]
    pub user_id: Option<Uuid>,
    #[serde(default)]
    pub all_publishers: bool,
    #[serde(default)]
    pub all_where_editor_admin: bool,
    #[serde(default)]
    pub include_publishers: Vec<Uuid>,
}

impl NewPreference {
    pub fn for_user(user_id: Uuid) -> Self {
        Self {
            user_id: Some(user_id),
            ..Default::default()
        }
    }
}

/// Allow-listed preference changes.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PreferenceUpdate {
    pub all_publishers: Option<bool>,
    pub all_where_editor_admin: Option<bool>,
    pub include_publishers: Option<Vec<Uuid>>,
}

impl PreferenceUpdate {
    /// Drops repeated publishers, keeping the first occurrence.
    pub fn normalized(mut self) -> Self {
        self.include_publishers = self.include_publishers.map(dedup_ordered);
        self
    }

    pub fn apply(&self, record: &mut NotificationPreference) {
        if let Some(all_publishers) = self.all_publishers {
            record.all_publishers = all_publishers;
        }
        if let Some(all_where_editor_admin) = self.all_where_editor_admin {
            record.all_where_editor_admin = all_where_editor_admin;
        }
        if let Some(publishers) = &self.include_publishers {
            record.include_publishers = publishers.clone();
        }
    }
}

/// Stored token row. Only the digest of the code is kept.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationToken {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(skip_serializing)]
    pub code_hash: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// A freshly created token together with its plaintext code.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub code: String,
    pub token: NotificationToken,
}

pub fn dedup_ordered(ids: Vec<Uuid>) -> Vec<Uuid> {
    let mut seen = std::collections::HashSet::with_capacity(ids.len());
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}
