use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::catalog::{Dataset, HostUser, Organization, Resource, UserSummary};

/// Read access to the host catalog: users, datasets, organizations and
/// memberships.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn find_user(&self, user_id: Uuid) -> Result<Option<HostUser>>;

    /// Looks a dataset up by name or by id.
    async fn find_dataset(&self, name_or_id: &str) -> Result<Option<Dataset>>;

    async fn find_organization(&self, name_or_id: &str) -> Result<Option<Organization>>;

    async fn datasets_for_organization(&self, organization_id: Uuid) -> Result<Vec<Uuid>>;

    /// Whether the user may update the resource: sysadmins always may,
    /// otherwise an active membership with one of the update roles on the
    /// owning organization is required.
    async fn has_update_rights(&self, user_id: Uuid, resource: Resource) -> Result<bool>;

    async fn is_sysadmin(&self, user_id: Uuid) -> Result<bool>;

    /// Active members of the organization holding `role`, in a stable order.
    async fn users_with_role(&self, organization_id: Uuid, role: &str) -> Result<Vec<Uuid>>;

    async fn is_active_member(&self, user_id: Uuid, organization_id: Uuid) -> Result<bool>;

    /// Active users holding an update role on the organization whose name
    /// starts with `prefix`, ignoring case. Ordered by name.
    async fn search_editors(
        &self,
        organization_id: Uuid,
        prefix: &str,
        limit: i64,
    ) -> Result<Vec<UserSummary>>;
}
