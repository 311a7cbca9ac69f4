use std::sync::Arc;

use time::OffsetDateTime;
use uuid::Uuid;

use crate::app::error::{ServiceError, ServiceResult, StoreError};
use crate::app::store::PreferenceStore;
use crate::domain::notification::{
    dedup_ordered, NewPreference, NotificationPreference, PreferenceUpdate,
};

#[derive(Clone)]
pub struct PreferenceService {
    preferences: Arc<dyn PreferenceStore>,
}

impl PreferenceService {
    pub fn new(preferences: Arc<dyn PreferenceStore>) -> Self {
        Self { preferences }
    }

    pub async fn find(&self, user_id: Uuid) -> ServiceResult<Option<NotificationPreference>> {
        Ok(self.preferences.find_preference(user_id).await?)
    }

    /// Creates the user's record. If another request created it first, the
    /// existing record is returned unchanged.
    pub async fn create(&self, new: NewPreference) -> ServiceResult<NotificationPreference> {
        let user_id = new
            .user_id
            .ok_or_else(|| ServiceError::invalid("user_id is required"))?;

        let record = NotificationPreference {
            id: Uuid::new_v4(),
            user_id,
            all_publishers: new.all_publishers,
            all_where_editor_admin: new.all_where_editor_admin,
            include_publishers: dedup_ordered(new.include_publishers),
            created_at: OffsetDateTime::now_utc(),
        };

        match self.preferences.insert_preference(&record).await {
            Ok(()) => Ok(record),
            Err(StoreError::Conflict) => self
                .preferences
                .find_preference(user_id)
                .await?
                .ok_or_else(|| ServiceError::Conflict("notification settings changed concurrently".into())),
            Err(err) => Err(err.into()),
        }
    }

    /// Record used when nothing was stored yet: notify where the user is a
    /// member of the publisher.
    pub async fn find_or_create_default(
        &self,
        user_id: Uuid,
    ) -> ServiceResult<NotificationPreference> {
        if let Some(record) = self.preferences.find_preference(user_id).await? {
            return Ok(record);
        }
        self.create(NewPreference {
            user_id: Some(user_id),
            all_where_editor_admin: true,
            ..Default::default()
        })
        .await
    }

    /// Opts the user in to a publisher. Creates a blank record if needed.
    pub async fn add_publisher(
        &self,
        user_id: Uuid,
        publisher_id: Uuid,
    ) -> ServiceResult<NotificationPreference> {
        if let Some(record) = self.preferences.add_publisher(user_id, publisher_id).await? {
            return Ok(record);
        }
        self.create(NewPreference::for_user(user_id)).await?;
        self.preferences
            .add_publisher(user_id, publisher_id)
            .await?
            .ok_or_else(|| ServiceError::Conflict("notification settings changed concurrently".into()))
    }

    pub async fn users_with_all_publishers(&self) -> ServiceResult<Vec<Uuid>> {
        Ok(self.preferences.users_with_all_publishers().await?)
    }

    pub async fn users_including_publisher(&self, publisher_id: Uuid) -> ServiceResult<Vec<Uuid>> {
        Ok(self.preferences.users_including_publisher(publisher_id).await?)
    }

    pub async fn update(
        &self,
        user_id: Uuid,
        update: PreferenceUpdate,
    ) -> ServiceResult<NotificationPreference> {
        self.find_or_create_default(user_id).await?;
        let record = self
            .preferences
            .update_preference(user_id, &update.normalized())
            .await?;

        tracing::info!(
            user_id = %user_id,
            all_publishers = record.all_publishers,
            all_where_editor_admin = record.all_where_editor_admin,
            publishers = record.include_publishers.len(),
            "notification settings updated"
        );
        Ok(record)
    }
}
