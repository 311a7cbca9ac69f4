use anyhow::{anyhow, Result};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, Row};
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
use crate::domain::report::{ClearScope, ModerationChange, ModerationState, ReportTarget};
use crate::infra::db::Db;

const ISSUE_COLUMNS: &str = "id, number, dataset_id, resource_id, title, description, user_id, \
     assignee_id, status, resolved_at, created_at, visibility, abuse_status";

const COMMENT_COLUMNS: &str =
    "id, issue_id, user_id, comment, created_at, visibility, abuse_status";

const PREFERENCE_COLUMNS: &str =
    "id, user_id, all_publishers, all_where_editor_admin, include_publishers, created_at";

/// Issues, comments, reports, preferences and tokens in the service's own
/// tables (see `migrations/`).
#[derive(Clone)]
pub struct PgStore {
    db: Db,
}

impl PgStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

#[async_trait]
impl IssueStore for PgStore {
    async fn create_issue(&self, new: NewIssue) -> Result<Issue, StoreError> {
        let mut tx = self.db.begin().await?;

        // Serializes numbering per dataset for the rest of the transaction.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::text, 0))")
            .bind(new.dataset_id)
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query(&format!(
            "INSERT INTO issues (id, number, dataset_id, resource_id, title, description, user_id) \
             SELECT $1, COALESCE(MAX(number), 0) + 1, $2, $3, $4, $5, $6 \
             FROM issues WHERE dataset_id = $2 \
             RETURNING {}",
            ISSUE_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(new.dataset_id)
        .bind(new.resource_id)
        .bind(&new.title)
        .bind(&new.description)
        .bind(new.user_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        issue_from_row(&row)
    }

    async fn find_issue(&self, dataset_id: Uuid, number: i32) -> Result<Option<Issue>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM issues WHERE dataset_id = $1 AND number = $2",
            ISSUE_COLUMNS
        ))
        .bind(dataset_id)
        .bind(number)
        .fetch_optional(self.db.pool())
        .await?;

        row.as_ref().map(issue_from_row).transpose()
    }

    async fn save_issue(&self, issue: &Issue) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE issues \
             SET title = $2, description = $3, resource_id = $4, assignee_id = $5, \
                 status = $6, resolved_at = $7 \
             WHERE id = $1",
        )
        .bind(issue.id)
        .bind(&issue.title)
        .bind(&issue.description)
        .bind(issue.resource_id)
        .bind(issue.assignee_id)
        .bind(issue.status.as_db())
        .bind(issue.resolved_at)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn delete_issue(&self, issue_id: Uuid) -> Result<bool, StoreError> {
        let mut tx = self.db.begin().await?;

        sqlx::query(
            "DELETE FROM abuse_reports \
             WHERE (target_kind = 'issue' AND target_id = $1) \
                OR (target_kind = 'comment' AND target_id IN \
                    (SELECT id FROM issue_comments WHERE issue_id = $1))",
        )
        .bind(issue_id)
        .execute(&mut *tx)
        .await?;

        // Comments go with the issue through ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM issues WHERE id = $1")
            .bind(issue_id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn search_issues(
        &self,
        query: &IssueQuery,
    ) -> Result<(Vec<IssueSummary>, i64), StoreError> {
        const FILTER: &str = "($1::uuid[] IS NULL OR i.dataset_id = ANY($1)) \
             AND ($2::text IS NULL OR i.title ILIKE $2) \
             AND ($3::text IS NULL OR i.status = $3) \
             AND ($4::text IS NULL OR i.visibility = $4) \
             AND ($5::text IS NULL OR i.abuse_status = $5)";

        let pattern = query.q.as_deref().map(like_pattern);
        let status = query.status.map(|status| status.as_db());
        let visibility = query.visibility.map(|visibility| visibility.as_db());
        let abuse_status = query.abuse_status.map(|abuse_status| abuse_status.as_db());

        let total: i64 = sqlx::query(&format!("SELECT COUNT(*) AS total FROM issues i WHERE {}", FILTER))
            .bind(&query.dataset_ids)
            .bind(&pattern)
            .bind(status)
            .bind(visibility)
            .bind(abuse_status)
            .fetch_one(self.db.pool())
            .await?
            .get("total");

        let rows = sqlx::query(&format!(
            "SELECT i.id, i.number, i.dataset_id, i.resource_id, i.title, i.description, \
                    i.user_id, i.assignee_id, i.status, i.resolved_at, i.created_at, \
                    i.visibility, i.abuse_status, \
                    COUNT(c.id) AS comment_count, MAX(c.created_at) AS updated_at \
             FROM issues i \
             LEFT JOIN issue_comments c ON c.issue_id = i.id \
             WHERE {} \
             GROUP BY i.id \
             ORDER BY {} \
             LIMIT $6 OFFSET $7",
            FILTER,
            order_by(query.sort)
        ))
        .bind(&query.dataset_ids)
        .bind(&pattern)
        .bind(status)
        .bind(visibility)
        .bind(abuse_status)
        .bind(query.limit)
        .bind(query.offset)
        .fetch_all(self.db.pool())
        .await?;

        let summaries = rows
            .iter()
            .map(|row| {
                Ok(IssueSummary::new(
                    issue_from_row(row)?,
                    row.get("comment_count"),
                    row.get("updated_at"),
                ))
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        Ok((summaries, total))
    }

    async fn create_comment(&self, new: NewComment) -> Result<IssueComment, StoreError> {
        let row = sqlx::query(&format!(
            "INSERT INTO issue_comments (id, issue_id, user_id, comment) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {}",
            COMMENT_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(new.issue_id)
        .bind(new.user_id)
        .bind(&new.comment)
        .fetch_one(self.db.pool())
        .await
        .map_err(|err| match &err {
            sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
                StoreError::NotFound
            }
            _ => err.into(),
        })?;

        comment_from_row(&row)
    }

    async fn find_comment(&self, comment_id: Uuid) -> Result<Option<IssueComment>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM issue_comments WHERE id = $1",
            COMMENT_COLUMNS
        ))
        .bind(comment_id)
        .fetch_optional(self.db.pool())
        .await?;

        row.as_ref().map(comment_from_row).transpose()
    }

    async fn list_comments(&self, issue_id: Uuid) -> Result<Vec<IssueComment>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM issue_comments WHERE issue_id = $1 ORDER BY created_at ASC, id ASC",
            COMMENT_COLUMNS
        ))
        .bind(issue_id)
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(comment_from_row).collect()
    }

    async fn reported_comments(
        &self,
        dataset_ids: &[Uuid],
    ) -> Result<Vec<ReportedComment>, StoreError> {
        let rows = sqlx::query(
            "SELECT c.id, c.issue_id, c.user_id, c.comment, c.created_at, c.visibility, \
                    c.abuse_status, i.dataset_id, i.number AS issue_number, \
                    COUNT(r.id) AS report_count \
             FROM issue_comments c \
             JOIN issues i ON i.id = c.issue_id \
             JOIN abuse_reports r ON r.target_kind = 'comment' AND r.target_id = c.id \
             WHERE i.dataset_id = ANY($1) \
             GROUP BY c.id, i.dataset_id, i.number \
             ORDER BY c.created_at DESC, c.id DESC",
        )
        .bind(dataset_ids)
        .fetch_all(self.db.pool())
        .await?;

        rows.iter()
            .map(|row| {
                Ok(ReportedComment {
                    comment: comment_from_row(row)?,
                    dataset_id: row.get("dataset_id"),
                    issue_number: row.get("issue_number"),
                    report_count: row.get("report_count"),
                })
            })
            .collect()
    }
}

fn order_by(sort: IssueSort) -> &'static str {
    match sort {
        IssueSort::Newest => "i.created_at DESC, i.number DESC",
        IssueSort::Oldest => "i.created_at ASC, i.number ASC",
        IssueSort::MostCommented => "comment_count DESC, i.created_at DESC, i.number DESC",
        IssueSort::LeastCommented => "comment_count ASC, i.created_at DESC, i.number DESC",
        IssueSort::RecentlyUpdated => {
            "updated_at DESC NULLS LAST, i.created_at DESC, i.number DESC"
        }
        IssueSort::LeastRecentlyUpdated => {
            "updated_at ASC NULLS FIRST, i.created_at DESC, i.number DESC"
        }
    }
}

/// Case-insensitive substring pattern with LIKE wildcards escaped.
fn like_pattern(q: &str) -> String {
    format!("%{}%", escape_like(q))
}

fn prefix_pattern(prefix: &str) -> String {
    format!("{}%", escape_like(prefix))
}

fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

#[async_trait]
impl ReportStore for PgStore {
    async fn moderation_state(
        &self,
        target: ReportTarget,
    ) -> Result<Option<ModerationState>, StoreError> {
        let mut conn = self.db.pool().acquire().await?;
        let Some((dataset_id, visibility, abuse_status)) =
            item_flags(&mut conn, target, false).await?
        else {
            return Ok(None);
        };
        let report_count = count_reports(&mut conn, target).await?;

        Ok(Some(ModerationState {
            target,
            dataset_id,
            visibility,
            abuse_status,
            report_count,
        }))
    }

    async fn add_report(
        &self,
        target: ReportTarget,
        reporter_id: Uuid,
        policy: &StrikePolicy,
    ) -> Result<ModerationState, StoreError> {
        let mut tx = self.db.begin().await?;
        let (dataset_id, mut visibility, mut abuse_status) = item_flags(&mut tx, target, true)
            .await?
            .ok_or(StoreError::NotFound)?;

        sqlx::query(
            "INSERT INTO abuse_reports (reporter_id, target_kind, target_id) VALUES ($1, $2, $3)",
        )
        .bind(reporter_id)
        .bind(target.kind())
        .bind(target.id())
        .execute(&mut *tx)
        .await?;

        let report_count = count_reports(&mut tx, target).await?;
        let change = policy.after_report(report_count);
        change.apply(&mut visibility, &mut abuse_status);
        write_flags(&mut tx, target, change, visibility, abuse_status).await?;

        tx.commit().await?;
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
        let mut tx = self.db.begin().await?;
        let (dataset_id, mut visibility, mut abuse_status) = item_flags(&mut tx, target, true)
            .await?
            .ok_or(StoreError::NotFound)?;

        match scope {
            ClearScope::All => {
                sqlx::query("DELETE FROM abuse_reports WHERE target_kind = $1 AND target_id = $2")
                    .bind(target.kind())
                    .bind(target.id())
                    .execute(&mut *tx)
                    .await?;
            }
            ClearScope::Own(user_id) => {
                sqlx::query(
                    "DELETE FROM abuse_reports \
                     WHERE target_kind = $1 AND target_id = $2 AND reporter_id = $3",
                )
                .bind(target.kind())
                .bind(target.id())
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
            }
        }

        let report_count = count_reports(&mut tx, target).await?;
        let change = policy.after_clear(report_count);
        change.apply(&mut visibility, &mut abuse_status);
        write_flags(&mut tx, target, change, visibility, abuse_status).await?;

        tx.commit().await?;
        Ok(ModerationState {
            target,
            dataset_id,
            visibility,
            abuse_status,
            report_count,
        })
    }

    async fn reporters(&self, target: ReportTarget) -> Result<Vec<Uuid>, StoreError> {
        let rows = sqlx::query(
            "SELECT reporter_id FROM abuse_reports \
             WHERE target_kind = $1 AND target_id = $2 \
             ORDER BY id",
        )
        .bind(target.kind())
        .bind(target.id())
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows.iter().map(|row| row.get("reporter_id")).collect())
    }
}

/// Owning dataset and flags of a reportable item, optionally row-locked.
async fn item_flags(
    conn: &mut PgConnection,
    target: ReportTarget,
    lock: bool,
) -> Result<Option<(Uuid, Visibility, AbuseStatus)>, StoreError> {
    let sql = match (target, lock) {
        (ReportTarget::Issue(_), false) => {
            "SELECT dataset_id, visibility, abuse_status FROM issues WHERE id = $1"
        }
        (ReportTarget::Issue(_), true) => {
            "SELECT dataset_id, visibility, abuse_status FROM issues WHERE id = $1 FOR UPDATE"
        }
        (ReportTarget::Comment(_), false) => {
            "SELECT i.dataset_id, c.visibility, c.abuse_status \
             FROM issue_comments c JOIN issues i ON i.id = c.issue_id \
             WHERE c.id = $1"
        }
        (ReportTarget::Comment(_), true) => {
            "SELECT i.dataset_id, c.visibility, c.abuse_status \
             FROM issue_comments c JOIN issues i ON i.id = c.issue_id \
             WHERE c.id = $1 FOR UPDATE OF c"
        }
    };

    let row = sqlx::query(sql)
        .bind(target.id())
        .fetch_optional(&mut *conn)
        .await?;
    let Some(row) = row else {
        return Ok(None);
    };
    Ok(Some((
        row.get("dataset_id"),
        parse_visibility(row.get("visibility"))?,
        parse_abuse_status(row.get("abuse_status"))?,
    )))
}

async fn count_reports(conn: &mut PgConnection, target: ReportTarget) -> Result<i64, StoreError> {
    let row = sqlx::query(
        "SELECT COUNT(*) AS report_count FROM abuse_reports \
         WHERE target_kind = $1 AND target_id = $2",
    )
    .bind(target.kind())
    .bind(target.id())
    .fetch_one(&mut *conn)
    .await?;
    Ok(row.get("report_count"))
}

async fn write_flags(
    conn: &mut PgConnection,
    target: ReportTarget,
    change: ModerationChange,
    visibility: Visibility,
    abuse_status: AbuseStatus,
) -> Result<(), StoreError> {
    if change.is_empty() {
        return Ok(());
    }
    let sql = match target {
        ReportTarget::Issue(_) => {
            "UPDATE issues SET visibility = $2, abuse_status = $3 WHERE id = $1"
        }
        ReportTarget::Comment(_) => {
            "UPDATE issue_comments SET visibility = $2, abuse_status = $3 WHERE id = $1"
        }
    };
    sqlx::query(sql)
        .bind(target.id())
        .bind(visibility.as_db())
        .bind(abuse_status.as_db())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

#[async_trait]
impl PreferenceStore for PgStore {
    async fn find_preference(
        &self,
        user_id: Uuid,
    ) -> Result<Option<NotificationPreference>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM notification_preferences WHERE user_id = $1",
            PREFERENCE_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.as_ref().map(preference_from_row))
    }

    async fn insert_preference(&self, record: &NotificationPreference) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO notification_preferences \
             (id, user_id, all_publishers, all_where_editor_admin, include_publishers, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(record.id)
        .bind(record.user_id)
        .bind(record.all_publishers)
        .bind(record.all_where_editor_admin)
        .bind(&record.include_publishers)
        .bind(record.created_at)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    async fn update_preference(
        &self,
        user_id: Uuid,
        update: &PreferenceUpdate,
    ) -> Result<NotificationPreference, StoreError> {
        let row = sqlx::query(&format!(
            "UPDATE notification_preferences \
             SET all_publishers = COALESCE($2, all_publishers), \
                 all_where_editor_admin = COALESCE($3, all_where_editor_admin), \
                 include_publishers = COALESCE($4, include_publishers) \
             WHERE user_id = $1 \
             RETURNING {}",
            PREFERENCE_COLUMNS
        ))
        .bind(user_id)
        .bind(update.all_publishers)
        .bind(update.all_where_editor_admin)
        .bind(&update.include_publishers)
        .fetch_optional(self.db.pool())
        .await?;

        row.as_ref()
            .map(preference_from_row)
            .ok_or(StoreError::NotFound)
    }

    async fn add_publisher(
        &self,
        user_id: Uuid,
        publisher_id: Uuid,
    ) -> Result<Option<NotificationPreference>, StoreError> {
        let row = sqlx::query(&format!(
            "UPDATE notification_preferences \
             SET include_publishers = CASE \
                 WHEN $2 = ANY(include_publishers) THEN include_publishers \
                 ELSE array_append(include_publishers, $2) \
             END \
             WHERE user_id = $1 \
             RETURNING {}",
            PREFERENCE_COLUMNS
        ))
        .bind(user_id)
        .bind(publisher_id)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.as_ref().map(preference_from_row))
    }

    async fn users_with_all_publishers(&self) -> Result<Vec<Uuid>, StoreError> {
        let rows = sqlx::query(
            "SELECT user_id FROM notification_preferences \
             WHERE all_publishers \
             ORDER BY created_at, id",
        )
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows.iter().map(|row| row.get("user_id")).collect())
    }

    async fn users_including_publisher(
        &self,
        publisher_id: Uuid,
    ) -> Result<Vec<Uuid>, StoreError> {
        let rows = sqlx::query(
            "SELECT user_id FROM notification_preferences \
             WHERE $1 = ANY(include_publishers) \
             ORDER BY created_at, id",
        )
        .bind(publisher_id)
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows.iter().map(|row| row.get("user_id")).collect())
    }
}

#[async_trait]
impl TokenStore for PgStore {
    async fn replace_token(&self, token: &NotificationToken) -> Result<(), StoreError> {
        // Concurrent issuers for one user serialize on the user_id key; the
        // last writer's code is the live one.
        sqlx::query(
            "INSERT INTO notification_tokens (id, user_id, code_hash, created_at) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (user_id) DO UPDATE \
             SET id = EXCLUDED.id, code_hash = EXCLUDED.code_hash, \
                 created_at = EXCLUDED.created_at",
        )
        .bind(token.id)
        .bind(token.user_id)
        .bind(&token.code_hash)
        .bind(token.created_at)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    async fn find_token(&self, code_hash: &str) -> Result<Option<NotificationToken>, StoreError> {
        let row = sqlx::query(
            "SELECT id, user_id, code_hash, created_at \
             FROM notification_tokens WHERE code_hash = $1",
        )
        .bind(code_hash)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.map(|row| NotificationToken {
            id: row.get("id"),
            user_id: row.get("user_id"),
            code_hash: row.get("code_hash"),
            created_at: row.get("created_at"),
        }))
    }
}

fn issue_from_row(row: &PgRow) -> Result<Issue, StoreError> {
    let resolved_at: Option<OffsetDateTime> = row.get("resolved_at");
    Ok(Issue {
        id: row.get("id"),
        number: row.get("number"),
        dataset_id: row.get("dataset_id"),
        resource_id: row.get("resource_id"),
        title: row.get("title"),
        description: row.get("description"),
        user_id: row.get("user_id"),
        assignee_id: row.get("assignee_id"),
        status: parse_status(row.get("status"))?,
        resolved_at,
        created_at: row.get("created_at"),
        visibility: parse_visibility(row.get("visibility"))?,
        abuse_status: parse_abuse_status(row.get("abuse_status"))?,
    })
}

fn comment_from_row(row: &PgRow) -> Result<IssueComment, StoreError> {
    Ok(IssueComment {
        id: row.get("id"),
        issue_id: row.get("issue_id"),
        user_id: row.get("user_id"),
        comment: row.get("comment"),
        created_at: row.get("created_at"),
        visibility: parse_visibility(row.get("visibility"))?,
        abuse_status: parse_abuse_status(row.get("abuse_status"))?,
    })
}

fn preference_from_row(row: &PgRow) -> NotificationPreference {
    NotificationPreference {
        id: row.get("id"),
        user_id: row.get("user_id"),
        all_publishers: row.get("all_publishers"),
        all_where_editor_admin: row.get("all_where_editor_admin"),
        include_publishers: row.get("include_publishers"),
        created_at: row.get("created_at"),
    }
}

fn parse_status(value: &str) -> Result<IssueStatus, StoreError> {
    IssueStatus::from_db(value)
        .ok_or_else(|| StoreError::Backend(anyhow!("unknown issue status: {}", value)))
}

fn parse_visibility(value: &str) -> Result<Visibility, StoreError> {
    Visibility::from_db(value)
        .ok_or_else(|| StoreError::Backend(anyhow!("unknown visibility: {}", value)))
}

fn parse_abuse_status(value: &str) -> Result<AbuseStatus, StoreError> {
    AbuseStatus::from_db(value)
        .ok_or_else(|| StoreError::Backend(anyhow!("unknown abuse status: {}", value)))
}

/// Reads the catalog's own tables. Catalog ids are text columns holding
/// UUIDs; inactive rows are ignored.
#[derive(Clone)]
pub struct PgDirectory {
    db: Db,
    update_roles: Vec<String>,
}

impl PgDirectory {
    pub fn new(db: Db, update_roles: Vec<String>) -> Self {
        Self { db, update_roles }
    }

    async fn owning_organization(&self, resource: Resource) -> Result<Option<Uuid>> {
        match resource {
            Resource::Organization(id) => Ok(Some(id)),
            Resource::Dataset(id) => {
                let row = sqlx::query("SELECT owner_org FROM package WHERE id = $1")
                    .bind(id.to_string())
                    .fetch_optional(self.db.pool())
                    .await?;
                let owner: Option<String> = row.and_then(|row| row.get("owner_org"));
                owner.as_deref().map(parse_id).transpose()
            }
        }
    }
}

#[async_trait]
impl Directory for PgDirectory {
    async fn find_user(&self, user_id: Uuid) -> Result<Option<HostUser>> {
        let row = sqlx::query(
            "SELECT id, name, email, sysadmin FROM \"user\" WHERE id = $1 AND state = 'active'",
        )
        .bind(user_id.to_string())
        .fetch_optional(self.db.pool())
        .await?;

        row.map(|row| {
            Ok(HostUser {
                id: parse_id(row.get("id"))?,
                name: row.get("name"),
                email: row.get("email"),
                sysadmin: row.get("sysadmin"),
            })
        })
        .transpose()
    }

    async fn find_dataset(&self, name_or_id: &str) -> Result<Option<Dataset>> {
        let row = sqlx::query(
            "SELECT id, name, title, owner_org FROM package \
             WHERE (id = $1 OR name = $1) AND state = 'active' \
             LIMIT 1",
        )
        .bind(name_or_id)
        .fetch_optional(self.db.pool())
        .await?;

        row.map(|row| {
            let owner_org: Option<String> = row.get("owner_org");
            Ok(Dataset {
                id: parse_id(row.get("id"))?,
                name: row.get("name"),
                title: row.get("title"),
                owner_org: owner_org.as_deref().map(parse_id).transpose()?,
            })
        })
        .transpose()
    }

    async fn find_organization(&self, name_or_id: &str) -> Result<Option<Organization>> {
        let row = sqlx::query(
            "SELECT id, name FROM \"group\" \
             WHERE (id = $1 OR name = $1) AND is_organization AND state = 'active' \
             LIMIT 1",
        )
        .bind(name_or_id)
        .fetch_optional(self.db.pool())
        .await?;

        row.map(|row| {
            Ok(Organization {
                id: parse_id(row.get("id"))?,
                name: row.get("name"),
            })
        })
        .transpose()
    }

    async fn datasets_for_organization(&self, organization_id: Uuid) -> Result<Vec<Uuid>> {
        let rows = sqlx::query(
            "SELECT id FROM package WHERE owner_org = $1 AND state = 'active' ORDER BY name",
        )
        .bind(organization_id.to_string())
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(|row| parse_id(row.get("id"))).collect()
    }

    async fn has_update_rights(&self, user_id: Uuid, resource: Resource) -> Result<bool> {
        if self.is_sysadmin(user_id).await? {
            return Ok(true);
        }
        let Some(organization_id) = self.owning_organization(resource).await? else {
            return Ok(false);
        };

        let row = sqlx::query(
            "SELECT EXISTS ( \
                 SELECT 1 FROM member \
                 WHERE table_name = 'user' AND table_id = $1 AND group_id = $2 \
                   AND state = 'active' AND capacity = ANY($3) \
             ) AS allowed",
        )
        .bind(user_id.to_string())
        .bind(organization_id.to_string())
        .bind(&self.update_roles)
        .fetch_one(self.db.pool())
        .await?;
        Ok(row.get("allowed"))
    }

    async fn is_sysadmin(&self, user_id: Uuid) -> Result<bool> {
        let row = sqlx::query("SELECT sysadmin FROM \"user\" WHERE id = $1 AND state = 'active'")
            .bind(user_id.to_string())
            .fetch_optional(self.db.pool())
            .await?;
        Ok(row.map(|row| row.get("sysadmin")).unwrap_or(false))
    }

    async fn users_with_role(&self, organization_id: Uuid, role: &str) -> Result<Vec<Uuid>> {
        let rows = sqlx::query(
            "SELECT table_id FROM member \
             WHERE table_name = 'user' AND group_id = $1 AND capacity = $2 AND state = 'active' \
             ORDER BY table_id",
        )
        .bind(organization_id.to_string())
        .bind(role)
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(|row| parse_id(row.get("table_id"))).collect()
    }

    async fn is_active_member(&self, user_id: Uuid, organization_id: Uuid) -> Result<bool> {
        let row = sqlx::query(
            "SELECT EXISTS ( \
                 SELECT 1 FROM member \
                 WHERE table_name = 'user' AND table_id = $1 AND group_id = $2 \
                   AND state = 'active' \
             ) AS member",
        )
        .bind(user_id.to_string())
        .bind(organization_id.to_string())
        .fetch_one(self.db.pool())
        .await?;
        Ok(row.get("member"))
    }

    async fn search_editors(
        &self,
        organization_id: Uuid,
        prefix: &str,
        limit: i64,
    ) -> Result<Vec<UserSummary>> {
        let rows = sqlx::query(
            "SELECT u.id, u.name, u.fullname FROM \"user\" u \
             JOIN member m ON m.table_id = u.id \
             WHERE m.table_name = 'user' AND m.group_id = $1 AND m.state = 'active' \
               AND m.capacity = ANY($2) AND u.state = 'active' AND u.name ILIKE $3 \
             ORDER BY u.name \
             LIMIT $4",
        )
        .bind(organization_id.to_string())
        .bind(&self.update_roles)
        .bind(prefix_pattern(prefix))
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;

        rows.iter()
            .map(|row| {
                Ok(UserSummary {
                    id: parse_id(row.get("id"))?,
                    name: row.get("name"),
                    fullname: row.get("fullname"),
                })
            })
            .collect()
    }
}

fn parse_id(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|err| anyhow!("invalid catalog id {}: {}", value, err))
}
