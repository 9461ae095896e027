use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::sync::{CursorKind, MetadataStore, StoreError, SyncMetadata, SyncStatus};

/// [`MetadataStore`] backed by the `sync_metadata` table.
#[derive(Debug, Clone)]
pub struct SqliteMetadataStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct MetadataRow {
    table_name: String,
    user_id: String,
    last_pull_at: Option<i64>,
    last_push_at: Option<i64>,
    sync_status: String,
    conflict_count: i64,
    last_error: Option<String>,
}

fn from_millis(millis: Option<i64>) -> Result<Option<DateTime<Utc>>, StoreError> {
    millis
        .map(|m| {
            DateTime::from_timestamp_millis(m)
                .ok_or_else(|| StoreError::InvalidData(format!("cursor out of range: {}", m)))
        })
        .transpose()
}

impl TryFrom<MetadataRow> for SyncMetadata {
    type Error = StoreError;

    fn try_from(row: MetadataRow) -> Result<Self, Self::Error> {
        let sync_status = SyncStatus::parse(&row.sync_status).ok_or_else(|| {
            StoreError::InvalidData(format!("unknown sync status: {}", row.sync_status))
        })?;
        Ok(SyncMetadata {
            last_pull_at: from_millis(row.last_pull_at)?,
            last_push_at: from_millis(row.last_push_at)?,
            table_name: row.table_name,
            user_id: row.user_id,
            sync_status,
            conflict_count: row.conflict_count.max(0) as u64,
            last_error: row.last_error,
        })
    }
}

impl SqliteMetadataStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn get_local_metadata(
        &self,
        table: &str,
        user_id: &str,
    ) -> Result<Option<SyncMetadata>, StoreError> {
        let row: Option<MetadataRow> =
            sqlx::query_as("SELECT * FROM sync_metadata WHERE table_name = ? AND user_id = ?")
                .bind(table)
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(SyncMetadata::try_from).transpose()
    }

    async fn update_sync_status(
        &self,
        table: &str,
        user_id: &str,
        status: SyncStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sync_metadata (table_name, user_id, sync_status, last_error)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(table_name, user_id)
            DO UPDATE SET sync_status = excluded.sync_status, last_error = excluded.last_error
            "#,
        )
        .bind(table)
        .bind(user_id)
        .bind(status.as_str())
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_last_sync_time(
        &self,
        table: &str,
        user_id: &str,
        which: CursorKind,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let millis = at.timestamp_millis();
        let pull = matches!(which, CursorKind::Pull | CursorKind::Both).then_some(millis);
        let push = matches!(which, CursorKind::Push | CursorKind::Both).then_some(millis);

        // Cursors only move forward.
        sqlx::query(
            r#"
            INSERT INTO sync_metadata (table_name, user_id, last_pull_at, last_push_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(table_name, user_id) DO UPDATE SET
                last_pull_at = CASE
                    WHEN excluded.last_pull_at IS NULL THEN last_pull_at
                    ELSE MAX(COALESCE(last_pull_at, excluded.last_pull_at), excluded.last_pull_at)
                END,
                last_push_at = CASE
                    WHEN excluded.last_push_at IS NULL THEN last_push_at
                    ELSE MAX(COALESCE(last_push_at, excluded.last_push_at), excluded.last_push_at)
                END
            "#,
        )
        .bind(table)
        .bind(user_id)
        .bind(pull)
        .bind(push)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn increment_conflict_count(&self, table: &str, user_id: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sync_metadata (table_name, user_id, conflict_count)
            VALUES (?, ?, 1)
            ON CONFLICT(table_name, user_id)
            DO UPDATE SET conflict_count = conflict_count + 1
            "#,
        )
        .bind(table)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reset_conflict_count(&self, table: &str, user_id: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sync_metadata (table_name, user_id, conflict_count)
            VALUES (?, ?, 0)
            ON CONFLICT(table_name, user_id)
            DO UPDATE SET conflict_count = 0
            "#,
        )
        .bind(table)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_metadata(&self, user_id: &str) -> Result<Vec<SyncMetadata>, StoreError> {
        let rows: Vec<MetadataRow> =
            sqlx::query_as("SELECT * FROM sync_metadata WHERE user_id = ? ORDER BY table_name")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(SyncMetadata::try_from).collect()
    }
}
