use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::sync::{LocalStore, StoreError, SyncRecord};

/// [`LocalStore`] backed by the `records` table.
///
/// Records are stored whole as JSON; `updated_at` is copied out into its own
/// column so cursor scans can use the index.
#[derive(Debug, Clone)]
pub struct SqliteLocalStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct RecordRow {
    data: String,
}

impl RecordRow {
    fn into_record(self) -> Result<SyncRecord, StoreError> {
        Ok(serde_json::from_str(&self.data)?)
    }
}

impl SqliteLocalStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl LocalStore for SqliteLocalStore {
    async fn get_records_by_user(
        &self,
        table: &str,
        user_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<SyncRecord>, StoreError> {
        let rows: Vec<RecordRow> = match since {
            Some(since) => {
                sqlx::query_as(
                    r#"
                    SELECT data FROM records
                    WHERE table_name = ? AND user_id = ?
                      AND (updated_at >= ? OR updated_at IS NULL)
                    ORDER BY updated_at, id
                    "#,
                )
                .bind(table)
                .bind(user_id)
                .bind(since.timestamp_millis())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    "SELECT data FROM records WHERE table_name = ? AND user_id = ? ORDER BY updated_at, id",
                )
                .bind(table)
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(RecordRow::into_record).collect()
    }

    async fn upsert_record(
        &self,
        table: &str,
        user_id: &str,
        record: &SyncRecord,
    ) -> Result<(), StoreError> {
        let id = record
            .require_id()
            .map_err(|e| StoreError::InvalidData(e.to_string()))?;
        let updated_at = record.updated_at().map(|t| t.timestamp_millis());
        let data = serde_json::to_string(record)?;

        sqlx::query(
            r#"
            INSERT INTO records (table_name, user_id, id, updated_at, data)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(table_name, user_id, id)
            DO UPDATE SET updated_at = excluded.updated_at, data = excluded.data
            "#,
        )
        .bind(table)
        .bind(user_id)
        .bind(id)
        .bind(updated_at)
        .bind(&data)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_record_by_id(
        &self,
        table: &str,
        user_id: &str,
        id: &str,
    ) -> Result<Option<SyncRecord>, StoreError> {
        let row: Option<RecordRow> = sqlx::query_as(
            "SELECT data FROM records WHERE table_name = ? AND user_id = ? AND id = ?",
        )
        .bind(table)
        .bind(user_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(RecordRow::into_record).transpose()
    }
}
