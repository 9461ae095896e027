//! Sync metadata (cursors and status) per (table, user).

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::error::StoreError;
use super::types::{CursorKind, SyncMetadata, SyncStatus};

/// Persistent checkpoints for each (table, user) pair.
///
/// Every method is an upsert: the row is created on first use. Cursor
/// updates never move a cursor backwards.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get_local_metadata(
        &self,
        table: &str,
        user_id: &str,
    ) -> Result<Option<SyncMetadata>, StoreError>;

    /// Sets the status and replaces `lastError` (`None` clears it).
    async fn update_sync_status(
        &self,
        table: &str,
        user_id: &str,
        status: SyncStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn update_last_sync_time(
        &self,
        table: &str,
        user_id: &str,
        which: CursorKind,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn increment_conflict_count(&self, table: &str, user_id: &str)
        -> Result<(), StoreError>;

    /// The only way `conflictCount` goes down.
    async fn reset_conflict_count(&self, table: &str, user_id: &str) -> Result<(), StoreError>;

    async fn list_metadata(&self, user_id: &str) -> Result<Vec<SyncMetadata>, StoreError>;
}

/// In-process metadata store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryMetadataStore {
    rows: RwLock<HashMap<(String, String), SyncMetadata>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn with_row<F>(&self, table: &str, user_id: &str, f: F)
    where
        F: FnOnce(&mut SyncMetadata),
    {
        let mut rows = self.rows.write().await;
        let row = rows
            .entry((table.to_string(), user_id.to_string()))
            .or_insert_with(|| SyncMetadata::new(table, user_id));
        f(row);
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn get_local_metadata(
        &self,
        table: &str,
        user_id: &str,
    ) -> Result<Option<SyncMetadata>, StoreError> {
        let rows = self.rows.read().await;
        Ok(rows.get(&(table.to_string(), user_id.to_string())).cloned())
    }

    async fn update_sync_status(
        &self,
        table: &str,
        user_id: &str,
        status: SyncStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        self.with_row(table, user_id, |row| {
            row.sync_status = status;
            row.last_error = error.map(str::to_string);
        })
        .await;
        Ok(())
    }

    async fn update_last_sync_time(
        &self,
        table: &str,
        user_id: &str,
        which: CursorKind,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.with_row(table, user_id, |row| row.advance(which, at))
            .await;
        Ok(())
    }

    async fn increment_conflict_count(
        &self,
        table: &str,
        user_id: &str,
    ) -> Result<(), StoreError> {
        self.with_row(table, user_id, |row| row.conflict_count += 1)
            .await;
        Ok(())
    }

    async fn reset_conflict_count(&self, table: &str, user_id: &str) -> Result<(), StoreError> {
        self.with_row(table, user_id, |row| row.conflict_count = 0)
            .await;
        Ok(())
    }

    async fn list_metadata(&self, user_id: &str) -> Result<Vec<SyncMetadata>, StoreError> {
        let rows = self.rows.read().await;
        let mut list: Vec<SyncMetadata> = rows
            .values()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.table_name.cmp(&b.table_name));
        Ok(list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rows_created_on_first_use() {
        let store = MemoryMetadataStore::new();
        assert!(store
            .get_local_metadata("workouts", "u1")
            .await
            .unwrap()
            .is_none());

        store.increment_conflict_count("workouts", "u1").await.unwrap();
        let meta = store
            .get_local_metadata("workouts", "u1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(meta.conflict_count, 1);
        assert_eq!(meta.sync_status, SyncStatus::Idle);
    }

    #[tokio::test]
    async fn test_cursor_never_regresses() {
        let store = MemoryMetadataStore::new();
        let t1 = Utc::now();
        let t0 = t1 - chrono::Duration::minutes(5);

        store
            .update_last_sync_time("workouts", "u1", CursorKind::Pull, t1)
            .await
            .unwrap();
        store
            .update_last_sync_time("workouts", "u1", CursorKind::Pull, t0)
            .await
            .unwrap();

        let meta = store
            .get_local_metadata("workouts", "u1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(meta.last_pull_at, Some(t1));
        assert_eq!(meta.last_push_at, None);
    }

    #[tokio::test]
    async fn test_status_and_reset() {
        let store = MemoryMetadataStore::new();
        store
            .update_sync_status("workouts", "u1", SyncStatus::Error, Some("boom"))
            .await
            .unwrap();
        store.increment_conflict_count("workouts", "u1").await.unwrap();
        store.increment_conflict_count("workouts", "u1").await.unwrap();
        store.reset_conflict_count("workouts", "u1").await.unwrap();

        let meta = store
            .get_local_metadata("workouts", "u1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(meta.sync_status, SyncStatus::Error);
        assert_eq!(meta.last_error.as_deref(), Some("boom"));
        assert_eq!(meta.conflict_count, 0);

        store
            .update_sync_status("workouts", "u1", SyncStatus::Success, None)
            .await
            .unwrap();
        let meta = store
            .get_local_metadata("workouts", "u1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(meta.last_error, None);
    }

    #[tokio::test]
    async fn test_list_is_scoped_to_user() {
        let store = MemoryMetadataStore::new();
        store.increment_conflict_count("workouts", "u1").await.unwrap();
        store.increment_conflict_count("exercises", "u1").await.unwrap();
        store.increment_conflict_count("workouts", "u2").await.unwrap();

        let list = store.list_metadata("u1").await.unwrap();
        let names: Vec<&str> = list.iter().map(|m| m.table_name.as_str()).collect();
        assert_eq!(names, vec!["exercises", "workouts"]);
    }
}
