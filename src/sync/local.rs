//! Local (on-device) store adapter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::StoreError;
use super::record::SyncRecord;

/// Access to the on-device record store, scoped by table and user.
///
/// Implementations must be safe to share between concurrently running table
/// syncers; each syncer only touches its own table.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Records of `user_id` in `table` whose `updatedAt` is at or after
    /// `since`. `None` returns every record. Records without an `updatedAt`
    /// match every cursor, so they are pushed on each run.
    async fn get_records_by_user(
        &self,
        table: &str,
        user_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<SyncRecord>, StoreError>;

    /// Inserts or replaces a record, keyed by its `id`.
    async fn upsert_record(
        &self,
        table: &str,
        user_id: &str,
        record: &SyncRecord,
    ) -> Result<(), StoreError>;

    async fn get_record_by_id(
        &self,
        table: &str,
        user_id: &str,
        id: &str,
    ) -> Result<Option<SyncRecord>, StoreError>;
}
