//! Remote (cloud document store) adapter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::StoreError;
use super::record::SyncRecord;

/// Maximum writes the remote store accepts in one atomic commit.
pub const MAX_BATCH_SIZE: usize = 500;

/// One document write inside an atomic batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchWrite {
    pub path: String,
    pub record: SyncRecord,
    /// Merge top-level fields into an existing document instead of replacing it.
    pub merge: bool,
}

impl BatchWrite {
    pub fn merge(path: impl Into<String>, record: SyncRecord) -> Self {
        Self {
            path: path.into(),
            record,
            merge: true,
        }
    }
}

/// Access to the multi-tenant cloud document store.
///
/// Documents returned by `query` and `get_document` carry their `id`.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Checks that the store is reachable and the caller is authenticated as
    /// `user_id`. Called once per run before any table is touched.
    async fn ensure_ready(&self, _user_id: &str) -> Result<(), StoreError> {
        Ok(())
    }

    /// Documents directly under `collection_path` with `updatedAt` at or after
    /// `since`. `None` returns every document.
    async fn query(
        &self,
        collection_path: &str,
        user_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<SyncRecord>, StoreError>;

    async fn get_document(&self, path: &str) -> Result<Option<SyncRecord>, StoreError>;

    /// Applies every write or none of them.
    async fn commit_batch(&self, writes: Vec<BatchWrite>) -> Result<(), StoreError>;
}
