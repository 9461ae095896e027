//! Pull and push of a single table.
//!
//! A *segment* is one direction of one table. [`TableSyncer::pull`] and
//! [`TableSyncer::push`] run a single attempt and return either a result
//! (possibly carrying record-level errors) or a [`SegmentFailure`] when the
//! segment could not run at all. [`TableSyncer::sync_segment`] wraps an
//! attempt in the retry policy and records the final status.
//!
//! Cursors advance to the instant the successful attempt started, and only
//! when the attempt produced no record-level errors.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};

use super::conflict::detect_conflict;
use super::error::StoreError;
use super::local::LocalStore;
use super::metadata::MetadataStore;
use super::record::SyncRecord;
use super::registry::{TableClass, TableSpec};
use super::remote::{BatchWrite, RemoteStore, MAX_BATCH_SIZE};
use super::report::{ErrorReport, ErrorReporter};
use super::retry::RetryPolicy;
use super::timestamp::{to_local_record, to_remote_record};
use super::types::{SyncDirection, SyncOperation, SyncResult, SyncStatus};

/// A segment attempt that failed as a whole.
///
/// `result` keeps whatever was already done (committed batches, record
/// errors) so the final report does not under-count.
#[derive(Debug, Clone)]
pub struct SegmentFailure {
    pub result: SyncResult,
    pub operation: SyncOperation,
    pub error: StoreError,
    pub context: Option<String>,
}

impl SegmentFailure {
    fn new(result: SyncResult, operation: SyncOperation, error: StoreError) -> Self {
        Self {
            result,
            operation,
            error,
            context: None,
        }
    }

    fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

impl fmt::Display for SegmentFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.context {
            Some(context) => write!(f, "{}: {}", context, self.error),
            None => write!(f, "{}", self.error),
        }
    }
}

impl std::error::Error for SegmentFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Why a single record was skipped.
#[derive(Debug)]
struct RecordFailure {
    operation: SyncOperation,
    message: String,
}

impl RecordFailure {
    fn new(operation: SyncOperation, error: impl fmt::Display) -> Self {
        Self {
            operation,
            message: error.to_string(),
        }
    }
}

/// How a record counts toward the result once written.
#[derive(Debug, Clone, Copy)]
struct Applied {
    existed: bool,
    deleted: bool,
    conflict: bool,
}

struct PreparedWrite {
    write: BatchWrite,
    applied: Applied,
}

pub struct TableSyncer {
    local: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteStore>,
    metadata: Arc<dyn MetadataStore>,
    reporter: Arc<dyn ErrorReporter>,
    batch_size: usize,
}

impl TableSyncer {
    pub fn new(
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        metadata: Arc<dyn MetadataStore>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            local,
            remote,
            metadata,
            reporter,
            batch_size: MAX_BATCH_SIZE,
        }
    }

    /// Overrides the push batch size, clamped to `1..=MAX_BATCH_SIZE`.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.clamp(1, MAX_BATCH_SIZE);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Runs one direction segment under the retry policy and records the
    /// outcome in the metadata store. Never fails: errors end up in the result.
    pub async fn sync_segment(
        &self,
        user_id: &str,
        table: &TableSpec,
        direction: SyncDirection,
        force_full: bool,
        retry: &RetryPolicy,
    ) -> SyncResult {
        let started = Instant::now();
        self.set_status(table.name, user_id, SyncStatus::Syncing, None)
            .await;

        // Conflicts already persisted by failed attempts (e.g. batches committed
        // before a transient commit error) still belong to this segment.
        let carried = AtomicU64::new(0);
        let carried = &carried;

        let operation = format!("{}:{}", direction, table.name);
        let outcome = retry
            .run(&operation, move || async move {
                let prior = carried.load(Ordering::Relaxed);
                let attempt = match direction {
                    SyncDirection::Push => self.push(user_id, table, force_full).await,
                    _ => self.pull(user_id, table, force_full).await,
                };
                match attempt {
                    Ok(mut result) => {
                        result.conflicts += prior;
                        Ok(result)
                    }
                    Err(mut failure) => {
                        carried.fetch_add(failure.result.conflicts, Ordering::Relaxed);
                        failure.result.conflicts += prior;
                        Err(failure)
                    }
                }
            })
            .await;

        let mut result = match outcome {
            Ok(result) => result,
            Err(failure) => {
                let message = failure.to_string();
                let mut result = failure.result;
                result.fail(failure.operation, message.clone());
                self.set_status(table.name, user_id, SyncStatus::Error, Some(message.as_str()))
                    .await;
                self.reporter.report(&ErrorReport {
                    table: Some(table.name.to_string()),
                    record_id: None,
                    operation: failure.operation,
                    direction: Some(direction),
                    user_id: user_id.to_string(),
                    message,
                });
                result
            }
        };

        result.duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            table = table.name,
            direction = %direction,
            status = ?result.status,
            processed = result.records_processed,
            conflicts = result.conflicts,
            errors = result.errors.len(),
            duration_ms = result.duration_ms,
            "Segment finished"
        );
        result
    }

    /// One pull attempt: remote changes since `lastPullAt` applied locally.
    pub async fn pull(
        &self,
        user_id: &str,
        table: &TableSpec,
        force_full: bool,
    ) -> Result<SyncResult, SegmentFailure> {
        let started_at = Utc::now();
        let mut result = SyncResult::new(table.name, SyncDirection::Pull);

        let cursor = match self
            .read_cursor(table.name, user_id, SyncDirection::Pull, force_full)
            .await
        {
            Ok(cursor) => cursor,
            Err(e) => return Err(SegmentFailure::new(result, SyncOperation::Fetch, e)),
        };

        let remote_records = match self.fetch_remote(user_id, table, cursor).await {
            Ok(records) => records,
            Err(e) => return Err(SegmentFailure::new(result, SyncOperation::Fetch, e)),
        };

        tracing::debug!(
            table = table.name,
            since = ?cursor,
            fetched = remote_records.len(),
            "Pulled remote changes"
        );

        for record in &remote_records {
            match self.apply_pulled(user_id, table, record).await {
                Ok(applied) => {
                    result.records_processed += 1;
                    // Pull does not tell creates from updates; both count as created.
                    if applied.deleted {
                        result.records_deleted += 1;
                    } else {
                        result.records_created += 1;
                    }
                    if applied.conflict {
                        result.conflicts += 1;
                        self.bump_conflicts(table.name, user_id).await;
                    }
                }
                Err(failure) => self.record_error(&mut result, table, record, failure),
            }
        }

        self.complete(user_id, table, &result, started_at).await;
        Ok(result)
    }

    /// One push attempt: local changes since `lastPushAt` committed remotely
    /// in atomic batches. Local wins on conflict.
    pub async fn push(
        &self,
        user_id: &str,
        table: &TableSpec,
        force_full: bool,
    ) -> Result<SyncResult, SegmentFailure> {
        let started_at = Utc::now();
        let mut result = SyncResult::new(table.name, SyncDirection::Push);

        if table.class == TableClass::PullOnly {
            tracing::debug!(table = table.name, "Skipping push for pull-only table");
            return Ok(result);
        }

        let cursor = match self
            .read_cursor(table.name, user_id, SyncDirection::Push, force_full)
            .await
        {
            Ok(cursor) => cursor,
            Err(e) => return Err(SegmentFailure::new(result, SyncOperation::Fetch, e)),
        };

        let records = match self
            .local
            .get_records_by_user(table.name, user_id, cursor)
            .await
        {
            Ok(records) => records,
            Err(e) => return Err(SegmentFailure::new(result, SyncOperation::Fetch, e)),
        };

        let total_batches = records.len().div_ceil(self.batch_size);
        tracing::debug!(
            table = table.name,
            since = ?cursor,
            records = records.len(),
            batches = total_batches,
            "Pushing local changes"
        );

        for (index, chunk) in records.chunks(self.batch_size).enumerate() {
            let mut writes = Vec::with_capacity(chunk.len());
            let mut staged = Vec::with_capacity(chunk.len());

            for record in chunk {
                match self.prepare_write(user_id, table, record).await {
                    Ok(prepared) => {
                        writes.push(prepared.write);
                        staged.push(prepared.applied);
                    }
                    Err(failure) => self.record_error(&mut result, table, record, failure),
                }
            }

            if writes.is_empty() {
                continue;
            }

            let count = writes.len() as u64;
            if let Err(e) = self.remote.commit_batch(writes).await {
                let context = format!("batch {} of {} commit failed", index + 1, total_batches);
                return Err(
                    SegmentFailure::new(result, SyncOperation::Commit, e).with_context(context)
                );
            }

            result.records_processed += count;
            for applied in staged {
                if applied.deleted {
                    result.records_deleted += 1;
                } else if applied.existed {
                    result.records_updated += 1;
                } else {
                    result.records_created += 1;
                }
                if applied.conflict {
                    result.conflicts += 1;
                    self.bump_conflicts(table.name, user_id).await;
                }
            }
        }

        self.complete(user_id, table, &result, started_at).await;
        Ok(result)
    }

    async fn read_cursor(
        &self,
        table: &str,
        user_id: &str,
        direction: SyncDirection,
        force_full: bool,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        if force_full {
            return Ok(None);
        }
        let metadata = self.metadata.get_local_metadata(table, user_id).await?;
        Ok(metadata.and_then(|m| m.cursor(direction)))
    }

    async fn fetch_remote(
        &self,
        user_id: &str,
        table: &TableSpec,
        cursor: Option<DateTime<Utc>>,
    ) -> Result<Vec<SyncRecord>, StoreError> {
        // Singletons are small and always fetched whole.
        if let Some(path) = table.singleton_path(user_id) {
            return Ok(self.remote.get_document(&path).await?.into_iter().collect());
        }

        let mut records = Vec::new();
        for path in table.collection_paths(user_id) {
            records.extend(self.remote.query(&path, user_id, cursor).await?);
        }
        Ok(records)
    }

    async fn apply_pulled(
        &self,
        user_id: &str,
        table: &TableSpec,
        record: &SyncRecord,
    ) -> Result<Applied, RecordFailure> {
        let id = record
            .require_id()
            .map_err(|e| RecordFailure::new(SyncOperation::Validate, e))?;
        record
            .version()
            .map_err(|e| RecordFailure::new(SyncOperation::Validate, e))?;

        let existing = self
            .local
            .get_record_by_id(table.name, user_id, id)
            .await
            .map_err(|e| RecordFailure::new(SyncOperation::Lookup, e))?;

        // Remote wins on pull; the conflict is only counted.
        let conflict = existing
            .as_ref()
            .is_some_and(|local| detect_conflict(local, record));

        let converted = to_local_record(record);
        self.local
            .upsert_record(table.name, user_id, &converted)
            .await
            .map_err(|e| RecordFailure::new(SyncOperation::Upsert, e))?;

        Ok(Applied {
            existed: existing.is_some(),
            deleted: record.is_deleted(),
            conflict,
        })
    }

    async fn prepare_write(
        &self,
        user_id: &str,
        table: &TableSpec,
        record: &SyncRecord,
    ) -> Result<PreparedWrite, RecordFailure> {
        record
            .version()
            .map_err(|e| RecordFailure::new(SyncOperation::Validate, e))?;
        let path = table
            .document_path(user_id, record)
            .map_err(|e| RecordFailure::new(SyncOperation::Validate, e))?;

        let existing = self
            .remote
            .get_document(&path)
            .await
            .map_err(|e| RecordFailure::new(SyncOperation::Lookup, e))?;

        // Local wins on push; the conflict is only counted.
        let conflict = existing
            .as_ref()
            .is_some_and(|remote| detect_conflict(record, remote));

        Ok(PreparedWrite {
            write: BatchWrite::merge(path, to_remote_record(record)),
            applied: Applied {
                existed: existing.is_some(),
                deleted: record.is_deleted(),
                conflict,
            },
        })
    }

    fn record_error(
        &self,
        result: &mut SyncResult,
        table: &TableSpec,
        record: &SyncRecord,
        failure: RecordFailure,
    ) {
        let record_id = record.id().unwrap_or("<missing>").to_string();
        tracing::warn!(
            table = table.name,
            record_id = %record_id,
            direction = %result.direction,
            operation = %failure.operation,
            error = %failure.message,
            "Skipping record"
        );
        result.push_error(record_id, failure.operation, failure.message);
    }

    /// Final bookkeeping for an attempt that ran to completion.
    async fn complete(
        &self,
        user_id: &str,
        table: &TableSpec,
        result: &SyncResult,
        started_at: DateTime<Utc>,
    ) {
        if result.errors.is_empty() {
            if let Err(e) = self
                .metadata
                .update_last_sync_time(table.name, user_id, result.direction.into(), started_at)
                .await
            {
                tracing::warn!(table = table.name, error = %e, "Failed to advance sync cursor");
            }
        }

        let status = if result.conflicts > 0 {
            SyncStatus::Conflict
        } else {
            SyncStatus::Success
        };
        let summary = (!result.errors.is_empty())
            .then(|| format!("{} record(s) failed", result.errors.len()));
        self.set_status(table.name, user_id, status, summary.as_deref())
            .await;
    }

    async fn bump_conflicts(&self, table: &str, user_id: &str) {
        if let Err(e) = self.metadata.increment_conflict_count(table, user_id).await {
            tracing::warn!(table, error = %e, "Failed to increment conflict count");
        }
    }

    async fn set_status(&self, table: &str, user_id: &str, status: SyncStatus, error: Option<&str>) {
        if let Err(e) = self
            .metadata
            .update_sync_status(table, user_id, status, error)
            .await
        {
            tracing::warn!(table, status = %status, error = %e, "Failed to update sync status");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::metadata::MemoryMetadataStore;
    use crate::sync::registry::TableRegistry;
    use crate::sync::testing::{
        record, versioned, CallLog, MemoryLocalStore, MemoryRemoteStore, RecordingReporter,
    };
    use crate::sync::types::{ResultStatus, ALL_RECORDS};
    use serde_json::{json, Value};
    use std::time::Duration;

    struct Harness {
        local: Arc<MemoryLocalStore>,
        remote: Arc<MemoryRemoteStore>,
        metadata: Arc<MemoryMetadataStore>,
        reporter: Arc<RecordingReporter>,
        syncer: TableSyncer,
    }

    fn harness() -> Harness {
        let log = Arc::new(CallLog::default());
        let local = Arc::new(MemoryLocalStore::new(log.clone()));
        let remote = Arc::new(MemoryRemoteStore::new(log));
        let metadata = Arc::new(MemoryMetadataStore::new());
        let reporter = Arc::new(RecordingReporter::default());
        let syncer = TableSyncer::new(
            local.clone(),
            remote.clone(),
            metadata.clone(),
            reporter.clone(),
        );
        Harness {
            local,
            remote,
            metadata,
            reporter,
            syncer,
        }
    }

    fn table(name: &str) -> TableSpec {
        *TableRegistry::default().get(name).unwrap()
    }

    fn retry() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(4))
    }

    fn remote_workout(id: &str, version: u64) -> SyncRecord {
        let updated = Utc::now() - chrono::Duration::minutes(10);
        record(json!({
            "id": id,
            "version": version,
            "name": format!("workout {}", id),
            "updatedAt": updated.to_rfc3339(),
        }))
    }

    impl Harness {
        async fn segment(&self, name: &str, direction: SyncDirection, force: bool) -> SyncResult {
            self.syncer
                .sync_segment("u1", &table(name), direction, force, &retry())
                .await
        }

        async fn meta(&self, name: &str) -> crate::sync::types::SyncMetadata {
            self.metadata
                .get_local_metadata(name, "u1")
                .await
                .unwrap()
                .unwrap()
        }
    }

    #[tokio::test]
    async fn test_pull_applies_remote_records() {
        let h = harness();
        for i in 1..=3 {
            let id = format!("w{}", i);
            h.remote
                .put(&format!("users/u1/workouts/{}", id), remote_workout(&id, 1));
        }
        h.remote.put("users/u2/workouts/x", remote_workout("x", 1));

        let before = Utc::now();
        let result = h.segment("workouts", SyncDirection::Pull, false).await;
        let after = Utc::now();

        assert_eq!(result.status, ResultStatus::Success);
        assert_eq!(result.records_processed, 3);
        assert_eq!(result.records_created, 3);
        assert!(result.errors.is_empty());

        let local = h.local.all("workouts", "u1");
        assert_eq!(local.len(), 3);
        assert!(local[0].get("updatedAt").unwrap().is_i64());

        let meta = h.meta("workouts").await;
        assert_eq!(meta.sync_status, SyncStatus::Success);
        let cursor = meta.last_pull_at.unwrap();
        assert!(cursor >= before && cursor <= after);
        assert_eq!(meta.last_push_at, None);
    }

    #[tokio::test]
    async fn test_pull_is_idempotent() {
        let h = harness();
        h.remote.put("users/u1/workouts/w1", remote_workout("w1", 2));
        h.remote.put("users/u1/workouts/w2", remote_workout("w2", 5));

        let first = h.segment("workouts", SyncDirection::Pull, false).await;
        assert_eq!(first.records_processed, 2);
        let before = h.local.all("workouts", "u1");

        let second = h.segment("workouts", SyncDirection::Pull, false).await;
        let after = h.local.all("workouts", "u1");

        assert_eq!(second.status, ResultStatus::Success);
        assert_eq!(second.records_processed, 0);
        assert_eq!(second.conflicts, 0);
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_forced_pull_reapplies_without_changes() {
        let h = harness();
        h.remote.put("users/u1/workouts/w1", remote_workout("w1", 2));
        h.remote.put("users/u1/workouts/w2", remote_workout("w2", 5));

        h.segment("workouts", SyncDirection::Pull, true).await;
        let first = h.local.all("workouts", "u1");
        let result = h.segment("workouts", SyncDirection::Pull, true).await;

        assert_eq!(first, h.local.all("workouts", "u1"));
        assert_eq!(result.records_processed, 2);
        assert_eq!(result.conflicts, 0);
    }

    #[tokio::test]
    async fn test_pull_uses_cursor() {
        let h = harness();
        h.remote.put("users/u1/workouts/w1", remote_workout("w1", 1));

        h.segment("workouts", SyncDirection::Pull, false).await;
        let first_cursor = h.meta("workouts").await.last_pull_at;

        // Nothing changed remotely since the last pull.
        let result = h.segment("workouts", SyncDirection::Pull, false).await;
        assert_eq!(result.records_processed, 0);
        assert!(h.meta("workouts").await.last_pull_at >= first_cursor);
    }

    #[tokio::test]
    async fn test_pull_conflict_remote_wins() {
        let h = harness();
        h.local.seed("workouts", "u1", vec![versioned("w1", 2, 30)]);
        h.remote.put("users/u1/workouts/w1", remote_workout("w1", 1));

        let result = h.segment("workouts", SyncDirection::Pull, false).await;

        assert_eq!(result.conflicts, 1);
        assert_eq!(result.status, ResultStatus::Success);
        let local = h.local.all("workouts", "u1");
        assert_eq!(local[0].get("version"), Some(&json!(1)));

        let meta = h.meta("workouts").await;
        assert_eq!(meta.sync_status, SyncStatus::Conflict);
        assert_eq!(meta.conflict_count, 1);
    }

    #[tokio::test]
    async fn test_pull_counts_tombstones_as_deleted() {
        let h = harness();
        let mut tombstone = remote_workout("w1", 3);
        tombstone.insert("deleted", Value::Bool(true));
        h.remote.put("users/u1/workouts/w1", tombstone);
        h.remote.put("users/u1/workouts/w2", remote_workout("w2", 1));

        let result = h.segment("workouts", SyncDirection::Pull, false).await;
        assert_eq!(result.records_processed, 2);
        assert_eq!(result.records_deleted, 1);
        assert_eq!(result.records_created, 1);
    }

    #[tokio::test]
    async fn test_pull_reads_both_bifurcated_collections() {
        let h = harness();
        let mut custom = remote_workout("e1", 1);
        custom.insert("isCustom", Value::Bool(true));
        h.remote.put("users/u1/custom_exercises/e1", custom);
        h.remote.put("exercises/e2", remote_workout("e2", 1));

        let result = h.segment("exercises", SyncDirection::Pull, false).await;
        assert_eq!(result.records_processed, 2);
        assert_eq!(h.local.all("exercises", "u1").len(), 2);
    }

    #[tokio::test]
    async fn test_pull_singleton_ignores_cursor() {
        let h = harness();
        h.remote.put(
            "users/u1/settings/app",
            record(json!({"id": "app", "version": 1, "theme": "dark", "updatedAt": "2020-01-01T00:00:00Z"})),
        );

        let first = h.segment("app_settings", SyncDirection::Pull, false).await;
        let second = h.segment("app_settings", SyncDirection::Pull, false).await;
        assert_eq!(first.records_processed, 1);
        assert_eq!(second.records_processed, 1);
        assert_eq!(
            h.local.all("app_settings", "u1")[0].get("theme"),
            Some(&json!("dark"))
        );
    }

    #[tokio::test]
    async fn test_transient_fetch_failure_is_retried() {
        let h = harness();
        h.remote.put("users/u1/workouts/w1", remote_workout("w1", 1));
        h.remote
            .fail_next_query(StoreError::Network("connection reset".to_string()));

        let result = h.segment("workouts", SyncDirection::Pull, false).await;
        assert!(result.is_success());
        assert_eq!(result.records_processed, 1);
        assert!(h.reporter.reports().is_empty());
    }

    #[tokio::test]
    async fn test_permanent_fetch_failure_fails_segment() {
        let h = harness();
        h.remote
            .fail_next_query(StoreError::PermissionDenied("users/u1/workouts".to_string()));

        let result = h.segment("workouts", SyncDirection::Pull, false).await;

        assert_eq!(result.status, ResultStatus::Error);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].record_id, ALL_RECORDS);
        assert_eq!(result.errors[0].operation, SyncOperation::Fetch);

        let meta = h.meta("workouts").await;
        assert_eq!(meta.sync_status, SyncStatus::Error);
        assert!(meta.last_error.unwrap().contains("permission denied"));
        assert_eq!(meta.last_pull_at, None);

        let reports = h.reporter.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].table.as_deref(), Some("workouts"));
        assert_eq!(reports[0].direction, Some(SyncDirection::Pull));
    }

    #[tokio::test]
    async fn test_push_writes_remote_format() {
        let h = harness();
        h.local.seed("workouts", "u1", vec![versioned("w1", 1, 0)]);

        let result = h.segment("workouts", SyncDirection::Push, false).await;
        assert_eq!(result.records_processed, 1);
        assert_eq!(result.records_created, 1);

        let doc = h.remote.document("users/u1/workouts/w1").unwrap();
        assert!(doc.get("updatedAt").unwrap().is_string());
        assert!(h.meta("workouts").await.last_push_at.is_some());
    }

    #[tokio::test]
    async fn test_push_conflict_local_wins() {
        let h = harness();
        h.local.seed("workouts", "u1", vec![versioned("w1", 2, 0)]);
        h.remote.put("users/u1/workouts/w1", remote_workout("w1", 1));

        let result = h.segment("workouts", SyncDirection::Push, false).await;
        assert_eq!(result.conflicts, 1);
        assert_eq!(result.records_updated, 1);

        let doc = h.remote.document("users/u1/workouts/w1").unwrap();
        assert_eq!(doc.get("version"), Some(&json!(2)));
        assert_eq!(h.meta("workouts").await.conflict_count, 1);
    }

    #[tokio::test]
    async fn test_push_routes_bifurcated_records() {
        let h = harness();
        let mut custom = versioned("e1", 1, 0);
        custom.insert("isCustom", Value::Bool(true));
        h.local
            .seed("exercises", "u1", vec![custom, versioned("e2", 1, 0)]);

        h.segment("exercises", SyncDirection::Push, false).await;
        assert!(h.remote.document("users/u1/custom_exercises/e1").is_some());
        assert!(h.remote.document("exercises/e2").is_some());
    }

    #[tokio::test]
    async fn test_push_isolates_record_errors() {
        let h = harness();
        let mut records: Vec<SyncRecord> = (1..=10)
            .map(|i| versioned(&format!("w{:02}", i), 1, 0))
            .collect();
        records[3].insert("version", json!("abc"));
        h.local.seed("workouts", "u1", records);

        let result = h.segment("workouts", SyncDirection::Push, false).await;

        assert_eq!(result.status, ResultStatus::Success);
        assert_eq!(result.records_processed, 9);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].record_id, "w04");
        assert_eq!(result.errors[0].operation, SyncOperation::Validate);
        assert_eq!(h.remote.document_count(), 9);

        // A segment with record errors keeps its cursor.
        let meta = h.meta("workouts").await;
        assert_eq!(meta.last_push_at, None);
        assert!(meta.last_error.is_some());
    }

    #[tokio::test]
    async fn test_push_chunks_and_stops_on_commit_failure() {
        let h = harness();
        let records: Vec<SyncRecord> = (0..1201)
            .map(|i| versioned(&format!("w{:04}", i), 1, 0))
            .collect();
        h.local.seed("workouts", "u1", records);
        h.remote
            .fail_commit(2, StoreError::PermissionDenied("batch rejected".to_string()));

        let result = h.segment("workouts", SyncDirection::Push, false).await;

        assert_eq!(h.remote.commit_sizes(), vec![500, 500]);
        assert_eq!(result.status, ResultStatus::Error);
        assert_eq!(result.records_processed, 500);
        assert_eq!(h.remote.document_count(), 500);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].operation, SyncOperation::Commit);
        assert!(result.errors[0].error.contains("batch 2 of 3"));

        let meta = h.meta("workouts").await;
        assert_eq!(meta.sync_status, SyncStatus::Error);
        assert_eq!(meta.last_push_at, None);
    }

    #[tokio::test]
    async fn test_failed_push_keeps_previous_cursor() {
        let h = harness();
        h.local.seed("workouts", "u1", vec![versioned("w1", 1, 5)]);

        let first = h.segment("workouts", SyncDirection::Push, false).await;
        assert!(first.is_success());
        let pushed_at = h.meta("workouts").await.last_push_at.unwrap();

        // A later edit whose commit is rejected.
        tokio::time::sleep(Duration::from_millis(5)).await;
        h.local.seed("workouts", "u1", vec![versioned("w2", 1, 0)]);
        h.remote
            .fail_commit(2, StoreError::PermissionDenied("write rejected".to_string()));
        let second = h.segment("workouts", SyncDirection::Push, false).await;

        assert_eq!(second.status, ResultStatus::Error);
        assert_eq!(h.remote.commit_sizes(), vec![1, 1]);
        let meta = h.meta("workouts").await;
        assert_eq!(meta.last_push_at, Some(pushed_at));
        assert_eq!(meta.sync_status, SyncStatus::Error);
    }

    #[tokio::test]
    async fn test_retried_push_keeps_conflicts_from_earlier_attempt() {
        let mut h = harness();
        h.syncer = TableSyncer::new(
            h.local.clone(),
            h.remote.clone(),
            h.metadata.clone(),
            h.reporter.clone(),
        )
        .with_batch_size(2);
        let records: Vec<SyncRecord> = (1..=3).map(|i| versioned(&format!("w{}", i), 2, 0)).collect();
        h.local.seed("workouts", "u1", records);
        for i in 1..=3 {
            let id = format!("w{}", i);
            h.remote
                .put(&format!("users/u1/workouts/{}", id), remote_workout(&id, 1));
        }
        h.remote
            .fail_commit(2, StoreError::Unavailable("try again".to_string()));

        let result = h.segment("workouts", SyncDirection::Push, false).await;

        // Attempt one commits w1 and w2, attempt two recommits all three.
        assert_eq!(h.remote.commit_sizes(), vec![2, 1, 2, 1]);
        assert!(result.is_success());
        assert_eq!(result.conflicts, 3);
        assert_eq!(h.meta("workouts").await.conflict_count, 3);
    }

    #[tokio::test]
    async fn test_push_respects_batch_size() {
        let mut h = harness();
        h.syncer = TableSyncer::new(
            h.local.clone(),
            h.remote.clone(),
            h.metadata.clone(),
            h.reporter.clone(),
        )
        .with_batch_size(2);
        let records: Vec<SyncRecord> = (0..5).map(|i| versioned(&format!("w{}", i), 1, 0)).collect();
        h.local.seed("workouts", "u1", records);

        let result = h.segment("workouts", SyncDirection::Push, false).await;
        assert_eq!(h.remote.commit_sizes(), vec![2, 2, 1]);
        assert_eq!(result.records_processed, 5);
    }

    #[tokio::test]
    async fn test_push_skips_pull_only_tables() {
        let h = harness();
        h.local
            .seed("notifications", "u1", vec![versioned("n1", 1, 0)]);

        let result = h.segment("notifications", SyncDirection::Push, false).await;
        assert_eq!(result.records_processed, 0);
        assert!(h.remote.commit_sizes().is_empty());
    }

    #[tokio::test]
    async fn test_push_local_fetch_failure() {
        let h = harness();
        h.local
            .fail_next_fetch(StoreError::InvalidData("corrupt row".to_string()));

        let result = h.segment("workouts", SyncDirection::Push, false).await;
        assert_eq!(result.status, ResultStatus::Error);
        assert_eq!(result.errors[0].operation, SyncOperation::Fetch);
    }
}
