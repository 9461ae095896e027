//! In-memory stores for engine tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use super::error::StoreError;
use super::local::LocalStore;
use super::record::SyncRecord;
use super::remote::{BatchWrite, RemoteStore};
use super::report::{ErrorReport, ErrorReporter};

pub fn record(value: Value) -> SyncRecord {
    SyncRecord::from_value(value).unwrap()
}

/// A record with the given id and version, updated `minutes_ago`.
pub fn versioned(id: &str, version: u64, minutes_ago: i64) -> SyncRecord {
    let updated = Utc::now() - chrono::Duration::minutes(minutes_ago);
    record(json!({
        "id": id,
        "version": version,
        "name": format!("record {}", id),
        "updatedAt": updated.timestamp_millis(),
    }))
}

/// Ordered log of store calls, shared between doubles.
#[derive(Debug, Default)]
pub struct CallLog {
    events: Mutex<Vec<String>>,
}

impl CallLog {
    pub fn push(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn position(&self, needle: &str) -> Option<usize> {
        self.events().iter().position(|e| e.contains(needle))
    }

    pub fn last_position(&self, needle: &str) -> Option<usize> {
        self.events().iter().rposition(|e| e.contains(needle))
    }
}

type TableKey = (String, String);

#[derive(Default)]
pub struct MemoryLocalStore {
    records: Mutex<HashMap<TableKey, BTreeMap<String, SyncRecord>>>,
    fetch_failures: Mutex<VecDeque<StoreError>>,
    log: Arc<CallLog>,
}

impl MemoryLocalStore {
    pub fn new(log: Arc<CallLog>) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    pub fn seed(&self, table: &str, user_id: &str, records: Vec<SyncRecord>) {
        let mut all = self.records.lock().unwrap();
        let rows = all
            .entry((table.to_string(), user_id.to_string()))
            .or_default();
        for record in records {
            rows.insert(record.id().unwrap_or_default().to_string(), record);
        }
    }

    pub fn all(&self, table: &str, user_id: &str) -> Vec<SyncRecord> {
        self.records
            .lock()
            .unwrap()
            .get(&(table.to_string(), user_id.to_string()))
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn fail_next_fetch(&self, error: StoreError) {
        self.fetch_failures.lock().unwrap().push_back(error);
    }
}

#[async_trait]
impl LocalStore for MemoryLocalStore {
    async fn get_records_by_user(
        &self,
        table: &str,
        user_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<SyncRecord>, StoreError> {
        self.log.push(format!("local:fetch:{}", table));
        if let Some(error) = self.fetch_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(self
            .all(table, user_id)
            .into_iter()
            .filter(|r| match since {
                Some(since) => r.updated_at().map_or(true, |at| at >= since),
                None => true,
            })
            .collect())
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
        self.records
            .lock()
            .unwrap()
            .entry((table.to_string(), user_id.to_string()))
            .or_default()
            .insert(id.to_string(), record.clone());
        Ok(())
    }

    async fn get_record_by_id(
        &self,
        table: &str,
        user_id: &str,
        id: &str,
    ) -> Result<Option<SyncRecord>, StoreError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(&(table.to_string(), user_id.to_string()))
            .and_then(|rows| rows.get(id).cloned()))
    }
}

/// Document store keyed by full path, with failure injection.
#[derive(Default)]
pub struct MemoryRemoteStore {
    documents: Mutex<BTreeMap<String, SyncRecord>>,
    query_failures: Mutex<VecDeque<StoreError>>,
    /// Keyed by 1-based commit call number.
    commit_failures: Mutex<HashMap<usize, StoreError>>,
    ready_error: Mutex<Option<StoreError>>,
    commit_sizes: Mutex<Vec<usize>>,
    delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    log: Arc<CallLog>,
}

impl MemoryRemoteStore {
    pub fn new(log: Arc<CallLog>) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    pub fn put(&self, path: &str, record: SyncRecord) {
        self.documents
            .lock()
            .unwrap()
            .insert(path.to_string(), record);
    }

    pub fn document(&self, path: &str) -> Option<SyncRecord> {
        self.documents.lock().unwrap().get(path).cloned()
    }

    pub fn document_count(&self) -> usize {
        self.documents.lock().unwrap().len()
    }

    pub fn fail_next_query(&self, error: StoreError) {
        self.query_failures.lock().unwrap().push_back(error);
    }

    pub fn fail_commit(&self, call: usize, error: StoreError) {
        self.commit_failures.lock().unwrap().insert(call, error);
    }

    pub fn fail_ready(&self, error: StoreError) {
        *self.ready_error.lock().unwrap() = Some(error);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn commit_sizes(&self) -> Vec<usize> {
        self.commit_sizes.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self, label: String) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.log.push(format!("start:{}", label));
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        InFlight { store: self, label }
    }
}

struct InFlight<'a> {
    store: &'a MemoryRemoteStore,
    label: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.store.log.push(format!("end:{}", self.label));
        self.store.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

fn directly_under(collection: &str, path: &str) -> bool {
    path.strip_prefix(collection)
        .and_then(|rest| rest.strip_prefix('/'))
        .is_some_and(|id| !id.is_empty() && !id.contains('/'))
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn ensure_ready(&self, _user_id: &str) -> Result<(), StoreError> {
        match self.ready_error.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn query(
        &self,
        collection_path: &str,
        _user_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<SyncRecord>, StoreError> {
        let _guard = self.enter(format!("query:{}", collection_path)).await;
        if let Some(error) = self.query_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        let documents = self.documents.lock().unwrap();
        Ok(documents
            .iter()
            .filter(|(path, _)| directly_under(collection_path, path))
            .filter(|(_, r)| match since {
                Some(since) => r.updated_at().is_some_and(|at| at >= since),
                None => true,
            })
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn get_document(&self, path: &str) -> Result<Option<SyncRecord>, StoreError> {
        let _guard = self.enter(format!("get:{}", path)).await;
        Ok(self.document(path))
    }

    async fn commit_batch(&self, writes: Vec<BatchWrite>) -> Result<(), StoreError> {
        let label = writes
            .first()
            .map(|w| w.path.clone())
            .unwrap_or_default();
        let _guard = self.enter(format!("commit:{}", label)).await;

        let call = {
            let mut sizes = self.commit_sizes.lock().unwrap();
            sizes.push(writes.len());
            sizes.len()
        };
        if let Some(error) = self.commit_failures.lock().unwrap().remove(&call) {
            return Err(error);
        }

        let mut documents = self.documents.lock().unwrap();
        for write in writes {
            let merged = match (write.merge, documents.remove(&write.path)) {
                (true, Some(existing)) => {
                    let mut merged = existing;
                    for (key, value) in write.record.fields() {
                        merged.insert(key.clone(), value.clone());
                    }
                    merged
                }
                _ => write.record,
            };
            documents.insert(write.path, merged);
        }
        Ok(())
    }
}

/// Collects reports instead of logging them.
#[derive(Default)]
pub struct RecordingReporter {
    reports: Mutex<Vec<ErrorReport>>,
}

impl RecordingReporter {
    pub fn reports(&self) -> Vec<ErrorReport> {
        self.reports.lock().unwrap().clone()
    }
}

impl ErrorReporter for RecordingReporter {
    fn report(&self, report: &ErrorReport) {
        self.reports.lock().unwrap().push(report.clone());
    }
}
