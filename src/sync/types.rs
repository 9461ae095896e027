//! Wire shapes exchanged with callers: options, results, progress and metadata.
//!
//! Everything here serializes to plain camelCase JSON so it can cross a
//! process or UI boundary unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default retry budget for a table segment.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncDirection {
    Push,
    Pull,
    #[default]
    Bidirectional,
}

impl SyncDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncDirection::Push => "push",
            SyncDirection::Pull => "pull",
            SyncDirection::Bidirectional => "bidirectional",
        }
    }

    /// The direction segments this direction expands to, in execution order.
    pub fn segments(&self) -> &'static [SyncDirection] {
        match self {
            SyncDirection::Push => &[SyncDirection::Push],
            SyncDirection::Pull => &[SyncDirection::Pull],
            SyncDirection::Bidirectional => &[SyncDirection::Pull, SyncDirection::Push],
        }
    }
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted status of a (table, user) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    #[default]
    Idle,
    Syncing,
    Success,
    Error,
    Conflict,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Success => "success",
            SyncStatus::Error => "error",
            SyncStatus::Conflict => "conflict",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(SyncStatus::Idle),
            "syncing" => Some(SyncStatus::Syncing),
            "success" => Some(SyncStatus::Success),
            "error" => Some(SyncStatus::Error),
            "conflict" => Some(SyncStatus::Conflict),
            _ => None,
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one direction segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Success,
    Error,
}

/// Which cursor an update applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CursorKind {
    Pull,
    Push,
    Both,
}

impl From<SyncDirection> for CursorKind {
    fn from(direction: SyncDirection) -> Self {
        match direction {
            SyncDirection::Pull => CursorKind::Pull,
            SyncDirection::Push => CursorKind::Push,
            SyncDirection::Bidirectional => CursorKind::Both,
        }
    }
}

/// The step that produced an error entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOperation {
    /// Fetching the change set (remote query or local scan).
    Fetch,
    /// Validating or converting a single record.
    Validate,
    /// Reading the counterpart copy of a record.
    Lookup,
    /// Writing a pulled record locally.
    Upsert,
    /// Committing a batch remotely.
    Commit,
    /// Orchestration-level setup.
    Setup,
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncOperation::Fetch => "fetch",
            SyncOperation::Validate => "validate",
            SyncOperation::Lookup => "lookup",
            SyncOperation::Upsert => "upsert",
            SyncOperation::Commit => "commit",
            SyncOperation::Setup => "setup",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncOptions {
    pub direction: SyncDirection,
    /// Tables to sync; empty means every registered table.
    pub tables: Vec<String>,
    pub force_full_sync: bool,
    pub max_retries: u32,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            direction: SyncDirection::Bidirectional,
            tables: Vec::new(),
            force_full_sync: false,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl SyncOptions {
    pub fn pull() -> Self {
        Self {
            direction: SyncDirection::Pull,
            ..Self::default()
        }
    }

    pub fn push() -> Self {
        Self {
            direction: SyncDirection::Push,
            ..Self::default()
        }
    }

    pub fn with_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables = tables.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncErrorEntry {
    /// Offending record id, or `"all"` when the whole segment failed.
    pub record_id: String,
    pub error: String,
    pub operation: SyncOperation,
    pub timestamp: DateTime<Utc>,
}

/// Record id used for errors that failed a whole segment.
pub const ALL_RECORDS: &str = "all";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub table_name: String,
    pub direction: SyncDirection,
    pub status: ResultStatus,
    pub records_processed: u64,
    pub records_created: u64,
    pub records_updated: u64,
    pub records_deleted: u64,
    pub conflicts: u64,
    pub errors: Vec<SyncErrorEntry>,
    /// Wall time of the segment in milliseconds.
    #[serde(rename = "duration")]
    pub duration_ms: u64,
}

impl SyncResult {
    pub fn new(table_name: impl Into<String>, direction: SyncDirection) -> Self {
        Self {
            table_name: table_name.into(),
            direction,
            status: ResultStatus::Success,
            records_processed: 0,
            records_created: 0,
            records_updated: 0,
            records_deleted: 0,
            conflicts: 0,
            errors: Vec::new(),
            duration_ms: 0,
        }
    }

    /// A result for a table that failed before any work could start.
    pub fn failed(
        table_name: impl Into<String>,
        direction: SyncDirection,
        operation: SyncOperation,
        error: impl Into<String>,
    ) -> Self {
        let mut result = Self::new(table_name, direction);
        result.fail(operation, error);
        result
    }

    pub fn push_error(
        &mut self,
        record_id: impl Into<String>,
        operation: SyncOperation,
        error: impl Into<String>,
    ) {
        self.errors.push(SyncErrorEntry {
            record_id: record_id.into(),
            error: error.into(),
            operation,
            timestamp: Utc::now(),
        });
    }

    /// Marks the whole segment failed and records one `"all"` entry.
    pub fn fail(&mut self, operation: SyncOperation, error: impl Into<String>) {
        self.status = ResultStatus::Error;
        self.push_error(ALL_RECORDS, operation, error);
    }

    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SyncProgress {
    pub current_table: Option<String>,
    pub total_tables: usize,
    pub completed_tables: usize,
    pub current_operation: String,
    pub records_processed: u64,
    pub total_records: u64,
    /// 0-100, floor of completed/total.
    pub percentage: u8,
}

impl SyncProgress {
    pub fn starting(total_tables: usize) -> Self {
        Self {
            total_tables,
            current_operation: "Starting sync".to_string(),
            ..Self::default()
        }
    }

    /// Records one finished table and recomputes the percentage.
    pub fn complete_table(&mut self, table: &str, records_processed: u64, total_records: u64) {
        self.completed_tables = (self.completed_tables + 1).min(self.total_tables);
        self.current_table = Some(table.to_string());
        self.current_operation = format!("Synced {}", table);
        self.records_processed += records_processed;
        self.total_records += total_records;
        self.percentage = percentage(self.completed_tables, self.total_tables);
    }
}

pub(crate) fn percentage(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((completed.min(total) * 100) / total) as u8
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMetadata {
    pub table_name: String,
    pub user_id: String,
    pub last_pull_at: Option<DateTime<Utc>>,
    pub last_push_at: Option<DateTime<Utc>>,
    pub sync_status: SyncStatus,
    pub conflict_count: u64,
    pub last_error: Option<String>,
}

impl SyncMetadata {
    pub fn new(table_name: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            user_id: user_id.into(),
            last_pull_at: None,
            last_push_at: None,
            sync_status: SyncStatus::Idle,
            conflict_count: 0,
            last_error: None,
        }
    }

    pub fn cursor(&self, direction: SyncDirection) -> Option<DateTime<Utc>> {
        match direction {
            SyncDirection::Pull => self.last_pull_at,
            SyncDirection::Push => self.last_push_at,
            SyncDirection::Bidirectional => match (self.last_pull_at, self.last_push_at) {
                (Some(a), Some(b)) => Some(a.min(b)),
                _ => None,
            },
        }
    }

    /// Moves the selected cursors forward; never moves them back.
    pub fn advance(&mut self, which: CursorKind, at: DateTime<Utc>) {
        if matches!(which, CursorKind::Pull | CursorKind::Both) {
            self.last_pull_at = Some(self.last_pull_at.map_or(at, |c| c.max(at)));
        }
        if matches!(which, CursorKind::Push | CursorKind::Both) {
            self.last_push_at = Some(self.last_push_at.map_or(at, |c| c.max(at)));
        }
    }
}
