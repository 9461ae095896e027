//! Side channel for table-level and orchestration-level errors.

use serde::Serialize;

use super::types::{SyncDirection, SyncOperation};

/// What went wrong, where.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub table: Option<String>,
    pub record_id: Option<String>,
    pub operation: SyncOperation,
    pub direction: Option<SyncDirection>,
    pub user_id: String,
    pub message: String,
}

/// Receives every table-level and orchestration-level failure.
///
/// Reporting is a side effect only; it never influences sync outcomes.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, report: &ErrorReport);
}

/// Writes reports to the `tracing` error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorReporter;

impl ErrorReporter for TracingErrorReporter {
    fn report(&self, report: &ErrorReport) {
        tracing::error!(
            table = report.table.as_deref().unwrap_or("-"),
            record_id = report.record_id.as_deref().unwrap_or("-"),
            operation = %report.operation,
            direction = report.direction.map(|d| d.as_str()).unwrap_or("-"),
            user_id = %report.user_id,
            "{}",
            report.message
        );
    }
}
