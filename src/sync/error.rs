//! Sync error types.

use thiserror::Error;

use super::registry::RegistryError;

/// Errors raised by the local, remote and metadata store adapters.
///
/// The `Display` text doubles as the input to retry classification, so the
/// prefixes below are part of the contract with [`super::retry`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("not authenticated: {0}")]
    Unauthenticated(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::PoolTimedOut => StoreError::Timeout(e.to_string()),
            sqlx::Error::Decode(_) | sqlx::Error::ColumnDecode { .. } => {
                StoreError::InvalidData(e.to_string())
            }
            other => StoreError::Backend(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::InvalidData(e.to_string())
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            StoreError::Timeout(e.to_string())
        } else if e.is_decode() {
            StoreError::InvalidData(e.to_string())
        } else {
            StoreError::Network(e.to_string())
        }
    }
}

/// Record-level validation failures. These never fail a table.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    #[error("record is missing an id")]
    MissingId,

    #[error("record id must be a non-empty string without '/'")]
    InvalidId,

    #[error("invalid version for record {id}: {value}")]
    InvalidVersion { id: String, value: String },

    #[error("record is not a JSON object")]
    NotAnObject,

    #[error("invalid path segment: {0}")]
    InvalidPathSegment(String),
}

/// Orchestration-level errors returned to `sync()` callers.
///
/// Table-level failures are reported inside [`super::SyncResult`]s instead.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("invalid user id: {0:?}")]
    InvalidUser(String),

    #[error("sync setup failed: {0}")]
    Setup(#[from] StoreError),

    #[error("table registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("sync worker is no longer running")]
    WorkerStopped,

    #[error("sync run aborted: {0}")]
    Aborted(String),
}
