//! JSON bodies of the document store HTTP API.
//!
//! Shared by [`HttpRemoteStore`](super::http_remote::HttpRemoteStore) and the
//! `fitsync-server` handlers so both sides agree on field names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::record::SyncRecord;
use super::remote::BatchWrite;

pub const HEALTH_ROUTE: &str = "/health";
pub const ME_ROUTE: &str = "/me";
pub const QUERY_ROUTE: &str = "/v1/query";
pub const DOCUMENT_ROUTE: &str = "/v1/document";
pub const COMMIT_ROUTE: &str = "/v1/commit";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    /// Collection path, e.g. `users/u1/workouts`.
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub documents: Vec<SyncRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRequest {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentResponse {
    pub document: Option<SyncRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitRequest {
    pub writes: Vec<BatchWrite>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitResponse {
    pub committed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Body of every non-2xx response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable code such as `invalid_key` or `forbidden`.
    pub error: String,
    pub message: String,
}
