//! The opaque record shape shared by the local and remote stores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::RecordError;
use super::timestamp::Timestamp;

pub const ID_FIELD: &str = "id";
pub const VERSION_FIELD: &str = "version";
pub const UPDATED_AT_FIELD: &str = "updatedAt";
pub const DELETED_FIELD: &str = "deleted";
pub const CUSTOM_FIELD: &str = "isCustom";

/// A record as a map of fields.
///
/// Only `id`, `version`, `updatedAt`, `deleted` and `isCustom` mean anything
/// to the engine; every other field passes through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncRecord(Map<String, Value>);

impl SyncRecord {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    pub fn from_value(value: Value) -> Result<Self, RecordError> {
        match value {
            Value::Object(fields) => Ok(Self(fields)),
            _ => Err(RecordError::NotAnObject),
        }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// The record id, if present and a string.
    pub fn id(&self) -> Option<&str> {
        self.0.get(ID_FIELD).and_then(Value::as_str)
    }

    /// The record id, validated for use as a storage key and path segment.
    pub fn require_id(&self) -> Result<&str, RecordError> {
        match self.0.get(ID_FIELD) {
            None | Some(Value::Null) => Err(RecordError::MissingId),
            Some(Value::String(id)) if is_valid_segment(id) => Ok(id),
            Some(_) => Err(RecordError::InvalidId),
        }
    }

    /// The record version. Absent or `null` reads as 0.
    pub fn version(&self) -> Result<u64, RecordError> {
        match self.0.get(VERSION_FIELD) {
            None | Some(Value::Null) => Ok(0),
            Some(value) => value.as_u64().ok_or_else(|| RecordError::InvalidVersion {
                id: self.id().unwrap_or("?").to_string(),
                value: value.to_string(),
            }),
        }
    }

    /// `updatedAt` as a datetime; unconvertible values read as absent.
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.0
            .get(UPDATED_AT_FIELD)
            .and_then(Timestamp::from_value)
            .and_then(|ts| ts.to_datetime().ok())
    }

    /// Tombstoned records carry `deleted: true`.
    pub fn is_deleted(&self) -> bool {
        matches!(self.0.get(DELETED_FIELD), Some(Value::Bool(true)))
    }

    /// User-owned entries in tables that also hold shared content.
    pub fn is_custom(&self) -> bool {
        matches!(self.0.get(CUSTOM_FIELD), Some(Value::Bool(true)))
    }
}

impl From<Map<String, Value>> for SyncRecord {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

/// A path segment must be non-empty and must not contain `/`.
pub fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty() && !segment.contains('/') && segment != "." && segment != ".."
}
