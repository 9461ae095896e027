//! Timestamp normalization between the local and remote representations.
//!
//! Records reach the engine with timestamps in whatever shape their writer
//! used: epoch milliseconds, epoch seconds, ISO-8601 strings, or a native
//! `DateTime`. [`Timestamp`] captures all of them, and [`Timestamp::to_datetime`]
//! is the single total conversion.
//!
//! - Local native form: epoch milliseconds (JSON integer).
//! - Remote native form: RFC 3339 string, UTC, millisecond precision.
//!
//! Any field whose key ends in `At` is treated as a timestamp. Values that
//! cannot be converted are logged and dropped from the converted record.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde_json::Value;
use thiserror::Error;

use super::record::SyncRecord;

/// Magnitude at which an integer is read as milliseconds rather than seconds.
/// 1e11 seconds is in the year 5138; 1e11 milliseconds is in 1973.
const MILLIS_THRESHOLD: i64 = 100_000_000_000;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TimestampError {
    #[error("timestamp out of range: {0}")]
    OutOfRange(String),

    #[error("unparseable timestamp: {0}")]
    Unparseable(String),
}

/// A timestamp in any of the representations the stores produce.
#[derive(Debug, Clone, PartialEq)]
pub enum Timestamp {
    EpochMillis(i64),
    EpochSeconds(i64),
    Iso(String),
    Native(DateTime<Utc>),
}

impl Timestamp {
    /// Classifies a JSON value. Returns `None` for `null` and for values that
    /// are not numbers or strings.
    pub fn from_value(value: &Value) -> Option<Timestamp> {
        match value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(Self::from_integer(i))
                } else {
                    n.as_f64().map(|f| {
                        if f.abs() >= MILLIS_THRESHOLD as f64 {
                            Timestamp::EpochMillis(f.trunc() as i64)
                        } else {
                            Timestamp::EpochMillis((f * 1000.0).trunc() as i64)
                        }
                    })
                }
            }
            Value::String(s) => Some(Timestamp::Iso(s.clone())),
            _ => None,
        }
    }

    fn from_integer(i: i64) -> Timestamp {
        if i.abs() >= MILLIS_THRESHOLD {
            Timestamp::EpochMillis(i)
        } else {
            Timestamp::EpochSeconds(i)
        }
    }

    pub fn to_datetime(&self) -> Result<DateTime<Utc>, TimestampError> {
        match self {
            Timestamp::EpochMillis(ms) => Utc
                .timestamp_millis_opt(*ms)
                .single()
                .ok_or_else(|| TimestampError::OutOfRange(ms.to_string())),
            Timestamp::EpochSeconds(s) => Utc
                .timestamp_opt(*s, 0)
                .single()
                .ok_or_else(|| TimestampError::OutOfRange(s.to_string())),
            Timestamp::Iso(s) => parse_iso(s),
            Timestamp::Native(dt) => Ok(*dt),
        }
    }
}

fn parse_iso(s: &str) -> Result<DateTime<Utc>, TimestampError> {
    let trimmed = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }
    // Zone-less ISO strings are taken as UTC.
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(naive.and_utc());
        }
    }
    if let Ok(date) = chrono::NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(naive.and_utc());
        }
    }
    // Some writers stringify epoch numbers.
    if let Ok(i) = trimmed.parse::<i64>() {
        return Timestamp::from_integer(i).to_datetime();
    }
    Err(TimestampError::Unparseable(s.to_string()))
}

/// Encodes a datetime in the remote store's native form.
pub fn to_remote_value(dt: &DateTime<Utc>) -> Value {
    Value::String(dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Encodes a datetime in the local store's native form.
pub fn to_local_value(dt: &DateTime<Utc>) -> Value {
    Value::from(dt.timestamp_millis())
}

/// Returns true for keys holding timestamps (`createdAt`, `updatedAt`, ...).
pub fn is_timestamp_field(key: &str) -> bool {
    key.len() > 2 && key.ends_with("At")
}

/// Converts a record's timestamp fields to the remote representation.
pub fn to_remote_record(record: &SyncRecord) -> SyncRecord {
    convert_record(record, to_remote_value)
}

/// Converts a record's timestamp fields to the local representation.
pub fn to_local_record(record: &SyncRecord) -> SyncRecord {
    convert_record(record, to_local_value)
}

fn convert_record(record: &SyncRecord, encode: fn(&DateTime<Utc>) -> Value) -> SyncRecord {
    let mut converted = record.clone();
    let keys: Vec<String> = record
        .fields()
        .keys()
        .filter(|k| is_timestamp_field(k))
        .cloned()
        .collect();

    for key in keys {
        let Some(value) = record.get(&key) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        let parsed = match Timestamp::from_value(value) {
            Some(ts) => ts.to_datetime(),
            None => Err(TimestampError::Unparseable(value.to_string())),
        };
        match parsed {
            Ok(dt) => {
                converted.insert(key, encode(&dt));
            }
            Err(e) => {
                tracing::warn!(
                    record_id = record.id().unwrap_or("?"),
                    field = %key,
                    error = %e,
                    "Dropping timestamp field that could not be converted"
                );
                converted.remove(&key);
            }
        }
    }

    converted
}
