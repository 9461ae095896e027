//! Server-side document storage.
//!
//! Documents live in one SQLite table keyed by their full path:
//! ```text
//! users/<uid>/workouts/<id>      user collection document
//! users/<uid>/settings/app       singleton document
//! exercises/<id>                 shared collection document
//! ```
//! A path with an odd number of segments names a collection, an even number
//! a document.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::SqlitePool;
use thiserror::Error;

use crate::sync::record::{is_valid_segment, ID_FIELD};
use crate::sync::{BatchWrite, SyncRecord};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("expected a {expected} path: {path}")]
    WrongKind { path: String, expected: PathKind },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt document: {0}")]
    Corrupt(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    Collection,
    Document,
}

impl std::fmt::Display for PathKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathKind::Collection => write!(f, "collection"),
            PathKind::Document => write!(f, "document"),
        }
    }
}

/// Splits and validates a slash-separated path.
pub fn parse_path(path: &str) -> Result<(PathKind, Vec<&str>), StorageError> {
    let segments: Vec<&str> = path.split('/').collect();
    if segments.iter().any(|s| !is_valid_segment(s)) {
        return Err(StorageError::InvalidPath(path.to_string()));
    }
    let kind = if segments.len() % 2 == 0 {
        PathKind::Document
    } else {
        PathKind::Collection
    };
    Ok((kind, segments))
}

fn expect_kind<'a>(path: &'a str, expected: PathKind) -> Result<Vec<&'a str>, StorageError> {
    let (kind, segments) = parse_path(path)?;
    if kind != expected {
        return Err(StorageError::WrongKind {
            path: path.to_string(),
            expected,
        });
    }
    Ok(segments)
}

#[derive(sqlx::FromRow)]
struct DocumentRow {
    doc_id: String,
    data: String,
}

impl DocumentRow {
    fn into_record(self) -> Result<SyncRecord, StorageError> {
        let mut record: SyncRecord = serde_json::from_str(&self.data)?;
        if record.id().is_none() {
            record.insert(ID_FIELD, Value::String(self.doc_id));
        }
        Ok(record)
    }
}

/// SQLite-backed document store.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    pool: SqlitePool,
}

impl DocumentStore {
    /// Opens the store at `path`, creating and migrating it if needed.
    pub async fn open(path: &Path) -> Result<Self, StorageError> {
        let pool = crate::db::connect(path).await?;
        sqlx::migrate!("./migrations/remote")
            .run(&pool)
            .await
            .map_err(sqlx::Error::from)?;
        Ok(Self { pool })
    }

    /// Documents directly under `collection` with `updatedAt >= since`.
    pub async fn query(
        &self,
        collection: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<SyncRecord>, StorageError> {
        expect_kind(collection, PathKind::Collection)?;

        let rows: Vec<DocumentRow> = match since {
            Some(since) => {
                sqlx::query_as(
                    r#"
                    SELECT doc_id, data FROM documents
                    WHERE collection = ? AND updated_at >= ?
                    ORDER BY updated_at, doc_id
                    "#,
                )
                .bind(collection)
                .bind(since.timestamp_millis())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    "SELECT doc_id, data FROM documents WHERE collection = ? ORDER BY updated_at, doc_id",
                )
                .bind(collection)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(DocumentRow::into_record).collect()
    }

    pub async fn get(&self, path: &str) -> Result<Option<SyncRecord>, StorageError> {
        expect_kind(path, PathKind::Document)?;

        let row: Option<DocumentRow> =
            sqlx::query_as("SELECT doc_id, data FROM documents WHERE path = ?")
                .bind(path)
                .fetch_optional(&self.pool)
                .await?;

        row.map(DocumentRow::into_record).transpose()
    }

    /// Applies every write in one transaction. Merge writes overlay top-level
    /// fields onto the stored document.
    pub async fn commit(&self, writes: &[BatchWrite]) -> Result<usize, StorageError> {
        for write in writes {
            expect_kind(&write.path, PathKind::Document)?;
        }

        let mut tx = self.pool.begin().await?;

        for write in writes {
            let (collection, doc_id) = match write.path.rsplit_once('/') {
                Some(parts) => parts,
                None => return Err(StorageError::InvalidPath(write.path.clone())),
            };

            let existing: Option<(String,)> =
                sqlx::query_as("SELECT data FROM documents WHERE path = ?")
                    .bind(&write.path)
                    .fetch_optional(&mut *tx)
                    .await?;

            let mut document = match (write.merge, existing) {
                (true, Some((data,))) => {
                    let mut stored: SyncRecord = serde_json::from_str(&data)?;
                    for (key, value) in write.record.fields() {
                        stored.insert(key.clone(), value.clone());
                    }
                    stored
                }
                _ => write.record.clone(),
            };
            if document.id().is_none() {
                document.insert(ID_FIELD, Value::String(doc_id.to_string()));
            }

            let updated_at = document.updated_at().map(|t| t.timestamp_millis());
            let data = serde_json::to_string(&document)?;

            sqlx::query(
                r#"
                INSERT INTO documents (path, collection, doc_id, updated_at, data)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(path) DO UPDATE SET updated_at = excluded.updated_at, data = excluded.data
                "#,
            )
            .bind(&write.path)
            .bind(collection)
            .bind(doc_id)
            .bind(updated_at)
            .bind(&data)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(writes.len())
    }
}
