//! Local-first bidirectional sync between the on-device store and the cloud
//! document store.
//!
//! # Layout
//!
//! - [`orchestrator`]: serialized runs, table scheduling, progress.
//! - [`syncer`]: pull and push of one table, cursors, batching.
//! - [`registry`]: the fixed table → remote path mapping.
//! - [`conflict`], [`retry`], [`timestamp`]: pure helpers used by the syncer.
//! - [`local`], [`remote`], [`metadata`], [`report`]: the collaborator traits.
//! - [`http_remote`], [`protocol`]: the HTTP remote store client.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use fitsync::sync::{
//!     EngineSettings, HttpRemoteStore, MemoryMetadataStore, Stores, SyncOptions,
//!     SyncOrchestrator, TableRegistry, TracingErrorReporter,
//! };
//! # async fn demo(local: Arc<dyn fitsync::sync::LocalStore>) -> Result<(), Box<dyn std::error::Error>> {
//! let remote = HttpRemoteStore::new("http://localhost:8080", "key", std::time::Duration::from_secs(30))?;
//! let orchestrator = SyncOrchestrator::new(
//!     TableRegistry::default(),
//!     Stores {
//!         local,
//!         remote: Arc::new(remote),
//!         metadata: Arc::new(MemoryMetadataStore::new()),
//!         reporter: Arc::new(TracingErrorReporter),
//!     },
//!     EngineSettings::default(),
//! );
//! let results = orchestrator.sync("user-1", SyncOptions::default()).await?;
//! # Ok(())
//! # }
//! ```

pub mod conflict;
pub mod error;
pub mod http_remote;
pub mod local;
pub mod metadata;
pub mod orchestrator;
pub mod protocol;
pub mod record;
pub mod registry;
pub mod remote;
pub mod report;
pub mod retry;
pub mod syncer;
pub mod timestamp;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use conflict::{detect_conflict, Resolution};
pub use error::{RecordError, StoreError, SyncError};
pub use http_remote::HttpRemoteStore;
pub use local::LocalStore;
pub use metadata::{MemoryMetadataStore, MetadataStore};
pub use orchestrator::{EngineSettings, ProgressCallback, Stores, SyncOrchestrator};
pub use record::SyncRecord;
pub use registry::{TableClass, TableRegistry, TableSpec, REGISTRY_VERSION};
pub use remote::{BatchWrite, RemoteStore, MAX_BATCH_SIZE};
pub use report::{ErrorReport, ErrorReporter, TracingErrorReporter};
pub use retry::RetryPolicy;
pub use syncer::{SegmentFailure, TableSyncer};
pub use types::{
    CursorKind, ResultStatus, SyncDirection, SyncErrorEntry, SyncMetadata, SyncOperation,
    SyncOptions, SyncProgress, SyncResult, SyncStatus,
};
