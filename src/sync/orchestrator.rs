//! Serialized sync runs over every registered table.
//!
//! A [`SyncOrchestrator`] owns a single worker task fed by a channel of run
//! requests. Calls to [`SyncOrchestrator::sync`] queue behind whatever run is
//! active, so at most one run touches the stores at a time.
//!
//! Within a run, tables are scheduled by class:
//!
//! 1. independent tables, concurrently;
//! 2. singleton tables, one after another;
//! 3. pull-only tables, pulled last.
//!
//! A failing table never aborts its siblings. Only an unusable user id or an
//! unreachable remote fails the run as a whole.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinSet;
use tracing::Instrument;
use uuid::Uuid;

use super::error::SyncError;
use super::local::LocalStore;
use super::metadata::MetadataStore;
use super::record::is_valid_segment;
use super::registry::{TableClass, TableRegistry, TableSpec};
use super::remote::{RemoteStore, MAX_BATCH_SIZE};
use super::report::{ErrorReport, ErrorReporter};
use super::retry::RetryPolicy;
use super::syncer::TableSyncer;
use super::types::{SyncDirection, SyncOperation, SyncOptions, SyncProgress, SyncResult};

/// Receives progress after every finished table. Only one is held at a time.
pub type ProgressCallback = Arc<dyn Fn(&SyncProgress) + Send + Sync>;

/// Tuning knobs for an orchestrator.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub retry: RetryPolicy,
    pub batch_size: usize,
    /// Cap on concurrently syncing independent tables. `None` runs them all.
    pub max_parallel_tables: Option<usize>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            batch_size: MAX_BATCH_SIZE,
            max_parallel_tables: None,
        }
    }
}

/// Store handles the orchestrator drives.
pub struct Stores {
    pub local: Arc<dyn LocalStore>,
    pub remote: Arc<dyn RemoteStore>,
    pub metadata: Arc<dyn MetadataStore>,
    pub reporter: Arc<dyn ErrorReporter>,
}

type RunReply = Result<Vec<SyncResult>, SyncError>;

struct RunRequest {
    user_id: String,
    options: SyncOptions,
    reply: oneshot::Sender<RunReply>,
}

/// State shared between the handle and the worker.
struct Engine {
    registry: TableRegistry,
    syncer: TableSyncer,
    remote: Arc<dyn RemoteStore>,
    metadata: Arc<dyn MetadataStore>,
    reporter: Arc<dyn ErrorReporter>,
    retry: RetryPolicy,
    max_parallel_tables: Option<usize>,
    syncing: AtomicBool,
    progress: RwLock<Option<SyncProgress>>,
    callback: Mutex<Option<ProgressCallback>>,
}

pub struct SyncOrchestrator {
    engine: Arc<Engine>,
    requests: mpsc::UnboundedSender<RunRequest>,
}

impl SyncOrchestrator {
    /// Builds the orchestrator and spawns its worker on the current Tokio
    /// runtime. The worker stops once the orchestrator is dropped.
    pub fn new(registry: TableRegistry, stores: Stores, settings: EngineSettings) -> Self {
        let syncer = TableSyncer::new(
            stores.local,
            stores.remote.clone(),
            stores.metadata.clone(),
            stores.reporter.clone(),
        )
        .with_batch_size(settings.batch_size);

        let engine = Arc::new(Engine {
            registry,
            syncer,
            remote: stores.remote,
            metadata: stores.metadata,
            reporter: stores.reporter,
            retry: settings.retry,
            max_parallel_tables: settings.max_parallel_tables,
            syncing: AtomicBool::new(false),
            progress: RwLock::new(None),
            callback: Mutex::new(None),
        });

        let (requests, rx) = mpsc::unbounded_channel();
        tokio::spawn(worker(engine.clone(), rx));

        Self { engine, requests }
    }

    /// Runs a sync for `user_id`, waiting for any earlier run to finish first.
    ///
    /// Table failures are reported inside the returned results. An error is
    /// returned only when the run could not start or was aborted by a panic.
    pub async fn sync(&self, user_id: &str, options: SyncOptions) -> Result<Vec<SyncResult>, SyncError> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(RunRequest {
                user_id: user_id.to_string(),
                options,
                reply,
            })
            .map_err(|_| SyncError::WorkerStopped)?;
        rx.await.map_err(|_| SyncError::WorkerStopped)?
    }

    /// True while a run is executing (not while merely queued).
    pub fn is_syncing(&self) -> bool {
        self.engine.syncing.load(Ordering::SeqCst)
    }

    /// Progress of the executing run, if any.
    pub fn current_progress(&self) -> Option<SyncProgress> {
        match self.engine.progress.read() {
            Ok(progress) => progress.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replaces the progress observer; `None` removes it.
    pub fn register_progress_callback(&self, callback: Option<ProgressCallback>) {
        let mut slot = self
            .engine
            .callback
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = callback;
    }

    pub fn registry(&self) -> &TableRegistry {
        &self.engine.registry
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataStore> {
        &self.engine.metadata
    }
}

async fn worker(engine: Arc<Engine>, mut rx: mpsc::UnboundedReceiver<RunRequest>) {
    while let Some(request) = rx.recv().await {
        let RunRequest {
            user_id,
            options,
            reply,
        } = request;

        // Each run gets its own task so a panic ends that run, not the worker.
        let run = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move { engine.run(&user_id, options).await }
        });
        let outcome = match run.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %e, "Sync run aborted");
                engine.syncing.store(false, Ordering::SeqCst);
                engine.set_progress(None);
                Err(SyncError::Aborted(e.to_string()))
            }
        };
        // The caller may have stopped waiting; the run still counted.
        let _ = reply.send(outcome);
    }
    tracing::debug!("Sync worker stopped");
}

/// Where a requested table's results land in the final list.
struct Slot {
    name: String,
    results: Option<Vec<SyncResult>>,
}

impl Engine {
    async fn run(self: &Arc<Self>, user_id: &str, options: SyncOptions) -> RunReply {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "sync_run",
            %run_id,
            user_id,
            direction = %options.direction
        );

        async {
            if user_id.trim().is_empty() || !is_valid_segment(user_id) {
                let error = SyncError::InvalidUser(user_id.to_string());
                self.report_setup(user_id, None, &error.to_string());
                return Err(error);
            }

            self.syncing.store(true, Ordering::SeqCst);
            let outcome = self.run_tables(user_id, &options).await;
            self.syncing.store(false, Ordering::SeqCst);
            self.set_progress(None);
            outcome
        }
        .instrument(span)
        .await
    }

    async fn run_tables(self: &Arc<Self>, user_id: &str, options: &SyncOptions) -> RunReply {
        let started = std::time::Instant::now();
        tracing::info!(tables = ?options.tables, force_full = options.force_full_sync, "Starting sync run");

        if let Err(e) = self.remote.ensure_ready(user_id).await {
            self.report_setup(user_id, None, &e.to_string());
            return Err(SyncError::Setup(e));
        }

        let requested = self.requested_tables(options);
        let mut slots: Vec<Slot> = requested
            .iter()
            .map(|name| Slot {
                name: name.clone(),
                results: None,
            })
            .collect();

        let mut progress = SyncProgress::starting(requested.len());
        self.publish(&progress);

        let mut independent = Vec::new();
        let mut singletons = Vec::new();
        let mut pull_only = Vec::new();

        for (index, name) in requested.iter().enumerate() {
            match self.registry.get(name) {
                Some(spec) => match spec.class {
                    TableClass::Independent => independent.push((index, *spec)),
                    TableClass::Singleton => singletons.push((index, *spec)),
                    TableClass::PullOnly => pull_only.push((index, *spec)),
                },
                None => {
                    let message = format!("unknown table: {}", name);
                    self.report_setup(user_id, Some(name.as_str()), &message);
                    let results = options
                        .direction
                        .segments()
                        .iter()
                        .map(|d| SyncResult::failed(name.as_str(), *d, SyncOperation::Setup, message.as_str()))
                        .collect();
                    self.finish_table(&mut progress, &mut slots[index], results);
                }
            }
        }

        let retry = self.retry.with_max_retries(options.max_retries);

        self.run_independent(user_id, options, &retry, independent, &mut slots, &mut progress)
            .await;

        for (index, spec) in singletons {
            self.announce(&mut progress, spec.name);
            let results = self
                .sync_table(user_id, &spec, options.direction, options.force_full_sync, &retry)
                .await;
            self.finish_table(&mut progress, &mut slots[index], results);
        }

        for (index, spec) in pull_only {
            self.announce(&mut progress, spec.name);
            let results = self
                .sync_table(user_id, &spec, SyncDirection::Pull, options.force_full_sync, &retry)
                .await;
            self.finish_table(&mut progress, &mut slots[index], results);
        }

        progress.current_table = None;
        progress.current_operation = "Sync complete".to_string();
        progress.percentage = 100;
        self.publish(&progress);

        let results: Vec<SyncResult> = slots
            .into_iter()
            .flat_map(|slot| slot.results.unwrap_or_default())
            .collect();

        let failed = results.iter().filter(|r| !r.is_success()).count();
        tracing::info!(
            segments = results.len(),
            failed,
            duration_ms = started.elapsed().as_millis() as u64,
            "Sync run finished"
        );
        Ok(results)
    }

    /// Requested tables in caller order, duplicates dropped. Empty means all.
    fn requested_tables(&self, options: &SyncOptions) -> Vec<String> {
        if options.tables.is_empty() {
            return self.registry.names();
        }
        let mut seen = std::collections::HashSet::new();
        options
            .tables
            .iter()
            .filter(|name| seen.insert(name.as_str()))
            .cloned()
            .collect()
    }

    async fn run_independent(
        self: &Arc<Self>,
        user_id: &str,
        options: &SyncOptions,
        retry: &RetryPolicy,
        tables: Vec<(usize, TableSpec)>,
        slots: &mut [Slot],
        progress: &mut SyncProgress,
    ) {
        if tables.is_empty() {
            return;
        }

        let limit = self
            .max_parallel_tables
            .map(|n| Arc::new(Semaphore::new(n.max(1))));
        let mut set = JoinSet::new();
        let mut spawned = Vec::with_capacity(tables.len());

        for (index, spec) in tables {
            let engine = Arc::clone(self);
            let user_id = user_id.to_string();
            let retry = retry.clone();
            let limit = limit.clone();
            let direction = options.direction;
            let force_full = options.force_full_sync;

            set.spawn(
                async move {
                    let _permit = match limit {
                        Some(semaphore) => semaphore.acquire_owned().await.ok(),
                        None => None,
                    };
                    let results = engine
                        .sync_table(&user_id, &spec, direction, force_full, &retry)
                        .await;
                    (index, results)
                }
                .in_current_span(),
            );
            spawned.push((index, spec.name));
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, results)) => self.finish_table(progress, &mut slots[index], results),
                Err(e) => tracing::error!(error = %e, "Table task failed"),
            }
        }

        // A task that panicked never filled its slot.
        for (index, name) in spawned {
            if slots[index].results.is_some() {
                continue;
            }
            let message = format!("table task for {} did not complete", name);
            self.reporter.report(&ErrorReport {
                table: Some(name.to_string()),
                record_id: None,
                operation: SyncOperation::Setup,
                direction: Some(options.direction),
                user_id: user_id.to_string(),
                message: message.clone(),
            });
            let results = options
                .direction
                .segments()
                .iter()
                .map(|d| SyncResult::failed(name, *d, SyncOperation::Setup, message.as_str()))
                .collect();
            self.finish_table(progress, &mut slots[index], results);
        }
    }

    /// Every direction segment of one table. Push still runs after a failed pull.
    async fn sync_table(
        &self,
        user_id: &str,
        spec: &TableSpec,
        direction: SyncDirection,
        force_full: bool,
        retry: &RetryPolicy,
    ) -> Vec<SyncResult> {
        let mut results = Vec::with_capacity(2);
        for segment in direction.segments() {
            let result = self
                .syncer
                .sync_segment(user_id, spec, *segment, force_full, retry)
                .await;
            results.push(result);
        }
        results
    }

    fn announce(&self, progress: &mut SyncProgress, table: &str) {
        progress.current_table = Some(table.to_string());
        progress.current_operation = format!("Syncing {}", table);
        self.publish(progress);
    }

    fn finish_table(&self, progress: &mut SyncProgress, slot: &mut Slot, results: Vec<SyncResult>) {
        let processed: u64 = results.iter().map(|r| r.records_processed).sum();
        let failed: u64 = results.iter().map(|r| r.errors.len() as u64).sum();
        progress.complete_table(&slot.name, processed, processed + failed);
        slot.results = Some(results);
        self.publish(progress);
    }

    fn publish(&self, progress: &SyncProgress) {
        self.set_progress(Some(progress.clone()));
        let callback = self
            .callback
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        if let Some(callback) = callback {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(progress))).is_err() {
                tracing::error!(
                    completed_tables = progress.completed_tables,
                    "Progress callback panicked"
                );
            }
        }
    }

    fn set_progress(&self, progress: Option<SyncProgress>) {
        let mut slot = self
            .progress
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = progress;
    }

    fn report_setup(&self, user_id: &str, table: Option<&str>, message: &str) {
        self.reporter.report(&ErrorReport {
            table: table.map(str::to_string),
            record_id: None,
            operation: SyncOperation::Setup,
            direction: None,
            user_id: user_id.to_string(),
            message: message.to_string(),
        });
    }
}
