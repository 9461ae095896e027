//! Sync CLI commands.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::{Args, Subcommand, ValueEnum};
use sqlx::SqlitePool;

use fitsync::config::Config;
use fitsync::db::{SqliteLocalStore, SqliteMetadataStore};
use fitsync::sync::{
    HttpRemoteStore, MetadataStore, StoreError, Stores, SyncDirection, SyncError, SyncOptions,
    SyncOrchestrator, SyncProgress, SyncResult, TableRegistry, TracingErrorReporter,
};

use super::OutputFormat;

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum DirectionArg {
    Pull,
    Push,
    Bidirectional,
}

impl From<DirectionArg> for SyncDirection {
    fn from(arg: DirectionArg) -> Self {
        match arg {
            DirectionArg::Pull => SyncDirection::Pull,
            DirectionArg::Push => SyncDirection::Push,
            DirectionArg::Bidirectional => SyncDirection::Bidirectional,
        }
    }
}

/// Sync local data with the remote store
#[derive(Debug, Args)]
#[command(args_conflicts_with_subcommands = true)]
pub struct SyncCommand {
    #[command(subcommand)]
    command: Option<SyncSubcommand>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Direction to sync
    #[arg(long, short, value_enum, default_value = "bidirectional")]
    direction: DirectionArg,

    /// Only sync this table (repeatable)
    #[arg(long = "table", short = 't')]
    tables: Vec<String>,

    /// Ignore sync cursors and transfer everything
    #[arg(long)]
    force: bool,

    /// Retries per table segment for transient errors
    #[arg(long)]
    max_retries: Option<u32>,

    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    format: OutputFormat,
}

#[derive(Debug, Subcommand)]
enum SyncSubcommand {
    /// Show per-table sync state
    Status {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Reset the conflict counter of a table
    ResetConflicts {
        /// Table name
        #[arg(long, short = 't')]
        table: String,
    },
}

impl SyncCommand {
    pub async fn run(&self, pool: &SqlitePool, config: &Config) -> Result<(), SyncCommandError> {
        let user_id = config
            .user_id
            .value
            .as_deref()
            .ok_or(SyncCommandError::NotConfigured("user_id"))?;

        match &self.command {
            None => self.sync(pool, config, user_id).await,
            Some(SyncSubcommand::Status { format }) => status(pool, user_id, format).await,
            Some(SyncSubcommand::ResetConflicts { table }) => {
                reset_conflicts(pool, user_id, table).await
            }
        }
    }

    async fn sync(
        &self,
        pool: &SqlitePool,
        config: &Config,
        user_id: &str,
    ) -> Result<(), SyncCommandError> {
        let server_url = config
            .remote
            .server_url
            .as_deref()
            .ok_or(SyncCommandError::NotConfigured("remote.server_url"))?;
        let api_key = config
            .remote
            .api_key
            .as_deref()
            .ok_or(SyncCommandError::NotConfigured("remote.api_key"))?;

        let remote = HttpRemoteStore::new(server_url, api_key, config.remote.timeout())?;
        let orchestrator = SyncOrchestrator::new(
            TableRegistry::default(),
            Stores {
                local: Arc::new(SqliteLocalStore::new(pool.clone())),
                remote: Arc::new(remote),
                metadata: Arc::new(SqliteMetadataStore::new(pool.clone())),
                reporter: Arc::new(TracingErrorReporter),
            },
            config.sync.engine_settings(),
        );

        let options = SyncOptions {
            direction: self.run.direction.into(),
            tables: self.run.tables.clone(),
            force_full_sync: self.run.force,
            max_retries: self.run.max_retries.unwrap_or(config.sync.max_retries),
        };

        if matches!(self.run.format, OutputFormat::Text) {
            println!("Syncing {} with {}...", user_id, server_url);
            println!();
            orchestrator.register_progress_callback(Some(Arc::new(|p: &SyncProgress| {
                eprintln!("  [{:>3}%] {}", p.percentage, p.current_operation);
            })));
        }

        let results = orchestrator.sync(user_id, options).await?;

        match self.run.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&results)?),
            OutputFormat::Text => print_results(&results),
        }

        let failed = results.iter().filter(|r| !r.is_success()).count();
        if failed > 0 {
            return Err(SyncCommandError::Incomplete(failed));
        }
        Ok(())
    }
}

fn print_results(results: &[SyncResult]) {
    println!();
    for result in results {
        let mark = if result.is_success() { "✓" } else { "✗" };
        println!(
            "  {} {:<18} {:<5} {:>5} processed, {} created, {} updated, {} deleted, {} conflict{} ({} ms)",
            mark,
            result.table_name,
            result.direction.as_str(),
            result.records_processed,
            result.records_created,
            result.records_updated,
            result.records_deleted,
            result.conflicts,
            if result.conflicts == 1 { "" } else { "s" },
            result.duration_ms
        );
        for error in &result.errors {
            println!(
                "      {} [{}] {}",
                error.record_id, error.operation, error.error
            );
        }
    }
    println!();
}

async fn status(pool: &SqlitePool, user_id: &str, format: &OutputFormat) -> Result<(), SyncCommandError> {
    let store = SqliteMetadataStore::new(pool.clone());
    let rows = store.list_metadata(user_id).await?;

    if matches!(format, OutputFormat::Json) {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!("Sync Status ({})", user_id);
    println!("===========");
    println!();

    let registry = TableRegistry::default();
    for name in registry.names() {
        match rows.iter().find(|m| m.table_name == name) {
            Some(meta) => {
                println!("{}", name);
                println!("  status:    {}", meta.sync_status);
                println!("  last pull: {}", format_time(meta.last_pull_at));
                println!("  last push: {}", format_time(meta.last_push_at));
                println!("  conflicts: {}", meta.conflict_count);
                if let Some(error) = &meta.last_error {
                    println!("  error:     {}", error);
                }
            }
            None => println!("{}\n  never synced", name),
        }
        println!();
    }

    Ok(())
}

async fn reset_conflicts(pool: &SqlitePool, user_id: &str, table: &str) -> Result<(), SyncCommandError> {
    if TableRegistry::default().get(table).is_none() {
        return Err(SyncCommandError::UnknownTable(table.to_string()));
    }
    SqliteMetadataStore::new(pool.clone())
        .reset_conflict_count(table, user_id)
        .await?;
    println!("Reset conflict count for {}", table);
    Ok(())
}

fn format_time(at: Option<DateTime<Utc>>) -> String {
    at.map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "never".to_string())
}

/// Errors from sync commands
#[derive(Debug)]
pub enum SyncCommandError {
    NotConfigured(&'static str),
    UnknownTable(String),
    Store(StoreError),
    Sync(SyncError),
    Output(serde_json::Error),
    Incomplete(usize),
}

impl std::fmt::Display for SyncCommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncCommandError::NotConfigured(key) => write!(
                f,
                "Sync not configured: set '{}' in the config file or environment",
                key
            ),
            SyncCommandError::UnknownTable(table) => write!(f, "Unknown table: {}", table),
            SyncCommandError::Store(e) => write!(f, "{}", e),
            SyncCommandError::Sync(e) => write!(f, "{}", e),
            SyncCommandError::Output(e) => write!(f, "Failed to write output: {}", e),
            SyncCommandError::Incomplete(n) => {
                write!(f, "{} sync segment{} failed", n, if *n == 1 { "" } else { "s" })
            }
        }
    }
}

impl std::error::Error for SyncCommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncCommandError::Store(e) => Some(e),
            SyncCommandError::Sync(e) => Some(e),
            SyncCommandError::Output(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for SyncCommandError {
    fn from(e: StoreError) -> Self {
        SyncCommandError::Store(e)
    }
}

impl From<SyncError> for SyncCommandError {
    fn from(e: SyncError) -> Self {
        SyncCommandError::Sync(e)
    }
}

impl From<serde_json::Error> for SyncCommandError {
    fn from(e: serde_json::Error) -> Self {
        SyncCommandError::Output(e)
    }
}
