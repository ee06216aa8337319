//! Offsync CLI - Command line interface for the sync queue.
//!
//! Queues tasks into a local data directory, inspects them, and drives sync
//! cycles against their targets.

mod journal;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use offsync_common::{ConflictStrategy, HttpMethod, TaskId, TaskPriority, TaskType};
use offsync_queue::{JsonFilePersistence, NewTask, SyncTask};
use offsync_sync::{ConflictResolutionConfig, HttpExecutor, SyncConfig, SyncEngine};

use journal::JournalExecutor;

#[derive(Parser)]
#[command(name = "offsync")]
#[command(about = "Offsync - Offline-aware background sync queue")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Directory holding the queue (default: platform data dir).
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// JSON file with `sync` and `conflictResolution` settings.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Queue a REST call.
    AddApi {
        /// Target URL.
        #[arg(short, long)]
        url: String,

        /// HTTP method: GET, POST, PUT, PATCH or DELETE.
        #[arg(short, long, default_value = "POST")]
        method: HttpMethod,

        /// JSON request body.
        #[arg(short, long)]
        payload: Option<String>,

        /// Extra request header as NAME=VALUE. Repeatable.
        #[arg(long = "header")]
        headers: Vec<String>,

        #[command(flatten)]
        options: TaskOptions,
    },

    /// Queue a data record.
    AddData {
        /// JSON payload.
        #[arg(short, long)]
        payload: String,

        #[command(flatten)]
        options: TaskOptions,
    },

    /// List queued tasks.
    List {
        /// Only tasks the next sync would run, in dispatch order.
        #[arg(short, long)]
        eligible: bool,
    },

    /// Show queue status.
    Status,

    /// Remove a task.
    Remove {
        /// Task id.
        id: TaskId,
    },

    /// Remove every task.
    Clear,

    /// Remove tasks older than the given age.
    Cleanup {
        /// Maximum age in seconds.
        #[arg(short, long, default_value_t = 7 * 24 * 3600)]
        max_age: u64,
    },

    /// Give a failed task a fresh retry budget.
    Retry {
        /// Task id.
        id: TaskId,
    },

    /// Run one sync cycle now.
    Sync,

    /// Settle a conflict waiting for a decision.
    Resolve {
        /// Task id.
        id: TaskId,

        /// JSON value to send instead of the original payload.
        #[arg(short, long)]
        value: String,
    },
}

#[derive(clap::Args)]
struct TaskOptions {
    /// Priority: high, medium or low.
    #[arg(long, default_value = "medium")]
    priority: TaskPriority,

    /// Retries after the first attempt (default from config).
    #[arg(long)]
    max_retries: Option<u32>,

    /// Conflict strategy override, e.g. merge or custom:key.
    #[arg(long)]
    strategy: Option<ConflictStrategy>,
}

impl TaskOptions {
    fn apply(self, mut spec: NewTask) -> NewTask {
        spec = spec.with_priority(self.priority);
        if let Some(max_retries) = self.max_retries {
            spec = spec.with_max_retries(max_retries);
        }
        if let Some(strategy) = self.strategy {
            spec = spec.with_strategy(strategy);
        }
        spec
    }
}

/// Settings file layout.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct CliConfig {
    sync: SyncConfig,
    conflict_resolution: ConflictResolutionConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; RUST_LOG overrides --verbose
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "info" }));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => dirs::data_dir()
            .context("Could not determine the platform data directory; pass --data-dir")?
            .join("offsync"),
    };
    let config = load_config(cli.config.as_deref()).await?;
    let engine = open_engine(&data_dir, config).await?;

    match cli.command {
        Commands::AddApi {
            url,
            method,
            payload,
            headers,
            options,
        } => cmd_add_api(&engine, url, method, payload, headers, options).await,

        Commands::AddData { payload, options } => cmd_add_data(&engine, &payload, options).await,

        Commands::List { eligible } => {
            cmd_list(&engine, eligible);
            Ok(())
        }

        Commands::Status => cmd_status(&engine),

        Commands::Remove { id } => cmd_remove(&engine, &id).await,

        Commands::Clear => {
            let count = engine.clear_tasks().await.context("Failed to clear tasks")?;
            println!("Removed {} tasks.", count);
            Ok(())
        }

        Commands::Cleanup { max_age } => {
            let count = engine
                .cleanup_expired_tasks(Duration::from_secs(max_age))
                .await
                .context("Failed to clean up tasks")?;
            println!("Removed {} expired tasks.", count);
            Ok(())
        }

        Commands::Retry { id } => {
            engine.retry_task(&id).await.context("Failed to retry task")?;
            println!("Task {} queued for retry.", id);
            Ok(())
        }

        Commands::Sync => cmd_sync(&engine).await,

        Commands::Resolve { id, value } => {
            let value = parse_json(&value)?;
            engine
                .resolve_user_choice(&id, value)
                .await
                .context("Failed to resolve conflict")?;
            println!("Task {} will be retried with the chosen value.", id);
            Ok(())
        }
    }
}

async fn load_config(path: Option<&Path>) -> Result<CliConfig> {
    let Some(path) = path else {
        return Ok(CliConfig::default());
    };
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid config {}", path.display()))
}

async fn open_engine(data_dir: &Path, config: CliConfig) -> Result<Arc<SyncEngine>> {
    let persistence = JsonFilePersistence::new(data_dir)
        .await
        .with_context(|| format!("Failed to open data directory {}", data_dir.display()))?;

    let http = Arc::new(HttpExecutor::new().context("Failed to create HTTP executor")?);
    let journal = Arc::new(JournalExecutor::new(data_dir.join("journal.jsonl")));

    SyncEngine::builder()
        .persistence(Arc::new(persistence))
        .config(config.sync)
        .conflict_config(config.conflict_resolution)
        .executor(TaskType::Api, http)
        .executor(TaskType::Data, journal.clone())
        .executor(TaskType::File, journal.clone())
        .executor(TaskType::Notification, journal)
        .build()
        .await
        .context("Failed to start sync engine")
}

fn parse_json(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).context("Payload is not valid JSON")
}

async fn cmd_add_api(
    engine: &SyncEngine,
    url: String,
    method: HttpMethod,
    payload: Option<String>,
    headers: Vec<String>,
    options: TaskOptions,
) -> Result<()> {
    let mut spec = NewTask::api(url, method);
    if let Some(payload) = payload {
        spec = spec.with_payload(parse_json(&payload)?);
    }
    for header in headers {
        let Some((name, value)) = header.split_once('=') else {
            bail!("Header must be NAME=VALUE: {}", header);
        };
        spec = spec.with_header(name.trim(), value.trim());
    }

    let id = engine
        .add_task(options.apply(spec))
        .await
        .context("Failed to queue task")?;
    println!("{}", id);
    Ok(())
}

async fn cmd_add_data(engine: &SyncEngine, payload: &str, options: TaskOptions) -> Result<()> {
    let spec = NewTask::data(parse_json(payload)?);
    let id = engine
        .add_task(options.apply(spec))
        .await
        .context("Failed to queue task")?;
    println!("{}", id);
    Ok(())
}

fn cmd_list(engine: &SyncEngine, eligible: bool) {
    let tasks = if eligible {
        engine.eligible_tasks()
    } else {
        engine.tasks()
    };

    if tasks.is_empty() {
        println!("No tasks.");
        return;
    }

    for task in tasks {
        print_task(&task);
    }
}

fn print_task(task: &SyncTask) {
    let target = match (&task.method, &task.url) {
        (Some(method), Some(url)) => format!("{} {}", method, url),
        _ => task.task_type.to_string(),
    };
    println!(
        "{}  [{}] {:<6} {:<20} retries {}/{}  {}",
        task.id,
        task.priority,
        task.task_type,
        task.state,
        task.retry_count,
        task.max_retries,
        target
    );
    if let Some(error) = &task.error {
        println!("    last error: {}", error);
    }
}

fn cmd_status(engine: &SyncEngine) -> Result<()> {
    let status = engine.status();
    let conflict = engine.conflict_config();

    println!("Queue Status:");
    println!("  Total: {}", status.total_tasks);
    println!("  Pending: {}", status.pending_tasks);
    println!("  Awaiting decision: {}", status.awaiting_user_choice);
    println!("  Failed: {}", status.failed_tasks);
    println!("Conflict Resolution:");
    println!("  Default strategy: {}", conflict.default_strategy);
    println!("  Auto resolution: {}", conflict.enable_auto_resolution);
    println!("  User choice: {}", conflict.enable_user_choice);
    println!("Settings:");
    println!("{}", serde_json::to_string_pretty(engine.config().as_ref())?);
    Ok(())
}

async fn cmd_remove(engine: &SyncEngine, id: &TaskId) -> Result<()> {
    if engine.remove_task(id).await.context("Failed to remove task")? {
        println!("Removed {}.", id);
    } else {
        println!("No task {}.", id);
    }
    Ok(())
}

async fn cmd_sync(engine: &SyncEngine) -> Result<()> {
    info!("Syncing {} queued tasks", engine.tasks().len());

    let report = engine.start_sync().await.context("Sync failed")?;

    println!("Sync finished in {:?}:", report.duration);
    println!("  Completed: {}", report.tasks_completed);
    println!("  Retrying later: {}", report.tasks_retried);
    println!("  Failed: {}", report.tasks_failed);
    println!(
        "  Conflicts: {} detected, {} resolved, {} awaiting a decision",
        report.conflicts_detected, report.conflicts_resolved, report.awaiting_user_choice
    );
    Ok(())
}
