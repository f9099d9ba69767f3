use anyhow::{anyhow, Context, Result};
use clap::Parser;
use lumen_config::{ConfigLoader, LumenConfig, PoolConfig, QueueConfig};
use lumen_core::{
    MetadataRequest, Priority, ScanRequest, TaskKind, TaskRequest, ThumbnailRequest,
};
use lumen_execution::{
    Coordinator, ExecutionError, MetadataManager, ProcessLauncher, ScanManager, TaskOutcome,
    ThumbnailManager, WorkerPool,
};
use lumen_queue::{QueueSnapshot, SnapshotStore, TaskQueue};
use lumen_runtime::{worker_main, WorkerExit};
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

mod cli;
mod handlers;

use cli::{Cli, Commands, ConfigCommands, QueueCommands};
use handlers::builtin_handlers;

/// Load configuration from file or use defaults
fn load_config(config_path: Option<&PathBuf>) -> Result<LumenConfig> {
    let loader = ConfigLoader::new();

    match config_path {
        Some(path) if path.exists() => {
            info!("Loading configuration from: {:?}", path);
            loader
                .from_file(path)
                .with_context(|| format!("Failed to load configuration from {:?}", path))
        }
        Some(path) => {
            warn!("Configuration file not found: {:?}. Using defaults.", path);
            loader
                .from_env()
                .context("Failed to load configuration from environment")
        }
        None => loader
            .from_env()
            .context("Failed to load configuration from environment"),
    }
}

/// Run as a pool worker over stdin/stdout until told to stop
async fn run_worker_process(worker_id: String) -> Result<()> {
    let exit = worker_main(worker_id.clone(), builtin_handlers())
        .await
        .context("Worker runtime failed")?;

    match exit {
        WorkerExit::Fatal(reason) => Err(anyhow!("Worker {} failed: {}", worker_id, reason)),
        WorkerExit::Shutdown | WorkerExit::Disconnected => Ok(()),
    }
}

/// Single pool of process workers for a one-shot command
async fn start_pool(config: &LumenConfig, name: &str, pool_config: PoolConfig) -> Result<WorkerPool> {
    let launcher = ProcessLauncher::from_config(&config.worker)?;
    debug!(program = ?launcher.program(), pool = name, "Starting worker pool");

    let pool_config = PoolConfig {
        min_workers: 1,
        max_workers: 1,
        ..pool_config
    };
    let pool = WorkerPool::new(name, pool_config, Arc::new(launcher))?;
    pool.initialize()
        .await
        .with_context(|| format!("Failed to start the {} pool", name))?;
    Ok(pool)
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn scan_command(config: &LumenConfig, request: ScanRequest) -> Result<()> {
    let pool = start_pool(config, "scan", config.pools.scan.clone()).await?;
    let result = ScanManager::new(pool.clone()).scan_directory(request).await;
    pool.shutdown(pool.config().shutdown_timeout).await;

    let summary = result.context("Scan failed")?;
    info!(
        files = summary.files.len(),
        bytes = summary.total_bytes(),
        "Scan complete"
    );
    print_json(&summary)
}

async fn metadata_command(config: &LumenConfig, path: PathBuf) -> Result<()> {
    let pool = start_pool(config, "metadata", config.pools.metadata.clone()).await?;
    let result = MetadataManager::new(pool.clone())
        .extract(MetadataRequest::new(path))
        .await;
    pool.shutdown(pool.config().shutdown_timeout).await;

    print_json(&result.context("Metadata extraction failed")?)
}

async fn thumbnail_command(config: &LumenConfig, request: ThumbnailRequest) -> Result<()> {
    let pool = start_pool(config, "thumbnail", config.pools.thumbnail.clone()).await?;

    let (tx, mut rx) = mpsc::unbounded_channel::<lumen_execution::TaskProgress>();
    let reporter = tokio::spawn(async move {
        while let Some(update) = rx.recv().await {
            debug!(task_id = %update.task_id, progress = %update.progress, "Thumbnail progress");
        }
    });

    let result = ThumbnailManager::new(pool.clone())
        .generate_with_progress(request, tx)
        .await;
    pool.shutdown(pool.config().shutdown_timeout).await;
    reporter.abort();

    print_json(&result.context("Thumbnail generation failed")?)
}

fn snapshot_store(queue: &QueueConfig) -> Result<SnapshotStore> {
    queue
        .resolved_persistence_path()
        .map(SnapshotStore::new)
        .ok_or_else(|| anyhow!("Queue persistence is disabled; there is no backlog to inspect"))
}

async fn load_snapshot(queue: &QueueConfig) -> Result<(PathBuf, QueueSnapshot)> {
    let store = snapshot_store(queue)?;
    let snapshot = store
        .load()
        .await
        .with_context(|| format!("Failed to read queue snapshot {:?}", store.path()))?
        .unwrap_or_else(QueueSnapshot::new);
    Ok((store.path().to_path_buf(), snapshot))
}

async fn queue_stats(queue: &QueueConfig) -> Result<()> {
    let (path, snapshot) = load_snapshot(queue).await?;
    println!("Snapshot: {}", path.display());
    println!("Saved at: {}", snapshot.saved_at.to_rfc3339());
    for priority in Priority::DESCENDING {
        println!("  {:<9} {}", priority.as_str(), snapshot.bucket(priority).len());
    }
    println!("  {:<9} {}", "total", snapshot.len());
    Ok(())
}

async fn queue_list(queue: &QueueConfig) -> Result<()> {
    let (_, snapshot) = load_snapshot(queue).await?;
    for task in snapshot.tasks() {
        println!(
            "{}  {:<8}  {:<18}  attempts {}/{}{}",
            task.id,
            task.priority.as_str(),
            task.kind.as_str(),
            task.attempts,
            task.max_attempts,
            task.last_error
                .as_deref()
                .map(|e| format!("  last error: {}", e))
                .unwrap_or_default()
        );
    }
    Ok(())
}

async fn queue_submit(queue: &QueueConfig, domain: &str, payload: &str, priority: &str) -> Result<()> {
    snapshot_store(queue)?;
    let kind = TaskKind::from_domain_label(domain)?;
    let priority: Priority = priority.parse()?;
    let payload: JsonValue = serde_json::from_str(payload).context("Payload is not valid JSON")?;

    // Periodic saving is pointless for a single enqueue
    let queue_config = QueueConfig {
        save_interval: std::time::Duration::ZERO,
        ..queue.clone()
    };
    let task_queue = TaskQueue::open(&queue_config).await?;
    let submitted = task_queue.enqueue(TaskRequest::new(kind, payload), priority);
    task_queue.shutdown().await;

    let task_id = submitted?;
    println!("{}", task_id);
    Ok(())
}

async fn queue_process(config: LumenConfig, limit: Option<usize>) -> Result<()> {
    snapshot_store(&config.queue)?;
    let coordinator = Coordinator::with_process_workers(config)?;
    coordinator
        .initialize()
        .await
        .context("Failed to start the coordinator")?;

    let outcome = drain_backlog(&coordinator, limit).await;
    coordinator.shutdown().await;
    let (completed, retried, failed) = outcome?;
    println!("completed {}, retried {}, failed {}", completed, retried, failed);
    Ok(())
}

async fn drain_backlog(coordinator: &Coordinator, limit: Option<usize>) -> Result<(usize, usize, usize)> {
    let (mut completed, mut retried, mut failed) = (0, 0, 0);
    loop {
        if limit.is_some_and(|limit| completed + failed >= limit) {
            break;
        }
        match coordinator.process_next().await {
            Ok(Some(processed)) => match processed.outcome {
                TaskOutcome::Completed { .. } => completed += 1,
                TaskOutcome::Retrying { .. } => retried += 1,
            },
            Ok(None) => break,
            Err(ExecutionError::MaxAttemptsExceeded {
                task_id,
                attempts,
                last_error,
            }) => {
                error!(task_id = %task_id, attempts, error = %last_error, "Task gave up");
                failed += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok((completed, retried, failed))
}

async fn queue_cancel(config: LumenConfig, domain: &str) -> Result<()> {
    snapshot_store(&config.queue)?;
    let queue_config = QueueConfig {
        save_interval: std::time::Duration::ZERO,
        ..config.queue
    };
    let task_queue = TaskQueue::open(&queue_config).await?;
    let kind = TaskKind::from_domain_label(domain)?;
    let cancelled = task_queue.cancel_by_kind(kind);
    task_queue.shutdown().await;

    println!("cancelled {}", cancelled);
    Ok(())
}

/// Handle configuration validation
fn handle_config_validate(config_file: &Path) -> Result<()> {
    info!("Validating configuration file: {:?}", config_file);

    if !config_file.exists() {
        return Err(anyhow!("Configuration file not found: {:?}", config_file));
    }

    match ConfigLoader::new().from_file(config_file) {
        Ok(config) => {
            config.validate_all()?;
            println!("Configuration file is valid");
            Ok(())
        }
        Err(e) => {
            error!("Configuration validation failed: {}", e);
            Err(e).context("Configuration validation failed")
        }
    }
}

/// Handle sample configuration generation
fn handle_config_sample(output: Option<&PathBuf>, force: bool) -> Result<()> {
    let sample = LumenConfig::generate_sample();
    let Some(output) = output else {
        print!("{}", sample);
        return Ok(());
    };

    if output.exists() && !force {
        return Err(anyhow!(
            "Output file already exists: {:?}. Use --force to overwrite.",
            output
        ));
    }
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent).context("Failed to create output directory")?;
    }
    std::fs::write(output, sample)
        .with_context(|| format!("Failed to write configuration to {:?}", output))?;

    println!("Configuration written to {}", output.display());
    Ok(())
}

fn handle_config_show(config: &LumenConfig, format: &str) -> Result<()> {
    match format {
        "json" => print_json(config),
        "yaml" => {
            print!("{}", serde_yaml::to_string(config)?);
            Ok(())
        }
        other => Err(anyhow!("Unknown format '{}'; expected yaml or json", other)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Worker mode logs to stderr; stdout carries IPC frames
    if let Some(Commands::Worker { worker_id }) = &cli.command {
        let worker_id = worker_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        lumen_logging::init_worker_tracing(cli.log_level.as_deref())?;
        return run_worker_process(worker_id).await;
    }

    let config = load_config(cli.config.as_ref())?;
    match cli.log_level.as_deref() {
        Some(level) => lumen_logging::init_simple_tracing(level)?,
        None => lumen_logging::init_logging(&config.logging)?,
    }
    debug!("Lumen CLI starting");

    match cli.command {
        Some(Commands::Worker { .. }) => Ok(()),
        Some(Commands::Scan {
            path,
            extensions,
            no_recursive,
        }) => {
            let mut request = ScanRequest::new(path).with_extensions(extensions);
            if no_recursive {
                request = request.non_recursive();
            }
            scan_command(&config, request).await
        }
        Some(Commands::Metadata { path }) => metadata_command(&config, path).await,
        Some(Commands::Thumbnail {
            video,
            output,
            at,
            width,
        }) => {
            let mut request = ThumbnailRequest::new(video, output).at(at);
            if let Some(width) = width {
                request = request.with_width(width);
            }
            thumbnail_command(&config, request).await
        }
        Some(Commands::Queue { queue_cmd }) => match queue_cmd {
            QueueCommands::Stats => queue_stats(&config.queue).await,
            QueueCommands::List => queue_list(&config.queue).await,
            QueueCommands::Submit {
                domain,
                payload,
                priority,
            } => queue_submit(&config.queue, &domain, &payload, &priority).await,
            QueueCommands::Process { limit } => queue_process(config, limit).await,
            QueueCommands::Cancel { domain } => queue_cancel(config, &domain).await,
        },
        Some(Commands::Config { config_cmd }) => match config_cmd {
            ConfigCommands::Validate { config_file } => handle_config_validate(&config_file),
            ConfigCommands::Sample { output, force } => {
                handle_config_sample(output.as_ref(), force)
            }
            ConfigCommands::Show { format } => handle_config_show(&config, &format),
        },
        None => {
            use clap::CommandFactory;
            let mut cmd = Cli::command();
            cmd.print_help().context("Failed to print help")?;
            println!();
            Ok(())
        }
    }
}
