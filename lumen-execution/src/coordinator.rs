//! Owns the durable queue and the three domain pools

use futures::join;
use lumen_config::LumenConfig;
use lumen_core::{Priority, TaskId, TaskKind, TaskRequest};
use lumen_queue::{QueueStats, TaskQueue};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::{ExecutionError, Result};
use crate::launcher::{ProcessLauncher, WorkerLauncher};
use crate::managers::{MetadataManager, ScanManager, ThumbnailManager};
use crate::pool::{PoolStatus, WorkerPool};

/// What happened to a task taken off the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed { output: JsonValue },
    /// Failed, and went back into the queue one priority lower
    Retrying {
        attempts: u32,
        priority: Priority,
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedTask {
    pub task_id: TaskId,
    pub kind: TaskKind,
    pub outcome: TaskOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorStatus {
    pub scan: PoolStatus,
    pub thumbnail: PoolStatus,
    pub metadata: PoolStatus,
    pub queue: QueueStats,
}

#[derive(Clone)]
struct Running {
    queue: Arc<TaskQueue>,
    scan: ScanManager,
    thumbnail: ThumbnailManager,
    metadata: MetadataManager,
}

impl Running {
    fn pool_for(&self, kind: TaskKind) -> &WorkerPool {
        match kind {
            TaskKind::ScanDirectory => self.scan.pool(),
            TaskKind::GenerateThumbnail => self.thumbnail.pool(),
            TaskKind::ExtractMetadata => self.metadata.pool(),
        }
    }

    fn pools(&self) -> [&WorkerPool; 3] {
        [self.scan.pool(), self.thumbnail.pool(), self.metadata.pool()]
    }
}

/// Entry point of the job engine
pub struct Coordinator {
    config: LumenConfig,
    launcher: Arc<dyn WorkerLauncher>,
    running: Mutex<Option<Running>>,
    lifecycle: tokio::sync::Mutex<()>,
}

impl Coordinator {
    pub fn new(config: LumenConfig, launcher: Arc<dyn WorkerLauncher>) -> Self {
        Self {
            config,
            launcher,
            running: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    /// Coordinator whose workers are child processes per `config.worker`
    pub fn with_process_workers(config: LumenConfig) -> Result<Self> {
        let launcher = ProcessLauncher::from_config(&config.worker)?;
        Ok(Self::new(config, Arc::new(launcher)))
    }

    pub fn is_initialized(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Open the queue, then bring up the scan, thumbnail and metadata pools
    ///
    /// On failure everything started so far is torn down again.
    pub async fn initialize(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        if self.is_initialized() {
            return Ok(());
        }

        info!("Initializing coordinator");
        let queue = TaskQueue::open(&self.config.queue).await?;

        let pools = &self.config.pools;
        let built = WorkerPool::new("scan", pools.scan.clone(), self.launcher.clone()).and_then(
            |scan| {
                let thumbnail =
                    WorkerPool::new("thumbnail", pools.thumbnail.clone(), self.launcher.clone())?;
                let metadata =
                    WorkerPool::new("metadata", pools.metadata.clone(), self.launcher.clone())?;
                Ok([scan, thumbnail, metadata])
            },
        );
        let [scan, thumbnail, metadata] = match built {
            Ok(pools) => pools,
            Err(e) => {
                queue.shutdown().await;
                return Err(e);
            }
        };

        let mut started: Vec<&WorkerPool> = Vec::new();
        for pool in [&scan, &thumbnail, &metadata] {
            if let Err(e) = pool.initialize().await {
                error!(pool = %pool.name(), error = %e, "Coordinator initialization failed");
                pool.shutdown(pool.config().shutdown_timeout).await;
                for started in started {
                    started.shutdown(started.config().shutdown_timeout).await;
                }
                queue.shutdown().await;
                return Err(e);
            }
            started.push(pool);
        }

        *self.running.lock() = Some(Running {
            queue,
            scan: ScanManager::new(scan),
            thumbnail: ThumbnailManager::new(thumbnail),
            metadata: MetadataManager::new(metadata),
        });
        info!("Coordinator initialized");
        Ok(())
    }

    fn running(&self) -> Result<Running> {
        self.running
            .lock()
            .clone()
            .ok_or(ExecutionError::NotInitialized)
    }

    /// Queue a task for later execution
    pub fn submit(&self, kind: TaskKind, payload: JsonValue, priority: Priority) -> Result<TaskId> {
        self.submit_request(TaskRequest::new(kind, payload), priority)
    }

    pub fn submit_request(&self, request: TaskRequest, priority: Priority) -> Result<TaskId> {
        let running = self.running()?;
        let kind = request.kind;
        let task_id = running.queue.enqueue(request, priority)?;
        debug!(task_id = %task_id, kind = %kind, priority = %priority, "Task submitted");
        Ok(task_id)
    }

    /// Run the next queued task on its domain's pool
    ///
    /// Returns `Ok(None)` when the queue is empty. A failure that still has
    /// attempts left is reported as [`TaskOutcome::Retrying`]; the last one
    /// as [`ExecutionError::MaxAttemptsExceeded`]. When no worker could take
    /// the task it goes back to the head of its bucket, no attempt counted,
    /// and the error is returned.
    pub async fn process_next(&self) -> Result<Option<ProcessedTask>> {
        let running = self.running()?;
        let Some(task) = running.queue.dequeue() else {
            return Ok(None);
        };

        let pool = running.pool_for(task.kind);
        debug!(task_id = %task.id, kind = %task.kind, pool = %pool.name(), "Processing task");

        match pool.execute_task(&task).await {
            Ok(output) => {
                running.queue.complete(task.id)?;
                Ok(Some(ProcessedTask {
                    task_id: task.id,
                    kind: task.kind,
                    outcome: TaskOutcome::Completed { output },
                }))
            }
            // The task stays in the snapshot and runs after the next start
            Err(e @ ExecutionError::PoolShuttingDown { .. }) => Err(e),
            Err(
                e @ (ExecutionError::NoWorkerAvailable { .. }
                | ExecutionError::Spawn(_)
                | ExecutionError::NotInitialized),
            ) => {
                running.queue.requeue(task.id)?;
                warn!(task_id = %task.id, pool = %pool.name(), error = %e, "No worker took the task, returned to the queue");
                Err(e)
            }
            Err(e) => {
                let message = e.to_string();
                let outcome = running.queue.fail(task.id, &message)?;
                match outcome.priority {
                    Some(priority) if outcome.should_retry => {
                        warn!(
                            task_id = %task.id,
                            attempts = outcome.attempts,
                            priority = %priority,
                            error = %message,
                            "Task failed, re-queued at lower priority"
                        );
                        Ok(Some(ProcessedTask {
                            task_id: task.id,
                            kind: task.kind,
                            outcome: TaskOutcome::Retrying {
                                attempts: outcome.attempts,
                                priority,
                                error: message,
                            },
                        }))
                    }
                    _ => {
                        error!(task_id = %task.id, attempts = outcome.attempts, error = %message, "Task failed permanently");
                        Err(ExecutionError::MaxAttemptsExceeded {
                            task_id: task.id,
                            attempts: outcome.attempts,
                            last_error: message,
                        })
                    }
                }
            }
        }
    }

    /// Cancel a queued task; false when it is running or unknown
    pub fn cancel(&self, task_id: TaskId) -> Result<bool> {
        Ok(self.running()?.queue.cancel(task_id))
    }

    /// Ask whichever worker runs `task_id` to stop it cooperatively
    pub fn request_cancellation(&self, task_id: TaskId) -> Result<bool> {
        let running = self.running()?;
        Ok(running
            .pools()
            .iter()
            .any(|pool| pool.cancel_running(task_id)))
    }

    /// Cancel every queued task of a domain: `scan`, `thumbnail` or `metadata`
    pub fn cancel_by_type(&self, domain: &str) -> Result<usize> {
        let kind = TaskKind::from_domain_label(domain)
            .map_err(|_| ExecutionError::UnknownDomain(domain.to_string()))?;
        let cancelled = self.running()?.queue.cancel_by_kind(kind);
        info!(domain, cancelled, "Cancelled queued tasks");
        Ok(cancelled)
    }

    pub fn status(&self) -> Result<CoordinatorStatus> {
        let running = self.running()?;
        Ok(CoordinatorStatus {
            scan: running.scan.pool().status(),
            thumbnail: running.thumbnail.pool().status(),
            metadata: running.metadata.pool().status(),
            queue: running.queue.stats(),
        })
    }

    pub fn queue_stats(&self) -> Result<QueueStats> {
        Ok(self.running()?.queue.stats())
    }

    pub fn queue(&self) -> Result<Arc<TaskQueue>> {
        Ok(self.running()?.queue)
    }

    pub fn scan(&self) -> Result<ScanManager> {
        Ok(self.running()?.scan)
    }

    pub fn thumbnail(&self) -> Result<ThumbnailManager> {
        Ok(self.running()?.thumbnail)
    }

    pub fn metadata(&self) -> Result<MetadataManager> {
        Ok(self.running()?.metadata)
    }

    /// Stop all pools together, then write the final snapshot
    pub async fn shutdown(&self) {
        let _guard = self.lifecycle.lock().await;
        let Some(running) = self.running.lock().take() else {
            debug!("Coordinator not initialized, nothing to shut down");
            return;
        };

        info!("Shutting down coordinator");
        let [scan, thumbnail, metadata] = running.pools();
        join!(
            scan.shutdown(scan.config().shutdown_timeout),
            thumbnail.shutdown(thumbnail.config().shutdown_timeout),
            metadata.shutdown(metadata.config().shutdown_timeout),
        );
        running.queue.shutdown().await;
        info!("Coordinator stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launcher::{InProcessLauncher, WorkerChannels};
    use async_trait::async_trait;
    use lumen_config::{PoolConfig, PoolsConfig, QueueConfig};
    use lumen_core::TaskStatus;
    use lumen_runtime::{FnHandler, TaskError};
    use serde_json::json;
    use std::path::Path;
    use std::time::Duration;

    fn small_pool() -> PoolConfig {
        PoolConfig {
            min_workers: 1,
            max_workers: 1,
            task_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(2),
            ..PoolConfig::default()
        }
    }

    fn config(snapshot: &Path, max_attempts: u32) -> LumenConfig {
        LumenConfig {
            pools: PoolsConfig {
                scan: small_pool(),
                thumbnail: small_pool(),
                metadata: small_pool(),
            },
            queue: QueueConfig {
                max_attempts,
                persistence_path: Some(snapshot.to_path_buf()),
                save_interval: Duration::from_secs(3600),
                ..QueueConfig::default()
            },
            ..LumenConfig::default()
        }
    }

    /// Echoes the payload unless it asks to fail or to take a while
    fn launcher() -> Arc<dyn WorkerLauncher> {
        Arc::new(InProcessLauncher::new(FnHandler::new(|kind, payload, _| async move {
            if payload["fail"].as_bool().unwrap_or(false) {
                return Err(TaskError::failed("unreadable file"));
            }
            if let Some(ms) = payload["sleep_ms"].as_u64() {
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
            Ok(json!({ "kind": kind.domain_label(), "payload": payload }))
        })))
    }

    struct BrokenLauncher;

    #[async_trait]
    impl WorkerLauncher for BrokenLauncher {
        async fn launch(&self, _channels: WorkerChannels) -> Result<Option<u32>> {
            Err(ExecutionError::Spawn("no worker binary".into()))
        }
    }

    #[tokio::test]
    async fn test_requires_initialization() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = Coordinator::new(config(&dir.path().join("q.json"), 3), launcher());

        let err = coordinator
            .submit(TaskKind::ScanDirectory, json!({}), Priority::Normal)
            .unwrap_err();
        assert!(matches!(err, ExecutionError::NotInitialized));
        assert!(matches!(coordinator.status(), Err(ExecutionError::NotInitialized)));

        // No-op
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_tasks_processed_in_priority_order() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = Coordinator::new(config(&dir.path().join("q.json"), 3), launcher());
        coordinator.initialize().await.unwrap();

        let a = coordinator
            .submit(TaskKind::ScanDirectory, json!({"name": "A"}), Priority::Critical)
            .unwrap();
        let b = coordinator
            .submit(TaskKind::ExtractMetadata, json!({"name": "B"}), Priority::Normal)
            .unwrap();
        let c = coordinator
            .submit(TaskKind::GenerateThumbnail, json!({"name": "C"}), Priority::Normal)
            .unwrap();

        let mut order = Vec::new();
        while let Some(processed) = coordinator.process_next().await.unwrap() {
            match &processed.outcome {
                TaskOutcome::Completed { output } => {
                    assert_eq!(output["kind"], json!(processed.kind.domain_label()))
                }
                other => panic!("unexpected outcome: {:?}", other),
            }
            order.push(processed.task_id);
        }
        assert_eq!(order, vec![a, b, c]);
        assert_eq!(coordinator.queue_stats().unwrap().total, 0);

        let status = coordinator.status().unwrap();
        assert_eq!(status.scan.total, 1);
        assert_eq!(status.thumbnail.idle, 1);
        assert_eq!(status.metadata.active, 0);
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_failures_demote_then_exhaust() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = Coordinator::new(config(&dir.path().join("q.json"), 2), launcher());
        coordinator.initialize().await.unwrap();

        let id = coordinator
            .submit(TaskKind::ExtractMetadata, json!({"fail": true}), Priority::High)
            .unwrap();

        let first = coordinator.process_next().await.unwrap().unwrap();
        assert_eq!(first.task_id, id);
        match first.outcome {
            TaskOutcome::Retrying {
                attempts,
                priority,
                ref error,
            } => {
                assert_eq!(attempts, 1);
                assert_eq!(priority, Priority::Normal);
                assert!(error.contains("unreadable file"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        let err = coordinator.process_next().await.unwrap_err();
        match err {
            ExecutionError::MaxAttemptsExceeded {
                task_id, attempts, ..
            } => {
                assert_eq!(task_id, id);
                assert_eq!(attempts, 2);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(coordinator.queue_stats().unwrap().total, 0);
        assert!(coordinator.process_next().await.unwrap().is_none());
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_saturated_pool_does_not_spend_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(&dir.path().join("q.json"), 3);
        cfg.pools.metadata.acquire_timeout = Duration::from_millis(200);
        let coordinator = Coordinator::new(cfg, launcher());
        coordinator.initialize().await.unwrap();

        let slow = coordinator
            .submit(TaskKind::ExtractMetadata, json!({"sleep_ms": 600}), Priority::High)
            .unwrap();
        let waiting = coordinator
            .submit(TaskKind::ExtractMetadata, json!({"name": "next"}), Priority::Normal)
            .unwrap();

        let (first, second) = join!(coordinator.process_next(), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            coordinator.process_next().await
        });
        assert_eq!(first.unwrap().unwrap().task_id, slow);
        assert!(matches!(second, Err(ExecutionError::NoWorkerAvailable { .. })));

        let task = coordinator.queue().unwrap().get(waiting).unwrap();
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.attempts, 0);
        assert_eq!(task.priority, Priority::Normal);

        let processed = coordinator.process_next().await.unwrap().unwrap();
        assert_eq!(processed.task_id, waiting);
        assert!(matches!(processed.outcome, TaskOutcome::Completed { .. }));
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancel_by_type() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = Coordinator::new(config(&dir.path().join("q.json"), 3), launcher());
        coordinator.initialize().await.unwrap();

        for _ in 0..3 {
            coordinator
                .submit(TaskKind::GenerateThumbnail, json!({}), Priority::Low)
                .unwrap();
        }
        let scan = coordinator
            .submit(TaskKind::ScanDirectory, json!({}), Priority::Low)
            .unwrap();

        assert_eq!(coordinator.cancel_by_type("thumbnail").unwrap(), 3);
        assert_eq!(coordinator.cancel_by_type("thumbnail").unwrap(), 0);
        assert!(matches!(
            coordinator.cancel_by_type("audio"),
            Err(ExecutionError::UnknownDomain(_))
        ));

        assert!(coordinator.cancel(scan).unwrap());
        assert!(!coordinator.cancel(scan).unwrap());
        assert!(coordinator.queue_stats().unwrap().total == 0);
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_initialization_leaves_nothing_running() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator =
            Coordinator::new(config(&dir.path().join("q.json"), 3), Arc::new(BrokenLauncher));

        let err = coordinator.initialize().await.unwrap_err();
        assert!(matches!(err, ExecutionError::Spawn(_)));
        assert!(!coordinator.is_initialized());
        assert!(matches!(
            coordinator.submit(TaskKind::ScanDirectory, json!({}), Priority::Normal),
            Err(ExecutionError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn test_backlog_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("q.json");

        let coordinator = Coordinator::new(config(&path, 3), launcher());
        coordinator.initialize().await.unwrap();
        let id = coordinator
            .submit(TaskKind::ScanDirectory, json!({"path": "/media"}), Priority::High)
            .unwrap();
        coordinator.shutdown().await;
        assert!(!coordinator.is_initialized());

        let restarted = Coordinator::new(config(&path, 3), launcher());
        restarted.initialize().await.unwrap();
        assert_eq!(restarted.queue().unwrap().queued_ids(), vec![id]);

        let processed = restarted.process_next().await.unwrap().unwrap();
        assert_eq!(processed.task_id, id);
        restarted.shutdown().await;
    }
}
