//! Elastic pool of workers for one task domain
//!
//! Workers move through `Spawning -> Available <-> Busy -> Terminated`. The
//! pool keeps at least `min_workers` alive, never more than `max_workers`,
//! evicts surplus workers after `idle_timeout` and replaces workers that
//! crash, report an internal error or miss a task deadline.
//!
//! Everything a worker sends arrives as a [`WorkerEvent`] on one channel and
//! is routed by a dispatcher task to whoever is waiting on it: the caller of
//! [`WorkerPool::execute_task`], a spawn waiting for readiness, a ping, or
//! [`WorkerPool::shutdown`].

use chrono::{DateTime, Utc};
use futures::future::join_all;
use lumen_config::{PoolConfig, Validatable};
use lumen_core::{Task, TaskId};
use lumen_ipc::{CoordinatorMessage, TaskExecutionResult, WorkerMessage, WorkerStatus};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{ExecutionError, Result};
use crate::launcher::{WorkerChannels, WorkerEvent, WorkerEventKind, WorkerLauncher};

/// Upper bound on a single wait for a released worker before re-checking
const ACQUIRE_POLL: Duration = Duration::from_millis(100);

/// Lifecycle state of a pooled worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Spawning,
    Available,
    Busy,
    Terminated,
}

/// Per-worker statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub id: String,
    pub pid: Option<u32>,
    pub state: WorkerState,
    pub current_task: Option<TaskId>,
    pub spawned_at: DateTime<Utc>,
    pub tasks_executed: u64,
    pub restart_count: u32,
}

/// Aggregate pool counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatus {
    pub name: String,
    /// Live workers, including ones still starting
    pub total: usize,
    pub active: usize,
    pub idle: usize,
    pub spawning: usize,
    pub shutting_down: bool,
}

/// Out-of-band progress of a running task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub task_id: TaskId,
    pub progress: JsonValue,
}

enum TaskReply {
    Finished(TaskExecutionResult),
    Fault(String),
}

struct PendingTask {
    task_id: TaskId,
    reply: oneshot::Sender<TaskReply>,
    progress: Option<mpsc::UnboundedSender<TaskProgress>>,
    /// The caller stopped waiting; the worker is released when the result lands
    abandoned: bool,
}

struct WorkerSlot {
    info: WorkerInfo,
    sender: mpsc::UnboundedSender<WorkerMessage>,
    kill: CancellationToken,
    idle_timer: Option<JoinHandle<()>>,
    ready: Option<oneshot::Sender<()>>,
    pending: Option<PendingTask>,
    shutdown_ack: Option<oneshot::Sender<()>>,
    pongs: HashMap<Uuid, oneshot::Sender<WorkerStatus>>,
}

impl WorkerSlot {
    fn stop_idle_timer(&mut self) {
        if let Some(timer) = self.idle_timer.take() {
            timer.abort();
        }
    }
}

#[derive(Default)]
struct PoolState {
    workers: HashMap<String, WorkerSlot>,
    /// Ids of available workers, least recently released first
    available: VecDeque<String>,
    initialized: bool,
}

impl PoolState {
    fn count(&self, state: WorkerState) -> usize {
        self.workers
            .values()
            .filter(|slot| slot.info.state == state)
            .count()
    }
}

/// A worker claimed for spawning but not yet launched
struct Reservation {
    worker_id: String,
    channels: WorkerChannels,
    ready: oneshot::Receiver<()>,
}

enum Claim {
    Worker(String),
    Spawn(Reservation),
    Wait,
}

/// A worker checked out for one task
///
/// Dropping an unsettled lease, as happens when the caller of
/// [`WorkerPool::execute_task`] gives up on it, hands the worker back: right
/// away if nothing was dispatched yet, otherwise once its result arrives.
struct WorkerLease {
    pool: WorkerPool,
    worker_id: String,
    settled: bool,
}

impl WorkerLease {
    fn new(pool: &WorkerPool, worker_id: String) -> Self {
        Self {
            pool: pool.clone(),
            worker_id,
            settled: false,
        }
    }

    fn release(mut self) {
        self.settled = true;
        self.pool.release(&self.worker_id);
    }

    fn fault(mut self, reason: &str) {
        self.settled = true;
        self.pool.fault(&self.worker_id, reason);
    }

    /// The worker already left the pool
    fn forget(mut self) {
        self.settled = true;
    }
}

impl Drop for WorkerLease {
    fn drop(&mut self) {
        if !self.settled {
            self.pool.abandon(&self.worker_id);
        }
    }
}

/// Retires a reserved worker unless its launch runs to completion
struct SpawnGuard<'a> {
    pool: &'a WorkerPool,
    worker_id: &'a str,
    launched: bool,
}

impl Drop for SpawnGuard<'_> {
    fn drop(&mut self) {
        if !self.launched {
            self.pool.retire(self.worker_id, "launch abandoned");
        }
    }
}

struct PoolInner {
    name: String,
    config: PoolConfig,
    launcher: Arc<dyn WorkerLauncher>,
    state: Mutex<PoolState>,
    released: Notify,
    shutting_down: AtomicBool,
    next_worker: AtomicU64,
    events_tx: mpsc::UnboundedSender<WorkerEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<WorkerEvent>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        if let Some(dispatcher) = self.dispatcher.get_mut().take() {
            dispatcher.abort();
        }
        for slot in self.state.get_mut().workers.values_mut() {
            slot.stop_idle_timer();
            slot.kill.cancel();
        }
    }
}

/// Pool of workers executing tasks of one domain
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.inner.name)
            .field("config", &self.inner.config)
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}

impl WorkerPool {
    /// Create a pool; no worker starts until [`WorkerPool::initialize`]
    pub fn new(
        name: impl Into<String>,
        config: PoolConfig,
        launcher: Arc<dyn WorkerLauncher>,
    ) -> Result<Self> {
        config.validate()?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Ok(Self {
            inner: Arc::new(PoolInner {
                name: name.into(),
                config,
                launcher,
                state: Mutex::new(PoolState::default()),
                released: Notify::new(),
                shutting_down: AtomicBool::new(false),
                next_worker: AtomicU64::new(1),
                events_tx,
                events_rx: Mutex::new(Some(events_rx)),
                dispatcher: Mutex::new(None),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    /// Start `min_workers` and wait for each to report ready
    pub async fn initialize(&self) -> Result<()> {
        if self.is_shutting_down() {
            return Err(self.shutting_down_error());
        }
        if self.inner.state.lock().initialized {
            return Ok(());
        }

        self.start_dispatcher();

        let reservations: Vec<Reservation> = {
            let mut state = self.inner.state.lock();
            let missing = self.inner.config.min_workers.saturating_sub(state.workers.len());
            (0..missing)
                .map(|_| self.reserve_locked(&mut state, 0, None))
                .collect()
        };

        let results = join_all(reservations.into_iter().map(|r| async move {
            let worker_id = self.launch(r).await?;
            self.release(&worker_id);
            Ok::<_, ExecutionError>(())
        }))
        .await;

        let first_error = results.into_iter().find_map(|result| result.err());

        if let Some(e) = first_error {
            error!(pool = %self.inner.name, error = %e, "Worker pool failed to start");
            let ids: Vec<String> = self.inner.state.lock().workers.keys().cloned().collect();
            for worker_id in ids {
                self.retire(&worker_id, "pool initialization failed");
            }
            return Err(e);
        }

        self.inner.state.lock().initialized = true;
        info!(
            pool = %self.inner.name,
            workers = self.inner.config.min_workers,
            max_workers = self.inner.config.max_workers,
            "Worker pool initialized"
        );
        Ok(())
    }

    /// Run a task on some worker and return its output
    pub async fn execute_task(&self, task: &Task) -> Result<JsonValue> {
        self.run_task(task, None).await
    }

    /// Like [`WorkerPool::execute_task`], forwarding progress to `progress`
    pub async fn execute_task_with_progress(
        &self,
        task: &Task,
        progress: mpsc::UnboundedSender<TaskProgress>,
    ) -> Result<JsonValue> {
        self.run_task(task, Some(progress)).await
    }

    async fn run_task(
        &self,
        task: &Task,
        progress: Option<mpsc::UnboundedSender<TaskProgress>>,
    ) -> Result<JsonValue> {
        if self.is_shutting_down() {
            return Err(self.shutting_down_error());
        }
        if !self.inner.state.lock().initialized {
            return Err(ExecutionError::NotInitialized);
        }

        let worker_id = self.acquire().await?;
        let lease = WorkerLease::new(self, worker_id.clone());
        let (reply_tx, reply_rx) = oneshot::channel();

        {
            let mut state = self.inner.state.lock();
            let Some(slot) = state.workers.get_mut(&worker_id) else {
                lease.forget();
                return Err(ExecutionError::WorkerFault {
                    worker_id,
                    reason: "worker exited before the task was sent".to_string(),
                });
            };
            slot.pending = Some(PendingTask {
                task_id: task.id,
                reply: reply_tx,
                progress,
                abandoned: false,
            });
            slot.info.current_task = Some(task.id);
            let sent = slot.sender.send(WorkerMessage::ExecuteTask {
                task_id: task.id,
                kind: task.kind,
                payload: task.payload.clone(),
            });
            if sent.is_err() {
                slot.pending = None;
                drop(state);
                lease.fault("worker input closed");
                return Err(ExecutionError::WorkerFault {
                    worker_id,
                    reason: "worker input closed".to_string(),
                });
            }
        }

        debug!(pool = %self.inner.name, worker_id = %worker_id, task_id = %task.id, kind = %task.kind, "Dispatched task");

        let reply = match self.inner.config.task_deadline() {
            Some(deadline) => match tokio::time::timeout(deadline, reply_rx).await {
                Ok(reply) => reply,
                Err(_) => {
                    warn!(
                        pool = %self.inner.name,
                        worker_id = %worker_id,
                        task_id = %task.id,
                        timeout = ?deadline,
                        "Task timed out, terminating worker"
                    );
                    lease.fault("task timed out");
                    return Err(ExecutionError::TaskTimeout {
                        task_id: task.id,
                        timeout: deadline,
                    });
                }
            },
            None => reply_rx.await,
        };

        match reply {
            Ok(TaskReply::Finished(result)) => {
                lease.release();
                if result.success {
                    debug!(task_id = %task.id, duration_ms = result.duration_ms, "Task succeeded");
                    Ok(result.output.unwrap_or(JsonValue::Null))
                } else {
                    Err(ExecutionError::TaskFailed {
                        task_id: task.id,
                        message: result
                            .error_message
                            .unwrap_or_else(|| "Task failed".to_string()),
                    })
                }
            }
            Ok(TaskReply::Fault(reason)) => {
                lease.forget();
                Err(ExecutionError::WorkerFault { worker_id, reason })
            }
            Err(_) => {
                lease.fault("worker dropped the task");
                Err(ExecutionError::WorkerFault {
                    worker_id,
                    reason: "worker dropped the task".to_string(),
                })
            }
        }
    }

    /// Hand back a worker whose caller stopped waiting
    ///
    /// A dispatched task is asked to stop and, when the pool has a task
    /// deadline, gets one more deadline before its worker is faulted.
    fn abandon(&self, worker_id: &str) {
        let mut state = self.inner.state.lock();
        let Some(slot) = state.workers.get_mut(worker_id) else {
            return;
        };
        let dispatched = match slot.pending.as_mut() {
            Some(pending) => {
                debug!(
                    pool = %self.inner.name,
                    worker_id = %worker_id,
                    task_id = %pending.task_id,
                    "Caller abandoned task, worker returns when it finishes"
                );
                pending.abandoned = true;
                let task_id = pending.task_id;
                let _ = slot.sender.send(WorkerMessage::Cancel { task_id });
                Some(task_id)
            }
            None => None,
        };
        drop(state);

        match (dispatched, self.inner.config.task_deadline()) {
            (None, _) => self.release(worker_id),
            (Some(task_id), Some(deadline)) => {
                let pool = Arc::downgrade(&self.inner);
                let worker_id = worker_id.to_string();
                tokio::spawn(async move {
                    tokio::time::sleep(deadline).await;
                    if let Some(inner) = pool.upgrade() {
                        WorkerPool { inner }.expire_abandoned(&worker_id, task_id);
                    }
                });
            }
            (Some(_), None) => {}
        }
    }

    fn expire_abandoned(&self, worker_id: &str, task_id: TaskId) {
        let still_running = self
            .inner
            .state
            .lock()
            .workers
            .get(worker_id)
            .and_then(|slot| slot.pending.as_ref())
            .is_some_and(|pending| pending.abandoned && pending.task_id == task_id);
        if still_running {
            warn!(
                pool = %self.inner.name,
                worker_id = %worker_id,
                task_id = %task_id,
                "Abandoned task outlived its deadline, terminating worker"
            );
            self.fault(worker_id, "abandoned task timed out");
        }
    }

    /// Ask the worker running `task_id` to stop it; false if no worker has it
    pub fn cancel_running(&self, task_id: TaskId) -> bool {
        let state = self.inner.state.lock();
        let slot = state.workers.values().find(|slot| {
            slot.pending
                .as_ref()
                .is_some_and(|pending| pending.task_id == task_id)
        });
        match slot {
            Some(slot) => {
                debug!(pool = %self.inner.name, worker_id = %slot.info.id, task_id = %task_id, "Requesting task cancellation");
                slot.sender.send(WorkerMessage::Cancel { task_id }).is_ok()
            }
            None => false,
        }
    }

    /// Ping every live worker and collect the ones that answer within `timeout`
    pub async fn ping_all(&self, timeout: Duration) -> Vec<WorkerStatus> {
        let waiting: Vec<oneshot::Receiver<WorkerStatus>> = {
            let mut state = self.inner.state.lock();
            state
                .workers
                .values_mut()
                .filter(|slot| matches!(slot.info.state, WorkerState::Available | WorkerState::Busy))
                .filter_map(|slot| {
                    let correlation_id = Uuid::new_v4();
                    let (tx, rx) = oneshot::channel();
                    slot.sender
                        .send(WorkerMessage::Ping { correlation_id })
                        .ok()?;
                    slot.pongs.insert(correlation_id, tx);
                    Some(rx)
                })
                .collect()
        };

        let replies = join_all(
            waiting
                .into_iter()
                .map(|rx| tokio::time::timeout(timeout, rx)),
        )
        .await;

        let mut statuses: Vec<WorkerStatus> = replies
            .into_iter()
            .filter_map(|reply| reply.ok()?.ok())
            .collect();
        statuses.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        statuses
    }

    /// Counters only; no side effects
    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        PoolStatus {
            name: self.inner.name.clone(),
            total: state.workers.len(),
            active: state.count(WorkerState::Busy),
            idle: state.count(WorkerState::Available),
            spawning: state.count(WorkerState::Spawning),
            shutting_down: self.is_shutting_down(),
        }
    }

    pub fn worker_stats(&self) -> Vec<WorkerInfo> {
        let state = self.inner.state.lock();
        let mut workers: Vec<WorkerInfo> =
            state.workers.values().map(|slot| slot.info.clone()).collect();
        workers.sort_by(|a, b| a.id.cmp(&b.id));
        workers
    }

    /// Stop accepting tasks, ask every worker to finish and exit, then kill
    /// whatever has not acknowledged within `timeout`
    pub async fn shutdown(&self, timeout: Duration) {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            debug!(pool = %self.inner.name, "Worker pool already shutting down");
            return;
        }
        info!(pool = %self.inner.name, "Shutting down worker pool");
        self.inner.released.notify_waiters();

        let acks: Vec<oneshot::Receiver<()>> = {
            let mut state = self.inner.state.lock();
            state.available.clear();
            state
                .workers
                .values_mut()
                .filter_map(|slot| {
                    slot.stop_idle_timer();
                    let (tx, rx) = oneshot::channel();
                    slot.sender.send(WorkerMessage::Shutdown).ok()?;
                    slot.shutdown_ack = Some(tx);
                    Some(rx)
                })
                .collect()
        };

        let expected = acks.len();
        if tokio::time::timeout(timeout, join_all(acks)).await.is_err() {
            warn!(
                pool = %self.inner.name,
                workers = expected,
                timeout = ?timeout,
                "Workers did not acknowledge shutdown in time, terminating"
            );
        }

        let remaining: Vec<String> = self.inner.state.lock().workers.keys().cloned().collect();
        for worker_id in remaining {
            self.retire(&worker_id, "pool shut down");
        }

        if let Some(dispatcher) = self.inner.dispatcher.lock().take() {
            dispatcher.abort();
        }
        info!(pool = %self.inner.name, "Worker pool stopped");
    }

    fn shutting_down_error(&self) -> ExecutionError {
        ExecutionError::PoolShuttingDown {
            pool: self.inner.name.clone(),
        }
    }

    fn start_dispatcher(&self) {
        let Some(mut events) = self.inner.events_rx.lock().take() else {
            return;
        };
        let pool: Weak<PoolInner> = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(inner) = pool.upgrade() else {
                    break;
                };
                WorkerPool { inner }.handle_event(event);
            }
        });
        *self.inner.dispatcher.lock() = Some(handle);
    }

    fn handle_event(&self, event: WorkerEvent) {
        let WorkerEvent { worker_id, kind } = event;
        let message = match kind {
            WorkerEventKind::Exited => {
                if self.is_shutting_down() {
                    debug!(pool = %self.inner.name, worker_id = %worker_id, "Worker exited");
                    self.retire(&worker_id, "worker exited");
                } else if self.inner.state.lock().workers.contains_key(&worker_id) {
                    warn!(pool = %self.inner.name, worker_id = %worker_id, "Worker exited unexpectedly");
                    self.fault(&worker_id, "worker exited unexpectedly");
                }
                return;
            }
            WorkerEventKind::Message(message) => message,
        };

        let mut state = self.inner.state.lock();
        let Some(slot) = state.workers.get_mut(&worker_id) else {
            debug!(worker_id = %worker_id, "Ignoring message from retired worker");
            return;
        };

        match message {
            CoordinatorMessage::Ready { .. } => {
                if let Some(ready) = slot.ready.take() {
                    let _ = ready.send(());
                }
            }
            CoordinatorMessage::TaskProgress { task_id, progress } => {
                if let Some(pending) = slot.pending.as_ref().filter(|p| p.task_id == task_id) {
                    if let Some(sink) = &pending.progress {
                        let _ = sink.send(TaskProgress { task_id, progress });
                    }
                }
            }
            CoordinatorMessage::TaskResult { task_id, result } => {
                match slot.pending.take() {
                    Some(pending) if pending.task_id == task_id => {
                        let orphaned = pending.abandoned
                            || pending.reply.send(TaskReply::Finished(result)).is_err();
                        if orphaned {
                            drop(state);
                            debug!(worker_id = %worker_id, task_id = %task_id, "Releasing worker after abandoned task");
                            self.release(&worker_id);
                        }
                    }
                    other => {
                        slot.pending = other;
                        warn!(worker_id = %worker_id, task_id = %task_id, "Result for a task this worker does not own");
                    }
                }
            }
            CoordinatorMessage::Pong {
                correlation_id,
                status,
                ..
            } => {
                if let Some(waiter) = slot.pongs.remove(&correlation_id) {
                    let _ = waiter.send(status);
                }
            }
            CoordinatorMessage::ShutdownAck { .. } => {
                if let Some(ack) = slot.shutdown_ack.take() {
                    let _ = ack.send(());
                }
            }
            CoordinatorMessage::Error { task_id, error } => {
                error!(
                    pool = %self.inner.name,
                    worker_id = %worker_id,
                    task_id = ?task_id,
                    error = %error,
                    "Worker reported an internal error"
                );
                drop(state);
                self.fault(&worker_id, &error.to_string());
            }
        }
    }

    /// Take an available worker, start a new one, or wait for a release
    async fn acquire(&self) -> Result<String> {
        let started = Instant::now();
        let acquire_timeout = self.inner.config.acquire_timeout;

        loop {
            if self.is_shutting_down() {
                return Err(self.shutting_down_error());
            }

            let released = self.inner.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            let claim = {
                let mut state = self.inner.state.lock();
                self.claim_locked(&mut state)
            };

            match claim {
                Claim::Worker(worker_id) => return Ok(worker_id),
                Claim::Spawn(reservation) => match self.launch(reservation).await {
                    Ok(worker_id) => {
                        if self.mark_busy(&worker_id) {
                            return Ok(worker_id);
                        }
                        continue;
                    }
                    Err(e) => {
                        if self.inner.state.lock().workers.is_empty() {
                            return Err(e);
                        }
                        warn!(pool = %self.inner.name, error = %e, "Could not grow pool, waiting for a worker");
                    }
                },
                Claim::Wait => {}
            }

            let waited = started.elapsed();
            if waited >= acquire_timeout {
                return Err(ExecutionError::NoWorkerAvailable {
                    pool: self.inner.name.clone(),
                    waited,
                });
            }
            let pause = (acquire_timeout - waited).min(ACQUIRE_POLL);
            let _ = tokio::time::timeout(pause, released).await;
        }
    }

    fn claim_locked(&self, state: &mut PoolState) -> Claim {
        while let Some(worker_id) = state.available.pop_front() {
            if let Some(slot) = state.workers.get_mut(&worker_id) {
                if slot.info.state == WorkerState::Available {
                    slot.stop_idle_timer();
                    slot.info.state = WorkerState::Busy;
                    return Claim::Worker(worker_id);
                }
            }
        }

        if state.workers.len() < self.inner.config.max_workers {
            Claim::Spawn(self.reserve_locked(state, 0, None))
        } else {
            Claim::Wait
        }
    }

    /// Register a `Spawning` slot so the live count includes it from now on
    fn reserve_locked(
        &self,
        state: &mut PoolState,
        restart_count: u32,
        worker_id: Option<String>,
    ) -> Reservation {
        let worker_id = worker_id.unwrap_or_else(|| {
            let n = self.inner.next_worker.fetch_add(1, Ordering::SeqCst);
            format!("{}-{}", self.inner.name, n)
        });
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (ready_tx, ready) = oneshot::channel();
        let kill = CancellationToken::new();

        state.workers.insert(
            worker_id.clone(),
            WorkerSlot {
                info: WorkerInfo {
                    id: worker_id.clone(),
                    pid: None,
                    state: WorkerState::Spawning,
                    current_task: None,
                    spawned_at: Utc::now(),
                    tasks_executed: 0,
                    restart_count,
                },
                sender: commands_tx,
                kill: kill.clone(),
                idle_timer: None,
                ready: Some(ready_tx),
                pending: None,
                shutdown_ack: None,
                pongs: HashMap::new(),
            },
        );

        Reservation {
            worker_id: worker_id.clone(),
            channels: WorkerChannels {
                worker_id,
                commands,
                events: self.inner.events_tx.clone(),
                kill,
            },
            ready,
        }
    }

    /// Launch a reserved worker and wait for its readiness signal
    async fn launch(&self, reservation: Reservation) -> Result<String> {
        let Reservation {
            worker_id,
            channels,
            ready,
        } = reservation;
        let mut guard = SpawnGuard {
            pool: self,
            worker_id: &worker_id,
            launched: false,
        };

        let pid = match self.inner.launcher.launch(channels).await {
            Ok(pid) => pid,
            Err(e) => {
                self.retire(&worker_id, "launch failed");
                return Err(e);
            }
        };
        if let Some(slot) = self.inner.state.lock().workers.get_mut(&worker_id) {
            slot.info.pid = pid;
        }

        match tokio::time::timeout(self.inner.config.ready_timeout, ready).await {
            Ok(Ok(())) => {
                guard.launched = true;
                drop(guard);
                debug!(pool = %self.inner.name, worker_id = %worker_id, pid = ?pid, "Worker ready");
                Ok(worker_id)
            }
            Ok(Err(_)) => {
                self.retire(&worker_id, "exited before ready");
                Err(ExecutionError::Spawn(format!(
                    "Worker {} exited before becoming ready",
                    worker_id
                )))
            }
            Err(_) => {
                self.retire(&worker_id, "ready timeout");
                Err(ExecutionError::Spawn(format!(
                    "Worker {} not ready within {:?}",
                    worker_id, self.inner.config.ready_timeout
                )))
            }
        }
    }

    fn mark_busy(&self, worker_id: &str) -> bool {
        let mut state = self.inner.state.lock();
        match state.workers.get_mut(worker_id) {
            Some(slot) => {
                slot.info.state = WorkerState::Busy;
                true
            }
            None => false,
        }
    }

    /// Return a worker to the available set, arming its idle timer when the
    /// pool is above its minimum
    fn release(&self, worker_id: &str) {
        let mut state = self.inner.state.lock();
        let live = state.workers.len();
        let Some(slot) = state.workers.get_mut(worker_id) else {
            return;
        };

        if slot.info.state == WorkerState::Busy {
            slot.info.tasks_executed += 1;
        }
        slot.info.current_task = None;
        slot.pending = None;

        if self.is_shutting_down() {
            return;
        }

        slot.info.state = WorkerState::Available;
        if live > self.inner.config.min_workers {
            slot.stop_idle_timer();
            slot.idle_timer = Some(self.spawn_idle_timer(worker_id.to_string()));
        }
        state.available.push_back(worker_id.to_string());
        drop(state);

        self.inner.released.notify_one();
    }

    fn spawn_idle_timer(&self, worker_id: String) -> JoinHandle<()> {
        let pool = Arc::downgrade(&self.inner);
        let idle_timeout = self.inner.config.idle_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(idle_timeout).await;
            if let Some(inner) = pool.upgrade() {
                WorkerPool { inner }.evict_idle(&worker_id);
            }
        })
    }

    fn evict_idle(&self, worker_id: &str) {
        {
            let mut state = self.inner.state.lock();
            if state.workers.len() <= self.inner.config.min_workers {
                return;
            }
            let Some(slot) = state.workers.get_mut(worker_id) else {
                return;
            };
            if slot.info.state != WorkerState::Available {
                return;
            }
            // Already running; aborting it would cancel this very task
            slot.idle_timer = None;
        }
        info!(pool = %self.inner.name, worker_id = %worker_id, "Evicting idle worker");
        self.retire(worker_id, "idle timeout");
    }

    /// Remove a worker from the pool and terminate it
    ///
    /// Returns its restart count if it was still in the pool.
    fn retire(&self, worker_id: &str, reason: &str) -> Option<u32> {
        let mut slot = {
            let mut state = self.inner.state.lock();
            state.available.retain(|id| id != worker_id);
            state.workers.remove(worker_id)?
        };

        slot.stop_idle_timer();
        slot.info.state = WorkerState::Terminated;
        slot.kill.cancel();
        if let Some(pending) = slot.pending.take() {
            let _ = pending.reply.send(TaskReply::Fault(reason.to_string()));
        }
        if let Some(ack) = slot.shutdown_ack.take() {
            let _ = ack.send(());
        }
        debug!(pool = %self.inner.name, worker_id = %worker_id, reason, "Worker terminated");
        self.inner.released.notify_waiters();
        Some(slot.info.restart_count)
    }

    /// Terminate a misbehaving worker and top the pool back up
    fn fault(&self, worker_id: &str, reason: &str) {
        let Some(restart_count) = self.retire(worker_id, reason) else {
            return;
        };
        if self.is_shutting_down() {
            return;
        }

        let reservation = {
            let mut state = self.inner.state.lock();
            if state.workers.len() >= self.inner.config.min_workers {
                return;
            }
            if restart_count >= self.inner.config.max_restarts {
                error!(
                    pool = %self.inner.name,
                    worker_id = %worker_id,
                    restarts = restart_count,
                    "Worker restart limit reached, not replacing"
                );
                return;
            }
            self.reserve_locked(&mut state, restart_count + 1, None)
        };

        info!(
            pool = %self.inner.name,
            replaced = %worker_id,
            worker_id = %reservation.worker_id,
            restart = restart_count + 1,
            "Spawning replacement worker"
        );
        let pool = self.clone();
        tokio::spawn(async move {
            match pool.launch(reservation).await {
                Ok(worker_id) => pool.release(&worker_id),
                Err(e) => error!(pool = %pool.inner.name, error = %e, "Replacement worker failed to start"),
            }
        });
    }
}
