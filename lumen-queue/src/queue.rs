//! In-memory priority buckets with durable snapshots

use chrono::{DateTime, Utc};
use lumen_config::QueueConfig;
use lumen_core::{Priority, Task, TaskId, TaskKind, TaskRequest, TaskStatus};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{QueueError, Result};
use crate::snapshot::{QueueSnapshot, SnapshotStore};

/// Outcome of reporting a failed attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailOutcome {
    /// The task went back into a bucket
    pub should_retry: bool,
    /// Attempts consumed so far
    pub attempts: u32,
    /// Bucket the task was re-queued into, when retried
    pub priority: Option<Priority>,
}

/// Point-in-time counters of the queue
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    /// Queued plus running
    pub total: usize,
    pub queued: usize,
    pub running: usize,
    pub critical: usize,
    pub high: usize,
    pub normal: usize,
    pub low: usize,
    pub capacity: usize,
    /// Age of the longest-waiting queued task
    pub oldest_queued_age_ms: Option<u64>,
}

impl QueueStats {
    pub fn by_priority(&self, priority: Priority) -> usize {
        match priority {
            Priority::Critical => self.critical,
            Priority::High => self.high,
            Priority::Normal => self.normal,
            Priority::Low => self.low,
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    /// Indexed by `Priority::rank`
    buckets: [VecDeque<TaskId>; 4],
    /// Every queued or running task
    index: HashMap<TaskId, Task>,
}

impl QueueState {
    fn bucket_mut(&mut self, priority: Priority) -> &mut VecDeque<TaskId> {
        &mut self.buckets[priority.rank()]
    }

    fn remove_from_bucket(&mut self, task_id: TaskId, priority: Priority) {
        let bucket = self.bucket_mut(priority);
        if let Some(position) = bucket.iter().position(|id| *id == task_id) {
            bucket.remove(position);
        }
    }

    /// Move an indexed task to a terminal `next` and drop it from the queue
    fn take_as(&mut self, task_id: TaskId, next: TaskStatus) -> Result<Task> {
        let task = self
            .index
            .get_mut(&task_id)
            .ok_or(QueueError::TaskNotFound(task_id))?;
        let (from, priority) = (task.status, task.priority);
        task.transition(next)
            .map_err(|_| QueueError::InvalidState { task_id, status: from })?;

        if from == TaskStatus::Queued {
            self.remove_from_bucket(task_id, priority);
        }
        self.index
            .remove(&task_id)
            .ok_or(QueueError::TaskNotFound(task_id))
    }

    fn push_back(&mut self, task: Task) {
        let (id, priority) = (task.id, task.priority);
        self.index.insert(id, task);
        self.bucket_mut(priority).push_back(id);
    }

    fn queued_count(&self) -> usize {
        self.buckets.iter().map(VecDeque::len).sum()
    }

    fn to_snapshot(&self) -> QueueSnapshot {
        let mut snapshot = QueueSnapshot::new();

        // Running tasks go ahead of the waiting ones of the same priority
        let mut running: Vec<&Task> = self
            .index
            .values()
            .filter(|task| task.status == TaskStatus::Running)
            .collect();
        running.sort_by_key(|task| (task.dequeued_at, task.id));
        for task in running {
            snapshot.bucket_mut(task.priority).push(task.clone());
        }

        for priority in Priority::DESCENDING {
            for id in &self.buckets[priority.rank()] {
                if let Some(task) = self.index.get(id) {
                    snapshot.bucket_mut(priority).push(task.clone());
                }
            }
        }

        snapshot
    }
}

/// Priority task queue
///
/// Dequeue never blocks and is strict: a task only comes out when every
/// higher bucket is empty, and buckets are FIFO. All mutation happens under
/// one lock, so two dequeues never return the same task and a cancel racing
/// a dequeue has exactly one winner.
pub struct TaskQueue {
    state: Mutex<QueueState>,
    max_size: usize,
    max_attempts: u32,
    store: Option<SnapshotStore>,
    saver: Mutex<Option<JoinHandle<()>>>,
}

impl TaskQueue {
    /// Queue without persistence
    pub fn new(max_size: usize, max_attempts: u32) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            max_size,
            max_attempts: max_attempts.max(1),
            store: None,
            saver: Mutex::new(None),
        }
    }

    /// Build a queue from configuration
    ///
    /// A previous snapshot, if any, is loaded before the queue is returned.
    /// A missing or unreadable snapshot is logged and the queue starts
    /// empty. When persistence is enabled a background task saves the
    /// backlog every `save_interval`.
    pub async fn open(config: &QueueConfig) -> Result<Arc<Self>> {
        let mut queue = Self::new(config.max_size, config.max_attempts);

        if let Some(path) = config.resolved_persistence_path() {
            let store = SnapshotStore::new(path);
            queue.restore_from(&store).await;
            queue.store = Some(store);
        } else if config.persistence_enabled {
            warn!("No data directory available, task queue will not be persisted");
        }

        let queue = Arc::new(queue);
        if queue.store.is_some() && !config.save_interval.is_zero() {
            queue.start_periodic_save(config.save_interval);
        }

        info!(
            capacity = queue.max_size,
            restored = queue.len(),
            persistent = queue.store.is_some(),
            "Task queue ready"
        );
        Ok(queue)
    }

    /// Queue persisted to an explicit path, without the periodic saver
    pub async fn with_store(max_size: usize, max_attempts: u32, store: SnapshotStore) -> Self {
        let mut queue = Self::new(max_size, max_attempts);
        queue.restore_from(&store).await;
        queue.store = Some(store);
        queue
    }

    async fn restore_from(&mut self, store: &SnapshotStore) {
        match store.load().await {
            Ok(Some(snapshot)) => {
                let restored = self.restore(snapshot);
                info!(
                    path = %store.path().display(),
                    restored,
                    "Restored task queue snapshot"
                );
            }
            Ok(None) => debug!(path = %store.path().display(), "No queue snapshot to restore"),
            Err(e) => warn!(
                path = %store.path().display(),
                error = %e,
                "Ignoring unreadable queue snapshot"
            ),
        }
    }

    /// Load snapshot contents; every task comes back QUEUED with its id
    fn restore(&mut self, snapshot: QueueSnapshot) -> usize {
        let state = self.state.get_mut();
        let mut restored = 0;

        for priority in Priority::DESCENDING {
            for mut task in snapshot.bucket(priority).iter().cloned() {
                if state.index.contains_key(&task.id) {
                    warn!(task_id = %task.id, "Skipping duplicate task in snapshot");
                    continue;
                }
                task.priority = priority;
                task.status = TaskStatus::Queued;
                task.dequeued_at = None;
                task.completed_at = None;
                state.push_back(task);
                restored += 1;
            }
        }

        if restored > self.max_size {
            warn!(
                restored,
                capacity = self.max_size,
                "Restored backlog exceeds queue capacity"
            );
        }
        restored
    }

    /// Add a task to the back of its priority bucket
    pub fn enqueue(&self, request: TaskRequest, priority: Priority) -> Result<TaskId> {
        let explicit_budget = request.max_attempts.is_some();
        let mut task = Task::from_request(request, priority);
        if !explicit_budget {
            task.max_attempts = self.max_attempts;
        }
        self.enqueue_task(task)
    }

    /// Add an already-built task, replacing its id and resetting its status
    pub fn enqueue_task(&self, mut task: Task) -> Result<TaskId> {
        let mut state = self.state.lock();
        if state.index.len() >= self.max_size {
            return Err(QueueError::QueueFull {
                capacity: self.max_size,
            });
        }

        task.id = TaskId::new();
        task.status = TaskStatus::Queued;
        task.enqueued_at = Utc::now();
        task.dequeued_at = None;
        task.completed_at = None;

        let (id, kind, priority) = (task.id, task.kind, task.priority);
        state.push_back(task);
        drop(state);

        debug!(task_id = %id, kind = %kind, priority = %priority, "Task enqueued");
        Ok(id)
    }

    /// Take the oldest task of the highest non-empty priority
    pub fn dequeue(&self) -> Option<Task> {
        let mut state = self.state.lock();

        for priority in Priority::DESCENDING {
            while let Some(id) = state.bucket_mut(priority).pop_front() {
                let Some(task) = state.index.get_mut(&id) else {
                    continue;
                };
                if let Err(e) = task.transition(TaskStatus::Running) {
                    warn!(task_id = %id, error = %e, "Skipping bucket entry that is not queued");
                    continue;
                }
                let task = task.clone();
                drop(state);

                debug!(task_id = %task.id, priority = %priority, "Task dequeued");
                return Some(task);
            }
        }

        None
    }

    /// Cancel a queued task; running or unknown tasks return false
    pub fn cancel(&self, task_id: TaskId) -> bool {
        let cancelled = self
            .state
            .lock()
            .take_as(task_id, TaskStatus::Cancelled)
            .is_ok();
        if cancelled {
            debug!(task_id = %task_id, "Task cancelled");
        }
        cancelled
    }

    /// Cancel every queued task of `kind`, returning how many were removed
    pub fn cancel_by_kind(&self, kind: TaskKind) -> usize {
        let mut state = self.state.lock();

        let doomed: Vec<TaskId> = state
            .index
            .values()
            .filter(|task| task.kind == kind && task.status == TaskStatus::Queued)
            .map(|task| task.id)
            .collect();

        let cancelled = doomed
            .into_iter()
            .filter(|id| state.take_as(*id, TaskStatus::Cancelled).is_ok())
            .count();
        drop(state);

        if cancelled > 0 {
            info!(kind = %kind, cancelled, "Cancelled queued tasks");
        }
        cancelled
    }

    /// Mark a running task completed and forget it
    ///
    /// A task that was never dequeued is rejected with
    /// [`QueueError::InvalidState`] and stays queued.
    pub fn complete(&self, task_id: TaskId) -> Result<Task> {
        let task = self.state.lock().take_as(task_id, TaskStatus::Completed)?;
        debug!(task_id = %task_id, attempts = task.attempts, "Task completed");
        Ok(task)
    }

    /// Record a failed attempt
    ///
    /// Below the attempt budget the task is demoted one priority level and
    /// appended to that bucket, losing its place. At the budget it is marked
    /// failed and forgotten.
    pub fn fail(&self, task_id: TaskId, error: impl Into<String>) -> Result<FailOutcome> {
        let error = error.into();
        let mut state = self.state.lock();

        let task = state
            .index
            .get_mut(&task_id)
            .ok_or(QueueError::TaskNotFound(task_id))?;
        task.record_failure(error.clone());
        let attempts = task.attempts;

        if task.attempts_exhausted() {
            state.take_as(task_id, TaskStatus::Failed)?;
            drop(state);
            warn!(task_id = %task_id, attempts, error = %error, "Task failed permanently");
            return Ok(FailOutcome {
                should_retry: false,
                attempts,
                priority: None,
            });
        }

        // A queued task keeps its status and only changes bucket
        let (from, priority) = (task.status, task.priority);
        if from == TaskStatus::Running {
            task.transition(TaskStatus::Queued)
                .map_err(|_| QueueError::InvalidState { task_id, status: from })?;
        }
        let demoted = priority.demote();
        task.priority = demoted;
        state.remove_from_bucket(task_id, priority);
        state.bucket_mut(demoted).push_back(task_id);
        drop(state);

        info!(
            task_id = %task_id,
            attempts,
            priority = %demoted,
            error = %error,
            "Task re-queued after failure"
        );
        Ok(FailOutcome {
            should_retry: true,
            attempts,
            priority: Some(demoted),
        })
    }

    /// Put a running task back at the head of its bucket
    ///
    /// For work that never reached a worker; no attempt is counted.
    pub fn requeue(&self, task_id: TaskId) -> Result<()> {
        let mut state = self.state.lock();
        let task = state
            .index
            .get_mut(&task_id)
            .ok_or(QueueError::TaskNotFound(task_id))?;
        let (from, priority) = (task.status, task.priority);
        task.transition(TaskStatus::Queued)
            .map_err(|_| QueueError::InvalidState { task_id, status: from })?;
        state.bucket_mut(priority).push_front(task_id);
        drop(state);

        debug!(task_id = %task_id, priority = %priority, "Task returned to the queue");
        Ok(())
    }

    /// Look up a queued or running task
    pub fn get(&self, task_id: TaskId) -> Option<Task> {
        self.state.lock().index.get(&task_id).cloned()
    }

    /// Queued plus running tasks
    pub fn len(&self) -> usize {
        self.state.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }

    /// Ids of queued tasks in the order they would be dequeued
    pub fn queued_ids(&self) -> Vec<TaskId> {
        let state = self.state.lock();
        Priority::DESCENDING
            .into_iter()
            .flat_map(|priority| state.buckets[priority.rank()].iter().copied())
            .collect()
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock();
        let now = Utc::now();

        let oldest: Option<DateTime<Utc>> = state
            .buckets
            .iter()
            .flat_map(|bucket| bucket.iter())
            .filter_map(|id| state.index.get(id))
            .map(|task| task.enqueued_at)
            .min();

        let queued = state.queued_count();
        QueueStats {
            total: state.index.len(),
            queued,
            running: state.index.len().saturating_sub(queued),
            critical: state.buckets[Priority::Critical.rank()].len(),
            high: state.buckets[Priority::High.rank()].len(),
            normal: state.buckets[Priority::Normal.rank()].len(),
            low: state.buckets[Priority::Low.rank()].len(),
            capacity: self.max_size,
            oldest_queued_age_ms: oldest
                .map(|at| (now - at).num_milliseconds().max(0) as u64),
        }
    }

    /// Current backlog in snapshot form
    pub fn snapshot(&self) -> QueueSnapshot {
        self.state.lock().to_snapshot()
    }

    /// Write a snapshot now; a no-op without persistence
    pub async fn save(&self) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let snapshot = self.snapshot();
        store.save(&snapshot).await
    }

    fn start_periodic_save(self: &Arc<Self>, period: Duration) {
        let queue: Weak<Self> = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                interval.tick().await;
                let Some(queue) = queue.upgrade() else {
                    break;
                };
                if let Err(e) = queue.save().await {
                    error!(error = %e, "Periodic queue snapshot failed");
                }
            }
        });

        *self.saver.lock() = Some(handle);
    }

    /// Stop the periodic saver, write a final snapshot and clear the queue
    ///
    /// Snapshot failures are logged; teardown always completes.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.saver.lock().take() {
            handle.abort();
        }

        if let Err(e) = self.save().await {
            error!(error = %e, "Final queue snapshot failed");
        }

        let mut state = self.state.lock();
        let dropped = state.index.len();
        state.index.clear();
        for bucket in state.buckets.iter_mut() {
            bucket.clear();
        }
        drop(state);

        info!(tasks = dropped, "Task queue shut down");
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        if let Some(handle) = self.saver.get_mut().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("len", &self.len())
            .field("max_size", &self.max_size)
            .field("max_attempts", &self.max_attempts)
            .field("store", &self.store)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(kind: TaskKind) -> TaskRequest {
        TaskRequest::new(kind, json!({"path": "/media"}))
    }

    #[test]
    fn test_higher_priority_dequeued_first() {
        let queue = TaskQueue::new(100, 3);
        let low = queue.enqueue(request(TaskKind::ScanDirectory), Priority::Low).unwrap();
        let high = queue.enqueue(request(TaskKind::ScanDirectory), Priority::High).unwrap();
        let critical = queue
            .enqueue(request(TaskKind::ScanDirectory), Priority::Critical)
            .unwrap();

        assert_eq!(queue.dequeue().unwrap().id, critical);
        assert_eq!(queue.dequeue().unwrap().id, high);
        assert_eq!(queue.dequeue().unwrap().id, low);
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn test_fifo_within_bucket() {
        let queue = TaskQueue::new(100, 3);
        let a = queue.enqueue(request(TaskKind::ExtractMetadata), Priority::Critical).unwrap();
        let b = queue.enqueue(request(TaskKind::ExtractMetadata), Priority::Normal).unwrap();
        let c = queue.enqueue(request(TaskKind::ExtractMetadata), Priority::Normal).unwrap();

        let order: Vec<_> = std::iter::from_fn(|| queue.dequeue()).map(|t| t.id).collect();
        assert_eq!(order, vec![a, b, c]);
    }

    #[test]
    fn test_dequeue_marks_running() {
        let queue = TaskQueue::new(10, 3);
        let id = queue.enqueue(request(TaskKind::ScanDirectory), Priority::Normal).unwrap();

        let task = queue.dequeue().unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        assert!(task.dequeued_at.is_some());
        assert_eq!(queue.get(id).unwrap().status, TaskStatus::Running);
    }

    #[test]
    fn test_capacity_counts_running_tasks() {
        let queue = TaskQueue::new(2, 3);
        queue.enqueue(request(TaskKind::ScanDirectory), Priority::Normal).unwrap();
        queue.enqueue(request(TaskKind::ScanDirectory), Priority::Normal).unwrap();
        queue.dequeue().unwrap();

        let err = queue
            .enqueue(request(TaskKind::ScanDirectory), Priority::High)
            .unwrap_err();
        assert!(matches!(err, QueueError::QueueFull { capacity: 2 }));
    }

    #[test]
    fn test_cancel_only_queued() {
        let queue = TaskQueue::new(10, 3);
        let running = queue.enqueue(request(TaskKind::ScanDirectory), Priority::High).unwrap();
        let waiting = queue.enqueue(request(TaskKind::ScanDirectory), Priority::Normal).unwrap();
        queue.dequeue().unwrap();

        assert!(!queue.cancel(running));
        assert!(queue.cancel(waiting));
        assert!(!queue.cancel(waiting));
        assert!(queue.dequeue().is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_cancel_by_kind() {
        let queue = TaskQueue::new(10, 3);
        queue.enqueue(request(TaskKind::GenerateThumbnail), Priority::High).unwrap();
        queue.enqueue(request(TaskKind::GenerateThumbnail), Priority::Low).unwrap();
        let scan = queue.enqueue(request(TaskKind::ScanDirectory), Priority::Low).unwrap();
        let thumb_running = queue
            .enqueue(request(TaskKind::GenerateThumbnail), Priority::Critical)
            .unwrap();
        assert_eq!(queue.dequeue().unwrap().id, thumb_running);

        assert_eq!(queue.cancel_by_kind(TaskKind::GenerateThumbnail), 2);
        assert_eq!(queue.queued_ids(), vec![scan]);
        assert!(queue.get(thumb_running).is_some());
    }

    #[test]
    fn test_fail_demotes_then_fails_permanently() {
        let queue = TaskQueue::new(10, 3);
        let id = queue.enqueue(request(TaskKind::ExtractMetadata), Priority::High).unwrap();

        queue.dequeue().unwrap();
        let first = queue.fail(id, "probe crashed").unwrap();
        assert_eq!(
            first,
            FailOutcome {
                should_retry: true,
                attempts: 1,
                priority: Some(Priority::Normal)
            }
        );

        queue.dequeue().unwrap();
        let second = queue.fail(id, "probe crashed").unwrap();
        assert!(second.should_retry);
        assert_eq!(second.priority, Some(Priority::Low));

        let task = queue.get(id).unwrap();
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.last_error.as_deref(), Some("probe crashed"));
        assert!(task.last_error_at.is_some());

        queue.dequeue().unwrap();
        let last = queue.fail(id, "probe crashed").unwrap();
        assert!(!last.should_retry);
        assert_eq!(last.attempts, 3);
        assert!(queue.get(id).is_none());
        assert_eq!(queue.stats().total, 0);
    }

    #[test]
    fn test_retried_task_loses_position() {
        let queue = TaskQueue::new(10, 3);
        let failing = queue.enqueue(request(TaskKind::ScanDirectory), Priority::Low).unwrap();
        let waiting = queue.enqueue(request(TaskKind::ScanDirectory), Priority::Low).unwrap();

        queue.dequeue().unwrap();
        queue.fail(failing, "io error").unwrap();

        assert_eq!(queue.queued_ids(), vec![waiting, failing]);
    }

    #[test]
    fn test_fail_on_queued_task_moves_bucket() {
        let queue = TaskQueue::new(10, 3);
        let id = queue.enqueue(request(TaskKind::ScanDirectory), Priority::Critical).unwrap();

        queue.fail(id, "rejected").unwrap();

        let stats = queue.stats();
        assert_eq!(stats.critical, 0);
        assert_eq!(stats.high, 1);
        assert_eq!(queue.queued_ids(), vec![id]);
    }

    #[test]
    fn test_request_attempt_budget_overrides_queue_default() {
        let queue = TaskQueue::new(10, 3);
        let id = queue
            .enqueue(
                request(TaskKind::ScanDirectory).with_max_attempts(1),
                Priority::Normal,
            )
            .unwrap();

        assert!(!queue.fail(id, "no retries").unwrap().should_retry);
    }

    #[test]
    fn test_complete_and_unknown_ids() {
        let queue = TaskQueue::new(10, 3);
        let id = queue.enqueue(request(TaskKind::ScanDirectory), Priority::Normal).unwrap();
        queue.dequeue().unwrap();

        let done = queue.complete(id).unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert!(done.completed_at.is_some());
        assert!(queue.is_empty());

        assert!(matches!(queue.complete(id), Err(QueueError::TaskNotFound(_))));
        assert!(matches!(queue.fail(id, "x"), Err(QueueError::TaskNotFound(_))));
    }

    #[test]
    fn test_requeue_keeps_place_and_attempts() {
        let queue = TaskQueue::new(10, 3);
        let first = queue.enqueue(request(TaskKind::ScanDirectory), Priority::Normal).unwrap();
        let second = queue.enqueue(request(TaskKind::ScanDirectory), Priority::Normal).unwrap();

        assert_eq!(queue.dequeue().unwrap().id, first);
        queue.requeue(first).unwrap();

        assert_eq!(queue.queued_ids(), vec![first, second]);
        let task = queue.get(first).unwrap();
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.attempts, 0);
        assert_eq!(task.priority, Priority::Normal);
        assert!(task.dequeued_at.is_none());

        assert!(matches!(
            queue.requeue(second),
            Err(QueueError::InvalidState { status: TaskStatus::Queued, .. })
        ));
    }

    #[test]
    fn test_complete_rejects_task_never_dequeued() {
        let queue = TaskQueue::new(10, 3);
        let id = queue.enqueue(request(TaskKind::ExtractMetadata), Priority::High).unwrap();

        match queue.complete(id) {
            Err(QueueError::InvalidState { task_id, status }) => {
                assert_eq!(task_id, id);
                assert_eq!(status, TaskStatus::Queued);
            }
            other => panic!("unexpected result: {:?}", other),
        }

        // Still waiting in its bucket
        assert_eq!(queue.queued_ids(), vec![id]);
        assert_eq!(queue.get(id).unwrap().status, TaskStatus::Queued);
        assert_eq!(queue.dequeue().unwrap().id, id);
        assert_eq!(queue.complete(id).unwrap().status, TaskStatus::Completed);
    }

    #[test]
    fn test_stats() {
        let queue = TaskQueue::new(50, 3);
        assert_eq!(queue.stats().oldest_queued_age_ms, None);

        queue.enqueue(request(TaskKind::ScanDirectory), Priority::Critical).unwrap();
        queue.enqueue(request(TaskKind::ScanDirectory), Priority::Normal).unwrap();
        queue.enqueue(request(TaskKind::ScanDirectory), Priority::Normal).unwrap();
        queue.dequeue().unwrap();

        let stats = queue.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.running, 1);
        assert_eq!(stats.queued, 2);
        assert_eq!(stats.by_priority(Priority::Critical), 0);
        assert_eq!(stats.by_priority(Priority::Normal), 2);
        assert_eq!(stats.capacity, 50);
        assert!(stats.oldest_queued_age_ms.is_some());
    }

    #[test]
    fn test_snapshot_places_running_first() {
        let queue = TaskQueue::new(10, 3);
        let first = queue.enqueue(request(TaskKind::ScanDirectory), Priority::Normal).unwrap();
        let second = queue.enqueue(request(TaskKind::ScanDirectory), Priority::Normal).unwrap();
        assert_eq!(queue.dequeue().unwrap().id, first);

        let snapshot = queue.snapshot();
        let ids: Vec<_> = snapshot.normal.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![first, second]);
        assert_eq!(snapshot.normal[0].status, TaskStatus::Running);
    }

    #[test]
    fn test_concurrent_dequeues_never_share_a_task() {
        let queue = Arc::new(TaskQueue::new(1000, 3));
        for _ in 0..400 {
            queue.enqueue(request(TaskKind::ScanDirectory), Priority::Normal).unwrap();
        }

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    std::iter::from_fn(|| queue.dequeue())
                        .map(|t| t.id)
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen: Vec<TaskId> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let total = seen.len();
        seen.sort();
        seen.dedup();
        assert_eq!(total, 400);
        assert_eq!(seen.len(), 400);
    }
}
