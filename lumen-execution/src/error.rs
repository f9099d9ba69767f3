//! Error types for pools and the coordinator

use lumen_config::ConfigError;
use lumen_core::{CoreError, TaskId};
use lumen_ipc::IpcError;
use lumen_queue::QueueError;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using [`ExecutionError`]
pub type Result<T> = std::result::Result<T, ExecutionError>;

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Worker pool '{pool}' is shutting down")]
    PoolShuttingDown { pool: String },

    #[error("Task {task_id} timed out after {timeout:?}")]
    TaskTimeout { task_id: TaskId, timeout: Duration },

    /// The worker crashed or reported an internal error mid-task
    #[error("Worker {worker_id} faulted: {reason}")]
    WorkerFault { worker_id: String, reason: String },

    /// The handler ran and reported failure
    #[error("Task {task_id} failed: {message}")]
    TaskFailed { task_id: TaskId, message: String },

    #[error("Task {task_id} failed after {attempts} attempts: {last_error}")]
    MaxAttemptsExceeded {
        task_id: TaskId,
        attempts: u32,
        last_error: String,
    },

    #[error("No worker available in pool '{pool}' after {waited:?}")]
    NoWorkerAvailable { pool: String, waited: Duration },

    #[error("Failed to spawn worker: {0}")]
    Spawn(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("IPC error: {0}")]
    Ipc(#[from] IpcError),

    #[error("Payload error: {0}")]
    Payload(String),

    #[error("Unknown task domain: {0}")]
    UnknownDomain(String),

    #[error("Coordinator is not initialized")]
    NotInitialized,
}

impl ExecutionError {
    /// Whether re-running the same task could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExecutionError::TaskTimeout { .. }
                | ExecutionError::WorkerFault { .. }
                | ExecutionError::TaskFailed { .. }
                | ExecutionError::NoWorkerAvailable { .. }
        )
    }
}

impl From<ConfigError> for ExecutionError {
    fn from(err: ConfigError) -> Self {
        ExecutionError::Configuration(err.to_string())
    }
}

impl From<CoreError> for ExecutionError {
    fn from(err: CoreError) -> Self {
        ExecutionError::Payload(err.to_string())
    }
}

impl From<serde_json::Error> for ExecutionError {
    fn from(err: serde_json::Error) -> Self {
        ExecutionError::Payload(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let task_id = TaskId::new();
        assert!(ExecutionError::TaskTimeout {
            task_id,
            timeout: Duration::from_secs(1)
        }
        .is_retryable());
        assert!(ExecutionError::WorkerFault {
            worker_id: "scan-1".into(),
            reason: "exited".into()
        }
        .is_retryable());
        assert!(!ExecutionError::PoolShuttingDown { pool: "scan".into() }.is_retryable());
        assert!(!ExecutionError::MaxAttemptsExceeded {
            task_id,
            attempts: 3,
            last_error: "boom".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_queue_errors_convert() {
        let err: ExecutionError = QueueError::QueueFull { capacity: 2 }.into();
        assert_eq!(err.to_string(), "Task queue is full (capacity 2)");
    }
}
