//! Queue error types

use lumen_core::{TaskId, TaskStatus};
use thiserror::Error;

/// Result type alias using [`QueueError`]
pub type Result<T> = std::result::Result<T, QueueError>;

#[derive(Error, Debug)]
pub enum QueueError {
    /// Queued plus running tasks already fill the queue
    #[error("Task queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Task {task_id} is {status}")]
    InvalidState { task_id: TaskId, status: TaskStatus },

    /// Snapshot could not be read or written
    #[error("Queue persistence error: {0}")]
    Persistence(String),
}

impl QueueError {
    /// Whether the caller can reasonably try again later
    pub fn is_retryable(&self) -> bool {
        matches!(self, QueueError::QueueFull { .. } | QueueError::Persistence(_))
    }
}

impl From<std::io::Error> for QueueError {
    fn from(err: std::io::Error) -> Self {
        QueueError::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::Persistence(err.to_string())
    }
}
