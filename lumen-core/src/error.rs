//! Error types for the core task model

use thiserror::Error;

/// Result type alias using [`CoreError`]
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised while parsing or converting core types
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Unknown task kind: {0}")]
    UnknownTaskKind(String),

    #[error("Unknown priority: {0}")]
    UnknownPriority(String),

    #[error("Unknown domain label: {0}")]
    UnknownDomain(String),

    #[error("Invalid task id: {0}")]
    InvalidTaskId(String),

    #[error("Invalid status transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: String,
        from: String,
        to: String,
    },

    #[error("Payload error: {0}")]
    Payload(#[from] serde_json::Error),
}
