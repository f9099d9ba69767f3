//! IPC protocol definitions and message types

use chrono::{DateTime, Utc};
use lumen_core::{TaskId, TaskKind};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// IPC protocol version for compatibility checking
pub const IPC_PROTOCOL_VERSION: u32 = 1;

/// Messages sent from coordinator to workers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// Execute a task; the worker answers with exactly one `TaskResult`
    /// (or `Error`) carrying the same task id
    ExecuteTask {
        task_id: TaskId,
        kind: TaskKind,
        payload: JsonValue,
    },

    /// Trip the cancellation token of an in-flight task
    Cancel { task_id: TaskId },

    /// Health check ping
    Ping { correlation_id: Uuid },

    /// Finish the in-flight task, acknowledge, then exit
    Shutdown,
}

/// Messages sent from workers to coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinatorMessage {
    /// Worker ready for work
    Ready { worker_id: String },

    /// Terminal result of a task
    TaskResult {
        task_id: TaskId,
        result: TaskExecutionResult,
    },

    /// Intermediate progress of a task, zero or more before its result
    TaskProgress {
        task_id: TaskId,
        progress: JsonValue,
    },

    /// Health check response
    Pong {
        correlation_id: Uuid,
        worker_id: String,
        status: WorkerStatus,
    },

    /// Worker-level fault, optionally tied to the task it interrupted
    Error {
        task_id: Option<TaskId>,
        error: WorkerError,
    },

    /// Reply to `Shutdown`, sent just before the worker exits
    ShutdownAck { worker_id: String },
}

impl CoordinatorMessage {
    /// The task this message belongs to, if any
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            CoordinatorMessage::TaskResult { task_id, .. }
            | CoordinatorMessage::TaskProgress { task_id, .. } => Some(*task_id),
            CoordinatorMessage::Error { task_id, .. } => *task_id,
            _ => None,
        }
    }
}

/// Task execution result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskExecutionResult {
    pub success: bool,
    pub output: Option<JsonValue>,
    pub error_message: Option<String>,
    pub error_details: Option<JsonValue>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl TaskExecutionResult {
    /// Create a successful result
    pub fn success(
        output: JsonValue,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            success: true,
            output: Some(output),
            error_message: None,
            error_details: None,
            started_at,
            completed_at,
            duration_ms: (completed_at - started_at).num_milliseconds(),
        }
    }

    /// Create a failed result
    pub fn failure(
        error: String,
        details: Option<JsonValue>,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            success: false,
            output: None,
            error_message: Some(error),
            error_details: details,
            started_at,
            completed_at,
            duration_ms: (completed_at - started_at).num_milliseconds(),
        }
    }
}

/// Worker status information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub worker_id: String,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub tasks_executed: u64,
    pub tasks_failed: u64,
    pub current_task: Option<TaskId>,
}

impl WorkerStatus {
    /// Create a new worker status
    pub fn new(worker_id: String, pid: u32) -> Self {
        let now = Utc::now();
        Self {
            worker_id,
            pid,
            started_at: now,
            last_activity: now,
            tasks_executed: 0,
            tasks_failed: 0,
            current_task: None,
        }
    }

    /// Update activity timestamp
    pub fn update_activity(&mut self) {
        self.last_activity = Utc::now();
    }

    /// Record task execution
    pub fn record_task_execution(&mut self, success: bool) {
        self.tasks_executed += 1;
        if !success {
            self.tasks_failed += 1;
        }
        self.current_task = None;
        self.update_activity();
    }
}

/// Faults a worker reports outside a task result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "error_type", rename_all = "snake_case")]
pub enum WorkerError {
    /// Handler panicked or the worker is otherwise unusable
    #[error("Worker panic: {error}")]
    WorkerPanic {
        error: String,
        backtrace: Option<String>,
    },

    /// A coordinator message could not be decoded
    #[error("Message parse error: {error}")]
    MessageParseError { error: String },

    /// A task arrived while another was still running
    #[error("Worker busy with task {running}")]
    Busy { running: TaskId },
}

/// Message envelope for all IPC communications
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope<T> {
    pub protocol_version: u32,
    pub timestamp: DateTime<Utc>,
    pub message: T,
}

impl<T> MessageEnvelope<T> {
    /// Create a new message envelope
    pub fn new(message: T) -> Self {
        Self {
            protocol_version: IPC_PROTOCOL_VERSION,
            timestamp: Utc::now(),
            message,
        }
    }

    /// Check if protocol version is compatible
    pub fn is_compatible(&self) -> bool {
        self.protocol_version == IPC_PROTOCOL_VERSION
    }
}
