//! Task domain model and related types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::CoreError;

/// Attempts allowed before a failing task becomes terminal
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Unique identifier for a task (newtype pattern for type safety)
///
/// Backed by a UUIDv7, so ids generated later sort after ids generated
/// earlier within the same process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Create a new time-ordered task ID
    pub fn new() -> Self {
        TaskId(Uuid::now_v7())
    }

    /// Get the inner UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(TaskId)
            .map_err(|_| CoreError::InvalidTaskId(s.to_string()))
    }
}

impl From<Uuid> for TaskId {
    fn from(uuid: Uuid) -> Self {
        TaskId(uuid)
    }
}

/// Operation a task performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    /// Walk a directory and collect media files
    ScanDirectory,
    /// Extract a still frame from a video
    GenerateThumbnail,
    /// Probe a media file for technical metadata
    ExtractMetadata,
}

impl TaskKind {
    /// Get the wire representation of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::ScanDirectory => "scan-directory",
            TaskKind::GenerateThumbnail => "generate-thumbnail",
            TaskKind::ExtractMetadata => "extract-metadata",
        }
    }

    /// Get all task kinds
    pub fn all() -> &'static [TaskKind] {
        &[
            TaskKind::ScanDirectory,
            TaskKind::GenerateThumbnail,
            TaskKind::ExtractMetadata,
        ]
    }

    /// Short label of the worker pool that runs this kind
    pub fn domain_label(&self) -> &'static str {
        match self {
            TaskKind::ScanDirectory => "scan",
            TaskKind::GenerateThumbnail => "thumbnail",
            TaskKind::ExtractMetadata => "metadata",
        }
    }

    /// Resolve a pool label ("scan", "thumbnail", "metadata") to a kind
    pub fn from_domain_label(label: &str) -> Result<Self, CoreError> {
        match label.trim().to_ascii_lowercase().as_str() {
            "scan" => Ok(TaskKind::ScanDirectory),
            "thumbnail" => Ok(TaskKind::GenerateThumbnail),
            "metadata" => Ok(TaskKind::ExtractMetadata),
            other => Err(CoreError::UnknownDomain(other.to_string())),
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scan-directory" => Ok(TaskKind::ScanDirectory),
            "generate-thumbnail" => Ok(TaskKind::GenerateThumbnail),
            "extract-metadata" => Ok(TaskKind::ExtractMetadata),
            _ => Err(CoreError::UnknownTaskKind(s.to_string())),
        }
    }
}

/// Task priority levels, ordered `Critical > High > Normal > Low`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[derive(Default)]
pub enum Priority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
    Critical = 3,
}

impl Priority {
    /// Priorities in dequeue order, highest first
    pub const DESCENDING: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
    ];

    /// Get the string representation of the priority
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }

    /// One level lower, clamped at `Low`
    pub fn demote(self) -> Self {
        match self {
            Priority::Critical => Priority::High,
            Priority::High => Priority::Normal,
            Priority::Normal | Priority::Low => Priority::Low,
        }
    }

    /// Position of this priority in [`Priority::DESCENDING`]
    pub fn rank(self) -> usize {
        match self {
            Priority::Critical => 0,
            Priority::High => 1,
            Priority::Normal => 2,
            Priority::Low => 3,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Priority {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "critical" => Ok(Priority::Critical),
            "high" => Ok(Priority::High),
            "normal" => Ok(Priority::Normal),
            "low" => Ok(Priority::Low),
            _ => Err(CoreError::UnknownPriority(s.to_string())),
        }
    }
}

/// Task lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Get the string representation of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal tasks are dropped from the queue index
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Whether a task in this status may move to `next`
    ///
    /// Only a running task completes or goes back to the queue, and a running
    /// task cannot be cancelled. Terminal statuses are final.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (
                TaskStatus::Queued,
                TaskStatus::Running | TaskStatus::Cancelled | TaskStatus::Failed
            ) | (
                TaskStatus::Running,
                TaskStatus::Queued | TaskStatus::Completed | TaskStatus::Failed
            )
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Description of work submitted by a caller, before it becomes a [`Task`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequest {
    pub kind: TaskKind,
    pub payload: JsonValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
}

impl TaskRequest {
    /// Create a request with the default attempt budget
    pub fn new(kind: TaskKind, payload: JsonValue) -> Self {
        Self {
            kind,
            payload,
            max_attempts: None,
        }
    }

    /// Override the attempt budget
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

/// A unit of work tracked by the queue and dispatched to workers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub kind: TaskKind,
    pub payload: JsonValue,
    pub priority: Priority,
    pub status: TaskStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    pub dequeued_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a new queued task with a fresh id
    pub fn new(kind: TaskKind, payload: JsonValue, priority: Priority) -> Self {
        Self {
            id: TaskId::new(),
            kind,
            payload,
            priority,
            status: TaskStatus::Queued,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            enqueued_at: Utc::now(),
            dequeued_at: None,
            completed_at: None,
            last_error: None,
            last_error_at: None,
        }
    }

    /// Build a task from a caller request
    pub fn from_request(request: TaskRequest, priority: Priority) -> Self {
        let mut task = Self::new(request.kind, request.payload, priority);
        if let Some(max_attempts) = request.max_attempts {
            task.max_attempts = max_attempts.max(1);
        }
        task
    }

    /// Sets the attempt budget
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Move to `next`, rejecting transitions the status machine forbids
    pub fn transition(&mut self, next: TaskStatus) -> Result<(), CoreError> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::InvalidTransition {
                task_id: self.id.to_string(),
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }

        let now = Utc::now();
        match next {
            TaskStatus::Running => self.dequeued_at = Some(now),
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => {
                self.completed_at = Some(now)
            }
            TaskStatus::Queued => self.dequeued_at = None,
        }
        self.status = next;
        Ok(())
    }

    /// Record a failed attempt
    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.attempts += 1;
        self.last_error = Some(error.into());
        self.last_error_at = Some(Utc::now());
    }

    /// Whether the attempt budget is used up
    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    pub fn is_running(&self) -> bool {
        self.status == TaskStatus::Running
    }

    pub fn is_done(&self) -> bool {
        self.status.is_terminal()
    }
}
