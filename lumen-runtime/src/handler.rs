//! Task handler trait and the context handed to each execution

use async_trait::async_trait;
use lumen_core::{TaskId, TaskKind};
use lumen_ipc::CoordinatorMessage;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Why a task did not produce output
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TaskError {
    /// Ordinary failure, reported to the coordinator as a failed result
    #[error("{message}")]
    Failed {
        message: String,
        details: Option<JsonValue>,
    },

    /// The handler observed its cancellation token and stopped early
    #[error("Task cancelled")]
    Cancelled,

    /// The worker can no longer be trusted; it exits without replying
    #[error("Fatal worker error: {0}")]
    Fatal(String),
}

impl TaskError {
    pub fn failed(message: impl Into<String>) -> Self {
        TaskError::Failed {
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(message: impl Into<String>, details: JsonValue) -> Self {
        TaskError::Failed {
            message: message.into(),
            details: Some(details),
        }
    }
}

impl From<std::io::Error> for TaskError {
    fn from(err: std::io::Error) -> Self {
        TaskError::failed(err.to_string())
    }
}

impl From<serde_json::Error> for TaskError {
    fn from(err: serde_json::Error) -> Self {
        TaskError::failed(format!("Invalid payload: {}", err))
    }
}

/// Sends progress updates for one task back to the coordinator
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    task_id: TaskId,
    outbox: mpsc::UnboundedSender<CoordinatorMessage>,
}

impl ProgressReporter {
    pub(crate) fn new(task_id: TaskId, outbox: mpsc::UnboundedSender<CoordinatorMessage>) -> Self {
        Self { task_id, outbox }
    }

    /// Report progress; silently dropped once the worker is going away
    pub fn report(&self, progress: JsonValue) {
        let _ = self.outbox.send(CoordinatorMessage::TaskProgress {
            task_id: self.task_id,
            progress,
        });
    }
}

/// Per-execution context
#[derive(Debug, Clone)]
pub struct TaskContext {
    task_id: TaskId,
    kind: TaskKind,
    progress: ProgressReporter,
    cancel: CancellationToken,
}

impl TaskContext {
    pub(crate) fn new(
        task_id: TaskId,
        kind: TaskKind,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            task_id,
            kind,
            progress,
            cancel,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn report_progress(&self, progress: JsonValue) {
        self.progress.report(progress);
    }

    pub fn progress(&self) -> &ProgressReporter {
        &self.progress
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the coordinator asks to cancel this task
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// `Err(TaskError::Cancelled)` if cancellation was requested
    pub fn check_cancelled(&self) -> Result<(), TaskError> {
        if self.is_cancelled() {
            Err(TaskError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// The work a worker performs for a task kind
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    async fn handle(
        &self,
        kind: TaskKind,
        payload: JsonValue,
        ctx: TaskContext,
    ) -> Result<JsonValue, TaskError>;

    /// Whether this handler knows `kind`
    fn supports(&self, _kind: TaskKind) -> bool {
        true
    }
}

/// Routes each task kind to its own handler
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskKind, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, kind: TaskKind, handler: impl TaskHandler) -> Self {
        self.handlers.insert(kind, Arc::new(handler));
        self
    }

    pub fn kinds(&self) -> Vec<TaskKind> {
        self.handlers.keys().copied().collect()
    }
}

#[async_trait]
impl TaskHandler for HandlerRegistry {
    async fn handle(
        &self,
        kind: TaskKind,
        payload: JsonValue,
        ctx: TaskContext,
    ) -> Result<JsonValue, TaskError> {
        match self.handlers.get(&kind) {
            Some(handler) => handler.handle(kind, payload, ctx).await,
            None => Err(TaskError::failed(format!("No handler for task kind: {}", kind))),
        }
    }

    fn supports(&self, kind: TaskKind) -> bool {
        self.handlers.contains_key(&kind)
    }
}

/// Adapts an async closure into a [`TaskHandler`]
pub struct FnHandler<F> {
    f: F,
}

impl<F, Fut> FnHandler<F>
where
    F: Fn(TaskKind, JsonValue, TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<JsonValue, TaskError>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(TaskKind, JsonValue, TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<JsonValue, TaskError>> + Send + 'static,
{
    async fn handle(
        &self,
        kind: TaskKind,
        payload: JsonValue,
        ctx: TaskContext,
    ) -> Result<JsonValue, TaskError> {
        (self.f)(kind, payload, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context(kind: TaskKind) -> (TaskContext, mpsc::UnboundedReceiver<CoordinatorMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task_id = TaskId::new();
        let ctx = TaskContext::new(
            task_id,
            kind,
            ProgressReporter::new(task_id, tx),
            CancellationToken::new(),
        );
        (ctx, rx)
    }

    #[tokio::test]
    async fn test_registry_routes_by_kind() {
        let registry = HandlerRegistry::new().register(
            TaskKind::ExtractMetadata,
            FnHandler::new(|_, payload, _| async move { Ok(json!({ "echo": payload })) }),
        );

        assert!(registry.supports(TaskKind::ExtractMetadata));
        assert!(!registry.supports(TaskKind::ScanDirectory));

        let (ctx, _rx) = context(TaskKind::ExtractMetadata);
        let output = registry
            .handle(TaskKind::ExtractMetadata, json!(1), ctx)
            .await
            .unwrap();
        assert_eq!(output, json!({"echo": 1}));

        let (ctx, _rx) = context(TaskKind::ScanDirectory);
        let err = registry
            .handle(TaskKind::ScanDirectory, json!({}), ctx)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            TaskError::failed("No handler for task kind: scan-directory")
        );
    }

    #[tokio::test]
    async fn test_progress_and_cancellation() {
        let (ctx, mut rx) = context(TaskKind::GenerateThumbnail);

        ctx.report_progress(json!({"percent": 10}));
        match rx.recv().await.unwrap() {
            CoordinatorMessage::TaskProgress { task_id, progress } => {
                assert_eq!(task_id, ctx.task_id());
                assert_eq!(progress, json!({"percent": 10}));
            }
            other => panic!("unexpected message: {:?}", other),
        }

        assert!(ctx.check_cancelled().is_ok());
        ctx.cancellation_token().cancel();
        ctx.cancelled().await;
        assert_eq!(ctx.check_cancelled(), Err(TaskError::Cancelled));
    }

    #[test]
    fn test_payload_errors_are_task_failures() {
        let err: TaskError = serde_json::from_str::<u32>("\"x\"").unwrap_err().into();
        assert!(matches!(err, TaskError::Failed { ref message, .. } if message.starts_with("Invalid payload")));
    }
}
