//! Worker loop
//!
//! Reading, writing and task execution run as separate tokio tasks so a long
//! running handler never stops the worker from answering pings or seeing a
//! cancel request.

use chrono::{DateTime, Utc};
use lumen_core::{TaskId, TaskKind};
use lumen_ipc::{
    CoordinatorMessage, IpcError, MessageSink, MessageSource, TaskExecutionResult, WorkerError,
    WorkerMessage, WorkerStatus,
};
use parking_lot::Mutex;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::RuntimeError;
use crate::handler::{ProgressReporter, TaskContext, TaskError, TaskHandler};

/// How a worker loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// Shutdown was requested and acknowledged
    Shutdown,
    /// The coordinator closed the stream
    Disconnected,
    /// A handler reported an unrecoverable error; no reply was sent
    Fatal(String),
}

/// Worker entry point over this process's stdin/stdout
pub async fn worker_main<H: TaskHandler>(
    worker_id: String,
    handler: H,
) -> Result<WorkerExit, RuntimeError> {
    info!(worker_id = %worker_id, pid = std::process::id(), "Starting worker process");

    let (source, sink) = lumen_ipc::stdio();
    let exit = WorkerRuntime::new(worker_id.clone(), handler)
        .run(source, sink)
        .await?;

    info!(worker_id = %worker_id, exit = ?exit, "Worker process shutting down");
    Ok(exit)
}

struct RunningTask {
    task_id: TaskId,
    cancel: CancellationToken,
}

struct Finished {
    task_id: TaskId,
    started_at: DateTime<Utc>,
    outcome: Result<Result<JsonValue, TaskError>, JoinError>,
}

/// Worker runtime bound to one handler
pub struct WorkerRuntime<H> {
    worker_id: String,
    handler: Arc<H>,
    status: Arc<Mutex<WorkerStatus>>,
}

impl<H: TaskHandler> WorkerRuntime<H> {
    pub fn new(worker_id: impl Into<String>, handler: H) -> Self {
        Self::with_shared_handler(worker_id, Arc::new(handler))
    }

    pub fn with_shared_handler(worker_id: impl Into<String>, handler: Arc<H>) -> Self {
        let worker_id = worker_id.into();
        let status = WorkerStatus::new(worker_id.clone(), std::process::id());
        Self {
            worker_id,
            handler,
            status: Arc::new(Mutex::new(status)),
        }
    }

    /// Run until shutdown, disconnect or a fatal handler error
    pub async fn run<S, K>(self, mut source: S, mut sink: K) -> Result<WorkerExit, RuntimeError>
    where
        S: MessageSource<WorkerMessage> + 'static,
        K: MessageSink<CoordinatorMessage> + 'static,
    {
        sink.send_message(CoordinatorMessage::Ready {
            worker_id: self.worker_id.clone(),
        })
        .await?;
        debug!(worker_id = %self.worker_id, "Worker ready");

        let (outbox, mut outbox_rx) = mpsc::unbounded_channel::<CoordinatorMessage>();
        let writer = tokio::spawn(async move {
            while let Some(message) = outbox_rx.recv().await {
                if let Err(e) = sink.send_message(message).await {
                    error!(error = %e, "Failed to send message to coordinator");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let (inbox_tx, mut inbox) = mpsc::unbounded_channel::<Result<WorkerMessage, IpcError>>();
        let reader = tokio::spawn(async move {
            loop {
                match source.receive().await {
                    Ok(envelope) => {
                        if inbox_tx.send(Ok(envelope.message)).is_err() {
                            break;
                        }
                    }
                    Err(IpcError::DeserializationError(e)) => {
                        if inbox_tx.send(Err(IpcError::DeserializationError(e))).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = inbox_tx.send(Err(e));
                        break;
                    }
                }
            }
        });

        let (finished_tx, mut finished_rx) = mpsc::unbounded_channel::<Finished>();
        let mut running: Option<RunningTask> = None;
        let mut draining = false;

        let exit = loop {
            tokio::select! {
                incoming = inbox.recv() => {
                    match incoming {
                        Some(Ok(message)) => {
                            self.status.lock().update_activity();
                            match message {
                                WorkerMessage::ExecuteTask { task_id, kind, payload } => {
                                    if let Some(current) = &running {
                                        warn!(task_id = %task_id, running = %current.task_id, "Rejecting task, worker busy");
                                        let _ = outbox.send(CoordinatorMessage::Error {
                                            task_id: Some(task_id),
                                            error: WorkerError::Busy { running: current.task_id },
                                        });
                                    } else if draining {
                                        let now = Utc::now();
                                        let _ = outbox.send(CoordinatorMessage::TaskResult {
                                            task_id,
                                            result: TaskExecutionResult::failure(
                                                "Worker is shutting down".to_string(),
                                                None,
                                                now,
                                                now,
                                            ),
                                        });
                                    } else {
                                        running = Some(self.start_task(
                                            task_id,
                                            kind,
                                            payload,
                                            &outbox,
                                            &finished_tx,
                                        ));
                                    }
                                }
                                WorkerMessage::Cancel { task_id } => match &running {
                                    Some(current) if current.task_id == task_id => {
                                        debug!(task_id = %task_id, "Cancellation requested");
                                        current.cancel.cancel();
                                    }
                                    _ => debug!(task_id = %task_id, "Ignoring cancel for task not running here"),
                                },
                                WorkerMessage::Ping { correlation_id } => {
                                    let status = self.status.lock().clone();
                                    let _ = outbox.send(CoordinatorMessage::Pong {
                                        correlation_id,
                                        worker_id: self.worker_id.clone(),
                                        status,
                                    });
                                }
                                WorkerMessage::Shutdown => {
                                    info!(worker_id = %self.worker_id, "Received shutdown signal");
                                    draining = true;
                                    if running.is_none() {
                                        break WorkerExit::Shutdown;
                                    }
                                }
                            }
                        }
                        Some(Err(IpcError::DeserializationError(e))) => {
                            warn!(error = %e, "Unparseable message from coordinator");
                            let _ = outbox.send(CoordinatorMessage::Error {
                                task_id: None,
                                error: WorkerError::MessageParseError { error: e },
                            });
                        }
                        Some(Err(e)) => {
                            if !matches!(e, IpcError::ConnectionClosed) {
                                error!(error = %e, "Failed to receive message");
                            }
                            if let Some(current) = &running {
                                current.cancel.cancel();
                            }
                            break WorkerExit::Disconnected;
                        }
                        None => break WorkerExit::Disconnected,
                    }
                }
                Some(finished) = finished_rx.recv() => {
                    running = None;
                    match self.finish_task(finished) {
                        Ok(message) => {
                            let _ = outbox.send(message);
                        }
                        Err(reason) => break WorkerExit::Fatal(reason),
                    }
                    if draining {
                        break WorkerExit::Shutdown;
                    }
                }
            }
        };

        reader.abort();
        if exit == WorkerExit::Shutdown {
            let _ = outbox.send(CoordinatorMessage::ShutdownAck {
                worker_id: self.worker_id.clone(),
            });
        }

        // Flush queued frames before returning
        drop(outbox);
        drop(finished_tx);
        if let Err(e) = writer.await {
            warn!(error = %e, "Writer task ended abnormally");
        }

        Ok(exit)
    }

    fn start_task(
        &self,
        task_id: TaskId,
        kind: TaskKind,
        payload: JsonValue,
        outbox: &mpsc::UnboundedSender<CoordinatorMessage>,
        finished_tx: &mpsc::UnboundedSender<Finished>,
    ) -> RunningTask {
        debug!(task_id = %task_id, kind = %kind, "Executing task");
        self.status.lock().current_task = Some(task_id);

        let cancel = CancellationToken::new();
        let ctx = TaskContext::new(
            task_id,
            kind,
            ProgressReporter::new(task_id, outbox.clone()),
            cancel.clone(),
        );
        let started_at = Utc::now();

        let handler = Arc::clone(&self.handler);
        let execution = tokio::spawn(async move { handler.handle(kind, payload, ctx).await });

        let finished_tx = finished_tx.clone();
        tokio::spawn(async move {
            let outcome = execution.await;
            let _ = finished_tx.send(Finished {
                task_id,
                started_at,
                outcome,
            });
        });

        RunningTask { task_id, cancel }
    }

    /// Turn a finished execution into its reply, or `Err` on a fatal error
    fn finish_task(&self, finished: Finished) -> Result<CoordinatorMessage, String> {
        let Finished {
            task_id,
            started_at,
            outcome,
        } = finished;
        let completed_at = Utc::now();

        let result = match outcome {
            Ok(Ok(output)) => TaskExecutionResult::success(output, started_at, completed_at),
            Ok(Err(TaskError::Failed { message, details })) => {
                TaskExecutionResult::failure(message, details, started_at, completed_at)
            }
            Ok(Err(TaskError::Cancelled)) => TaskExecutionResult::failure(
                "Task cancelled".to_string(),
                Some(json!({ "cancelled": true })),
                started_at,
                completed_at,
            ),
            Ok(Err(TaskError::Fatal(reason))) => {
                error!(task_id = %task_id, reason = %reason, "Fatal task error, worker exiting");
                return Err(reason);
            }
            Err(join_error) => {
                let panic = WorkerError::WorkerPanic {
                    error: join_error.to_string(),
                    backtrace: None,
                };
                error!(task_id = %task_id, error = %panic, "Task handler panicked");
                TaskExecutionResult::failure(
                    panic.to_string(),
                    serde_json::to_value(&panic).ok(),
                    started_at,
                    completed_at,
                )
            }
        };

        self.status.lock().record_task_execution(result.success);
        debug!(
            task_id = %task_id,
            success = result.success,
            duration_ms = result.duration_ms,
            "Task finished"
        );
        Ok(CoordinatorMessage::TaskResult { task_id, result })
    }
}
