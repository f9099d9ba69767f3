//! Starting workers and wiring their message streams to a pool
//!
//! A launcher owns the transport. The pool hands it a command receiver, an
//! event sender and a kill token; the launcher forwards commands to the
//! worker, turns everything the worker writes into [`WorkerEvent`]s and
//! reports [`WorkerEventKind::Exited`] exactly once when the worker is gone.

use async_trait::async_trait;
use lumen_config::WorkerCommandConfig;
use lumen_ipc::{
    CoordinatorMessage, FramedReader, FramedWriter, IpcError, MessageSink, MessageSource,
    WorkerMessage,
};
use lumen_runtime::{TaskHandler, WorkerRuntime};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ExecutionError, Result};

/// Time a worker gets to exit after its stream closed or it was killed
const EXIT_GRACE: Duration = Duration::from_millis(500);

/// Something a worker said or did
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerEvent {
    pub worker_id: String,
    pub kind: WorkerEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEventKind {
    Message(CoordinatorMessage),
    /// The worker's stream closed; no further events follow
    Exited,
}

impl WorkerEvent {
    pub fn message(worker_id: impl Into<String>, message: CoordinatorMessage) -> Self {
        Self {
            worker_id: worker_id.into(),
            kind: WorkerEventKind::Message(message),
        }
    }

    pub fn exited(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            kind: WorkerEventKind::Exited,
        }
    }
}

/// Pool side of a worker's plumbing
#[derive(Debug)]
pub struct WorkerChannels {
    pub worker_id: String,
    /// Messages to deliver to the worker
    pub commands: mpsc::UnboundedReceiver<WorkerMessage>,
    /// Where worker output and the exit notice go
    pub events: mpsc::UnboundedSender<WorkerEvent>,
    /// Cancelled by the pool to terminate the worker immediately
    pub kill: CancellationToken,
}

/// Starts workers for a pool
#[async_trait]
pub trait WorkerLauncher: Send + Sync + 'static {
    /// Start a worker; returns its OS process id when it has one
    async fn launch(&self, channels: WorkerChannels) -> Result<Option<u32>>;
}

/// Forward commands into `sink` and worker output from `source` into `events`
///
/// Returns the reader task, which ends when the worker's output stream does.
fn attach<S, K>(
    worker_id: String,
    mut source: S,
    mut sink: K,
    mut commands: mpsc::UnboundedReceiver<WorkerMessage>,
    events: mpsc::UnboundedSender<WorkerEvent>,
) -> JoinHandle<()>
where
    S: MessageSource<CoordinatorMessage> + 'static,
    K: MessageSink<WorkerMessage> + 'static,
{
    let writer_id = worker_id.clone();
    tokio::spawn(async move {
        while let Some(message) = commands.recv().await {
            if let Err(e) = sink.send_message(message).await {
                match e {
                    IpcError::ConnectionClosed => {
                        debug!(worker_id = %writer_id, "Worker input closed (worker likely terminated)")
                    }
                    other => warn!(worker_id = %writer_id, error = %other, "Failed to write to worker"),
                }
                break;
            }
        }
        let _ = sink.close().await;
    });

    tokio::spawn(async move {
        loop {
            match source.receive().await {
                Ok(envelope) => {
                    if events
                        .send(WorkerEvent::message(&worker_id, envelope.message))
                        .is_err()
                    {
                        break;
                    }
                }
                Err(e) if e.is_recoverable() => {
                    warn!(worker_id = %worker_id, error = %e, "Discarding unparseable worker message");
                }
                Err(IpcError::ConnectionClosed) => {
                    debug!(worker_id = %worker_id, "Worker output closed");
                    break;
                }
                Err(e) => {
                    warn!(worker_id = %worker_id, error = %e, "Worker stream failed");
                    break;
                }
            }
        }
    })
}

/// Runs each worker as a child process speaking the protocol over stdio
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessLauncher {
    /// `program args.. --worker-id <id>` is executed for every worker
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn from_config(config: &WorkerCommandConfig) -> Result<Self> {
        let program = config.resolve_program().map_err(|e| {
            ExecutionError::Configuration(format!("Cannot resolve worker program: {}", e))
        })?;
        Ok(Self::new(program, config.args.clone()))
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(&self, channels: WorkerChannels) -> Result<Option<u32>> {
        let WorkerChannels {
            worker_id,
            commands,
            events,
            kill,
        } = channels;

        debug!(worker_id = %worker_id, program = %self.program.display(), "Spawning worker process");

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg("--worker-id")
            .arg(&worker_id)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ExecutionError::Spawn(format!(
                    "Failed to spawn {}: {}",
                    self.program.display(),
                    e
                ))
            })?;

        let pid = child.id();
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ExecutionError::Spawn("Failed to get worker stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExecutionError::Spawn("Failed to get worker stdout".to_string()))?;

        let mut reader = attach(
            worker_id.clone(),
            FramedReader::new(stdout),
            FramedWriter::new(stdin),
            commands,
            events.clone(),
        );

        info!(worker_id = %worker_id, pid = ?pid, "Worker process started");

        tokio::spawn(async move {
            tokio::select! {
                _ = &mut reader => {}
                _ = kill.cancelled() => {
                    debug!(worker_id = %worker_id, "Killing worker process");
                    if let Err(e) = child.start_kill() {
                        debug!(worker_id = %worker_id, error = %e, "Failed to kill worker process");
                    }
                    reader.abort();
                }
            }

            let waited = tokio::time::timeout(EXIT_GRACE, child.wait()).await;
            match waited {
                Ok(Ok(status)) => debug!(worker_id = %worker_id, status = %status, "Worker process exited"),
                Ok(Err(e)) => debug!(worker_id = %worker_id, error = %e, "Worker wait failed"),
                Err(_) => {
                    debug!(worker_id = %worker_id, "Worker didn't exit after closing its output, force killing");
                    let _ = child.kill().await;
                }
            }

            let _ = events.send(WorkerEvent::exited(worker_id));
        });

        Ok(pid)
    }
}

/// Runs each worker as a tokio task in this process
///
/// The worker still goes through the framed protocol, over an in-memory
/// duplex pipe, so it behaves exactly like a child process minus isolation.
pub struct InProcessLauncher<H> {
    handler: Arc<H>,
    buffer_size: usize,
}

impl<H: TaskHandler> InProcessLauncher<H> {
    pub fn new(handler: H) -> Self {
        Self::with_shared_handler(Arc::new(handler))
    }

    pub fn with_shared_handler(handler: Arc<H>) -> Self {
        Self {
            handler,
            buffer_size: 64 * 1024,
        }
    }
}

#[async_trait]
impl<H: TaskHandler> WorkerLauncher for InProcessLauncher<H> {
    async fn launch(&self, channels: WorkerChannels) -> Result<Option<u32>> {
        let WorkerChannels {
            worker_id,
            commands,
            events,
            kill,
        } = channels;

        let (coordinator_io, worker_io) = tokio::io::duplex(self.buffer_size);

        let (worker_read, worker_write) = tokio::io::split(worker_io);
        let runtime = WorkerRuntime::with_shared_handler(worker_id.clone(), self.handler.clone());
        let mut worker = tokio::spawn(
            runtime.run(FramedReader::new(worker_read), FramedWriter::new(worker_write)),
        );

        let (read, write) = tokio::io::split(coordinator_io);
        let mut reader = attach(
            worker_id.clone(),
            FramedReader::new(read),
            FramedWriter::new(write),
            commands,
            events.clone(),
        );

        tokio::spawn(async move {
            tokio::select! {
                _ = &mut reader => {}
                _ = kill.cancelled() => {
                    debug!(worker_id = %worker_id, "Stopping in-process worker");
                    worker.abort();
                    reader.abort();
                }
            }

            let finished = tokio::time::timeout(EXIT_GRACE, &mut worker).await;
            match finished {
                Ok(Ok(Ok(exit))) => debug!(worker_id = %worker_id, exit = ?exit, "In-process worker finished"),
                Ok(Ok(Err(e))) => warn!(worker_id = %worker_id, error = %e, "In-process worker failed"),
                Ok(Err(e)) if e.is_cancelled() => {}
                Ok(Err(e)) => warn!(worker_id = %worker_id, error = %e, "In-process worker panicked"),
                Err(_) => worker.abort(),
            }

            let _ = events.send(WorkerEvent::exited(worker_id));
        });

        Ok(None)
    }
}
