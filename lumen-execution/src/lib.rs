//! Task execution for Lumen
//!
//! Elastic [`WorkerPool`]s run tasks on workers started by a
//! [`WorkerLauncher`]: child processes in production, in-process tasks in
//! tests and embedded use. The [`Coordinator`] ties a durable
//! [`lumen_queue::TaskQueue`] to one pool per domain (scan, thumbnail,
//! metadata), and the managers offer typed calls that bypass the queue.

pub mod coordinator;
pub mod error;
pub mod launcher;
pub mod managers;
pub mod pool;

pub use coordinator::{Coordinator, CoordinatorStatus, ProcessedTask, TaskOutcome};
pub use error::{ExecutionError, Result};
pub use launcher::{
    InProcessLauncher, ProcessLauncher, WorkerChannels, WorkerEvent, WorkerEventKind,
    WorkerLauncher,
};
pub use managers::{MetadataManager, ScanManager, ThumbnailManager};
pub use pool::{PoolStatus, TaskProgress, WorkerInfo, WorkerPool, WorkerState};
