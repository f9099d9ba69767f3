//! Durable priority task queue for Lumen
//!
//! Four FIFO buckets (critical, high, normal, low) drained in strict
//! priority order, an index of every queued or running task, retry by
//! priority demotion, and a JSON snapshot of the backlog that survives
//! restarts.

pub mod error;
pub mod queue;
pub mod snapshot;

pub use error::{QueueError, Result};
pub use queue::{FailOutcome, QueueStats, TaskQueue};
pub use snapshot::{QueueSnapshot, SnapshotStore, SNAPSHOT_VERSION};
