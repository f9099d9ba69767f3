//! Core domain models and types for Lumen
//!
//! This crate contains the task model shared by the queue, the worker pools
//! and the worker runtime, plus the typed payloads exchanged for the three
//! media-library operations. It has minimal dependencies and defines the
//! domain language of the job engine.

pub mod error;
pub mod payloads;
pub mod task;

// Re-export commonly used types at the crate root
pub use error::{CoreError, Result};
pub use payloads::{
    MediaFile, MediaMetadata, MetadataRequest, ScanRequest, ScanSummary, TaskPayload,
    ThumbnailRequest, ThumbnailResult,
};
pub use task::{Priority, Task, TaskId, TaskKind, TaskRequest, TaskStatus, DEFAULT_MAX_ATTEMPTS};
