//! Inter-process communication for Lumen
//!
//! This crate provides the message protocol spoken between the coordinator
//! and its workers, and the newline-delimited JSON framing that carries it
//! over any tokio byte stream (child process stdio or an in-memory duplex).

pub mod error;
pub mod protocol;
pub mod transport;

// Re-export commonly used types
pub use error::IpcError;
pub use protocol::{
    CoordinatorMessage, MessageEnvelope, TaskExecutionResult, WorkerError, WorkerMessage,
    WorkerStatus, IPC_PROTOCOL_VERSION,
};
pub use transport::{stdio, FramedReader, FramedWriter, MessageSink, MessageSource};
