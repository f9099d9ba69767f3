//! Worker-side runtime for Lumen
//!
//! A worker (child process or in-process task) runs [`WorkerRuntime`]: it
//! announces readiness, executes one task at a time through a
//! [`TaskHandler`], streams progress, honours cooperative cancellation and
//! drains its in-flight task before acknowledging shutdown.

pub mod error;
pub mod handler;
pub mod worker;

pub use error::RuntimeError;
pub use handler::{
    FnHandler, HandlerRegistry, ProgressReporter, TaskContext, TaskError, TaskHandler,
};
pub use worker::{worker_main, WorkerExit, WorkerRuntime};
