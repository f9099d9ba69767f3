//! Tracing subscriber setup for Lumen
//!
//! The coordinator logs to stdout in the configured format. Worker
//! processes must keep stdout free for the IPC stream, so they log to
//! stderr only. `log` records (from the cache crate) are bridged into the
//! same subscriber.

mod init;

pub use init::{build_env_filter, init_logging, init_simple_tracing, init_worker_tracing};
