//! Runtime error types

use lumen_ipc::IpcError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("IPC error: {0}")]
    Ipc(#[from] IpcError),

    #[error("Worker initialization failed: {0}")]
    Initialization(String),
}
