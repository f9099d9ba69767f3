//! Typed front ends over the domain pools

use lumen_core::{
    MediaMetadata, MetadataRequest, Priority, ScanRequest, ScanSummary, Task, TaskPayload,
    ThumbnailRequest, ThumbnailResult,
};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::Result;
use crate::pool::{TaskProgress, WorkerPool};

/// Build the task for `request`, run it on `pool` and decode its output
async fn run_typed<R, O>(
    pool: &WorkerPool,
    request: &R,
    progress: Option<mpsc::UnboundedSender<TaskProgress>>,
) -> Result<O>
where
    R: TaskPayload,
    O: DeserializeOwned,
{
    let task = Task::new(R::KIND, request.to_payload()?, Priority::Normal);
    debug!(pool = %pool.name(), task_id = %task.id, kind = %task.kind, "Running task directly");

    let output = match progress {
        Some(progress) => pool.execute_task_with_progress(&task, progress).await?,
        None => pool.execute_task(&task).await?,
    };
    Ok(serde_json::from_value(output)?)
}

/// Directory scanning
#[derive(Debug, Clone)]
pub struct ScanManager {
    pool: WorkerPool,
}

impl ScanManager {
    pub fn new(pool: WorkerPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub async fn scan_directory(&self, request: ScanRequest) -> Result<ScanSummary> {
        run_typed(&self.pool, &request, None).await
    }
}

/// Frame extraction
#[derive(Debug, Clone)]
pub struct ThumbnailManager {
    pool: WorkerPool,
}

impl ThumbnailManager {
    pub fn new(pool: WorkerPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub async fn generate(&self, request: ThumbnailRequest) -> Result<ThumbnailResult> {
        run_typed(&self.pool, &request, None).await
    }

    /// Generate a thumbnail, forwarding the worker's progress reports
    pub async fn generate_with_progress(
        &self,
        request: ThumbnailRequest,
        progress: mpsc::UnboundedSender<TaskProgress>,
    ) -> Result<ThumbnailResult> {
        run_typed(&self.pool, &request, Some(progress)).await
    }
}

/// Media probing
#[derive(Debug, Clone)]
pub struct MetadataManager {
    pool: WorkerPool,
}

impl MetadataManager {
    pub fn new(pool: WorkerPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub async fn extract(&self, request: MetadataRequest) -> Result<MediaMetadata> {
        run_typed(&self.pool, &request, None).await
    }
}
