//! On-disk snapshot of the queue backlog

use chrono::{DateTime, Utc};
use lumen_core::{Priority, Task};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::Result;

/// Format version written into every snapshot
pub const SNAPSHOT_VERSION: u32 = 1;

/// Per-priority task lists, each in dequeue order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    #[serde(default)]
    pub critical: Vec<Task>,
    #[serde(default)]
    pub high: Vec<Task>,
    #[serde(default)]
    pub normal: Vec<Task>,
    #[serde(default)]
    pub low: Vec<Task>,
}

impl QueueSnapshot {
    pub fn new() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            ..Default::default()
        }
    }

    pub fn bucket(&self, priority: Priority) -> &[Task] {
        match priority {
            Priority::Critical => &self.critical,
            Priority::High => &self.high,
            Priority::Normal => &self.normal,
            Priority::Low => &self.low,
        }
    }

    pub fn bucket_mut(&mut self, priority: Priority) -> &mut Vec<Task> {
        match priority {
            Priority::Critical => &mut self.critical,
            Priority::High => &mut self.high,
            Priority::Normal => &mut self.normal,
            Priority::Low => &mut self.low,
        }
    }

    /// Tasks across all buckets, highest priority first
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        Priority::DESCENDING
            .into_iter()
            .flat_map(move |priority| self.bucket(priority).iter())
    }

    pub fn len(&self) -> usize {
        self.critical.len() + self.high.len() + self.normal.len() + self.low.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Reads and atomically replaces a snapshot file
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the snapshot, `None` when no file exists yet
    pub async fn load(&self) -> Result<Option<QueueSnapshot>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let snapshot: QueueSnapshot = serde_json::from_slice(&bytes)?;
        debug!(
            path = %self.path.display(),
            tasks = snapshot.len(),
            saved_at = %snapshot.saved_at,
            "Read queue snapshot"
        );
        Ok(Some(snapshot))
    }

    /// Write to a sibling temp file, then rename over the target
    pub async fn save(&self, snapshot: &QueueSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let bytes = serde_json::to_vec_pretty(snapshot)?;
        let temp_path = self.temp_path();
        tokio::fs::write(&temp_path, &bytes).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;

        debug!(path = %self.path.display(), tasks = snapshot.len(), "Wrote queue snapshot");
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "task-queue.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
