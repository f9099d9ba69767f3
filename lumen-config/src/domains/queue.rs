//! Task queue configuration

use crate::error::ConfigResult;
use crate::validation::{validate_positive, Validatable};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// File name of the snapshot under the platform data directory
pub const DEFAULT_SNAPSHOT_FILE: &str = "task-queue.json";

/// Priority task queue configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Capacity counted over queued and running tasks
    #[serde(default = "default_max_size")]
    pub max_size: usize,

    /// Attempts allowed per task before it fails for good
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Whether the backlog is snapshotted to disk
    #[serde(default = "crate::domains::utils::default_true")]
    pub persistence_enabled: bool,

    /// Snapshot location; `<data_local_dir>/lumen/task-queue.json` when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistence_path: Option<PathBuf>,

    /// Period of the background snapshot
    #[serde(with = "crate::domains::utils::serde_duration", default = "default_save_interval")]
    pub save_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
            max_attempts: default_max_attempts(),
            persistence_enabled: true,
            persistence_path: None,
            save_interval: default_save_interval(),
        }
    }
}

impl QueueConfig {
    /// Configuration without any disk persistence
    pub fn in_memory() -> Self {
        Self {
            persistence_enabled: false,
            ..Self::default()
        }
    }

    /// Where snapshots are written, or `None` when persistence is off
    pub fn resolved_persistence_path(&self) -> Option<PathBuf> {
        if !self.persistence_enabled {
            return None;
        }
        match &self.persistence_path {
            Some(path) => Some(path.clone()),
            None => dirs::data_local_dir().map(|dir| dir.join("lumen").join(DEFAULT_SNAPSHOT_FILE)),
        }
    }
}

impl Validatable for QueueConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(self.max_size, "max_size", self.domain_name())?;
        validate_positive(self.max_attempts, "max_attempts", self.domain_name())?;
        if self.persistence_enabled {
            validate_positive(
                self.save_interval.as_secs(),
                "save_interval",
                self.domain_name(),
            )?;
        }
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "queue"
    }
}

fn default_max_size() -> usize {
    10_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_save_interval() -> Duration {
    Duration::from_secs(30)
}
