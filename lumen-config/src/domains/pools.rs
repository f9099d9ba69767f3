//! Worker pool configuration

use crate::error::ConfigResult;
use crate::validation::{validate_ordered, validate_positive, Validatable};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration of the three domain pools
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolsConfig {
    /// Directory scanning pool
    #[serde(default = "PoolConfig::scan_defaults")]
    pub scan: PoolConfig,

    /// Thumbnail extraction pool
    #[serde(default = "PoolConfig::thumbnail_defaults")]
    pub thumbnail: PoolConfig,

    /// Metadata probing pool
    #[serde(default = "PoolConfig::metadata_defaults")]
    pub metadata: PoolConfig,
}

/// Sizing and timing of a single worker pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Workers kept alive at all times
    #[serde(default = "default_min_workers")]
    pub min_workers: usize,

    /// Upper bound on live workers
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// How long a surplus worker may sit idle before it is evicted
    #[serde(with = "crate::domains::utils::serde_duration", default = "default_idle_timeout")]
    pub idle_timeout: Duration,

    /// Per-task deadline; zero disables it
    #[serde(with = "crate::domains::utils::serde_duration", default = "default_task_timeout")]
    pub task_timeout: Duration,

    /// Grace period for workers to acknowledge shutdown
    #[serde(with = "crate::domains::utils::serde_duration", default = "default_shutdown_timeout")]
    pub shutdown_timeout: Duration,

    /// How long a freshly spawned worker has to report ready
    #[serde(with = "crate::domains::utils::serde_duration", default = "default_ready_timeout")]
    pub ready_timeout: Duration,

    /// Longest a caller waits for a worker when the pool is saturated
    #[serde(with = "crate::domains::utils::serde_duration", default = "default_acquire_timeout")]
    pub acquire_timeout: Duration,

    /// Replacement spawns allowed per worker slot after faults
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
}

impl PoolConfig {
    /// Scanning is IO bound and rarely parallel
    pub fn scan_defaults() -> Self {
        Self {
            min_workers: 1,
            max_workers: 2,
            ..Self::default()
        }
    }

    /// Frame extraction is CPU bound
    pub fn thumbnail_defaults() -> Self {
        Self {
            min_workers: 1,
            max_workers: (num_cpus::get() / 2).clamp(1, 8),
            ..Self::default()
        }
    }

    pub fn metadata_defaults() -> Self {
        Self {
            min_workers: 1,
            max_workers: 4,
            ..Self::default()
        }
    }

    /// Task deadline, `None` when disabled
    pub fn task_deadline(&self) -> Option<Duration> {
        if self.task_timeout.is_zero() {
            None
        } else {
            Some(self.task_timeout)
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_workers: default_min_workers(),
            max_workers: default_max_workers(),
            idle_timeout: default_idle_timeout(),
            task_timeout: default_task_timeout(),
            shutdown_timeout: default_shutdown_timeout(),
            ready_timeout: default_ready_timeout(),
            acquire_timeout: default_acquire_timeout(),
            max_restarts: default_max_restarts(),
        }
    }
}

impl Default for PoolsConfig {
    fn default() -> Self {
        Self {
            scan: PoolConfig::scan_defaults(),
            thumbnail: PoolConfig::thumbnail_defaults(),
            metadata: PoolConfig::metadata_defaults(),
        }
    }
}

impl Validatable for PoolConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(self.max_workers, "max_workers", self.domain_name())?;
        validate_ordered(
            self.min_workers,
            self.max_workers,
            "min_workers",
            "max_workers",
            self.domain_name(),
        )?;
        validate_positive(
            self.ready_timeout.as_millis(),
            "ready_timeout",
            self.domain_name(),
        )?;
        validate_positive(
            self.acquire_timeout.as_millis(),
            "acquire_timeout",
            self.domain_name(),
        )?;
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "pools"
    }
}

impl Validatable for PoolsConfig {
    fn validate(&self) -> ConfigResult<()> {
        for (name, pool) in [
            ("scan", &self.scan),
            ("thumbnail", &self.thumbnail),
            ("metadata", &self.metadata),
        ] {
            pool.validate()
                .map_err(|e| self.validation_error(format!("{}: {}", name, e)))?;
            if pool.task_timeout.is_zero() {
                log::warn!("{} pool has task_timeout 0, tasks run without a deadline", name);
            }
        }
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "pools"
    }
}

// Default value functions
fn default_min_workers() -> usize {
    1
}

fn default_max_workers() -> usize {
    4
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_task_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_ready_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_acquire_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_max_restarts() -> u32 {
    3
}
