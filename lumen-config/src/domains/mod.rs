//! Domain-specific configuration modules

pub mod cache;
pub mod logging;
pub mod pools;
pub mod queue;
pub mod utils;
pub mod worker;

use crate::error::ConfigResult;
use crate::validation::Validatable;
use serde::{Deserialize, Serialize};

/// Main Lumen configuration combining all domains
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LumenConfig {
    /// Worker pool sizing and timeouts
    #[serde(default)]
    pub pools: pools::PoolsConfig,

    /// How worker processes are launched
    #[serde(default)]
    pub worker: worker::WorkerCommandConfig,

    /// Durable task queue
    #[serde(default)]
    pub queue: queue::QueueConfig,

    /// Cache registry
    #[serde(default)]
    pub cache: cache::CacheConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: logging::LoggingConfig,
}

impl LumenConfig {
    /// Validate all domain configurations
    pub fn validate_all(&self) -> ConfigResult<()> {
        self.pools.validate()?;
        self.worker.validate()?;
        self.queue.validate()?;
        self.cache.validate()?;
        self.logging.validate()?;
        Ok(())
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let config = LumenConfig::default();
        serde_yaml::to_string(&config)
            .unwrap_or_else(|_| "# Failed to generate sample config".to_string())
    }
}
