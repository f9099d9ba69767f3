//! Domain-driven configuration management for Lumen
//!
//! This crate provides configuration split by functional domain (worker
//! pools, task queue, cache, logging), with validation, defaults, YAML
//! loading and environment variable overrides.

pub mod domains;
pub mod error;
pub mod loader;
pub mod validation;

// Re-export main types
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use validation::Validatable;

// Re-export domain configurations
pub use domains::{
    cache::{CacheConfig, NamespaceConfig},
    logging::{LogFormat, LogLevel, LoggingConfig},
    pools::{PoolConfig, PoolsConfig},
    queue::QueueConfig,
    worker::WorkerCommandConfig,
    LumenConfig,
};

// Re-export utilities
pub use domains::utils::serde_duration;
