//! Configuration loading and environment variable handling

use crate::domains::logging::{LogFormat, LogLevel};
use crate::domains::LumenConfig;
use crate::error::{ConfigError, ConfigResult};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    /// Environment variable prefix
    prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader with default prefix
    pub fn new() -> Self {
        Self {
            prefix: "LUMEN".to_string(),
        }
    }

    /// Create a new config loader with custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Load configuration from a YAML file with environment overrides
    pub fn from_file(&self, path: impl AsRef<Path>) -> ConfigResult<LumenConfig> {
        let path = path.as_ref();
        log::debug!("Loading configuration from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        self.from_yaml(&content)
    }

    /// Parse YAML text, then apply environment overrides and validate
    pub fn from_yaml(&self, content: &str) -> ConfigResult<LumenConfig> {
        let mut config: LumenConfig = if content.trim().is_empty() {
            LumenConfig::default()
        } else {
            serde_yaml::from_str(content)?
        };

        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env(&self) -> ConfigResult<LumenConfig> {
        let mut config = LumenConfig::default();
        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load configuration with fallback chain
    pub fn load(&self, config_path: Option<impl AsRef<Path>>) -> ConfigResult<LumenConfig> {
        match config_path {
            Some(path) => self.from_file(path),
            None => self.from_env(),
        }
    }

    /// Apply environment variable overrides to configuration
    fn apply_env_overrides(&self, config: &mut LumenConfig) -> ConfigResult<()> {
        self.apply_logging_overrides(config)?;
        self.apply_queue_overrides(config)?;
        self.apply_pool_overrides(config)?;
        Ok(())
    }

    fn apply_logging_overrides(&self, config: &mut LumenConfig) -> ConfigResult<()> {
        if let Ok(log_level) = self.get_env_var("LOG_LEVEL") {
            config.logging.level = LogLevel::from_str(&log_level)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_LEVEL: {}", log_level)))?;
        }

        if let Ok(format) = self.get_env_var("LOG_FORMAT") {
            config.logging.format = LogFormat::from_str(&format)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_FORMAT: {}", format)))?;
        }

        Ok(())
    }

    fn apply_queue_overrides(&self, config: &mut LumenConfig) -> ConfigResult<()> {
        if let Some(max_size) = self.parse_env_var::<usize>("QUEUE_MAX_SIZE")? {
            config.queue.max_size = max_size;
        }

        if let Ok(path) = self.get_env_var("QUEUE_PERSISTENCE_PATH") {
            config.queue.persistence_path = Some(PathBuf::from(path));
        }

        if let Some(seconds) = self.parse_env_var::<u64>("QUEUE_SAVE_INTERVAL")? {
            config.queue.save_interval = Duration::from_secs(seconds);
        }

        Ok(())
    }

    fn apply_pool_overrides(&self, config: &mut LumenConfig) -> ConfigResult<()> {
        if let Some(max) = self.parse_env_var::<usize>("SCAN_MAX_WORKERS")? {
            config.pools.scan.max_workers = max;
        }

        if let Some(max) = self.parse_env_var::<usize>("THUMBNAIL_MAX_WORKERS")? {
            config.pools.thumbnail.max_workers = max;
        }

        if let Some(max) = self.parse_env_var::<usize>("METADATA_MAX_WORKERS")? {
            config.pools.metadata.max_workers = max;
        }

        if let Some(seconds) = self.parse_env_var::<u64>("TASK_TIMEOUT")? {
            let timeout = Duration::from_secs(seconds);
            config.pools.scan.task_timeout = timeout;
            config.pools.thumbnail.task_timeout = timeout;
            config.pools.metadata.task_timeout = timeout;
        }

        Ok(())
    }

    /// Get environment variable with prefix
    fn get_env_var(&self, name: &str) -> Result<String, std::env::VarError> {
        let key = format!("{}_{}", self.prefix, name);
        let value = std::env::var(&key)?;
        log::debug!("Applying environment override {}", key);
        Ok(value)
    }

    fn parse_env_var<T>(&self, name: &str) -> ConfigResult<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get_env_var(name) {
            Ok(raw) => raw
                .trim()
                .parse()
                .map(Some)
                .map_err(|e| ConfigError::EnvError(format!("Invalid {}: {}", name, e))),
            Err(_) => Ok(None),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
