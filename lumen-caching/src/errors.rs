//! Cache error types

use thiserror::Error;

/// Result type for cache operations
pub type CacheResult<T> = std::result::Result<T, CacheError>;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Invalid cache configuration: {0}")]
    InvalidConfiguration(String),

    /// An invalidation pattern did not compile
    #[error("Invalid key pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() {
            CacheError::DeserializationError(err.to_string())
        } else {
            CacheError::SerializationError(err.to_string())
        }
    }
}

impl From<lumen_config::ConfigError> for CacheError {
    fn from(err: lumen_config::ConfigError) -> Self {
        CacheError::InvalidConfiguration(err.to_string())
    }
}
