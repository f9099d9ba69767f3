//! Configuration validation traits and utilities

use crate::error::{ConfigError, ConfigResult};

/// Trait for validatable configuration
pub trait Validatable {
    /// Validate the configuration
    fn validate(&self) -> ConfigResult<()>;

    /// Get the domain name for error reporting
    fn domain_name(&self) -> &'static str;

    /// Helper to create a domain-specific validation error
    fn validation_error(&self, message: impl Into<String>) -> ConfigError {
        ConfigError::DomainError {
            domain: self.domain_name().to_string(),
            message: message.into(),
        }
    }
}

/// Validate a required string field
pub fn validate_required_string(value: &str, field_name: &str, domain: &str) -> ConfigResult<()> {
    if value.trim().is_empty() {
        return Err(ConfigError::DomainError {
            domain: domain.to_string(),
            message: format!("{} cannot be empty", field_name),
        });
    }
    Ok(())
}

/// Validate a positive number
pub fn validate_positive<T>(value: T, field_name: &str, domain: &str) -> ConfigResult<()>
where
    T: PartialOrd + Default + std::fmt::Display,
{
    if value <= T::default() {
        return Err(ConfigError::DomainError {
            domain: domain.to_string(),
            message: format!("{} must be greater than 0, got {}", field_name, value),
        });
    }
    Ok(())
}

/// Validate that `lower` does not exceed `upper`
pub fn validate_ordered<T>(
    lower: T,
    upper: T,
    lower_name: &str,
    upper_name: &str,
    domain: &str,
) -> ConfigResult<()>
where
    T: PartialOrd + std::fmt::Display,
{
    if lower > upper {
        return Err(ConfigError::DomainError {
            domain: domain.to_string(),
            message: format!(
                "{} ({}) cannot exceed {} ({})",
                lower_name, lower, upper_name, upper
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_positive() {
        assert!(validate_positive(1usize, "max_workers", "pools.scan").is_ok());

        let err = validate_positive(0usize, "max_workers", "pools.scan").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Domain configuration error in pools.scan: max_workers must be greater than 0, got 0"
        );
    }

    #[test]
    fn test_validate_ordered() {
        assert!(validate_ordered(2, 2, "min_workers", "max_workers", "pools").is_ok());
        assert!(validate_ordered(3, 2, "min_workers", "max_workers", "pools").is_err());
    }

    #[test]
    fn test_validate_required_string() {
        assert!(validate_required_string("tags", "namespace", "cache").is_ok());
        assert!(validate_required_string("  ", "namespace", "cache").is_err());
    }
}
