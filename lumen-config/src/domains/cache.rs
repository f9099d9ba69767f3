//! Caching configuration

use crate::error::ConfigResult;
use crate::validation::{validate_positive, validate_required_string, Validatable};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Cache registry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Period of the expired-entry sweep
    #[serde(with = "crate::domains::utils::serde_duration", default = "default_sweep_interval")]
    pub sweep_interval: Duration,

    /// TTL used by namespaces created on the fly
    #[serde(with = "crate::domains::utils::serde_duration", default = "default_ttl")]
    pub default_ttl: Duration,

    /// Capacity used by namespaces created on the fly
    #[serde(default = "default_max_size")]
    pub default_max_size: usize,

    /// Namespaces created up front
    #[serde(default = "default_namespaces")]
    pub namespaces: BTreeMap<String, NamespaceConfig>,
}

/// TTL and capacity of one cache namespace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamespaceConfig {
    #[serde(with = "crate::domains::utils::serde_duration", default = "default_ttl")]
    pub ttl: Duration,

    #[serde(default = "default_max_size")]
    pub max_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            sweep_interval: default_sweep_interval(),
            default_ttl: default_ttl(),
            default_max_size: default_max_size(),
            namespaces: default_namespaces(),
        }
    }
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            ttl: default_ttl(),
            max_size: default_max_size(),
        }
    }
}

impl Validatable for CacheConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(
            self.sweep_interval.as_millis(),
            "sweep_interval",
            self.domain_name(),
        )?;
        validate_positive(self.default_max_size, "default_max_size", self.domain_name())?;

        for (name, namespace) in &self.namespaces {
            validate_required_string(name, "namespace name", self.domain_name())?;
            validate_positive(
                namespace.max_size,
                &format!("namespaces.{}.max_size", name),
                self.domain_name(),
            )?;
        }
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "cache"
    }
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_ttl() -> Duration {
    Duration::from_secs(300)
}

fn default_max_size() -> usize {
    500
}

fn default_namespaces() -> BTreeMap<String, NamespaceConfig> {
    let mut namespaces = BTreeMap::new();
    namespaces.insert(
        "tags".to_string(),
        NamespaceConfig {
            ttl: Duration::from_secs(600),
            max_size: 1000,
        },
    );
    namespaces.insert(
        "categories".to_string(),
        NamespaceConfig {
            ttl: Duration::from_secs(600),
            max_size: 200,
        },
    );
    namespaces
}
