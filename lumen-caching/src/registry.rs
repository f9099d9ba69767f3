//! Named caches sharing one configuration and lifecycle

use lumen_config::{CacheConfig, NamespaceConfig, Validatable};
use log::{debug, info};
use parking_lot::RwLock;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::errors::CacheResult;
use crate::stats::CacheStats;
use crate::store::TtlLruCache;

/// Per-namespace counters plus their sum
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub namespaces: BTreeMap<String, CacheStats>,
    pub totals: CacheStats,
}

/// Set of JSON caches keyed by namespace (`tags`, `categories`, ...)
///
/// Namespaces listed in the configuration exist from the start; any other
/// name is created with the default TTL and size on first write.
pub struct CacheRegistry {
    config: CacheConfig,
    namespaces: RwLock<HashMap<String, Arc<TtlLruCache<JsonValue>>>>,
    sweeping: AtomicBool,
}

impl CacheRegistry {
    pub fn new(config: CacheConfig) -> CacheResult<Self> {
        config.validate()?;

        let mut namespaces = HashMap::new();
        for (name, namespace) in &config.namespaces {
            namespaces.insert(name.clone(), Arc::new(Self::build(namespace)?));
        }
        debug!("Cache registry created with {} namespaces", namespaces.len());

        Ok(Self {
            config,
            namespaces: RwLock::new(namespaces),
            sweeping: AtomicBool::new(false),
        })
    }

    fn build(namespace: &NamespaceConfig) -> CacheResult<TtlLruCache<JsonValue>> {
        TtlLruCache::new(namespace.max_size, namespace.ttl)
    }

    /// Start the periodic expiry sweep of every namespace, current and future
    pub fn start_sweeping(&self) {
        self.sweeping.store(true, Ordering::SeqCst);
        let interval = self.config.sweep_interval;
        for cache in self.namespaces.read().values() {
            cache.start_sweeper(interval);
        }
        info!("Cache sweep started every {:?}", interval);
    }

    /// The namespace's cache, created with defaults when unknown
    pub fn namespace(&self, name: &str) -> CacheResult<Arc<TtlLruCache<JsonValue>>> {
        if let Some(cache) = self.namespaces.read().get(name) {
            return Ok(cache.clone());
        }

        let mut namespaces = self.namespaces.write();
        if let Some(cache) = namespaces.get(name) {
            return Ok(cache.clone());
        }

        let cache = Arc::new(Self::build(&NamespaceConfig {
            ttl: self.config.default_ttl,
            max_size: self.config.default_max_size,
        })?);
        if self.sweeping.load(Ordering::SeqCst) {
            cache.start_sweeper(self.config.sweep_interval);
        }
        debug!("Created cache namespace '{}'", name);
        namespaces.insert(name.to_string(), cache.clone());
        Ok(cache)
    }

    fn existing(&self, name: &str) -> Option<Arc<TtlLruCache<JsonValue>>> {
        self.namespaces.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.namespaces.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn get(&self, namespace: &str, key: &str) -> Option<JsonValue> {
        self.existing(namespace)?.get(key)
    }

    pub fn set(
        &self,
        namespace: &str,
        key: impl Into<String>,
        value: JsonValue,
        ttl: Option<Duration>,
    ) -> CacheResult<()> {
        self.namespace(namespace)?.set(key, value, ttl);
        Ok(())
    }

    /// Typed read; an entry that does not decode as `T` is an error
    pub fn get_as<T: DeserializeOwned>(&self, namespace: &str, key: &str) -> CacheResult<Option<T>> {
        match self.get(namespace, key) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub fn set_as<T: Serialize>(
        &self,
        namespace: &str,
        key: impl Into<String>,
        value: &T,
        ttl: Option<Duration>,
    ) -> CacheResult<()> {
        self.set(namespace, key, serde_json::to_value(value)?, ttl)
    }

    pub fn delete(&self, namespace: &str, key: &str) -> bool {
        self.existing(namespace)
            .is_some_and(|cache| cache.delete(key))
    }

    /// Pattern invalidation within one namespace
    pub fn invalidate(&self, namespace: &str, pattern: &str) -> CacheResult<usize> {
        match self.existing(namespace) {
            Some(cache) => cache.invalidate(pattern),
            None => Ok(0),
        }
    }

    pub fn invalidate_regex(&self, namespace: &str, regex: &Regex) -> usize {
        self.existing(namespace)
            .map_or(0, |cache| cache.invalidate_regex(regex))
    }

    /// Empty every namespace; returns the number of live entries dropped
    pub fn invalidate_all(&self) -> usize {
        let namespaces = self.namespaces.read();
        let mut removed = 0;
        for cache in namespaces.values() {
            removed += cache.len();
            cache.clear();
        }
        info!("Invalidated all caches ({} entries)", removed);
        removed
    }

    pub fn stats(&self) -> RegistryStats {
        let namespaces: BTreeMap<String, CacheStats> = self
            .namespaces
            .read()
            .iter()
            .map(|(name, cache)| (name.clone(), cache.stats()))
            .collect();

        let mut totals = CacheStats::default();
        for stats in namespaces.values() {
            totals.accumulate(stats);
        }
        RegistryStats { namespaces, totals }
    }

    pub fn reset_stats(&self) {
        for cache in self.namespaces.read().values() {
            cache.reset_stats();
        }
    }

    /// Stop every sweep and drop all namespaces
    pub fn destroy(&self) {
        self.sweeping.store(false, Ordering::SeqCst);
        let mut namespaces = self.namespaces.write();
        for cache in namespaces.values() {
            cache.stop_sweeper();
            cache.clear();
        }
        namespaces.clear();
        info!("Cache registry destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> CacheRegistry {
        CacheRegistry::new(CacheConfig::default()).unwrap()
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Tag {
        id: u32,
        name: String,
    }

    #[test]
    fn test_default_namespaces() {
        let registry = registry();
        assert_eq!(registry.names(), vec!["categories", "tags"]);
        assert_eq!(registry.namespace("tags").unwrap().capacity(), 1000);
        assert_eq!(registry.namespace("categories").unwrap().capacity(), 200);
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let registry = registry();
        registry.set("tags", "1", json!("drama"), None).unwrap();
        registry.set("categories", "1", json!("films"), None).unwrap();

        assert_eq!(registry.get("tags", "1"), Some(json!("drama")));
        assert_eq!(registry.get("categories", "1"), Some(json!("films")));
        assert_eq!(registry.invalidate("tags", "*").unwrap(), 1);
        assert_eq!(registry.get("tags", "1"), None);
        assert_eq!(registry.get("categories", "1"), Some(json!("films")));

        let regex = Regex::new("^1$").unwrap();
        assert_eq!(registry.invalidate_regex("categories", &regex), 1);
        assert!(!registry.delete("categories", "1"));
    }

    #[tokio::test]
    async fn test_unknown_namespace_created_on_write() {
        let registry = registry();
        assert_eq!(registry.get("people", "x"), None);
        assert_eq!(registry.invalidate("people", "*").unwrap(), 0);
        assert!(!registry.names().contains(&"people".to_string()));

        registry.set("people", "x", json!(1), None).unwrap();
        let people = registry.namespace("people").unwrap();
        assert_eq!(people.capacity(), 500);
        assert_eq!(people.default_ttl(), Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_typed_helpers() {
        let registry = registry();
        let tag = Tag {
            id: 7,
            name: "noir".into(),
        };
        registry.set_as("tags", "7", &tag, None).unwrap();
        assert_eq!(registry.get_as::<Tag>("tags", "7").unwrap(), Some(tag));
        assert_eq!(registry.get_as::<Tag>("tags", "8").unwrap(), None);

        registry.set("tags", "bad", json!("not a tag"), None).unwrap();
        assert!(registry.get_as::<Tag>("tags", "bad").is_err());
    }

    #[tokio::test]
    async fn test_stats_totals_and_reset() {
        let registry = registry();
        registry.set("tags", "a", json!(1), None).unwrap();
        registry.set("categories", "b", json!(2), None).unwrap();
        registry.get("tags", "a");
        registry.get("categories", "missing");

        let stats = registry.stats();
        assert_eq!(stats.namespaces["tags"].hits, 1);
        assert_eq!(stats.namespaces["categories"].misses, 1);
        assert_eq!(stats.totals.size, 2);
        assert_eq!(stats.totals.sets, 2);
        assert_eq!(stats.totals.capacity, 1200);
        assert!((stats.totals.hit_rate - 0.5).abs() < f64::EPSILON);

        registry.reset_stats();
        let stats = registry.stats();
        assert_eq!(stats.totals.hits, 0);
        assert_eq!(stats.totals.size, 2);

        assert_eq!(registry.invalidate_all(), 2);
        assert_eq!(registry.stats().totals.size, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_and_destroy() {
        let config = CacheConfig {
            sweep_interval: Duration::from_secs(10),
            ..CacheConfig::default()
        };
        let registry = CacheRegistry::new(config).unwrap();
        registry.start_sweeping();

        registry
            .set("tags", "short", json!(1), Some(Duration::from_secs(1)))
            .unwrap();
        registry
            .set("adhoc", "short", json!(1), Some(Duration::from_secs(1)))
            .unwrap();

        tokio::time::sleep(Duration::from_secs(11)).await;
        let stats = registry.stats();
        assert_eq!(stats.namespaces["tags"].expirations, 1);
        assert_eq!(stats.namespaces["adhoc"].expirations, 1);

        registry.destroy();
        assert!(registry.names().is_empty());
        assert_eq!(registry.stats().totals, CacheStats::default());

        // Namespaces created after destroy are not swept
        registry
            .set("late", "short", json!(1), Some(Duration::from_secs(1)))
            .unwrap();
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(registry.stats().namespaces["late"].expirations, 0);
    }
}
