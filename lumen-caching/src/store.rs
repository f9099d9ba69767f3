//! Bounded cache with per-entry expiry and least-recently-used eviction

use log::{debug, trace};
use lru::LruCache;
use parking_lot::Mutex;
use regex::Regex;
use std::num::NonZeroUsize;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::errors::{CacheError, CacheResult};
use crate::pattern::KeyPattern;
use crate::stats::{CacheStats, StatsCollector};

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// String-keyed cache combining a TTL with LRU eviction
pub struct TtlLruCache<V> {
    default_ttl: Duration,
    capacity: NonZeroUsize,
    entries: Mutex<LruCache<String, Entry<V>>>,
    stats: StatsCollector,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl<V: Clone + Send + 'static> TtlLruCache<V> {
    pub fn new(max_size: usize, default_ttl: Duration) -> CacheResult<Self> {
        let capacity = NonZeroUsize::new(max_size).ok_or_else(|| {
            CacheError::InvalidConfiguration("cache max_size must be greater than 0".to_string())
        })?;
        Ok(Self {
            default_ttl,
            capacity,
            entries: Mutex::new(LruCache::new(capacity)),
            stats: StatsCollector::new(),
            sweeper: Mutex::new(None),
        })
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Look up a live entry, marking it most recently used
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let expired = match entries.peek(key) {
            Some(entry) => entry.is_expired(now),
            None => {
                self.stats.record_miss();
                return None;
            }
        };

        if expired {
            entries.pop(key);
            self.stats.record_expirations(1);
            self.stats.record_miss();
            trace!("Cache entry expired: {}", key);
            return None;
        }

        self.stats.record_hit();
        entries.get(key).map(|entry| entry.value.clone())
    }

    /// Whether a live entry exists; does not touch recency or counters
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .lock()
            .peek(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    /// Insert or replace, evicting the least recently used entry when full
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        let key = key.into();
        let expires_at = Instant::now() + ttl.unwrap_or(self.default_ttl);
        let mut entries = self.entries.lock();

        if !entries.contains(&key) && entries.len() >= self.capacity.get() {
            if let Some((evicted, _)) = entries.pop_lru() {
                self.stats.record_eviction();
                trace!("Evicted least recently used cache entry: {}", evicted);
            }
        }

        entries.put(key, Entry { value, expires_at });
        self.stats.record_set();
    }

    pub fn delete(&self, key: &str) -> bool {
        self.entries.lock().pop(key).is_some()
    }

    /// Remove entries matching `pattern` (see [`KeyPattern`]); returns the count
    pub fn invalidate(&self, pattern: &str) -> CacheResult<usize> {
        let pattern = KeyPattern::parse(pattern)?;
        if let KeyPattern::Exact(key) = &pattern {
            return Ok(usize::from(self.delete(key)));
        }
        Ok(self.remove_where(|key| pattern.matches(key)))
    }

    /// Remove entries whose key matches `regex` anywhere
    pub fn invalidate_regex(&self, regex: &Regex) -> usize {
        self.remove_where(|key| regex.is_match(key))
    }

    fn remove_where(&self, matches: impl Fn(&str) -> bool) -> usize {
        let mut entries = self.entries.lock();
        let doomed: Vec<String> = entries
            .iter()
            .filter(|(key, _)| matches(key.as_str()))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            entries.pop(key);
        }
        doomed.len()
    }

    /// Drop every expired entry; returns the count
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        self.stats.record_expirations(expired.len());
        expired.len()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.get_stats(self.len(), self.capacity.get())
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// Purge expired entries every `interval` until stopped or dropped
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration) {
        let cache: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                let purged = cache.purge_expired();
                if purged > 0 {
                    debug!("Cache sweep purged {} expired entries", purged);
                }
            }
        });

        if let Some(previous) = self.sweeper.lock().replace(handle) {
            previous.abort();
        }
    }

    pub fn stop_sweeper(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
    }
}

impl<V> Drop for TtlLruCache<V> {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.get_mut().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(max_size: usize) -> TtlLruCache<u32> {
        TtlLruCache::new(max_size, Duration::from_secs(300)).unwrap()
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(TtlLruCache::<u32>::new(0, Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn test_evicts_least_recently_accessed() {
        let cache = cache(3);
        cache.set("a", 1, None);
        cache.set("b", 2, None);
        cache.set("c", 3, None);

        // Touch `a` so `b` becomes the oldest
        assert_eq!(cache.get("a"), Some(1));
        cache.set("d", 4, None);

        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("c"), Some(3));
        assert_eq!(cache.get("d"), Some(4));

        let stats = cache.stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.size, 3);
        assert_eq!(stats.capacity, 3);
        assert_eq!(stats.sets, 4);
    }

    #[tokio::test]
    async fn test_replacing_a_key_does_not_evict() {
        let cache = cache(2);
        cache.set("a", 1, None);
        cache.set("b", 2, None);
        cache.set("a", 10, None);

        assert_eq!(cache.get("a"), Some(10));
        assert_eq!(cache.get("b"), Some(2));
        assert_eq!(cache.stats().evictions, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_ttl_expires() {
        let cache = cache(10);
        cache.set("flash", 1, Some(Duration::from_millis(10)));
        cache.set("steady", 2, None);
        assert_eq!(cache.len(), 2);

        tokio::time::advance(Duration::from_millis(20)).await;

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().size, 1);
        assert!(!cache.contains("flash"));
        assert_eq!(cache.get("flash"), None);
        assert_eq!(cache.get("steady"), Some(2));

        let stats = cache.stats();
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_invalidate_patterns() {
        let cache = cache(10);
        for key in ["tag:1", "tag:2", "tag:10", "category:1", "user:1:tags"] {
            cache.set(key, 0, None);
        }

        assert_eq!(cache.invalidate("tag:1").unwrap(), 1);
        assert_eq!(cache.invalidate("tag:1").unwrap(), 0);
        assert_eq!(cache.invalidate("tag:*").unwrap(), 2);
        assert_eq!(cache.invalidate("user:?:tags").unwrap(), 1);
        assert_eq!(cache.len(), 1);

        let regex = Regex::new("^category:").unwrap();
        assert_eq!(cache.invalidate_regex(&regex), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_purges_expired_entries() {
        let cache = Arc::new(cache(10));
        cache.set("a", 1, Some(Duration::from_secs(5)));
        cache.set("b", 2, Some(Duration::from_secs(5)));
        cache.set("c", 3, Some(Duration::from_secs(600)));
        cache.start_sweeper(Duration::from_secs(60));

        tokio::time::sleep(Duration::from_secs(61)).await;

        assert_eq!(cache.stats().expirations, 2);
        assert_eq!(cache.len(), 1);

        cache.stop_sweeper();
        cache.set("d", 4, Some(Duration::from_secs(1)));
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(cache.stats().expirations, 2);
    }

    #[tokio::test]
    async fn test_reset_stats_keeps_entries() {
        let cache = cache(4);
        cache.set("a", 1, None);
        cache.get("a");
        cache.get("missing");
        cache.reset_stats();

        let stats = cache.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.size, 1);
    }
}
