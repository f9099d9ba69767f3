//! Cache statistics

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time counters of one cache
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    /// Entries pushed out to make room
    pub evictions: u64,
    /// Entries dropped because their TTL ran out
    pub expirations: u64,
    /// Live (unexpired) entries
    pub size: usize,
    pub capacity: usize,
    /// Hits over lookups, 0.0 before the first lookup
    pub hit_rate: f64,
}

impl CacheStats {
    /// Calculate hit rate
    pub fn calculate_hit_rate(&mut self) {
        let lookups = self.hits + self.misses;
        self.hit_rate = if lookups > 0 {
            self.hits as f64 / lookups as f64
        } else {
            0.0
        };
    }

    /// Fold another cache's counters into these
    pub fn accumulate(&mut self, other: &CacheStats) {
        self.hits += other.hits;
        self.misses += other.misses;
        self.sets += other.sets;
        self.evictions += other.evictions;
        self.expirations += other.expirations;
        self.size += other.size;
        self.capacity += other.capacity;
        self.calculate_hit_rate();
    }
}

/// Thread-safe statistics collector
#[derive(Debug, Default)]
pub struct StatsCollector {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_expirations(&self, count: usize) {
        self.expirations.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Zero every counter
    pub fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.sets,
            &self.evictions,
            &self.expirations,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn get_stats(&self, size: usize, capacity: usize) -> CacheStats {
        let mut stats = CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            size,
            capacity,
            hit_rate: 0.0,
        };
        stats.calculate_hit_rate();
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate_and_reset() {
        let collector = StatsCollector::new();
        assert_eq!(collector.get_stats(0, 10).hit_rate, 0.0);

        collector.record_hit();
        collector.record_hit();
        collector.record_hit();
        collector.record_miss();
        let stats = collector.get_stats(2, 10);
        assert_eq!(stats.hits, 3);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 0.75).abs() < f64::EPSILON);

        collector.reset();
        assert_eq!(collector.get_stats(2, 10).hits, 0);
    }

    #[test]
    fn test_accumulate_recomputes_hit_rate() {
        let mut total = CacheStats::default();
        total.accumulate(&CacheStats {
            hits: 1,
            misses: 1,
            size: 2,
            capacity: 5,
            ..Default::default()
        });
        total.accumulate(&CacheStats {
            hits: 2,
            misses: 0,
            size: 1,
            capacity: 5,
            ..Default::default()
        });
        assert_eq!(total.size, 3);
        assert_eq!(total.capacity, 10);
        assert!((total.hit_rate - 0.75).abs() < f64::EPSILON);
    }
}
