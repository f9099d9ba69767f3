//! In-memory caching for read-mostly lookups
//!
//! [`TtlLruCache`] bounds a string-keyed store by both entry count (least
//! recently used entries go first) and per-entry time to live. A
//! [`CacheRegistry`] holds one cache per namespace and is constructed
//! explicitly by the application, then shared by handle.
//!
//! Keys can be invalidated one at a time, by trailing-wildcard prefix
//! (`tag:*`), by glob (`user:?:tags`) or by regular expression.

pub mod errors;
pub mod pattern;
pub mod registry;
pub mod stats;
pub mod store;

pub use errors::{CacheError, CacheResult};
pub use pattern::KeyPattern;
pub use registry::{CacheRegistry, RegistryStats};
pub use stats::{CacheStats, StatsCollector};
pub use store::TtlLruCache;
