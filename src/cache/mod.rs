//! Cache Module
//!
//! Prefix-scoped typed caching over the shared store handle, with pattern
//! invalidation across every shard master and hit/miss/error metrics.

pub mod invalidation;
mod metrics;
mod prefix;
mod store;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use invalidation::InvalidationReport;
pub use metrics::{hit_rate, CacheMetrics, CacheMetricsSnapshot};
pub use prefix::{default_ttl_for, CachePrefix, DEFAULT_TTL_SECS};
pub use store::{Cache, Invalidate, MemoryScope, StoreStats};
