//! Store Module
//!
//! The `StoreHandle` seam between the cache components and the underlying
//! key-value engine. A redis driver and an in-memory store implement it.

mod driver;
mod entry;
mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;

pub use driver::{connect, RedisHandle};
pub use entry::{current_timestamp_ms, StoredEntry};
pub use memory::{MemoryShard, MemoryStore};

/// Deployment mode of a store handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreMode {
    Standalone,
    Cluster,
}

/// Result of an atomic window increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Counter value after the increment
    pub current: u64,
    /// Milliseconds until the counter expires
    pub ttl_remaining_ms: u64,
}

/// Connection to the key-value engine.
///
/// Every write used by this crate carries an expiry.
#[async_trait]
pub trait StoreHandle: Send + Sync {
    fn mode(&self) -> StoreMode;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Writes the value and its expiry in a single command.
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;

    /// Writes only when the key is absent. Returns true when written.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool>;

    async fn del(&self, key: &str) -> Result<u64>;

    async fn exists(&self, key: &str) -> Result<bool>;

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool>;

    /// Increments `key` and assigns `window_ms` when it has no expiry,
    /// executed atomically by the store.
    async fn incr_window(&self, key: &str, window_ms: u64) -> Result<WindowCount>;

    /// Reads a counter without modifying it.
    async fn peek_counter(&self, key: &str) -> Result<Option<WindowCount>>;

    /// Snapshot of the shard masters. A standalone handle returns itself as
    /// the single master.
    async fn masters(&self) -> Result<Vec<Arc<dyn ShardNode>>>;

    /// Graceful disconnect.
    async fn quit(&self) -> Result<()>;
}

/// One shard master, addressed directly.
#[async_trait]
pub trait ShardNode: Send + Sync {
    fn address(&self) -> String;

    /// One SCAN round trip. A returned cursor of 0 ends the enumeration.
    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)>;

    async fn delete_keys(&self, keys: &[String]) -> Result<u64>;

    async fn dbsize(&self) -> Result<u64>;

    /// Human readable memory usage as reported by the node.
    async fn used_memory(&self) -> Result<Option<String>>;

    async fn flush_all(&self) -> Result<()>;
}
