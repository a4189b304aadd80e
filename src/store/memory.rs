//! In-Memory Store
//!
//! A `StoreHandle` backed by process memory. It can emulate a cluster by
//! spreading keys over several shards, and supports fault injection so the
//! degradation paths can be exercised without a live server.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::RwLock;

use super::{current_timestamp_ms, ShardNode, StoreHandle, StoreMode, StoredEntry, WindowCount};
use crate::error::{CacheError, Result};

// == Memory Shard ==
/// One shard of the in-memory store; acts as a shard master.
#[derive(Debug)]
pub struct MemoryShard {
    name: String,
    entries: RwLock<HashMap<String, StoredEntry>>,
    fail_scans: AtomicBool,
    fail_deletes: AtomicBool,
    delete_calls: AtomicUsize,
}

impl MemoryShard {
    fn new(name: String) -> Self {
        Self {
            name,
            entries: RwLock::new(HashMap::new()),
            fail_scans: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
            delete_calls: AtomicUsize::new(0),
        }
    }

    /// Makes every subsequent SCAN on this shard fail.
    pub fn fail_scans(&self, fail: bool) {
        self.fail_scans.store(fail, Ordering::SeqCst);
    }

    /// Makes every subsequent batch delete on this shard fail.
    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Number of batch delete calls received.
    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    /// Number of live keys on this shard.
    pub async fn len(&self) -> usize {
        let now = current_timestamp_ms();
        self.entries
            .read()
            .await
            .values()
            .filter(|e| !e.is_expired_at(now))
            .count()
    }

    /// Number of stored entries, expired ones included.
    pub async fn raw_len(&self) -> usize {
        self.entries.read().await.len()
    }

    async fn live_value(&self, key: &str) -> Option<StoredEntry> {
        let entries = self.entries.read().await;
        entries.get(key).filter(|e| !e.is_expired()).cloned()
    }

    async fn cleanup_expired(&self) -> usize {
        let now = current_timestamp_ms();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired_at(now));
        before - entries.len()
    }
}

#[async_trait]
impl ShardNode for MemoryShard {
    fn address(&self) -> String {
        self.name.clone()
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)> {
        if self.fail_scans.load(Ordering::SeqCst) {
            return Err(CacheError::Connection(format!("scan failed on {}", self.name)));
        }
        let matcher = glob_to_regex(pattern)?;
        let now = current_timestamp_ms();

        // Cursors are key hashes, so deleting returned keys between calls
        // never shifts the position of the keys still to come.
        let mut keys: Vec<(u64, String)> = {
            let entries = self.entries.read().await;
            entries
                .iter()
                .filter(|(key, entry)| !entry.is_expired_at(now) && matcher.is_match(key))
                .map(|(key, _)| (key_hash(key), key.clone()))
                .filter(|(hash, _)| *hash >= cursor)
                .collect()
        };
        keys.sort();

        let take = count.max(1).min(keys.len());
        let next = keys.get(take).map_or(0, |(hash, _)| *hash);
        let batch = keys.into_iter().take(take).map(|(_, key)| key).collect();
        Ok((next, batch))
    }

    async fn delete_keys(&self, keys: &[String]) -> Result<u64> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(CacheError::Connection(format!("delete failed on {}", self.name)));
        }
        let mut entries = self.entries.write().await;
        let removed = keys.iter().filter(|k| entries.remove(*k).is_some()).count();
        Ok(removed as u64)
    }

    async fn dbsize(&self) -> Result<u64> {
        Ok(self.len().await as u64)
    }

    async fn used_memory(&self) -> Result<Option<String>> {
        let entries = self.entries.read().await;
        let bytes: usize = entries.iter().map(|(k, e)| k.len() + e.value.len()).sum();
        Ok(Some(format!("{}B", bytes)))
    }

    async fn flush_all(&self) -> Result<()> {
        self.entries.write().await.clear();
        Ok(())
    }
}

// == Memory Store ==
/// In-memory `StoreHandle`, standalone or sharded.
#[derive(Debug)]
pub struct MemoryStore {
    mode: StoreMode,
    shards: Vec<Arc<MemoryShard>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    /// Creates a single-node store.
    pub fn new() -> Self {
        Self::build(StoreMode::Standalone, 1)
    }

    /// Creates a store that spreads keys over `masters` shards.
    pub fn cluster(masters: usize) -> Self {
        Self::build(StoreMode::Cluster, masters.max(1))
    }

    fn build(mode: StoreMode, count: usize) -> Self {
        let shards = (0..count)
            .map(|i| Arc::new(MemoryShard::new(format!("memory-{}", i))))
            .collect();
        Self {
            mode,
            shards,
            unavailable: AtomicBool::new(false),
        }
    }

    /// Returns the shard masters for fault injection and inspection.
    pub fn shards(&self) -> &[Arc<MemoryShard>] {
        &self.shards
    }

    /// Makes every command fail as if the server were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Removes expired entries from every shard, returning how many were dropped.
    pub async fn cleanup_expired(&self) -> usize {
        let mut removed = 0;
        for shard in &self.shards {
            removed += shard.cleanup_expired().await;
        }
        removed
    }

    /// Total number of live keys.
    pub async fn len(&self) -> usize {
        let mut total = 0;
        for shard in &self.shards {
            total += shard.len().await;
        }
        total
    }

    fn shard_for(&self, key: &str) -> &MemoryShard {
        let index = (key_hash(key) % self.shards.len() as u64) as usize;
        &self.shards[index]
    }

    fn ensure_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(CacheError::Connection("memory store marked unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StoreHandle for MemoryStore {
    fn mode(&self) -> StoreMode {
        self.mode
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.ensure_available()?;
        Ok(self.shard_for(key).live_value(key).await.map(|e| e.value))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        self.ensure_available()?;
        let entry = StoredEntry::with_ttl_ms(value.to_string(), ttl_secs.saturating_mul(1000));
        self.shard_for(key)
            .entries
            .write()
            .await
            .insert(key.to_string(), entry);
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool> {
        self.ensure_available()?;
        let mut entries = self.shard_for(key).entries.write().await;
        if entries.get(key).is_some_and(|e| !e.is_expired()) {
            return Ok(false);
        }
        let entry = StoredEntry::with_ttl_ms(value.to_string(), ttl_secs.saturating_mul(1000));
        entries.insert(key.to_string(), entry);
        Ok(true)
    }

    async fn del(&self, key: &str) -> Result<u64> {
        self.ensure_available()?;
        let removed = self.shard_for(key).entries.write().await.remove(key);
        Ok(removed.filter(|e| !e.is_expired()).map_or(0, |_| 1))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.ensure_available()?;
        Ok(self.shard_for(key).live_value(key).await.is_some())
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool> {
        self.ensure_available()?;
        let mut entries = self.shard_for(key).entries.write().await;
        match entries.get_mut(key) {
            Some(entry) if !entry.is_expired() => {
                entry.set_ttl_ms(ttl_secs.saturating_mul(1000));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn incr_window(&self, key: &str, window_ms: u64) -> Result<WindowCount> {
        self.ensure_available()?;
        let mut entries = self.shard_for(key).entries.write().await;
        if entries.get(key).is_some_and(|e| e.is_expired()) {
            entries.remove(key);
        }
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| StoredEntry::persistent("0".to_string()));

        let current: u64 = entry
            .value
            .parse::<u64>()
            .map_err(|_| CacheError::Internal(format!("value at {} is not an integer", key)))?
            + 1;
        entry.value = current.to_string();
        if entry.expires_at.is_none() {
            entry.set_ttl_ms(window_ms);
        }

        Ok(WindowCount {
            current,
            ttl_remaining_ms: entry.ttl_remaining_ms().unwrap_or(window_ms),
        })
    }

    async fn peek_counter(&self, key: &str) -> Result<Option<WindowCount>> {
        self.ensure_available()?;
        let Some(entry) = self.shard_for(key).live_value(key).await else {
            return Ok(None);
        };
        let current = entry
            .value
            .parse::<u64>()
            .map_err(|_| CacheError::Internal(format!("value at {} is not an integer", key)))?;
        Ok(Some(WindowCount {
            current,
            ttl_remaining_ms: entry.ttl_remaining_ms().unwrap_or(0),
        }))
    }

    async fn masters(&self) -> Result<Vec<Arc<dyn ShardNode>>> {
        self.ensure_available()?;
        Ok(self
            .shards
            .iter()
            .map(|shard| Arc::clone(shard) as Arc<dyn ShardNode>)
            .collect())
    }

    async fn quit(&self) -> Result<()> {
        self.ensure_available()
    }
}

fn key_hash(key: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

/// Translates a SCAN-style glob (`*`, `?`) into an anchored regex.
fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr).map_err(|e| CacheError::InvalidRequest(format!("bad pattern: {}", e)))
}
