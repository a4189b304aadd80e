//! Cache Façade
//!
//! Typed get/set/del/exists/expire over the shared store handle. Store
//! failures never reach the caller: each operation returns its safe default
//! (`None`, `false`, `0`) and bumps the error counter instead.

use std::sync::Arc;

use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::invalidation::{self, InvalidationReport};
use crate::cache::prefix::{default_ttl_for, CachePrefix};
use crate::cache::{CacheMetrics, CacheMetricsSnapshot};
use crate::connection::ConnectionManager;
use crate::store::StoreHandle;

/// Which node the memory figure in [`StoreStats`] describes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum MemoryScope {
    /// The only node of a standalone deployment
    Instance,
    /// One master standing in for the cluster; not a cluster-wide sum
    RepresentativeNode { address: String },
}

/// Store summary for health and monitoring endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    /// Keys across every reachable master
    pub keys: u64,
    pub memory: Option<String>,
    pub memory_scope: MemoryScope,
    pub cluster_enabled: bool,
    pub masters: usize,
}

// == Cache ==
/// Cache façade shared by business services.
#[derive(Clone)]
pub struct Cache {
    connection: Arc<ConnectionManager>,
    metrics: Arc<CacheMetrics>,
    scan_batch_size: usize,
}

impl Cache {
    // == Constructor ==
    pub fn new(connection: Arc<ConnectionManager>, metrics: Arc<CacheMetrics>) -> Self {
        Self {
            connection,
            metrics,
            scan_batch_size: 100,
        }
    }

    /// Overrides the number of keys requested per SCAN round trip.
    pub fn with_scan_batch_size(mut self, batch_size: usize) -> Self {
        self.scan_batch_size = batch_size.max(1);
        self
    }

    /// Builds the full key for an identifier.
    pub fn key(prefix: &str, id: &str) -> String {
        format!("{}{}", prefix, id)
    }

    async fn handle(&self) -> Option<Arc<dyn StoreHandle>> {
        self.connection.get_handle().await
    }

    // == Get ==
    /// Reads and decodes a value. Missing, undecodable, and failed reads
    /// all yield `None`.
    pub async fn get<T: DeserializeOwned>(&self, id: &str, prefix: &str) -> Option<T> {
        let handle = self.handle().await?;
        let key = Self::key(prefix, id);

        let payload = match handle.get(&key).await {
            Ok(payload) => payload,
            Err(e) => {
                self.metrics.record_error();
                warn!(key = %key, error = %e, "Cache get failed");
                return None;
            }
        };

        let Some(payload) = payload else {
            self.metrics.record_miss();
            return None;
        };

        match serde_json::from_str(&payload) {
            Ok(value) => {
                self.metrics.record_hit();
                Some(value)
            }
            Err(e) => {
                self.metrics.record_miss();
                warn!(key = %key, error = %e, "Cached payload could not be decoded");
                None
            }
        }
    }

    // == Set ==
    /// Encodes and writes a value with its expiry in one command.
    ///
    /// `ttl_secs` of `None` or `Some(0)` uses the prefix default.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        id: &str,
        value: &T,
        prefix: &str,
        ttl_secs: Option<u64>,
    ) -> bool {
        let Some(handle) = self.handle().await else {
            return false;
        };
        let key = Self::key(prefix, id);
        let ttl = ttl_secs
            .filter(|t| *t > 0)
            .unwrap_or_else(|| default_ttl_for(prefix));

        let payload = match serde_json::to_string(value) {
            Ok(payload) => payload,
            Err(e) => {
                self.metrics.record_error();
                warn!(key = %key, error = %e, "Cache value could not be encoded");
                return false;
            }
        };

        match handle.set_ex(&key, &payload, ttl).await {
            Ok(()) => true,
            Err(e) => {
                self.metrics.record_error();
                warn!(key = %key, error = %e, "Cache set failed");
                false
            }
        }
    }

    // == Delete ==
    /// Returns true when the delete command succeeded, whether or not the
    /// key existed.
    pub async fn del(&self, id: &str, prefix: &str) -> bool {
        let Some(handle) = self.handle().await else {
            return false;
        };
        let key = Self::key(prefix, id);
        match handle.del(&key).await {
            Ok(_) => true,
            Err(e) => {
                self.metrics.record_error();
                warn!(key = %key, error = %e, "Cache delete failed");
                false
            }
        }
    }

    // == Exists ==
    pub async fn exists(&self, id: &str, prefix: &str) -> bool {
        let Some(handle) = self.handle().await else {
            return false;
        };
        let key = Self::key(prefix, id);
        match handle.exists(&key).await {
            Ok(found) => found,
            Err(e) => {
                self.metrics.record_error();
                warn!(key = %key, error = %e, "Cache exists failed");
                false
            }
        }
    }

    // == Expire ==
    /// Resets the TTL of an existing key. False when the key is absent.
    pub async fn expire(&self, id: &str, prefix: &str, ttl_secs: u64) -> bool {
        let Some(handle) = self.handle().await else {
            return false;
        };
        let key = Self::key(prefix, id);
        match handle.expire(&key, ttl_secs).await {
            Ok(applied) => applied,
            Err(e) => {
                self.metrics.record_error();
                warn!(key = %key, error = %e, "Cache expire failed");
                false
            }
        }
    }

    // == Delete Pattern ==
    /// Deletes every key matching `prefix + pattern` on every master and
    /// returns how many were removed.
    pub async fn del_pattern(&self, pattern: &str, prefix: &str) -> u64 {
        self.del_pattern_report(pattern, prefix).await.deleted
    }

    pub async fn del_pattern_report(&self, pattern: &str, prefix: &str) -> InvalidationReport {
        let Some(handle) = self.handle().await else {
            return InvalidationReport::default();
        };
        let full = Self::key(prefix, pattern);
        let report =
            invalidation::delete_matching(handle.as_ref(), &full, self.scan_batch_size).await;
        if report.interrupted > 0 {
            self.metrics.record_errors(report.interrupted as u64);
        }
        report
    }

    // == Stats ==
    /// Key count and memory usage, or `None` when the store is unavailable.
    pub async fn get_stats(&self) -> Option<StoreStats> {
        let handle = self.handle().await?;
        let masters = match handle.masters().await {
            Ok(masters) => masters,
            Err(e) => {
                self.metrics.record_error();
                warn!(error = %e, "Could not enumerate masters for stats");
                return None;
            }
        };
        let cluster_enabled = handle.mode() == crate::store::StoreMode::Cluster;

        let sizes = join_all(masters.iter().map(|node| node.dbsize())).await;
        let mut keys = 0;
        for (node, size) in masters.iter().zip(sizes) {
            match size {
                Ok(size) => keys += size,
                Err(e) => {
                    self.metrics.record_error();
                    warn!(node = %node.address(), error = %e, "DBSIZE failed");
                }
            }
        }

        let mut memory = None;
        let mut memory_scope = MemoryScope::Instance;
        for node in &masters {
            match node.used_memory().await {
                Ok(used) => {
                    memory = used;
                    if cluster_enabled {
                        memory_scope = MemoryScope::RepresentativeNode {
                            address: node.address(),
                        };
                    }
                    break;
                }
                Err(e) => {
                    self.metrics.record_error();
                    warn!(node = %node.address(), error = %e, "INFO memory failed");
                }
            }
        }

        Some(StoreStats {
            keys,
            memory,
            memory_scope,
            cluster_enabled,
            masters: masters.len(),
        })
    }

    // == Metrics ==
    pub fn get_cache_metrics(&self) -> CacheMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }

    // == Flush ==
    /// Removes every key on every master. True only if all masters flushed.
    pub async fn flush_all(&self) -> bool {
        let Some(handle) = self.handle().await else {
            return false;
        };
        let masters = match handle.masters().await {
            Ok(masters) => masters,
            Err(e) => {
                self.metrics.record_error();
                warn!(error = %e, "Could not enumerate masters for flush");
                return false;
            }
        };

        let outcomes = join_all(masters.iter().map(|node| node.flush_all())).await;
        let mut flushed = true;
        for (node, outcome) in masters.iter().zip(outcomes) {
            if let Err(e) = outcome {
                flushed = false;
                self.metrics.record_error();
                warn!(node = %node.address(), error = %e, "FLUSHALL failed");
            }
        }
        debug!(masters = masters.len(), flushed, "Flush finished");
        flushed
    }

    // == Invalidation ==
    /// Domain-level invalidation helpers.
    pub fn invalidate(&self) -> Invalidate<'_> {
        Invalidate { cache: self }
    }
}

/// Maps domain entities onto deletes with the matching prefix.
pub struct Invalidate<'a> {
    cache: &'a Cache,
}

impl Invalidate<'_> {
    pub async fn profile(&self, id: &str) -> bool {
        self.cache.del(id, CachePrefix::Profile.as_str()).await
    }

    /// Drops the bounty and every cached bounty listing.
    pub async fn bounty(&self, id: &str) -> bool {
        let removed = self.cache.del(id, CachePrefix::Bounty.as_str()).await;
        self.bounty_lists().await;
        removed
    }

    pub async fn bounty_lists(&self) -> u64 {
        self.cache
            .del_pattern("*", CachePrefix::BountyList.as_str())
            .await
    }
}
