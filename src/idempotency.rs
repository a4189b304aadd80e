//! Idempotency Keys
//!
//! Presence markers with a TTL used to suppress duplicate execution of
//! retried operations. `check` fails open; operations where a duplicate is
//! worse than a rejection should use `check_strict` or `try_claim`.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::connection::ConnectionManager;
use crate::error::{CacheError, Result};

/// Prefix shared by every idempotency marker.
pub const IDEMPOTENCY_PREFIX: &str = "idempotency:";

const MARKER: &str = "1";

/// Existence/store/remove primitive over the shared store.
#[derive(Clone)]
pub struct IdempotencyStore {
    connection: Arc<ConnectionManager>,
    default_ttl: u64,
}

impl IdempotencyStore {
    pub fn new(connection: Arc<ConnectionManager>, default_ttl: u64) -> Self {
        Self {
            connection,
            default_ttl: default_ttl.max(1),
        }
    }

    pub fn default_ttl(&self) -> u64 {
        self.default_ttl
    }

    fn key(key: &str) -> String {
        format!("{}{}", IDEMPOTENCY_PREFIX, key)
    }

    fn ttl_or_default(&self, ttl: Option<u64>) -> u64 {
        ttl.filter(|t| *t > 0).unwrap_or(self.default_ttl)
    }

    /// Whether `key` has been marked. False when the store is down.
    pub async fn check(&self, key: &str) -> bool {
        match self.check_strict(key).await {
            Ok(present) => present,
            Err(e) if e.is_unavailable() => {
                debug!(key = %key, "No idempotency store, treating key as unseen");
                false
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Idempotency check failed, treating key as unseen");
                false
            }
        }
    }

    /// Like [`check`](Self::check) but reports store failures instead of
    /// assuming the key is unseen.
    pub async fn check_strict(&self, key: &str) -> Result<bool> {
        let handle = self
            .connection
            .get_handle()
            .await
            .ok_or(CacheError::Unavailable)?;
        handle.exists(&Self::key(key)).await
    }

    /// Marks `key` for `ttl` seconds, or the default TTL when `None`.
    ///
    /// Returns false when the marker could not be written.
    pub async fn store(&self, key: &str, ttl: Option<u64>) -> bool {
        let Some(handle) = self.connection.get_handle().await else {
            return false;
        };
        let ttl = self.ttl_or_default(ttl);
        match handle.set_ex(&Self::key(key), MARKER, ttl).await {
            Ok(()) => {
                debug!(key = %key, ttl, "Idempotency key stored");
                true
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to store idempotency key");
                false
            }
        }
    }

    /// Atomically marks `key` if it is not already marked.
    ///
    /// `Ok(true)` means this caller owns the operation; `Ok(false)` means it
    /// is a duplicate.
    pub async fn try_claim(&self, key: &str, ttl: Option<u64>) -> Result<bool> {
        let handle = self
            .connection
            .get_handle()
            .await
            .ok_or(CacheError::Unavailable)?;
        handle
            .set_nx_ex(&Self::key(key), MARKER, self.ttl_or_default(ttl))
            .await
    }

    /// Clears the marker so the operation may be retried.
    pub async fn remove(&self, key: &str) -> bool {
        let Some(handle) = self.connection.get_handle().await else {
            return false;
        };
        match handle.del(&Self::key(key)).await {
            Ok(_) => true,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to remove idempotency key");
                false
            }
        }
    }
}
