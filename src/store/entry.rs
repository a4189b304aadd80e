//! Stored Entry Module
//!
//! A value held by the in-memory store together with its expiry.

use std::time::{SystemTime, UNIX_EPOCH};

// == Stored Entry ==
/// A single in-memory value with an optional absolute expiry.
#[derive(Debug, Clone)]
pub struct StoredEntry {
    /// The stored payload
    pub value: String,
    /// Expiration timestamp (Unix milliseconds), None = no expiration
    pub expires_at: Option<u64>,
}

impl StoredEntry {
    // == Constructors ==
    /// Creates an entry that expires `ttl_ms` from now.
    pub fn with_ttl_ms(value: String, ttl_ms: u64) -> Self {
        Self {
            value,
            expires_at: Some(current_timestamp_ms().saturating_add(ttl_ms)),
        }
    }

    /// Creates an entry without expiry.
    pub fn persistent(value: String) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    // == Is Expired ==
    /// An entry is expired once the current time reaches its expiry.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(current_timestamp_ms())
    }

    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        matches!(self.expires_at, Some(expires) if now_ms >= expires)
    }

    // == Expiry Updates ==
    pub fn set_ttl_ms(&mut self, ttl_ms: u64) {
        self.expires_at = Some(current_timestamp_ms().saturating_add(ttl_ms));
    }

    // == Time To Live ==
    /// Returns remaining TTL in milliseconds, or None if no expiration is set.
    ///
    /// # Returns
    /// - `Some(0)` if the entry has expired
    /// - `Some(remaining_ms)` if the entry has TTL and hasn't expired
    /// - `None` if the entry never expires
    pub fn ttl_remaining_ms(&self) -> Option<u64> {
        self.expires_at
            .map(|expires| expires.saturating_sub(current_timestamp_ms()))
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
