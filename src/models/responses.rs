//! Response DTOs for the monitoring API
//!
//! Defines the structure of outgoing HTTP response bodies.

use serde::Serialize;

use crate::cache::{CacheMetricsSnapshot, InvalidationReport, StoreStats};
use crate::connection::ConnectionState;

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// "healthy" when the store is ready, "degraded" otherwise
    pub status: String,
    pub store_enabled: bool,
    pub connection: ConnectionState,
    /// Cache operations currently fall back to their defaults
    pub degraded: bool,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    pub fn new(store_enabled: bool, connection: ConnectionState) -> Self {
        let degraded = connection != ConnectionState::Ready;
        Self {
            status: if degraded { "degraded" } else { "healthy" }.to_string(),
            store_enabled,
            connection,
            degraded,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Response body for the stats endpoint (GET /stats)
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    /// Absent when the store is unreachable
    pub store: Option<StoreStats>,
    pub metrics: CacheMetricsSnapshot,
}

/// Response body for POST /admin/flush
#[derive(Debug, Clone, Serialize)]
pub struct FlushResponse {
    pub message: String,
}

impl FlushResponse {
    pub fn flushed() -> Self {
        Self {
            message: "All keys flushed".to_string(),
        }
    }
}

/// Response body for DELETE /admin/cache/:prefix/:pattern
#[derive(Debug, Clone, Serialize)]
pub struct InvalidateResponse {
    pub pattern: String,
    pub deleted: u64,
    pub masters: usize,
    /// Masters that stopped early; their remaining matches were kept
    pub interrupted: usize,
}

impl InvalidateResponse {
    pub fn new(pattern: impl Into<String>, report: InvalidationReport) -> Self {
        Self {
            pattern: pattern.into(),
            deleted: report.deleted,
            masters: report.masters,
            interrupted: report.interrupted,
        }
    }
}

/// Error response body for rejected requests
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error message describing what went wrong
    pub error: String,
}

impl ErrorResponse {
    /// Creates a new ErrorResponse
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
