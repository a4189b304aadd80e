//! API Handlers
//!
//! HTTP request handlers for the monitoring and admin endpoints.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use tracing::{debug, info};

use crate::cache::{Cache, CacheMetrics, CacheMetricsSnapshot, CachePrefix};
use crate::config::Config;
use crate::connection::ConnectionManager;
use crate::error::{CacheError, Result};
use crate::idempotency::IdempotencyStore;
use crate::models::{FlushResponse, HealthResponse, InvalidateResponse, StatsResponse};
use crate::ratelimit::RateLimiter;

/// Namespace of the limiter guarding the monitoring API.
pub const API_RATE_LIMIT_NAMESPACE: &str = "monitoring";

/// Application state shared across all handlers.
///
/// Every component shares one connection manager, so the store is dialled
/// at most once per process.
#[derive(Clone)]
pub struct AppState {
    pub connection: Arc<ConnectionManager>,
    pub cache: Cache,
    pub rate_limiter: RateLimiter,
    pub idempotency: IdempotencyStore,
}

impl AppState {
    /// Creates a new AppState around an existing connection manager.
    pub fn new(connection: Arc<ConnectionManager>, config: &Config) -> Self {
        let cache = Cache::new(Arc::clone(&connection), Arc::new(CacheMetrics::new()))
            .with_scan_batch_size(config.scan_batch_size);
        let rate_limiter = RateLimiter::new(
            Arc::clone(&connection),
            API_RATE_LIMIT_NAMESPACE,
            &config.rate_limit,
        );
        let idempotency = IdempotencyStore::new(Arc::clone(&connection), config.idempotency_ttl);
        Self {
            connection,
            cache,
            rate_limiter,
            idempotency,
        }
    }

    /// Creates a new AppState that connects to redis lazily.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(ConnectionManager::from_config(&config.redis)),
            config,
        )
    }
}

/// Handler for GET /health
///
/// Always answers 200; a missing store shows up as `degraded`.
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    // Triggers the first connection attempt so the state is meaningful.
    let connected = state.connection.get_handle().await.is_some();
    debug!(connected, "Health check");
    Json(HealthResponse::new(
        state.connection.is_enabled(),
        state.connection.state(),
    ))
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        store: state.cache.get_stats().await,
        metrics: state.cache.get_cache_metrics(),
    })
}

/// Handler for GET /metrics
pub async fn metrics_handler(State(state): State<AppState>) -> Json<CacheMetricsSnapshot> {
    Json(state.cache.get_cache_metrics())
}

/// Handler for POST /admin/flush
///
/// Answers 503 unless every master was flushed.
pub async fn flush_handler(State(state): State<AppState>) -> Result<Json<FlushResponse>> {
    if !state.cache.flush_all().await {
        return Err(CacheError::Unavailable);
    }
    info!("All keys flushed through admin endpoint");
    Ok(Json(FlushResponse::flushed()))
}

/// Handler for DELETE /admin/cache/:prefix/:pattern
///
/// `prefix` is a known namespace name without the trailing colon, e.g.
/// `bounty-list`.
pub async fn invalidate_handler(
    State(state): State<AppState>,
    Path((prefix, pattern)): Path<(String, String)>,
) -> Result<Json<InvalidateResponse>> {
    let prefix = CachePrefix::from_prefix(&format!("{}:", prefix))
        .ok_or_else(|| CacheError::InvalidRequest(format!("Unknown cache prefix '{}'", prefix)))?;
    if pattern.is_empty() {
        return Err(CacheError::InvalidRequest("Pattern cannot be empty".to_string()));
    }
    if !state.connection.is_enabled() {
        return Err(CacheError::Unavailable);
    }

    let report = state
        .cache
        .del_pattern_report(&pattern, prefix.as_str())
        .await;
    info!(
        prefix = %prefix.as_str(),
        pattern = %pattern,
        deleted = report.deleted,
        "Pattern invalidated through admin endpoint"
    );
    Ok(Json(InvalidateResponse::new(
        format!("{}{}", prefix.as_str(), pattern),
        report,
    )))
}
