//! API Module
//!
//! HTTP handlers and routing for the monitoring REST API.
//!
//! # Endpoints
//! - `GET /health` - Connection state and degraded flag
//! - `GET /stats` - Store summary and cache metrics
//! - `GET /metrics` - Cache hit/miss/error counters
//! - `POST /admin/flush` - Flush every master
//! - `DELETE /admin/cache/:prefix/:pattern` - Pattern invalidation

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
