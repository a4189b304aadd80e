//! Cachekeep - caching, rate limiting and idempotency over a shared store
//!
//! Talks to a standalone or clustered redis deployment (or an in-memory
//! stand-in) and degrades to safe defaults when the store is unavailable.

pub mod api;
pub mod cache;
pub mod config;
pub mod connection;
pub mod error;
pub mod idempotency;
pub mod models;
pub mod ratelimit;
pub mod store;
pub mod tasks;

pub use api::{create_router, AppState};
pub use cache::Cache;
pub use config::Config;
pub use connection::{ConnectionManager, ConnectionState};
pub use error::{CacheError, Result};
pub use idempotency::IdempotencyStore;
pub use ratelimit::{RateLimitStore, RateLimiter};
pub use store::{MemoryStore, StoreHandle};
pub use tasks::spawn_cleanup_task;
