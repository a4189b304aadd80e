//! Configuration Module
//!
//! Loads store, rate-limit and server settings from environment variables.
//! Malformed cluster topology is rejected here rather than at first use.

use std::env;
use std::fmt;

use crate::error::{CacheError, Result};

const CLUSTER_NODES_VAR: &str = "REDIS_CLUSTER_NODES";
const BACKEND_VAR: &str = "CACHE_BACKEND";

/// Which store implementation the binary runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreBackend {
    #[default]
    Redis,
    /// Process-local store, for development without a server
    Memory,
}

impl StoreBackend {
    fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "redis" => Ok(StoreBackend::Redis),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(CacheError::Config {
                name: BACKEND_VAR.to_string(),
                entry: other.to_string(),
                raw: raw.to_string(),
                reason: "expected 'redis' or 'memory'".to_string(),
            }),
        }
    }
}

/// A `host:port` pair from the cluster node list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAddr {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Connection settings for the key-value store.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// When false the store is never contacted and every operation degrades
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub db: i64,
    /// Non-empty selects cluster mode
    pub cluster_nodes: Vec<NodeAddr>,
    /// Upper bound on the initial readiness wait
    pub connect_timeout_ms: u64,
}

impl RedisConfig {
    pub fn is_cluster(&self) -> bool {
        !self.cluster_nodes.is_empty()
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 6379,
            username: None,
            password: None,
            db: 0,
            cluster_nodes: Vec::new(),
            connect_timeout_ms: 5000,
        }
    }
}

/// Rate limiter settings.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub window_ms: u64,
    pub max_requests: u64,
    /// Allow requests through when the counter store fails
    pub skip_on_error: bool,
    /// Key clients on `X-Forwarded-For` instead of the socket address.
    /// Only safe behind a proxy that overwrites the header.
    pub trust_proxy: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: 60_000,
            max_requests: 100,
            skip_on_error: true,
            trust_proxy: false,
        }
    }
}

/// Application configuration.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub backend: StoreBackend,
    pub redis: RedisConfig,
    pub rate_limit: RateLimitConfig,
    /// Default lifetime of idempotency markers in seconds
    pub idempotency_ttl: u64,
    /// Keys requested per SCAN round trip during pattern invalidation
    pub scan_batch_size: usize,
    /// HTTP server port for the monitoring endpoints
    pub server_port: u16,
    /// In-memory store sweeper interval in seconds
    pub cleanup_interval: u64,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_BACKEND` - `redis` or `memory` (default: redis)
    /// - `REDIS_ENABLED` - Enable the store (default: true)
    /// - `REDIS_HOST` / `REDIS_PORT` - Standalone address (default: 127.0.0.1:6379)
    /// - `REDIS_USERNAME` / `REDIS_PASSWORD` - Credentials (default: none)
    /// - `REDIS_DB` - Database index (default: 0)
    /// - `REDIS_CLUSTER_NODES` - Comma separated `host:port` list, selects cluster mode
    /// - `REDIS_CONNECT_TIMEOUT_MS` - Readiness wait (default: 5000)
    /// - `RATE_LIMIT_WINDOW_MS` / `RATE_LIMIT_MAX` / `RATE_LIMIT_SKIP_ON_ERROR`
    /// - `RATE_LIMIT_TRUST_PROXY` - Key clients on X-Forwarded-For (default: false)
    /// - `IDEMPOTENCY_TTL_SECS` - Default idempotency TTL (default: 600)
    /// - `SCAN_BATCH_SIZE` - Pattern delete batch (default: 100)
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `CLEANUP_INTERVAL` - Sweeper frequency in seconds (default: 1)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds a Config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let parse_or = |name: &str, fallback: u64| -> u64 {
            lookup(name)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(fallback)
        };
        let flag_or = |name: &str, fallback: bool| -> bool {
            lookup(name)
                .map(|v| parse_flag(&v).unwrap_or(fallback))
                .unwrap_or(fallback)
        };
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let backend = match lookup(BACKEND_VAR) {
            Some(raw) => StoreBackend::parse(&raw)?,
            None => defaults.backend,
        };

        let cluster_nodes = match lookup(CLUSTER_NODES_VAR) {
            Some(raw) => parse_cluster_nodes(&raw)?,
            None => Vec::new(),
        };

        let redis = RedisConfig {
            enabled: flag_or("REDIS_ENABLED", defaults.redis.enabled),
            host: non_empty("REDIS_HOST").unwrap_or(defaults.redis.host),
            port: lookup("REDIS_PORT")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.redis.port),
            username: non_empty("REDIS_USERNAME"),
            password: non_empty("REDIS_PASSWORD"),
            db: lookup("REDIS_DB")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.redis.db),
            cluster_nodes,
            connect_timeout_ms: parse_or(
                "REDIS_CONNECT_TIMEOUT_MS",
                defaults.redis.connect_timeout_ms,
            ),
        };

        let rate_limit = RateLimitConfig {
            window_ms: parse_or("RATE_LIMIT_WINDOW_MS", defaults.rate_limit.window_ms),
            max_requests: parse_or("RATE_LIMIT_MAX", defaults.rate_limit.max_requests),
            skip_on_error: flag_or("RATE_LIMIT_SKIP_ON_ERROR", defaults.rate_limit.skip_on_error),
            trust_proxy: flag_or("RATE_LIMIT_TRUST_PROXY", defaults.rate_limit.trust_proxy),
        };

        Ok(Self {
            backend,
            redis,
            rate_limit,
            idempotency_ttl: parse_or("IDEMPOTENCY_TTL_SECS", defaults.idempotency_ttl),
            scan_batch_size: parse_or("SCAN_BATCH_SIZE", defaults.scan_batch_size as u64)
                .max(1) as usize,
            server_port: lookup("SERVER_PORT")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.server_port),
            cleanup_interval: parse_or("CLEANUP_INTERVAL", defaults.cleanup_interval),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Redis,
            redis: RedisConfig::default(),
            rate_limit: RateLimitConfig::default(),
            idempotency_ttl: 600,
            scan_batch_size: 100,
            server_port: 3000,
            cleanup_interval: 1,
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parses a comma separated `host:port` list.
///
/// Blank input yields an empty list. Any malformed entry fails the whole
/// value with an error naming the entry and the raw string.
pub fn parse_cluster_nodes(raw: &str) -> Result<Vec<NodeAddr>> {
    let invalid = |entry: &str, reason: &str| CacheError::Config {
        name: CLUSTER_NODES_VAR.to_string(),
        entry: entry.to_string(),
        raw: raw.to_string(),
        reason: reason.to_string(),
    };

    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }

    raw.split(',')
        .map(str::trim)
        .map(|entry| {
            if entry.is_empty() {
                return Err(invalid(entry, "empty entry"));
            }
            let (host, port) = entry
                .rsplit_once(':')
                .ok_or_else(|| invalid(entry, "expected host:port"))?;
            if host.is_empty() {
                return Err(invalid(entry, "missing host"));
            }
            let port: u16 = port
                .parse()
                .ok()
                .filter(|p| *p != 0)
                .ok_or_else(|| invalid(entry, "port must be a number between 1 and 65535"))?;
            Ok(NodeAddr {
                host: host.to_string(),
                port,
            })
        })
        .collect()
}
