//! Rate Limiting
//!
//! Fixed-window counters kept in the shared store. Each increment is one
//! atomic script call that also assigns the window TTL on first touch, so a
//! counter can never exist without an expiry. Stores are namespaced per
//! route; namespaces and identifiers are sanitised before they become part
//! of a key so attacker supplied input cannot blow up key cardinality.

use std::net::IpAddr;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::RateLimitConfig;
use crate::connection::ConnectionManager;
use crate::error::{CacheError, Result};
use crate::store::WindowCount;

/// Prefix shared by every rate-limit key.
pub const RATE_LIMIT_PREFIX: &str = "rl:";

const MAX_PATH_SEGMENT: usize = 64;
const MAX_METHOD_LEN: usize = 10;
const MAX_EMAIL_LEN: usize = 64;

/// Bucket shared by every client whose address cannot be parsed.
pub const UNKNOWN_CLIENT: &str = "unknown";

// == Rate Limit Store ==
/// Counter store scoped to one namespace.
#[derive(Clone)]
pub struct RateLimitStore {
    connection: Arc<ConnectionManager>,
    namespace: String,
    window_ms: u64,
}

impl RateLimitStore {
    pub fn new(connection: Arc<ConnectionManager>, namespace: &str, window_ms: u64) -> Self {
        Self {
            connection,
            namespace: namespace.to_string(),
            window_ms: window_ms.max(1),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// Full store key for a client identifier.
    pub fn key_for(&self, key: &str) -> String {
        format!("{}{}:{}", RATE_LIMIT_PREFIX, self.namespace, key)
    }

    /// Store for a single route, keyed under this namespace.
    pub fn child_namespace(&self, method: &str, path: &str) -> RateLimitStore {
        Self {
            connection: Arc::clone(&self.connection),
            namespace: child_namespace(&self.namespace, method, path),
            window_ms: self.window_ms,
        }
    }

    // == Increment ==
    /// Counts one hit and returns the window state.
    ///
    /// Unlike the cache, failures are returned so the caller can choose
    /// between failing open and failing closed.
    pub async fn increment(&self, key: &str) -> Result<WindowCount> {
        let handle = self
            .connection
            .get_handle()
            .await
            .ok_or(CacheError::Unavailable)?;
        handle.incr_window(&self.key_for(key), self.window_ms).await
    }

    /// Current window state without counting a hit.
    pub async fn get(&self, key: &str) -> Result<Option<WindowCount>> {
        let handle = self
            .connection
            .get_handle()
            .await
            .ok_or(CacheError::Unavailable)?;
        handle.peek_counter(&self.key_for(key)).await
    }
}

// == Key Composition ==
/// Namespace for one route under `parent`.
pub fn child_namespace(parent: &str, method: &str, path: &str) -> String {
    format!("{}:{}", parent, route_segment(method, path))
}

/// `METHOD:path` with everything outside `[A-Za-z0-9]` replaced and both
/// parts length-capped.
pub fn route_segment(method: &str, path: &str) -> String {
    let method: String = method
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .take(MAX_METHOD_LEN)
        .collect::<String>()
        .to_ascii_uppercase();
    let path: String = path
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .take(MAX_PATH_SEGMENT)
        .collect();
    format!("{}:{}", method, path)
}

/// Lowercased email restricted to `[a-z0-9@._+-]`, length-capped.
pub fn sanitize_email(email: &str) -> String {
    email
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '@' | '.' | '_' | '+' | '-'))
        .take(MAX_EMAIL_LEN)
        .collect()
}

/// Canonical form of an IPv4/IPv6 literal, or `None` for anything else.
pub fn sanitize_address(address: &str) -> Option<String> {
    address
        .trim()
        .parse::<IpAddr>()
        .ok()
        .map(|ip| ip.to_string())
}

/// Identifier for per-client limits. Unparsable addresses share one bucket.
pub fn client_key(address: &str) -> String {
    sanitize_address(address).unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

/// Identifier for per-client, per-account limits such as login attempts.
pub fn client_email_key(address: &str, email: &str) -> String {
    format!("{}:{}", client_key(address), sanitize_email(email))
}

// == Rate Limiter ==
/// Outcome of a limiter check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u64,
    pub current: u64,
    pub remaining: u64,
    pub reset_after_ms: u64,
    /// The counter store failed and the request was let through
    pub skipped: bool,
}

/// Applies a request budget on top of a [`RateLimitStore`].
#[derive(Clone)]
pub struct RateLimiter {
    store: RateLimitStore,
    max_requests: u64,
    skip_on_error: bool,
    trust_proxy: bool,
}

impl RateLimiter {
    pub fn new(
        connection: Arc<ConnectionManager>,
        namespace: &str,
        config: &RateLimitConfig,
    ) -> Self {
        Self {
            store: RateLimitStore::new(connection, namespace, config.window_ms),
            max_requests: config.max_requests,
            skip_on_error: config.skip_on_error,
            trust_proxy: config.trust_proxy,
        }
    }

    pub fn store(&self) -> &RateLimitStore {
        &self.store
    }

    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    /// Whether client addresses may be taken from `X-Forwarded-For`.
    pub fn trust_proxy(&self) -> bool {
        self.trust_proxy
    }

    /// Limiter with the same budget scoped to one route.
    pub fn for_route(&self, method: &str, path: &str) -> RateLimiter {
        Self {
            store: self.store.child_namespace(method, path),
            max_requests: self.max_requests,
            skip_on_error: self.skip_on_error,
            trust_proxy: self.trust_proxy,
        }
    }

    // == Check ==
    /// Counts a hit for `identifier` and decides whether it is within budget.
    ///
    /// With no store configured every request is allowed. When the store
    /// fails, the request is allowed if `skip_on_error` is set and the
    /// error is returned otherwise.
    pub async fn check(&self, identifier: &str) -> Result<RateLimitDecision> {
        if !self.store.connection.is_enabled() {
            return Ok(self.skipped());
        }

        match self.store.increment(identifier).await {
            Ok(count) => Ok(RateLimitDecision {
                allowed: count.current <= self.max_requests,
                limit: self.max_requests,
                current: count.current,
                remaining: self.max_requests.saturating_sub(count.current),
                reset_after_ms: count.ttl_remaining_ms,
                skipped: false,
            }),
            Err(e) if self.skip_on_error => {
                // A missing handle was already reported by the connection manager.
                if e.is_unavailable() {
                    debug!(
                        namespace = %self.store.namespace(),
                        "No rate limit store, allowing request"
                    );
                } else {
                    warn!(
                        namespace = %self.store.namespace(),
                        error = %e,
                        "Rate limit store failed, allowing request"
                    );
                }
                Ok(self.skipped())
            }
            Err(e) => Err(e),
        }
    }

    fn skipped(&self) -> RateLimitDecision {
        RateLimitDecision {
            allowed: true,
            limit: self.max_requests,
            current: 0,
            remaining: self.max_requests,
            reset_after_ms: 0,
            skipped: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::time::Duration;

    fn manager(store: Arc<MemoryStore>) -> Arc<ConnectionManager> {
        Arc::new(ConnectionManager::with_handle(store))
    }

    fn limiter(store: Arc<MemoryStore>, max: u64, skip_on_error: bool) -> RateLimiter {
        RateLimiter::new(
            manager(store),
            "api",
            &RateLimitConfig {
                window_ms: 60_000,
                max_requests: max,
                skip_on_error,
                trust_proxy: false,
            },
        )
    }

    #[tokio::test]
    async fn test_sequential_increments_count_up() {
        let store = RateLimitStore::new(manager(Arc::new(MemoryStore::new())), "auth", 60_000);
        for expected in 1..=5 {
            let count = store.increment("1.2.3.4").await.unwrap();
            assert_eq!(count.current, expected);
        }
    }

    #[tokio::test]
    async fn test_first_increment_reports_window() {
        let store = RateLimitStore::new(manager(Arc::new(MemoryStore::new())), "auth", 60_000);
        let first = store.increment("k").await.unwrap();
        assert!(first.ttl_remaining_ms <= 60_000 && first.ttl_remaining_ms >= 59_000);
    }

    #[tokio::test]
    async fn test_counter_resets_after_window() {
        let store = RateLimitStore::new(manager(Arc::new(MemoryStore::new())), "auth", 50);
        store.increment("k").await.unwrap();
        store.increment("k").await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(store.increment("k").await.unwrap().current, 1);
    }

    #[tokio::test]
    async fn test_get_does_not_count() {
        let store = RateLimitStore::new(manager(Arc::new(MemoryStore::new())), "auth", 60_000);
        assert!(store.get("k").await.unwrap().is_none());
        store.increment("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().unwrap().current, 1);
        assert_eq!(store.get("k").await.unwrap().unwrap().current, 1);
    }

    #[tokio::test]
    async fn test_child_namespaces_do_not_collide() {
        let root = RateLimitStore::new(manager(Arc::new(MemoryStore::new())), "api", 60_000);
        let login = root.child_namespace("post", "/auth/login");
        let signup = root.child_namespace("POST", "/auth/signup");

        assert_eq!(login.namespace(), "api:POST:_auth_login");
        assert_eq!(login.increment("ip").await.unwrap().current, 1);
        assert_eq!(login.increment("ip").await.unwrap().current, 2);
        assert_eq!(signup.increment("ip").await.unwrap().current, 1);
        assert_eq!(root.increment("ip").await.unwrap().current, 1);
    }

    #[tokio::test]
    async fn test_unavailable_store_is_an_error() {
        let memory = Arc::new(MemoryStore::new());
        let store = RateLimitStore::new(manager(memory.clone()), "api", 60_000);
        memory.set_unavailable(true);
        assert!(store.increment("k").await.is_err());
    }

    #[test]
    fn test_route_segment_caps_length() {
        let long_path = format!("/{}", "a".repeat(500));
        let segment = route_segment("GET", &long_path);
        assert_eq!(segment.len(), "GET:".len() + 64);
    }

    #[test]
    fn test_sanitize_email() {
        assert_eq!(sanitize_email("  Alice@Example.COM "), "alice@example.com");
        assert_eq!(sanitize_email("a*b}{c@x.io\r\n"), "abc@x.io");
        assert_eq!(sanitize_email(&"x".repeat(300)).len(), 64);
    }

    #[test]
    fn test_client_email_key() {
        assert_eq!(
            client_email_key("10.0.0.1", "Bob@Mail.com"),
            "10.0.0.1:bob@mail.com"
        );
        assert_eq!(client_key("::1"), "::1");
        assert_eq!(client_key(" 10.0.0.1 "), "10.0.0.1");
        assert_eq!(client_key("1.2.3.4\nrl:*"), UNKNOWN_CLIENT);
        assert_eq!(client_key("not-an-ip"), UNKNOWN_CLIENT);
        assert_eq!(client_key(""), UNKNOWN_CLIENT);
    }

    #[test]
    fn test_sanitize_address_rejects_hex_text() {
        assert_eq!(sanitize_address("deadbeef-cafe"), None);
        assert_eq!(sanitize_address("cafe"), None);
        assert_eq!(
            sanitize_address("2001:DB8::1").as_deref(),
            Some("2001:db8::1")
        );
        assert_eq!(client_email_key("abc", "a@b.io"), "unknown:a@b.io");
    }

    #[tokio::test]
    async fn test_limiter_blocks_after_budget() {
        let limiter = limiter(Arc::new(MemoryStore::new()), 2, false);
        assert!(limiter.check("ip").await.unwrap().allowed);
        let second = limiter.check("ip").await.unwrap();
        assert!(second.allowed);
        assert_eq!(second.remaining, 0);
        let third = limiter.check("ip").await.unwrap();
        assert!(!third.allowed);
        assert!(third.reset_after_ms > 0);
    }

    #[tokio::test]
    async fn test_limiter_fails_open_when_configured() {
        let memory = Arc::new(MemoryStore::new());
        let limiter = limiter(memory.clone(), 1, true);
        memory.set_unavailable(true);
        let decision = limiter.check("ip").await.unwrap();
        assert!(decision.allowed);
        assert!(decision.skipped);
    }

    #[tokio::test]
    async fn test_limiter_fails_closed_when_configured() {
        let memory = Arc::new(MemoryStore::new());
        let limiter = limiter(memory.clone(), 1, false);
        memory.set_unavailable(true);
        assert!(limiter.check("ip").await.is_err());
    }

    #[tokio::test]
    async fn test_failed_connection_is_skipped_quietly() {
        let connection = Arc::new(ConnectionManager::with_connector(
            true,
            Duration::from_millis(50),
            Arc::new(|| -> crate::connection::ConnectFuture {
                Box::pin(async {
                    Err::<Arc<dyn crate::store::StoreHandle>, _>(CacheError::Connection(
                        "refused".to_string(),
                    ))
                })
            }),
        ));
        let limiter = RateLimiter::new(connection, "api", &RateLimitConfig::default());

        let err = limiter.store().increment("ip").await.unwrap_err();
        assert!(err.is_unavailable());
        let decision = limiter.check("ip").await.unwrap();
        assert!(decision.allowed);
        assert!(decision.skipped);
    }

    #[tokio::test]
    async fn test_store_failure_is_not_unavailable() {
        let memory = Arc::new(MemoryStore::new());
        let limiter = limiter(memory.clone(), 1, true);
        memory.set_unavailable(true);
        let err = limiter.store().increment("ip").await.unwrap_err();
        assert!(!err.is_unavailable());
    }

    #[tokio::test]
    async fn test_disabled_store_allows_everything() {
        let limiter = RateLimiter::new(
            Arc::new(ConnectionManager::disabled()),
            "api",
            &RateLimitConfig {
                skip_on_error: false,
                ..RateLimitConfig::default()
            },
        );
        assert!(limiter.check("ip").await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_route_limiters_are_independent() {
        let limiter = limiter(Arc::new(MemoryStore::new()), 1, false);
        let a = limiter.for_route("GET", "/a");
        let b = limiter.for_route("GET", "/b");
        assert!(a.check("ip").await.unwrap().allowed);
        assert!(!a.check("ip").await.unwrap().allowed);
        assert!(b.check("ip").await.unwrap().allowed);
    }
}
