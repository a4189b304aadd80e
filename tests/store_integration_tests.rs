//! Integration Tests for the Cache, Rate Limit and Idempotency Stores
//!
//! Drives the public API the way business services do, including the
//! degraded paths when the store is unreachable.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cachekeep::cache::{CacheMetrics, CachePrefix};
use cachekeep::connection::{ConnectFuture, Connector};
use cachekeep::ratelimit::client_email_key;
use cachekeep::{
    Cache, CacheError, ConnectionManager, ConnectionState, IdempotencyStore, MemoryStore,
    RateLimitStore, StoreHandle,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Profile {
    id: String,
    name: String,
    reputation: u32,
}

fn cache_over(connection: Arc<ConnectionManager>) -> Cache {
    Cache::new(connection, Arc::new(CacheMetrics::new())).with_scan_batch_size(10)
}

fn failing_connector(calls: Arc<AtomicUsize>) -> Connector {
    Arc::new(move || -> ConnectFuture {
        calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Err(CacheError::Connection("connection refused".to_string())) })
    })
}

// == Cache ==

#[tokio::test]
async fn test_profile_roundtrip_and_invalidation() {
    let connection = Arc::new(ConnectionManager::with_handle(Arc::new(MemoryStore::new())));
    let cache = cache_over(connection);
    let profile = Profile {
        id: "u1".to_string(),
        name: "Ada".to_string(),
        reputation: 12,
    };

    assert!(cache.set("u1", &profile, CachePrefix::Profile.as_str(), None).await);
    let cached: Option<Profile> = cache.get("u1", CachePrefix::Profile.as_str()).await;
    assert_eq!(cached, Some(profile));

    assert!(cache.invalidate().profile("u1").await);
    let cached: Option<Profile> = cache.get("u1", CachePrefix::Profile.as_str()).await;
    assert!(cached.is_none());
}

#[tokio::test]
async fn test_hit_rate_after_hits_and_misses() {
    let connection = Arc::new(ConnectionManager::with_handle(Arc::new(MemoryStore::new())));
    let cache = cache_over(connection);
    cache
        .set("u1", &serde_json::json!({ "name": "Alice" }), "profile:", None)
        .await;

    for _ in 0..10 {
        let hit: Option<serde_json::Value> = cache.get("u1", "profile:").await;
        assert_eq!(hit.unwrap()["name"], "Alice");
    }
    for id in ["u2", "u3"] {
        let miss: Option<serde_json::Value> = cache.get(id, "profile:").await;
        assert!(miss.is_none());
    }

    let metrics = cache.get_cache_metrics();
    assert_eq!(metrics.hits, 10);
    assert_eq!(metrics.misses, 2);
    assert!((metrics.hit_rate - 10.0 / 12.0).abs() < 1e-9);

    cache.reset_metrics();
    assert_eq!(cache.get_cache_metrics().hits, 0);
}

#[tokio::test]
async fn test_bounty_invalidation_clears_listings_on_every_master() {
    let store = Arc::new(MemoryStore::cluster(3));
    let cache = cache_over(Arc::new(ConnectionManager::with_handle(store.clone())));

    cache.set("b7", &"bounty", "bounty:", None).await;
    for page in 0..40 {
        cache
            .set(&format!("open:{}", page), &vec![page], "bounty-list:", None)
            .await;
    }
    cache.set("u1", &"profile", "profile:", None).await;

    assert!(cache.invalidate().bounty("b7").await);
    assert_eq!(store.len().await, 1);
    assert!(cache.exists("u1", "profile:").await);
}

#[tokio::test]
async fn test_partial_failure_keeps_other_masters_counts() {
    let store = Arc::new(MemoryStore::cluster(2));
    let cache = cache_over(Arc::new(ConnectionManager::with_handle(store.clone())));
    for i in 0..50 {
        cache.set(&i.to_string(), &i, "bounty-list:", None).await;
    }
    let healthy = store.shards()[0].len().await as u64;
    store.shards()[1].fail_scans(true);

    let report = cache.del_pattern_report("*", "bounty-list:").await;
    assert_eq!(report.deleted, healthy);
    assert_eq!(report.interrupted, 1);
    assert_eq!(cache.get_cache_metrics().errors, 1);
}

#[tokio::test]
async fn test_unreachable_store_degrades_silently() {
    let calls = Arc::new(AtomicUsize::new(0));
    let connection = Arc::new(ConnectionManager::with_connector(
        true,
        Duration::from_millis(100),
        failing_connector(calls.clone()),
    ));
    let cache = cache_over(Arc::clone(&connection));

    let value: Option<String> = cache.get("u1", "profile:").await;
    assert!(value.is_none());
    assert!(!cache.set("u1", &"x", "profile:", None).await);
    assert!(!cache.del("u1", "profile:").await);
    assert!(!cache.exists("u1", "profile:").await);
    assert!(!cache.expire("u1", "profile:", 10).await);
    assert_eq!(cache.del_pattern("*", "profile:").await, 0);
    assert!(cache.get_stats().await.is_none());
    assert!(!cache.flush_all().await);

    assert_eq!(calls.load(Ordering::SeqCst), 1, "failed connection is not retried");
    assert_eq!(connection.state(), ConnectionState::Error);

    connection.close().await;
    assert_eq!(connection.state(), ConnectionState::Disconnected);
    let _: Option<String> = cache.get("u1", "profile:").await;
    assert_eq!(calls.load(Ordering::SeqCst), 2, "close allows a fresh attempt");
}

// == Rate Limiting ==

#[tokio::test]
async fn test_login_limiter_counts_per_client_and_email() {
    let connection = Arc::new(ConnectionManager::with_handle(Arc::new(MemoryStore::new())));
    let auth = RateLimitStore::new(connection, "auth", 60_000);
    let login = auth.child_namespace("POST", "/auth/login");

    let alice = client_email_key("10.0.0.1", "Alice@Example.com");
    let bob = client_email_key("10.0.0.1", "bob@example.com");

    for expected in 1..=4 {
        assert_eq!(login.increment(&alice).await.unwrap().current, expected);
    }
    assert_eq!(login.increment(&bob).await.unwrap().current, 1);
    assert_eq!(login.get(&alice).await.unwrap().unwrap().current, 4);
}

#[tokio::test]
async fn test_concurrent_increments_are_not_lost() {
    let store = Arc::new(MemoryStore::new());
    let limiter = RateLimitStore::new(
        Arc::new(ConnectionManager::with_handle(store.clone())),
        "api",
        60_000,
    );

    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.increment("203.0.113.5").await.unwrap().current })
        })
        .collect();
    let mut seen = Vec::new();
    for task in tasks {
        seen.push(task.await.unwrap());
    }
    seen.sort_unstable();
    assert_eq!(seen, (1..=20).collect::<Vec<u64>>());

    let window = store
        .peek_counter(&limiter.key_for("203.0.113.5"))
        .await
        .unwrap()
        .unwrap();
    assert!(window.ttl_remaining_ms > 0, "counter always carries a TTL");
}

// == Idempotency ==

#[tokio::test]
async fn test_webhook_retry_is_deduplicated() {
    let connection = Arc::new(ConnectionManager::with_handle(Arc::new(MemoryStore::new())));
    let keys = IdempotencyStore::new(connection, 600);

    // First delivery claims the key, the retry sees it.
    assert!(keys.try_claim("evt_1", None).await.unwrap());
    assert!(!keys.try_claim("evt_1", None).await.unwrap());
    assert!(keys.check("evt_1").await);

    // A failed operation releases the key for the next retry.
    assert!(keys.remove("evt_1").await);
    assert!(keys.try_claim("evt_1", None).await.unwrap());
}

#[tokio::test]
async fn test_idempotency_policy_when_store_unreachable() {
    let calls = Arc::new(AtomicUsize::new(0));
    let connection = Arc::new(ConnectionManager::with_connector(
        true,
        Duration::from_millis(100),
        failing_connector(calls),
    ));
    let keys = IdempotencyStore::new(connection, 600);

    assert!(!keys.check("refund-1").await, "generic check fails open");
    assert!(keys.check_strict("refund-1").await.is_err(), "strict check fails closed");
}
