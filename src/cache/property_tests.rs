//! Property-Based Tests for Cache Module
//!
//! Uses proptest to check the façade, counters and key sanitisation against
//! the in-memory store.

use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

use crate::cache::{Cache, CacheMetrics, CachePrefix};
use crate::connection::ConnectionManager;
use crate::idempotency::IdempotencyStore;
use crate::ratelimit::{route_segment, sanitize_email, RateLimitStore};
use crate::store::MemoryStore;

// == Helpers ==
fn cache_over(store: Arc<MemoryStore>) -> Cache {
    Cache::new(
        Arc::new(ConnectionManager::with_handle(store)),
        Arc::new(CacheMetrics::new()),
    )
}

fn manager() -> Arc<ConnectionManager> {
    Arc::new(ConnectionManager::with_handle(Arc::new(MemoryStore::new())))
}

// == Strategies ==
fn id_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_-]{1,32}"
}

fn value_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 ]{0,128}"
}

fn prefix_strategy() -> impl Strategy<Value = CachePrefix> {
    prop::sample::select(CachePrefix::ALL.to_vec())
}

#[derive(Debug, Clone)]
enum CacheOp {
    Set { id: String, value: String },
    Get { id: String },
    Del { id: String },
}

fn cache_op_strategy() -> impl Strategy<Value = CacheOp> {
    // A small id space makes hits likely.
    let id = "[a-d]";
    prop_oneof![
        (id, value_strategy()).prop_map(|(id, value)| CacheOp::Set { id, value }),
        id.prop_map(|id| CacheOp::Get { id }),
        id.prop_map(|id| CacheOp::Del { id }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // A value written under any prefix reads back unchanged.
    #[test]
    fn prop_set_get_roundtrip(
        id in id_strategy(),
        value in value_strategy(),
        prefix in prefix_strategy()
    ) {
        let cache = cache_over(Arc::new(MemoryStore::new()));
        tokio_test::block_on(async {
            prop_assert!(cache.set(&id, &value, prefix.as_str(), None).await);
            let read: Option<String> = cache.get(&id, prefix.as_str()).await;
            prop_assert_eq!(read, Some(value));
            Ok(())
        })?;
    }

    // After a delete the key always misses.
    #[test]
    fn prop_delete_then_miss(id in id_strategy(), value in value_strategy()) {
        let cache = cache_over(Arc::new(MemoryStore::new()));
        tokio_test::block_on(async {
            cache.set(&id, &value, "profile:", None).await;
            prop_assert!(cache.del(&id, "profile:").await);
            let read: Option<String> = cache.get(&id, "profile:").await;
            prop_assert!(read.is_none());
            prop_assert!(!cache.exists(&id, "profile:").await);
            Ok(())
        })?;
    }

    // Hit and miss counters match a model of the operations performed.
    #[test]
    fn prop_metrics_accuracy(ops in prop::collection::vec(cache_op_strategy(), 1..50)) {
        let cache = cache_over(Arc::new(MemoryStore::new()));
        let mut model: HashMap<String, String> = HashMap::new();
        let mut expected_hits = 0u64;
        let mut expected_misses = 0u64;

        tokio_test::block_on(async {
            for op in ops {
                match op {
                    CacheOp::Set { id, value } => {
                        cache.set(&id, &value, "bounty:", None).await;
                        model.insert(id, value);
                    }
                    CacheOp::Get { id } => {
                        let read: Option<String> = cache.get(&id, "bounty:").await;
                        prop_assert_eq!(read.as_ref(), model.get(&id));
                        if read.is_some() {
                            expected_hits += 1;
                        } else {
                            expected_misses += 1;
                        }
                    }
                    CacheOp::Del { id } => {
                        cache.del(&id, "bounty:").await;
                        model.remove(&id);
                    }
                }
            }
            Ok(())
        })?;

        let metrics = cache.get_cache_metrics();
        prop_assert_eq!(metrics.hits, expected_hits);
        prop_assert_eq!(metrics.misses, expected_misses);
        prop_assert_eq!(metrics.errors, 0);
    }

    // Pattern deletes remove exactly the matching keys on every shard.
    #[test]
    fn prop_pattern_delete_counts(
        masters in 1usize..5,
        matching in 0usize..60,
        other in 0usize..20,
        batch in 1usize..25
    ) {
        let store = Arc::new(MemoryStore::cluster(masters));
        let cache = cache_over(store.clone()).with_scan_batch_size(batch);

        tokio_test::block_on(async {
            for i in 0..matching {
                cache.set(&format!("open:{}", i), &i, "bounty-list:", None).await;
            }
            for i in 0..other {
                cache.set(&i.to_string(), &i, "bounty:", None).await;
            }
            prop_assert_eq!(cache.del_pattern("*", "bounty-list:").await, matching as u64);
            prop_assert_eq!(store.len().await, other);
            Ok(())
        })?;
    }

    // Sequential increments inside one window count 1..=N.
    #[test]
    fn prop_rate_limit_counts_sequentially(n in 1u64..40, client in "[0-9.]{1,15}") {
        let store = RateLimitStore::new(manager(), "auth", 60_000);
        tokio_test::block_on(async {
            for expected in 1..=n {
                let count = store.increment(&client).await.map_err(|e| {
                    TestCaseError::fail(e.to_string())
                })?;
                prop_assert_eq!(count.current, expected);
                prop_assert!(count.ttl_remaining_ms <= 60_000);
            }
            Ok(())
        })?;
    }

    // Sanitised route segments are bounded and use a fixed character set.
    #[test]
    fn prop_route_segment_bounded(method in ".{0,40}", path in ".{0,400}") {
        let segment = route_segment(&method, &path);
        let (m, p) = segment.split_once(':').unwrap_or((&segment, ""));
        prop_assert!(m.len() <= 10);
        prop_assert!(p.chars().count() <= 64);
        prop_assert!(m.chars().all(|c| c.is_ascii_uppercase()));
        prop_assert!(p.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
    }

    // Sanitised emails are bounded and use a fixed character set.
    #[test]
    fn prop_sanitize_email_bounded(email in ".{0,300}") {
        let clean = sanitize_email(&email);
        prop_assert!(clean.len() <= 64);
        let charset_ok = clean
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "@._+-".contains(c));
        prop_assert!(charset_ok, "unexpected character in {:?}", clean);
    }

    // check is false before store, true after, and false after remove.
    #[test]
    fn prop_idempotency_lifecycle(key in id_strategy()) {
        let keys = IdempotencyStore::new(manager(), 600);
        tokio_test::block_on(async {
            prop_assert!(!keys.check(&key).await);
            prop_assert!(keys.store(&key, None).await);
            prop_assert!(keys.check(&key).await);
            prop_assert!(keys.remove(&key).await);
            prop_assert!(!keys.check(&key).await);
            Ok(())
        })?;
    }
}
