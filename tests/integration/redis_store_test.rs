//! The breaker, limiter and cache against a live Redis
//!
//! Run with: REDIS_URL=redis://localhost:6379 cargo test --features redis-store -- --ignored

#![cfg(feature = "redis-store")]

use activity_guard::cache::CacheManager;
use activity_guard::resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use activity_guard::security::{RateLimitConfig, RateLimitPolicy, RateLimiter};
use activity_guard::store::{RedisStore, SharedStore};
use std::time::Duration;

async fn redis_store(prefix: &str) -> SharedStore {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    let store = RedisStore::new(&url, Some(prefix))
        .await
        .expect("Failed to connect to Redis");
    let store = SharedStore::new(store);

    for key in store.keys("*").await.unwrap() {
        store.delete(&key).await.unwrap();
    }
    store
}

#[tokio::test]
#[ignore]
async fn test_circuit_opens_and_recovers_on_redis() {
    let store = redis_store("guard-it-circuit").await;
    let breaker = CircuitBreaker::with_config(
        store,
        CircuitBreakerConfig {
            failure_threshold: 2,
            success_threshold: 1,
            reset_timeout: Duration::from_millis(200),
        },
    );

    breaker.record_failure("grading-db").await;
    breaker.record_failure("grading-db").await;
    assert!(!breaker.check_circuit("grading-db").await);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(breaker.check_circuit("grading-db").await);

    breaker.record_success("grading-db").await;
    let stats = breaker.get_circuit_stats("grading-db").await.unwrap();
    assert_eq!(stats.state, CircuitState::Closed);
    assert_eq!(stats.failures, 0);
}

#[tokio::test]
#[ignore]
async fn test_rate_limit_and_block_on_redis() {
    let store = redis_store("guard-it-limit").await;
    let limiter = RateLimiter::with_config(
        store,
        RateLimitConfig::default()
            .with_policy("export_activity", RateLimitPolicy::new(2, Duration::from_secs(60))),
    );

    assert!(limiter.check_rate_limit("student-1", "export_activity").await);
    assert!(limiter.check_rate_limit("student-1", "export_activity").await);
    assert!(!limiter.check_rate_limit("student-1", "export_activity").await);

    limiter
        .block_user_for("student-1", "manual review", Duration::from_secs(5))
        .await;
    assert_eq!(
        limiter.is_user_blocked("student-1").await.as_deref(),
        Some("manual review")
    );
}

#[tokio::test]
#[ignore]
async fn test_cache_pattern_invalidation_on_redis() {
    let store = redis_store("guard-it-cache").await;
    let cache = CacheManager::new(store);

    cache.set("activity:1:overview", b"a").await;
    cache.set("activity:1:results", b"b").await;
    cache.set("activity:2:overview", b"c").await;

    assert_eq!(cache.invalidate_pattern("activity:1:").await, 2);
    assert!(cache.get("activity:2:overview").await.is_some());

    let stats = cache.get_cache_stats().await;
    assert_eq!(stats.total_entries, 1);
    assert!(stats.memory_usage.is_some());
}
