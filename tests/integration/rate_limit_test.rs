//! Rate limiting and client blocks across limiter instances sharing a store

use activity_guard::security::{RateLimitConfig, RateLimitPolicy, RateLimiter};
use activity_guard::store::{KeyTtl, MemoryStore, SharedStore, StateStore, StoreResult};
use async_trait::async_trait;
use std::time::Duration;

/// Memory store that pays a network round trip on every call
#[derive(Debug, Default)]
struct RemoteStore {
    inner: MemoryStore,
}

const ROUND_TRIP: Duration = Duration::from_millis(5);

#[async_trait]
impl StateStore for RemoteStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        tokio::time::sleep(ROUND_TRIP).await;
        self.inner.get(key).await
    }
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> StoreResult<()> {
        tokio::time::sleep(ROUND_TRIP).await;
        self.inner.set(key, value, ttl).await
    }
    async fn delete(&self, key: &str) -> StoreResult<bool> {
        tokio::time::sleep(ROUND_TRIP).await;
        self.inner.delete(key).await
    }
    async fn incr(&self, key: &str, delta: i64) -> StoreResult<i64> {
        tokio::time::sleep(ROUND_TRIP).await;
        self.inner.incr(key, delta).await
    }
    async fn admit_window(
        &self,
        key: &str,
        max_requests: u32,
        window: Duration,
        now: f64,
    ) -> StoreResult<bool> {
        tokio::time::sleep(ROUND_TRIP).await;
        self.inner.admit_window(key, max_requests, window, now).await
    }
    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        tokio::time::sleep(ROUND_TRIP).await;
        self.inner.keys(pattern).await
    }
    async fn ttl(&self, key: &str) -> StoreResult<KeyTtl> {
        tokio::time::sleep(ROUND_TRIP).await;
        self.inner.ttl(key).await
    }
    async fn memory_usage(&self) -> StoreResult<Option<u64>> {
        self.inner.memory_usage().await
    }
    async fn ping(&self) -> StoreResult<()> {
        self.inner.ping().await
    }
}

fn config() -> RateLimitConfig {
    RateLimitConfig {
        policies: Default::default(),
        block_duration: Duration::from_secs(3600),
    }
    .with_policy("export_activity", RateLimitPolicy::new(3, Duration::from_millis(200)))
    .with_policy("get_activities", RateLimitPolicy::new(20, Duration::from_secs(60)))
}

fn instances() -> (RateLimiter, RateLimiter) {
    let store = SharedStore::new(MemoryStore::new());
    (
        RateLimiter::with_config(store.clone(), config()),
        RateLimiter::with_config(store, config()),
    )
}

#[tokio::test]
async fn test_budget_is_shared_between_instances() {
    let (a, b) = instances();

    assert!(a.check_rate_limit("student-1", "export_activity").await);
    assert!(b.check_rate_limit("student-1", "export_activity").await);
    assert!(a.check_rate_limit("student-1", "export_activity").await);

    assert!(!b.check_rate_limit("student-1", "export_activity").await);
    assert!(!a.check_rate_limit("student-1", "export_activity").await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_burst_across_instances_stays_within_budget() {
    let store = SharedStore::new(RemoteStore::default());
    let a = RateLimiter::with_config(store.clone(), config());
    let b = RateLimiter::with_config(store, config());

    let mut handles = vec![];
    for i in 0..50 {
        let limiter = if i % 2 == 0 { a.clone() } else { b.clone() };
        handles.push(tokio::spawn(async move {
            limiter.check_rate_limit("student-1", "export_activity").await
        }));
    }

    let allowed = futures_util::future::join_all(handles)
        .await
        .into_iter()
        .filter(|r| *r.as_ref().unwrap())
        .count();

    // Budget for export_activity is 3
    assert!(allowed <= 3 + 1, "allowed {} of 50 with budget 3", allowed);
    assert!(allowed >= 3, "allowed {} of 50 with budget 3", allowed);
}

#[tokio::test]
async fn test_window_rolls_over() {
    let (a, b) = instances();

    for _ in 0..3 {
        assert!(a.check_rate_limit("student-1", "export_activity").await);
    }
    assert!(!b.check_rate_limit("student-1", "export_activity").await);

    tokio::time::sleep(Duration::from_millis(250)).await;

    assert!(b.check_rate_limit("student-1", "export_activity").await);
    let stats = a.get_rate_limit_stats("student-1").await;
    assert_eq!(stats["export_activity"].current_count, 1);
}

#[tokio::test]
async fn test_clients_and_actions_are_independent() {
    let (a, _) = instances();

    for _ in 0..3 {
        a.check_rate_limit("student-1", "export_activity").await;
    }

    assert!(!a.check_rate_limit("student-1", "export_activity").await);
    assert!(a.check_rate_limit("student-2", "export_activity").await);
    assert!(a.check_rate_limit("student-1", "get_activities").await);
}

#[tokio::test]
async fn test_stats_cover_every_configured_action() {
    let (a, _) = instances();

    a.check_rate_limit("student-1", "get_activities").await;
    a.check_rate_limit("student-1", "get_activities").await;

    let stats = a.get_rate_limit_stats("student-1").await;
    assert_eq!(stats.len(), 2);
    assert_eq!(stats["get_activities"].current_count, 2);
    assert_eq!(stats["get_activities"].max_allowed, 20);
    assert_eq!(stats["export_activity"].current_count, 0);

    let untouched = a.get_rate_limit_stats("student-9").await;
    assert!(untouched.values().all(|stat| stat.current_count == 0));
}

#[tokio::test]
async fn test_block_is_visible_from_other_instance() {
    let (a, b) = instances();

    assert!(a.block_user("student-1", "abusive exports").await);
    assert_eq!(
        b.is_user_blocked("student-1").await.as_deref(),
        Some("abusive exports")
    );
    assert_eq!(b.is_user_blocked("student-2").await, None);

    assert!(b.unblock_user("student-1").await);
    assert_eq!(a.is_user_blocked("student-1").await, None);
}

#[tokio::test]
async fn test_block_expires() {
    let (a, _) = instances();

    a.block_user_for("student-1", "cool-off", Duration::from_millis(50)).await;
    assert!(a.is_user_blocked("student-1").await.is_some());

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(a.is_user_blocked("student-1").await, None);
}

#[tokio::test]
#[should_panic(expected = "no rate limit policy")]
async fn test_unconfigured_action_panics() {
    let (a, _) = instances();
    a.check_rate_limit("student-1", "delete_everything").await;
}
