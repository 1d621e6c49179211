//! Circuit breaker lifecycle across breaker instances sharing a store

use activity_guard::resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};
use activity_guard::store::{MemoryStore, SharedStore};
use std::time::Duration;

const DEPENDENCY: &str = "assessment-api";

fn config() -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: 3,
        success_threshold: 2,
        reset_timeout: Duration::from_millis(100),
    }
}

/// Two breakers over one store, standing in for two service instances
fn instances() -> (CircuitBreaker, CircuitBreaker) {
    let store = SharedStore::new(MemoryStore::new());
    (
        CircuitBreaker::with_config(store.clone(), config()),
        CircuitBreaker::with_config(store, config()),
    )
}

#[tokio::test]
async fn test_failures_from_any_instance_open_the_circuit_for_all() {
    let (a, b) = instances();

    a.record_failure(DEPENDENCY).await;
    b.record_failure(DEPENDENCY).await;
    assert!(a.check_circuit(DEPENDENCY).await);

    a.record_failure(DEPENDENCY).await;

    assert!(!a.check_circuit(DEPENDENCY).await);
    assert!(!b.check_circuit(DEPENDENCY).await);

    let stats = b.get_circuit_stats(DEPENDENCY).await.unwrap();
    assert_eq!(stats.state, CircuitState::Open);
    assert_eq!(stats.failures, 3);
    assert_eq!(stats.threshold, 3);
    assert!(stats.last_failure.is_some());
}

#[tokio::test]
async fn test_full_recovery_cycle() {
    let (a, b) = instances();

    for _ in 0..3 {
        a.record_failure(DEPENDENCY).await;
    }
    assert!(!b.check_circuit(DEPENDENCY).await);

    tokio::time::sleep(Duration::from_millis(150)).await;

    // First check after the timeout admits a trial request
    assert!(b.check_circuit(DEPENDENCY).await);
    assert_eq!(
        a.get_circuit_stats(DEPENDENCY).await.unwrap().state,
        CircuitState::HalfOpen
    );

    a.record_success(DEPENDENCY).await;
    assert_eq!(
        a.get_circuit_stats(DEPENDENCY).await.unwrap().state,
        CircuitState::HalfOpen
    );

    b.record_success(DEPENDENCY).await;

    let stats = a.get_circuit_stats(DEPENDENCY).await.unwrap();
    assert_eq!(stats.state, CircuitState::Closed);
    assert_eq!(stats.failures, 0);
    assert_eq!(stats.successes, 0);
    assert_eq!(stats.last_failure, None);
}

#[tokio::test]
async fn test_trial_failure_reopens() {
    let (a, b) = instances();

    for _ in 0..3 {
        a.record_failure(DEPENDENCY).await;
    }
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(a.check_circuit(DEPENDENCY).await);

    b.record_failure(DEPENDENCY).await;

    assert!(!a.check_circuit(DEPENDENCY).await);
    assert_eq!(
        b.get_circuit_stats(DEPENDENCY).await.unwrap().state,
        CircuitState::Open
    );
}

#[tokio::test]
async fn test_manual_reset_is_visible_everywhere() {
    let (a, b) = instances();

    for _ in 0..3 {
        a.record_failure(DEPENDENCY).await;
    }
    b.reset_circuit(DEPENDENCY).await;

    assert!(a.check_circuit(DEPENDENCY).await);
    assert_eq!(
        a.get_circuit_stats(DEPENDENCY).await.unwrap().failures,
        0
    );
}

#[tokio::test]
async fn test_dependencies_are_independent() {
    let (a, _) = instances();

    for _ in 0..3 {
        a.record_failure("grading-db").await;
    }

    assert!(!a.check_circuit("grading-db").await);
    assert!(a.check_circuit(DEPENDENCY).await);
}

#[tokio::test]
async fn test_call_wraps_operation() {
    let (a, _) = instances();

    for _ in 0..3 {
        let result = a
            .call(DEPENDENCY, async { Err::<(), _>(std::io::Error::other("boom")) })
            .await;
        assert!(matches!(result, Err(CircuitBreakerError::Inner(_))));
    }

    let result = a.call(DEPENDENCY, async { Ok::<_, std::io::Error>(1) }).await;
    match result {
        Err(CircuitBreakerError::Open { dependency }) => assert_eq!(dependency, DEPENDENCY),
        other => panic!("Expected open circuit, got {:?}", other.map_err(|e| e.to_string())),
    }
}

#[tokio::test]
async fn test_stats_serialize_for_admin_views() {
    let (a, _) = instances();

    for _ in 0..3 {
        a.record_failure(DEPENDENCY).await;
    }

    let stats = a.get_circuit_stats(DEPENDENCY).await.unwrap();
    let json = serde_json::to_value(&stats).unwrap();

    assert_eq!(json["state"], "OPEN");
    assert_eq!(json["failures"], 3);
    assert_eq!(json["threshold"], 3);
}
