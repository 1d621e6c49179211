//! Unit tests for configuration loading
//!
//! This test suite ensures the configuration system works correctly across
//! all scenarios including:
//! - Loading default configuration
//! - Environment variable precedence
//! - Configuration validation
//! - Invalid value detection

use activity_guard::config::*;
use serial_test::serial;
use std::env;
use std::time::Duration;

mod utils {
    /// Clean up environment variables with ACTIVITY_GUARD prefix
    pub fn clean_env_vars() {
        let keys: Vec<String> = std::env::vars()
            .filter(|(k, _)| k.starts_with("ACTIVITY_GUARD"))
            .map(|(k, _)| k)
            .collect();

        for key in keys {
            unsafe { std::env::remove_var(&key) };
        }
        unsafe { std::env::remove_var("APP_ENV") };
    }
}

// =============================================================================
// Loading
// =============================================================================

#[test]
#[serial]
fn test_load_default_config_success() {
    utils::clean_env_vars();

    let config = load();
    assert!(config.is_ok(), "Failed to load default configuration: {:?}", config.err());
    let config = config.unwrap();

    assert_eq!(config.app.name, "activity-guard");
    assert_eq!(config.store.backend, StoreBackend::Memory);
    assert_eq!(config.store.operation_timeout_ms, 250);

    assert!(config.cache.enabled);
    assert_eq!(config.cache.default_ttl, 3600);

    let breaker = &config.resilience.circuit_breaker;
    assert_eq!(breaker.failure_threshold, 5);
    assert_eq!(breaker.reset_timeout, 60);
    assert_eq!(breaker.success_threshold, 3);

    let rate_limit = &config.security.rate_limit;
    assert_eq!(rate_limit.block_duration, 3600);
    assert_eq!(
        rate_limit.policies.get("export_activity"),
        Some(&RateLimitPolicyConfig {
            max_requests: 3,
            time_window: 60
        })
    );

    utils::clean_env_vars();
}

#[test]
#[serial]
fn test_environment_variable_override() {
    utils::clean_env_vars();

    unsafe {
        env::set_var("ACTIVITY_GUARD__STORE__BACKEND", "redis");
        env::set_var("ACTIVITY_GUARD__STORE__URL", "redis://cache.internal:6379");
        env::set_var("ACTIVITY_GUARD__RESILIENCE__CIRCUIT_BREAKER__FAILURE_THRESHOLD", "9");
        env::set_var(
            "ACTIVITY_GUARD__SECURITY__RATE_LIMIT__POLICIES__EXPORT_ACTIVITY__MAX_REQUESTS",
            "5",
        );
    }

    let config = load();
    utils::clean_env_vars();
    let config = config.unwrap();

    assert_eq!(config.store.backend, StoreBackend::Redis);
    assert_eq!(config.store.url, "redis://cache.internal:6379");
    assert_eq!(config.resilience.circuit_breaker.failure_threshold, 9);

    let export = config.security.rate_limit.policies["export_activity"];
    assert_eq!(export.max_requests, 5);
    assert_eq!(export.time_window, 60, "File value should survive a partial override");
}

#[test]
#[serial]
fn test_missing_environment_file_is_not_an_error() {
    utils::clean_env_vars();
    unsafe { env::set_var("APP_ENV", "nonexistent-environment") };

    let config = load();
    utils::clean_env_vars();

    assert!(config.is_ok());
}

#[test]
#[serial]
fn test_invalid_env_value_fails_validation() {
    utils::clean_env_vars();
    unsafe { env::set_var("ACTIVITY_GUARD__CACHE__DEFAULT_TTL", "0") };

    let result = load();
    utils::clean_env_vars();

    match result {
        Err(ConfigError::ValidationError(msg)) => assert!(msg.contains("cache.default_ttl")),
        other => panic!("Expected ValidationError for zero cache TTL, got {:?}", other),
    }
}

// =============================================================================
// Validation
// =============================================================================

fn assert_validation_error(config: &AppConfig, needle: &str) {
    match config.validate() {
        Err(ConfigError::ValidationError(msg)) => {
            assert!(msg.contains(needle), "{:?} should mention {:?}", msg, needle)
        }
        other => panic!("Expected ValidationError mentioning {}, got {:?}", needle, other),
    }
}

#[test]
fn test_config_with_defaults_validates() {
    assert!(AppConfig::with_defaults().validate().is_ok());
}

#[test]
fn test_validation_empty_app_name() {
    let mut config = AppConfig::with_defaults();
    config.app.name = "".to_string();
    assert_validation_error(&config, "app.name");
}

#[test]
fn test_validation_redis_without_url() {
    let mut config = AppConfig::with_defaults();
    config.store.backend = StoreBackend::Redis;
    config.store.url = "".to_string();
    assert_validation_error(&config, "store.url");
}

#[test]
fn test_validation_memory_backend_ignores_url() {
    let mut config = AppConfig::with_defaults();
    config.store.url = "".to_string();
    assert!(config.validate().is_ok());
}

#[test]
fn test_validation_zero_operation_timeout() {
    let mut config = AppConfig::with_defaults();
    config.store.operation_timeout_ms = 0;
    assert_validation_error(&config, "operation_timeout_ms");
}

#[test]
fn test_validation_zero_failure_threshold() {
    let mut config = AppConfig::with_defaults();
    config.resilience.circuit_breaker.failure_threshold = 0;
    assert_validation_error(&config, "failure_threshold");
}

#[test]
fn test_validation_zero_reset_timeout() {
    let mut config = AppConfig::with_defaults();
    config.resilience.circuit_breaker.reset_timeout = 0;
    assert_validation_error(&config, "reset_timeout");
}

#[test]
fn test_validation_zero_policy_window() {
    let mut config = AppConfig::with_defaults();
    config.security.rate_limit.policies.insert(
        "bulk_import".to_string(),
        RateLimitPolicyConfig {
            max_requests: 1,
            time_window: 0,
        },
    );
    assert_validation_error(&config, "bulk_import.time_window");
}

#[test]
fn test_validation_action_name_with_key_separator() {
    let mut config = AppConfig::with_defaults();
    config.security.rate_limit.policies.insert(
        "export:all".to_string(),
        RateLimitPolicyConfig {
            max_requests: 1,
            time_window: 60,
        },
    );
    assert_validation_error(&config, "export:all");
}

// =============================================================================
// Conversion into runtime settings
// =============================================================================

#[test]
fn test_runtime_settings_from_defaults() {
    let config = AppConfig::with_defaults();

    let breaker =
        activity_guard::resilience::CircuitBreakerConfig::from(&config.resilience.circuit_breaker);
    assert_eq!(breaker.reset_timeout, Duration::from_secs(60));

    let limits = activity_guard::security::RateLimitConfig::from(&config.security.rate_limit);
    assert_eq!(limits.block_duration, Duration::from_secs(3600));
    assert_eq!(
        limits.policies["get_activities"].time_window,
        Duration::from_secs(60)
    );
}
