use serde::{Deserialize, Serialize};

use super::{ConfigError, Validate, WithDefaults};

/// Resilience configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ResilienceConfig {
    /// Circuit breaker configuration
    #[serde(default = "CircuitBreakerConfig::default")]
    pub circuit_breaker: CircuitBreakerConfig,
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Enable circuit breaker checks in the guard
    #[serde(default = "default_circuit_breaker_enabled")]
    pub enabled: bool,
    /// Number of failures before opening the circuit
    #[serde(default = "default_circuit_breaker_failure_threshold")]
    pub failure_threshold: u32,
    /// Seconds after the last failure before a trial request is let through
    #[serde(default = "default_circuit_breaker_reset_timeout")]
    pub reset_timeout: u64,
    /// Number of successful trial requests needed to close the circuit
    #[serde(default = "default_circuit_breaker_success_threshold")]
    pub success_threshold: u32,
}

fn default_circuit_breaker_enabled() -> bool {
    true
}

fn default_circuit_breaker_failure_threshold() -> u32 {
    5
}

fn default_circuit_breaker_reset_timeout() -> u64 {
    60 // 1 minute
}

fn default_circuit_breaker_success_threshold() -> u32 {
    3
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: default_circuit_breaker_enabled(),
            failure_threshold: default_circuit_breaker_failure_threshold(),
            reset_timeout: default_circuit_breaker_reset_timeout(),
            success_threshold: default_circuit_breaker_success_threshold(),
        }
    }
}

impl Validate for ResilienceConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.circuit_breaker.validate()
    }
}

impl Validate for CircuitBreakerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "resilience.circuit_breaker.failure_threshold must be > 0".to_string(),
            ));
        }
        if self.reset_timeout == 0 {
            return Err(ConfigError::ValidationError(
                "resilience.circuit_breaker.reset_timeout must be > 0".to_string(),
            ));
        }
        if self.success_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "resilience.circuit_breaker.success_threshold must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl WithDefaults for ResilienceConfig {
    fn with_defaults() -> Self {
        Self::default()
    }
}

impl WithDefaults for CircuitBreakerConfig {
    fn with_defaults() -> Self {
        Self::default()
    }
}
