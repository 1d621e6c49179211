use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{ConfigError, Validate, WithDefaults};

/// Security configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SecurityConfig {
    /// Rate limiting configuration
    #[serde(default = "RateLimitConfig::default")]
    pub rate_limit: RateLimitConfig,
}

/// Rate limiting configuration
///
/// The policy table is static: it is read once at startup and never mutated
/// at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Enable rate limiting in the guard
    #[serde(default = "default_rate_limit_enabled")]
    pub enabled: bool,
    /// How long an explicit block lasts, in seconds
    #[serde(default = "default_rate_limit_block_duration")]
    pub block_duration: u64,
    /// Per-action request budgets
    #[serde(default = "default_rate_limit_policies")]
    pub policies: HashMap<String, RateLimitPolicyConfig>,
}

/// Request budget for a single action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicyConfig {
    /// Requests admitted per window
    pub max_requests: u32,
    /// Window length in seconds
    pub time_window: u64,
}

fn default_rate_limit_enabled() -> bool {
    true
}

fn default_rate_limit_block_duration() -> u64 {
    3600 // 1 hour
}

fn default_rate_limit_policies() -> HashMap<String, RateLimitPolicyConfig> {
    [
        ("create_activity", 10, 60),
        ("get_activities", 20, 60),
        ("export_activity", 3, 60),
    ]
    .into_iter()
    .map(|(action, max_requests, time_window)| {
        (
            action.to_string(),
            RateLimitPolicyConfig {
                max_requests,
                time_window,
            },
        )
    })
    .collect()
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_rate_limit_enabled(),
            block_duration: default_rate_limit_block_duration(),
            policies: default_rate_limit_policies(),
        }
    }
}

impl Validate for SecurityConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.rate_limit.validate()
    }
}

impl Validate for RateLimitConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.block_duration == 0 {
            return Err(ConfigError::ValidationError(
                "security.rate_limit.block_duration must be > 0".to_string(),
            ));
        }
        for (action, policy) in &self.policies {
            if action.is_empty() || action.contains(':') {
                return Err(ConfigError::ValidationError(format!(
                    "security.rate_limit.policies: invalid action name {:?}",
                    action
                )));
            }
            if policy.max_requests == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "security.rate_limit.policies.{}.max_requests must be > 0",
                    action
                )));
            }
            if policy.time_window == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "security.rate_limit.policies.{}.time_window must be > 0",
                    action
                )));
            }
        }
        Ok(())
    }
}

impl WithDefaults for SecurityConfig {
    fn with_defaults() -> Self {
        Self::default()
    }
}

impl WithDefaults for RateLimitConfig {
    fn with_defaults() -> Self {
        Self::default()
    }
}
