use serde::{Deserialize, Serialize};

use super::{ConfigError, Validate, WithDefaults};

/// Result cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Enable result caching in the guard
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    /// Default entry lifetime in seconds
    #[serde(default = "default_cache_ttl")]
    pub default_ttl: u64,
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_ttl() -> u64 {
    3600 // 1 hour
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            default_ttl: default_cache_ttl(),
        }
    }
}

impl Validate for CacheConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.default_ttl == 0 {
            return Err(ConfigError::ValidationError(
                "cache.default_ttl must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl WithDefaults for CacheConfig {
    fn with_defaults() -> Self {
        Self::default()
    }
}
