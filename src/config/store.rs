use serde::{Deserialize, Serialize};

use super::{ConfigError, Validate, WithDefaults};

/// Which shared state store to connect to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process store, visible to a single instance only
    Memory,
    /// Redis, shared by every instance
    Redis,
}

/// Shared state store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend type
    #[serde(default = "default_store_backend")]
    pub backend: StoreBackend,
    /// Connection URL (Redis only)
    #[serde(default = "default_store_url")]
    pub url: String,
    /// Optional key namespace prefix (Redis only)
    #[serde(default)]
    pub prefix: Option<String>,
    /// Connection timeout in milliseconds
    #[serde(default = "default_store_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Per-operation client-side timeout in milliseconds
    #[serde(default = "default_store_operation_timeout")]
    pub operation_timeout_ms: u64,
}

fn default_store_backend() -> StoreBackend {
    StoreBackend::Memory
}

fn default_store_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_store_connect_timeout() -> u64 {
    3000
}

fn default_store_operation_timeout() -> u64 {
    250
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            url: default_store_url(),
            prefix: None,
            connect_timeout_ms: default_store_connect_timeout(),
            operation_timeout_ms: default_store_operation_timeout(),
        }
    }
}

impl Validate for StoreConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.backend == StoreBackend::Redis && self.url.is_empty() {
            return Err(ConfigError::ValidationError(
                "store.url cannot be empty when backend is redis".to_string(),
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "store.connect_timeout_ms must be > 0".to_string(),
            ));
        }
        if self.operation_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "store.operation_timeout_ms must be > 0".to_string(),
            ));
        }
        if self.prefix.as_deref().is_some_and(str::is_empty) {
            return Err(ConfigError::ValidationError(
                "store.prefix cannot be empty when set".to_string(),
            ));
        }
        Ok(())
    }
}

impl WithDefaults for StoreConfig {
    fn with_defaults() -> Self {
        Self::default()
    }
}
