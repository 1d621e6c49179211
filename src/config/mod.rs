pub mod app;
pub mod cache;
pub mod resilience;
pub mod security;
pub mod store;

pub use app::{AppConfig, AppMetadata, ObservabilityConfig};
pub use cache::CacheConfig;
pub use resilience::{CircuitBreakerConfig, ResilienceConfig};
pub use security::{RateLimitConfig, RateLimitPolicyConfig, SecurityConfig};
pub use store::{StoreBackend, StoreConfig};

/// Errors raised while loading or validating configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A source could not be read or deserialized
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),
    /// A value was read but is out of range
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Range checks run after deserialization
pub trait Validate {
    fn validate(&self) -> Result<(), ConfigError>;
}

/// Construct a section from its built-in defaults
pub trait WithDefaults {
    fn with_defaults() -> Self;
}

/// Load the application configuration from files and environment variables
pub fn load() -> Result<AppConfig, ConfigError> {
    app::load_config()
}
