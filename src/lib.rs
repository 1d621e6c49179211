//! Store-backed resilience primitives for the activity service
//!
//! - [`resilience::CircuitBreaker`] stops calls to a failing dependency
//! - [`security::RateLimiter`] enforces fixed-window quotas and client blocks
//! - [`cache::CacheManager`] caches results with a TTL
//!
//! All three keep their state in a [`store::SharedStore`], so every instance
//! of the service sees the same circuits, counters and cached values.
//! [`guard::ResilienceGuard`] strings them together on the request path.

pub mod cache;
pub mod clock;
pub mod config;
pub mod guard;
pub mod metrics;
pub mod resilience;
pub mod security;
pub mod store;
pub mod telemetry;

// Re-export commonly used types for convenience
pub use self::cache::{CacheKey, CacheManager, CacheStats};
pub use self::config::AppConfig;
pub use self::guard::{GuardError, GuardedCall, ResilienceGuard};
pub use self::metrics::ResilienceMetrics;
pub use self::resilience::{CircuitBreaker, CircuitState, CircuitStats};
pub use self::security::{RateLimiter, RateStat};
pub use self::store::{MemoryStore, SharedStore, StateStore, StoreError};
