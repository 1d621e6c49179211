//! Resilience patterns for fault-tolerant services
//!
//! # Available Patterns
//!
//! - **Circuit Breaker**: stops calls to a failing dependency for a cooldown
//!   period, then lets trial requests through to test recovery. State is
//!   kept in the shared store so every instance of the service agrees on it.
//!
//! # Example
//!
//! ```rust
//! use activity_guard::resilience::{CircuitBreaker, CircuitBreakerConfig};
//! use activity_guard::store::{MemoryStore, SharedStore};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CircuitBreakerConfig {
//!     failure_threshold: 5,
//!     success_threshold: 3,
//!     reset_timeout: Duration::from_secs(60),
//! };
//!
//! let cb = CircuitBreaker::with_config(SharedStore::new(MemoryStore::new()), config);
//!
//! let result = cb.call("assessment-api", async {
//!     Ok::<_, std::io::Error>(())
//! }).await;
//! # Ok(())
//! # }
//! ```

mod circuit_breaker;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState, CircuitStats,
};
