//! Request-path composition of breaker, limiter and cache
//!
//! ```text
//! blocked? ─► circuit closed? ─► within rate limit? ─► cached? ─► run operation
//!                                                                  │
//!                                   record success/failure ◄──────┘
//!                                   cache on success
//! ```
//!
//! # Example
//!
//! ```rust
//! use activity_guard::guard::{GuardedCall, ResilienceGuard};
//! use activity_guard::store::{MemoryStore, SharedStore};
//!
//! # async fn example() {
//! let guard = ResilienceGuard::new(SharedStore::new(MemoryStore::new()));
//!
//! let call = GuardedCall::new("activity-db", "student-42", "get_activities")
//!     .cached("activity:42:list");
//!
//! let result = guard
//!     .execute(&call, || async { Ok::<_, std::io::Error>(vec!["Fractions".to_string()]) })
//!     .await;
//! # }
//! ```

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Duration;

use crate::cache::{CacheManager, CacheManagerConfig};
use crate::config::AppConfig;
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig};
use crate::security::{RateLimitConfig, RateLimiter};
use crate::store::{self, SharedStore};

/// Why a guarded call did not produce a value
#[derive(Debug, thiserror::Error)]
pub enum GuardError<E> {
    /// The client is under an explicit block
    #[error("Client {client_id} is blocked: {reason}")]
    Blocked { client_id: String, reason: String },
    /// The dependency's circuit is open; answer "temporarily unavailable"
    #[error("Service temporarily unavailable: circuit open for {dependency}")]
    CircuitOpen { dependency: String },
    /// The client exhausted the action's budget for this window
    #[error("Rate limit exceeded for {client_id} on {action}")]
    RateLimited { client_id: String, action: String },
    /// The operation itself failed
    #[error("Operation failed: {0}")]
    Inner(#[source] E),
}

/// Identifies one protected call
#[derive(Debug, Clone)]
pub struct GuardedCall<'a> {
    pub dependency: &'a str,
    pub client_id: &'a str,
    pub action: &'a str,
    pub cache_key: Option<String>,
    pub ttl: Option<Duration>,
}

impl<'a> GuardedCall<'a> {
    pub fn new(dependency: &'a str, client_id: &'a str, action: &'a str) -> Self {
        Self {
            dependency,
            client_id,
            action,
            cache_key: None,
            ttl: None,
        }
    }

    /// Serve from and populate the cache under `key`
    pub fn cached(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    /// Override the cache's default TTL for this call
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Which stages run on the request path
///
/// Client blocks are not a stage: an explicit block is always enforced.
/// `rate_limit` switches off only the per-action budgets.
#[derive(Debug, Clone, Copy)]
pub struct GuardStages {
    pub circuit_breaker: bool,
    pub rate_limit: bool,
    pub cache: bool,
}

impl Default for GuardStages {
    fn default() -> Self {
        Self {
            circuit_breaker: true,
            rate_limit: true,
            cache: true,
        }
    }
}

/// Circuit breaker, rate limiter and cache sharing one store
#[derive(Clone, Debug)]
pub struct ResilienceGuard {
    breaker: CircuitBreaker,
    limiter: RateLimiter,
    cache: CacheManager,
    stages: GuardStages,
}

impl ResilienceGuard {
    /// All three components with default configuration on one store
    pub fn new(store: SharedStore) -> Self {
        Self::from_parts(
            CircuitBreaker::new(store.clone()),
            RateLimiter::new(store.clone()),
            CacheManager::new(store),
        )
    }

    pub fn from_parts(breaker: CircuitBreaker, limiter: RateLimiter, cache: CacheManager) -> Self {
        Self {
            breaker,
            limiter,
            cache,
            stages: GuardStages::default(),
        }
    }

    pub fn with_stages(mut self, stages: GuardStages) -> Self {
        self.stages = stages;
        self
    }

    /// Connect the configured store and build every component from config
    pub async fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let store = store::connect(&config.store).await?;
        Ok(Self::from_config_with_store(config, store))
    }

    /// Build every component from config on an existing store
    pub fn from_config_with_store(config: &AppConfig, store: SharedStore) -> Self {
        let breaker = CircuitBreaker::with_config(
            store.clone(),
            CircuitBreakerConfig::from(&config.resilience.circuit_breaker),
        );
        let limiter = RateLimiter::with_config(
            store.clone(),
            RateLimitConfig::from(&config.security.rate_limit),
        );
        let cache = CacheManager::with_config(store, CacheManagerConfig::from(&config.cache));

        Self::from_parts(breaker, limiter, cache).with_stages(GuardStages {
            circuit_breaker: config.resilience.circuit_breaker.enabled,
            rate_limit: config.security.rate_limit.enabled,
            cache: config.cache.enabled,
        })
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    /// Run `op` behind every enabled stage
    ///
    /// A blocked client is rejected first, whichever stages are enabled.
    /// Cached values are returned without touching the breaker's counters.
    /// The guard never retries; a rejected call should be answered upstream
    /// straight away.
    ///
    /// # Panics
    ///
    /// Panics if rate limiting is enabled and `call.action` has no policy.
    #[tracing::instrument(
        skip(self, call, op),
        fields(dependency = %call.dependency, client_id = %call.client_id, action = %call.action)
    )]
    pub async fn execute<F, Fut, T, E>(
        &self,
        call: &GuardedCall<'_>,
        op: F,
    ) -> Result<T, GuardError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        T: Serialize + DeserializeOwned,
    {
        if let Some(reason) = self.limiter.is_user_blocked(call.client_id).await {
            return Err(GuardError::Blocked {
                client_id: call.client_id.to_string(),
                reason,
            });
        }

        if self.stages.circuit_breaker && !self.breaker.check_circuit(call.dependency).await {
            return Err(GuardError::CircuitOpen {
                dependency: call.dependency.to_string(),
            });
        }

        if self.stages.rate_limit
            && !self
                .limiter
                .check_rate_limit(call.client_id, call.action)
                .await
        {
            return Err(GuardError::RateLimited {
                client_id: call.client_id.to_string(),
                action: call.action.to_string(),
            });
        }

        let cache_key = call.cache_key.as_deref().filter(|_| self.stages.cache);

        if let Some(key) = cache_key {
            if let Some(value) = self.cache.get_value::<T>(key).await {
                return Ok(value);
            }
        }

        match op().await {
            Ok(value) => {
                if self.stages.circuit_breaker {
                    self.breaker.record_success(call.dependency).await;
                }
                if let Some(key) = cache_key {
                    self.cache.set_value(key, &value, call.ttl).await;
                }
                Ok(value)
            }
            Err(err) => {
                if self.stages.circuit_breaker {
                    self.breaker.record_failure(call.dependency).await;
                }
                Err(GuardError::Inner(err))
            }
        }
    }
}
