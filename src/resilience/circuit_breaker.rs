//! Circuit Breaker Pattern Implementation
//!
//! A per-dependency circuit breaker whose state lives entirely in the shared
//! state store, so every service instance sees the same breaker. The breaker
//! itself holds only configuration; each call re-reads the store.
//!
//! # State Machine
//!
//! ```text
//! ┌─────────┐
//! │ Closed  │ ◄──────────────────┐
//! │ (Normal)│                    │
//! └────┬────┘                    │
//!      │ failure_threshold       │ success_threshold
//!      │ failures                │ successes
//!      ▼                         │
//! ┌─────────┐ reset_timeout ┌────┴──────┐
//! │  Open   │───────────────► HalfOpen  │
//! │(Failing)│                │ (Probing) │
//! └─────────┘◄───────────────└───────────┘
//!                any failure
//! ```
//!
//! # Store layout
//!
//! ```text
//! circuit:{dependency}:state         CLOSED | OPEN | HALF_OPEN (absent = CLOSED)
//! circuit:{dependency}:failures      integer
//! circuit:{dependency}:successes     integer, only meaningful in HALF_OPEN
//! circuit:{dependency}:last_failure  epoch seconds
//! ```
//!
//! Concurrent callers may race (two failures both crossing the threshold, two
//! checks both moving OPEN to HALF_OPEN); every transition is an idempotent
//! overwrite, so losing a race only means counting off by one.
//!
//! # Example
//!
//! ```rust
//! use activity_guard::resilience::{CircuitBreaker, CircuitBreakerConfig};
//! use activity_guard::store::{MemoryStore, SharedStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = SharedStore::new(MemoryStore::new());
//! let cb = CircuitBreaker::new(store);
//!
//! if cb.check_circuit("lesson-db").await {
//!     // call the dependency, then report the outcome
//!     cb.record_success("lesson-db").await;
//! }
//!
//! // Or let the breaker wrap the call
//! let result = cb
//!     .call("lesson-db", async { Ok::<_, std::io::Error>("rows") })
//!     .await;
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use crate::clock;
use crate::config;
use crate::store::{SharedStore, StoreError, StoreResult};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation, allowing all requests through
    Closed,
    /// Failing state, rejecting all requests until the reset timeout expires
    Open,
    /// Probing state, allowing requests to check whether the dependency recovered
    HalfOpen,
}

impl CircuitState {
    /// Value written to the store
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CircuitState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CLOSED" => Ok(CircuitState::Closed),
            "OPEN" => Ok(CircuitState::Open),
            "HALF_OPEN" => Ok(CircuitState::HalfOpen),
            other => Err(format!("unknown circuit state {:?}", other)),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of failures in Closed before opening the circuit
    pub failure_threshold: u32,
    /// Number of successes in HalfOpen before closing the circuit
    pub success_threshold: u32,
    /// How long after the last failure an Open circuit lets a trial request through
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

impl From<&config::CircuitBreakerConfig> for CircuitBreakerConfig {
    fn from(config: &config::CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            success_threshold: config.success_threshold,
            reset_timeout: Duration::from_secs(config.reset_timeout),
        }
    }
}

/// Read-only snapshot of one dependency's breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitStats {
    pub state: CircuitState,
    pub failures: u64,
    pub successes: u64,
    /// Epoch seconds of the most recent failure
    pub last_failure: Option<f64>,
    /// Configured failure threshold
    pub threshold: u32,
}

/// Circuit breaker error
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open, rejecting requests
    #[error("Circuit breaker is open for {dependency}")]
    Open { dependency: String },
    /// The underlying operation failed
    #[error("Operation failed: {0}")]
    Inner(#[source] E),
}

struct CircuitKeys {
    state: String,
    failures: String,
    successes: String,
    last_failure: String,
}

impl CircuitKeys {
    fn new(dependency: &str) -> Self {
        Self {
            state: format!("circuit:{}:state", dependency),
            failures: format!("circuit:{}:failures", dependency),
            successes: format!("circuit:{}:successes", dependency),
            last_failure: format!("circuit:{}:last_failure", dependency),
        }
    }
}

/// Store-backed circuit breaker, one state machine per dependency name
///
/// Cheap to clone; clones share the store handle. The infallible methods are
/// the caller-facing API and coalesce store errors (fail open for checks,
/// log and continue for recordings); the `try_*` variants expose them.
#[derive(Clone, Debug)]
pub struct CircuitBreaker {
    store: SharedStore,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Create a circuit breaker with default configuration
    pub fn new(store: SharedStore) -> Self {
        Self::with_config(store, CircuitBreakerConfig::default())
    }

    /// Create a circuit breaker with custom configuration
    ///
    /// # Example
    ///
    /// ```rust
    /// use activity_guard::resilience::{CircuitBreaker, CircuitBreakerConfig};
    /// use activity_guard::store::{MemoryStore, SharedStore};
    /// use std::time::Duration;
    ///
    /// let config = CircuitBreakerConfig {
    ///     failure_threshold: 10,
    ///     success_threshold: 3,
    ///     reset_timeout: Duration::from_secs(120),
    /// };
    /// let cb = CircuitBreaker::with_config(SharedStore::new(MemoryStore::new()), config);
    /// ```
    pub fn with_config(store: SharedStore, config: CircuitBreakerConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    async fn read_state(&self, keys: &CircuitKeys) -> StoreResult<CircuitState> {
        match self.store.get_string(&keys.state).await? {
            None => Ok(CircuitState::Closed),
            Some(raw) => raw
                .parse()
                .map_err(|reason: String| StoreError::malformed(&keys.state, reason)),
        }
    }

    async fn read_count(&self, key: &str) -> StoreResult<u64> {
        match self.store.get_string(key).await? {
            None => Ok(0),
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| StoreError::malformed(key, "count is not an integer")),
        }
    }

    async fn read_last_failure(&self, keys: &CircuitKeys) -> StoreResult<Option<f64>> {
        match self.store.get_string(&keys.last_failure).await? {
            None => Ok(None),
            Some(raw) => clock::parse_epoch(&raw)
                .map(Some)
                .ok_or_else(|| StoreError::malformed(&keys.last_failure, "not a timestamp")),
        }
    }

    async fn write_state(&self, keys: &CircuitKeys, state: CircuitState) -> StoreResult<()> {
        self.store
            .set(&keys.state, state.as_str().as_bytes(), None)
            .await
    }

    async fn open(&self, dependency: &str, keys: &CircuitKeys, from: CircuitState) -> StoreResult<()> {
        self.write_state(keys, CircuitState::Open).await?;
        self.store.delete(&keys.successes).await?;
        crate::metrics::circuit_transition(dependency, from, CircuitState::Open);
        Ok(())
    }

    /// Whether the dependency may be called right now
    ///
    /// Fails open: a store error is logged and the call is allowed, so the
    /// breaker never becomes an outage of its own.
    #[tracing::instrument(skip(self))]
    pub async fn check_circuit(&self, dependency: &str) -> bool {
        match self.try_check_circuit(dependency).await {
            Ok(allowed) => allowed,
            Err(err) => {
                tracing::error!(
                    circuit_breaker = %dependency,
                    error = %err,
                    "Circuit check failed, allowing call"
                );
                true
            }
        }
    }

    /// [`check_circuit`](Self::check_circuit) without the fail-open coalescing
    ///
    /// An Open circuit whose reset timeout has strictly elapsed is moved to
    /// HalfOpen here and the call is allowed as a trial request.
    pub async fn try_check_circuit(&self, dependency: &str) -> StoreResult<bool> {
        let keys = CircuitKeys::new(dependency);

        match self.read_state(&keys).await? {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(true),
            CircuitState::Open => {
                // An Open circuit with no recorded failure time has nothing to wait on
                let elapsed = match self.read_last_failure(&keys).await? {
                    Some(last_failure) => clock::elapsed_since(last_failure),
                    None => Duration::MAX,
                };

                if elapsed > self.config.reset_timeout {
                    self.write_state(&keys, CircuitState::HalfOpen).await?;
                    crate::metrics::circuit_transition(
                        dependency,
                        CircuitState::Open,
                        CircuitState::HalfOpen,
                    );
                    tracing::info!(
                        circuit_breaker = %dependency,
                        state = "Open -> HalfOpen",
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Circuit breaker transitioning to HalfOpen"
                    );
                    Ok(true)
                } else {
                    crate::metrics::circuit_rejection(dependency);
                    tracing::debug!(circuit_breaker = %dependency, "Circuit open, rejecting call");
                    Ok(false)
                }
            }
        }
    }

    /// Report a failed call to the dependency
    #[tracing::instrument(skip(self))]
    pub async fn record_failure(&self, dependency: &str) {
        if let Err(err) = self.try_record_failure(dependency).await {
            tracing::error!(
                circuit_breaker = %dependency,
                error = %err,
                "Failed to record circuit failure"
            );
        }
    }

    /// [`record_failure`](Self::record_failure) returning store errors
    pub async fn try_record_failure(&self, dependency: &str) -> StoreResult<()> {
        let keys = CircuitKeys::new(dependency);

        let failures = self.store.incr(&keys.failures, 1).await?;
        self.store
            .set(
                &keys.last_failure,
                clock::format_epoch(clock::epoch_now()).as_bytes(),
                None,
            )
            .await?;

        match self.read_state(&keys).await? {
            CircuitState::Closed => {
                if failures >= i64::from(self.config.failure_threshold) {
                    self.open(dependency, &keys, CircuitState::Closed).await?;
                    tracing::warn!(
                        circuit_breaker = %dependency,
                        state = "Closed -> Open",
                        failures,
                        failure_threshold = self.config.failure_threshold,
                        "Circuit breaker opened due to failures"
                    );
                }
            }
            CircuitState::HalfOpen => {
                self.open(dependency, &keys, CircuitState::HalfOpen).await?;
                tracing::warn!(
                    circuit_breaker = %dependency,
                    state = "HalfOpen -> Open",
                    "Circuit breaker re-opened after failure in HalfOpen state"
                );
            }
            CircuitState::Open => {}
        }

        Ok(())
    }

    /// Report a successful call to the dependency
    ///
    /// Only counts while HalfOpen. Successes in Closed leave the failure
    /// count untouched; failures only clear on a full reset.
    #[tracing::instrument(skip(self))]
    pub async fn record_success(&self, dependency: &str) {
        if let Err(err) = self.try_record_success(dependency).await {
            tracing::error!(
                circuit_breaker = %dependency,
                error = %err,
                "Failed to record circuit success"
            );
        }
    }

    /// [`record_success`](Self::record_success) returning store errors
    pub async fn try_record_success(&self, dependency: &str) -> StoreResult<()> {
        let keys = CircuitKeys::new(dependency);

        match self.read_state(&keys).await? {
            CircuitState::HalfOpen => {
                let successes = self.store.incr(&keys.successes, 1).await?;
                if successes >= i64::from(self.config.success_threshold) {
                    self.clear(&keys).await?;
                    crate::metrics::circuit_transition(
                        dependency,
                        CircuitState::HalfOpen,
                        CircuitState::Closed,
                    );
                    tracing::info!(
                        circuit_breaker = %dependency,
                        state = "HalfOpen -> Closed",
                        successes,
                        "Circuit breaker closed after successful recovery"
                    );
                }
            }
            CircuitState::Closed | CircuitState::Open => {}
        }

        Ok(())
    }

    async fn clear(&self, keys: &CircuitKeys) -> StoreResult<()> {
        self.store.delete(&keys.failures).await?;
        self.store.delete(&keys.successes).await?;
        self.store.delete(&keys.last_failure).await?;
        self.write_state(keys, CircuitState::Closed).await
    }

    /// Manually reset the circuit to Closed and clear its counters
    ///
    /// Administrative and test escape hatch.
    #[tracing::instrument(skip(self))]
    pub async fn reset_circuit(&self, dependency: &str) {
        if let Err(err) = self.try_reset_circuit(dependency).await {
            tracing::error!(
                circuit_breaker = %dependency,
                error = %err,
                "Failed to reset circuit"
            );
        }
    }

    /// [`reset_circuit`](Self::reset_circuit) returning store errors
    pub async fn try_reset_circuit(&self, dependency: &str) -> StoreResult<()> {
        self.clear(&CircuitKeys::new(dependency)).await?;
        tracing::info!(
            circuit_breaker = %dependency,
            "Circuit breaker manually reset to Closed"
        );
        Ok(())
    }

    /// Snapshot of a dependency's breaker
    ///
    /// `None` means the store could not be read; treat it as unknown and
    /// assume the dependency is healthy.
    pub async fn get_circuit_stats(&self, dependency: &str) -> Option<CircuitStats> {
        match self.try_get_circuit_stats(dependency).await {
            Ok(stats) => Some(stats),
            Err(err) => {
                tracing::error!(
                    circuit_breaker = %dependency,
                    error = %err,
                    "Failed to read circuit stats"
                );
                None
            }
        }
    }

    /// [`get_circuit_stats`](Self::get_circuit_stats) returning store errors
    pub async fn try_get_circuit_stats(&self, dependency: &str) -> StoreResult<CircuitStats> {
        let keys = CircuitKeys::new(dependency);

        Ok(CircuitStats {
            state: self.read_state(&keys).await?,
            failures: self.read_count(&keys.failures).await?,
            successes: self.read_count(&keys.successes).await?,
            last_failure: self.read_last_failure(&keys).await?,
            threshold: self.config.failure_threshold,
        })
    }

    /// Execute an operation protected by the circuit breaker
    ///
    /// Rejects without polling `f` when the circuit is open; otherwise the
    /// outcome is recorded as a success or failure. No retries.
    ///
    /// # Example
    ///
    /// ```rust
    /// use activity_guard::resilience::CircuitBreaker;
    /// use activity_guard::store::{MemoryStore, SharedStore};
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let cb = CircuitBreaker::new(SharedStore::new(MemoryStore::new()));
    ///
    /// let result = cb.call("external-api", async {
    ///     Ok::<_, std::io::Error>(42)
    /// }).await;
    ///
    /// match result {
    ///     Ok(value) => println!("Got: {}", value),
    ///     Err(e) => println!("Error: {}", e),
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn call<F, T, E>(&self, dependency: &str, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        if !self.check_circuit(dependency).await {
            return Err(CircuitBreakerError::Open {
                dependency: dependency.to_string(),
            });
        }

        match f.await {
            Ok(value) => {
                self.record_success(dependency).await;
                Ok(value)
            }
            Err(err) => {
                self.record_failure(dependency).await;
                Err(CircuitBreakerError::Inner(err))
            }
        }
    }
}
