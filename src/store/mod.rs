//! Shared state store
//!
//! Every decision the circuit breaker, rate limiter and cache manager make is
//! read from and written back to a [`StateStore`]. Nothing authoritative lives
//! in-process, so any number of service instances pointed at the same store
//! observe the same breaker states and rate windows.
//!
//! Managers never talk to a backend directly; they hold a [`SharedStore`],
//! which bounds every round trip with a short client-side timeout so a slow
//! store cannot stall the request path it is meant to protect.

mod memory;
#[cfg(feature = "redis-store")]
mod redis;
mod window;

pub use memory::MemoryStore;
#[cfg(feature = "redis-store")]
pub use self::redis::RedisStore;
pub use window::FixedWindow;

use async_trait::async_trait;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::config::{StoreBackend, StoreConfig};

/// Errors surfaced by a [`StateStore`]
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached or rejected the command
    #[error("State store unavailable: {0}")]
    Unavailable(String),
    /// The store did not answer within the client-side timeout
    #[error("State store timed out after {0:?}")]
    Timeout(Duration),
    /// A key exists but its value cannot be parsed into the expected shape
    #[error("Malformed value at {key}: {reason}")]
    Malformed { key: String, reason: String },
}

impl StoreError {
    pub fn malformed(key: &str, reason: impl Into<String>) -> Self {
        StoreError::Malformed {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Remaining lifetime of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// Key does not exist
    Missing,
    /// Key exists without an expiry
    Persistent,
    /// Key expires after the given duration (zero means already due)
    Remaining(Duration),
}

/// Key-value store shared by every service instance
///
/// Implementations must be safe for concurrent use; the managers impose no
/// additional locking.
#[async_trait]
pub trait StateStore: Send + Sync + Debug {
    /// Get the raw value of a key, `None` when absent or expired
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Set a key, replacing any previous value and expiry
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> StoreResult<()>;

    /// Delete a key, returning whether it existed
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Atomically add `delta` to an integer key, creating it at zero
    async fn incr(&self, key: &str, delta: i64) -> StoreResult<i64>;

    /// Atomically admit one request into the [`FixedWindow`] at `key`
    ///
    /// Reads `count:window_start`, restarts a missing or expired window at
    /// `now`, and when the count is below `max_requests` writes it back
    /// incremented with a TTL of `window`. Nothing is written once the budget
    /// is spent. The whole read-decide-write runs as one store-side step, so
    /// concurrent callers can never both take the last slot.
    async fn admit_window(
        &self,
        key: &str,
        max_requests: u32,
        window: Duration,
        now: f64,
    ) -> StoreResult<bool>;

    /// List every key matching a glob pattern
    ///
    /// This is a full keyspace scan, not an indexed lookup.
    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>>;

    /// Remaining lifetime of a key
    async fn ttl(&self, key: &str) -> StoreResult<KeyTtl>;

    /// Approximate bytes used by the store, if the backend can tell
    async fn memory_usage(&self) -> StoreResult<Option<u64>>;

    /// Round trip to check the store is reachable
    async fn ping(&self) -> StoreResult<()>;
}

/// Default client-side timeout applied to every store round trip
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_millis(250);

/// Cloneable handle to a [`StateStore`] with a per-operation timeout
#[derive(Clone, Debug)]
pub struct SharedStore {
    inner: Arc<dyn StateStore>,
    op_timeout: Duration,
}

impl SharedStore {
    pub fn new(store: impl StateStore + 'static) -> Self {
        Self::from_arc(Arc::new(store))
    }

    pub fn from_arc(store: Arc<dyn StateStore>) -> Self {
        Self {
            inner: store,
            op_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    /// Override the per-operation timeout
    pub fn with_timeout(mut self, op_timeout: Duration) -> Self {
        self.op_timeout = op_timeout;
        self
    }

    pub fn operation_timeout(&self) -> Duration {
        self.op_timeout
    }

    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> StoreResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        let result = match timeout(self.op_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.op_timeout)),
        };

        if result.is_err() {
            crate::metrics::store_error(operation);
        }

        result
    }

    pub async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.bounded("get", self.inner.get(key)).await
    }

    /// Get a key and decode it as UTF-8 text
    pub async fn get_string(&self, key: &str) -> StoreResult<Option<String>> {
        match self.get(key).await? {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| StoreError::malformed(key, e.to_string())),
            None => Ok(None),
        }
    }

    pub async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> StoreResult<()> {
        self.bounded("set", self.inner.set(key, value, ttl)).await
    }

    pub async fn delete(&self, key: &str) -> StoreResult<bool> {
        self.bounded("delete", self.inner.delete(key)).await
    }

    pub async fn incr(&self, key: &str, delta: i64) -> StoreResult<i64> {
        self.bounded("incr", self.inner.incr(key, delta)).await
    }

    pub async fn admit_window(
        &self,
        key: &str,
        max_requests: u32,
        window: Duration,
        now: f64,
    ) -> StoreResult<bool> {
        self.bounded(
            "admit_window",
            self.inner.admit_window(key, max_requests, window, now),
        )
        .await
    }

    pub async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        self.bounded("keys", self.inner.keys(pattern)).await
    }

    pub async fn ttl(&self, key: &str) -> StoreResult<KeyTtl> {
        self.bounded("ttl", self.inner.ttl(key)).await
    }

    pub async fn memory_usage(&self) -> StoreResult<Option<u64>> {
        self.bounded("memory_usage", self.inner.memory_usage()).await
    }

    pub async fn ping(&self) -> StoreResult<()> {
        self.bounded("ping", self.inner.ping()).await
    }
}

/// Build the configured backend and wrap it in a [`SharedStore`]
pub async fn connect(config: &StoreConfig) -> anyhow::Result<SharedStore> {
    let op_timeout = Duration::from_millis(config.operation_timeout_ms);

    let store = match config.backend {
        StoreBackend::Memory => {
            tracing::info!("Using in-process memory state store");
            SharedStore::new(MemoryStore::new())
        }
        #[cfg(feature = "redis-store")]
        StoreBackend::Redis => {
            let store = RedisStore::with_timeout(
                &config.url,
                config.prefix.as_deref(),
                Duration::from_millis(config.connect_timeout_ms),
            )
            .await?;
            tracing::info!(url = %config.url, "Connected to Redis state store");
            SharedStore::new(store)
        }
        #[cfg(not(feature = "redis-store"))]
        StoreBackend::Redis => {
            anyhow::bail!("store.backend = \"redis\" requires the `redis-store` feature")
        }
    };

    Ok(store.with_timeout(op_timeout))
}

/// Does the pattern use glob metacharacters understood by the store
pub fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '[', '\\'])
}
