//! Result cache
//!
//! A TTL-bound acceleration layer over the shared state store. It never
//! becomes a failure mode of its own: a store error or timeout on read is a
//! miss (the caller recomputes), and on write it is swallowed (the value just
//! isn't cached this time).

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::clock;
use crate::config;
use crate::store::{self, KeyTtl, SharedStore};

/// Statistics about cache usage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of keys currently in the shared store
    pub total_entries: usize,

    /// Bytes used by the store, when the backend reports it
    pub memory_usage: Option<u64>,

    /// Epoch seconds of the last completed `cleanup_cache` pass in this process
    pub last_cleanup: Option<f64>,

    /// Cache hits observed by this process
    pub hits: u64,

    /// Cache misses observed by this process
    pub misses: u64,

    /// Hit rate as a fraction (0.0 to 1.0)
    pub hit_rate: f64,
}

impl CacheStats {
    /// Calculate hit rate from hits and misses
    pub fn calculate_hit_rate(&mut self) {
        let total = self.hits + self.misses;
        self.hit_rate = if total > 0 {
            self.hits as f64 / total as f64
        } else {
            0.0
        };
    }
}

/// Builder for consistent cache key naming
pub struct CacheKey;

impl CacheKey {
    /// Build an activity cache key: `activity:{id}:{param}:{param}...`
    pub fn activity<I, P>(id: impl std::fmt::Display, params: I) -> String
    where
        I: IntoIterator<Item = P>,
        P: std::fmt::Display,
    {
        let mut key = Self::activity_prefix(id);
        let params: Vec<String> = params.into_iter().map(|p| p.to_string()).collect();
        key.push_str(&params.join(":"));
        key
    }

    /// Prefix covering every activity key for one id, for pattern invalidation
    pub fn activity_prefix(id: impl std::fmt::Display) -> String {
        format!("activity:{}:", id)
    }

    /// Build a custom cache key with a prefix
    pub fn custom(prefix: &str, key: impl std::fmt::Display) -> String {
        format!("{}:{}", prefix, key)
    }
}

/// Cache manager configuration
#[derive(Debug, Clone)]
pub struct CacheManagerConfig {
    /// Lifetime used by [`CacheManager::set`]
    pub default_ttl: Duration,
}

impl Default for CacheManagerConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(3600),
        }
    }
}

impl From<&config::CacheConfig> for CacheManagerConfig {
    fn from(config: &config::CacheConfig) -> Self {
        Self {
            default_ttl: Duration::from_secs(config.default_ttl),
        }
    }
}

/// Store-backed result cache
///
/// Keys are caller-chosen; conventionally `activity:{id}:{params...}` (see
/// [`CacheKey`]). The hit/miss counters and cleanup timestamp are local
/// diagnostics shared between clones, not authoritative state.
#[derive(Clone, Debug)]
pub struct CacheManager {
    store: SharedStore,
    config: CacheManagerConfig,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
    /// Epoch milliseconds of the last cleanup, zero when none ran
    last_cleanup_ms: Arc<AtomicU64>,
}

impl CacheManager {
    pub fn new(store: SharedStore) -> Self {
        Self::with_config(store, CacheManagerConfig::default())
    }

    pub fn with_config(store: SharedStore, config: CacheManagerConfig) -> Self {
        Self {
            store,
            config,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
            last_cleanup_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.config.default_ttl
    }

    fn record_lookup(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        crate::metrics::cache_lookup(hit);
    }

    /// Get a cached value, `None` on miss, expiry or store trouble
    #[tracing::instrument(skip(self), fields(cache_key = %key))]
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        match self.store.get(key).await {
            Ok(value) => {
                self.record_lookup(value.is_some());
                if value.is_some() {
                    tracing::debug!("Cache hit");
                } else {
                    tracing::debug!("Cache miss");
                }
                value
            }
            Err(err) => {
                self.record_lookup(false);
                tracing::error!(error = %err, "Cache read failed, treating as miss");
                None
            }
        }
    }

    /// Store a value with the default TTL
    pub async fn set(&self, key: &str, value: &[u8]) {
        self.set_with_ttl(key, value, self.config.default_ttl).await
    }

    /// Store a value with an explicit TTL, overwriting any previous entry
    #[tracing::instrument(skip(self, value), fields(cache_key = %key, ttl_secs = ttl.as_secs()))]
    pub async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) {
        match self.store.set(key, value, Some(ttl)).await {
            Ok(()) => tracing::debug!("Cache value set with TTL"),
            Err(err) => tracing::error!(error = %err, "Cache write failed, value not cached"),
        }
    }

    /// Get a value and decode it with bincode
    ///
    /// A value that fails to decode is logged and reported as a miss.
    pub async fn get_value<V>(&self, key: &str) -> Option<V>
    where
        V: DeserializeOwned,
    {
        let bytes = self.get(key).await?;
        match bincode::deserialize(&bytes) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::error!(cache_key = %key, error = %err, "Failed to deserialize cached value");
                None
            }
        }
    }

    /// Encode a value with bincode and store it
    pub async fn set_value<V>(&self, key: &str, value: &V, ttl: Option<Duration>)
    where
        V: Serialize + ?Sized,
    {
        match bincode::serialize(value) {
            Ok(bytes) => {
                self.set_with_ttl(key, &bytes, ttl.unwrap_or(self.config.default_ttl))
                    .await
            }
            Err(err) => {
                tracing::error!(cache_key = %key, error = %err, "Failed to serialize value");
            }
        }
    }

    /// Remove one entry
    #[tracing::instrument(skip(self), fields(cache_key = %key))]
    pub async fn invalidate(&self, key: &str) {
        match self.store.delete(key).await {
            Ok(existed) => {
                if existed {
                    crate::metrics::cache_invalidated(1);
                }
                tracing::debug!(existed, "Cache entry invalidated");
            }
            Err(err) => tracing::error!(error = %err, "Failed to invalidate cache entry"),
        }
    }

    /// Remove every entry matching a prefix or glob, returning how many were removed
    ///
    /// A plain string is a prefix (`"activity:42:"` matches
    /// `"activity:42:overview"`); a string containing `*`, `?`, `[` or `\` is
    /// used as a glob as-is.
    ///
    /// This is a full scan of the store's keyspace, not an indexed lookup, so
    /// its cost grows with the total number of keys. Use narrow prefixes.
    #[tracing::instrument(skip(self))]
    pub async fn invalidate_pattern(&self, pattern: &str) -> usize {
        let glob = if store::is_glob(pattern) {
            pattern.to_string()
        } else {
            format!("{}*", pattern)
        };

        let keys = match self.store.keys(&glob).await {
            Ok(keys) => keys,
            Err(err) => {
                tracing::error!(error = %err, "Failed to scan keys for invalidation");
                return 0;
            }
        };

        let mut removed = 0;
        for key in &keys {
            match self.store.delete(key).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(err) => tracing::error!(cache_key = %key, error = %err, "Failed to delete key"),
            }
        }

        crate::metrics::cache_invalidated(removed as u64);
        tracing::info!(matched = keys.len(), removed, "Cache pattern invalidated");
        removed
    }

    /// Delete entries whose remaining TTL has run out, returning how many
    ///
    /// Stores normally expire keys on their own, so this usually finds
    /// nothing. It never fails; errors are logged.
    #[tracing::instrument(skip(self))]
    pub async fn cleanup_cache(&self) -> usize {
        let keys = match self.store.keys("*").await {
            Ok(keys) => keys,
            Err(err) => {
                tracing::error!(error = %err, "Failed to scan keys for cleanup");
                return 0;
            }
        };

        let mut removed = 0;
        for key in &keys {
            match self.store.ttl(key).await {
                Ok(KeyTtl::Remaining(left)) if left.is_zero() => {
                    if let Ok(true) = self.store.delete(key).await {
                        removed += 1;
                    }
                }
                Ok(_) => {}
                Err(err) => tracing::error!(cache_key = %key, error = %err, "Failed to read TTL"),
            }
        }

        self.last_cleanup_ms
            .store((clock::epoch_now() * 1000.0) as u64, Ordering::Relaxed);
        tracing::info!(scanned = keys.len(), removed, "Cache cleanup complete");
        removed
    }

    /// Diagnostic snapshot
    pub async fn get_cache_stats(&self) -> CacheStats {
        let total_entries = match self.store.keys("*").await {
            Ok(keys) => keys.len(),
            Err(err) => {
                tracing::error!(error = %err, "Failed to count cache entries");
                0
            }
        };
        let memory_usage = self.store.memory_usage().await.unwrap_or_else(|err| {
            tracing::error!(error = %err, "Failed to read store memory usage");
            None
        });
        let last_cleanup = match self.last_cleanup_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(ms as f64 / 1000.0),
        };

        let mut stats = CacheStats {
            total_entries,
            memory_usage,
            last_cleanup,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            hit_rate: 0.0,
        };
        stats.calculate_hit_rate();
        stats
    }
}
