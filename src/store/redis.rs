use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError, Script};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::time::timeout;

use super::{KeyTtl, StateStore, StoreError, StoreResult};
use crate::clock;

const MALFORMED_WINDOW: &str = "malformed rate window";

/// Fixed-window admission, run server-side so the read and the write are one step
///
/// KEYS[1] window key; ARGV: max_requests, window seconds, window millis, now.
/// Mirrors `FixedWindow::admit`: strict `>` expiry, no write once full.
static ADMIT_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
local max_requests = tonumber(ARGV[1])
local window_secs = tonumber(ARGV[2])
local window_ms = tonumber(ARGV[3])
local now = tonumber(ARGV[4])

local count = 0
local start = now
local raw = redis.call('GET', KEYS[1])
if raw then
    local sep = string.find(raw, ':', 1, true)
    if not sep then
        return redis.error_reply('malformed rate window')
    end
    local stored_count = tonumber(string.sub(raw, 1, sep - 1))
    local stored_start = tonumber(string.sub(raw, sep + 1))
    if not stored_count or not stored_start then
        return redis.error_reply('malformed rate window')
    end
    if now - stored_start <= window_secs then
        count = stored_count
        start = stored_start
    end
end

if count >= max_requests then
    return 0
end

redis.call('SET', KEYS[1], string.format('%d:%.6f', count + 1, start), 'PX', window_ms)
return 1
"#,
    )
});

impl From<RedisError> for StoreError {
    fn from(err: RedisError) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Redis-backed state store shared by every service instance
///
/// Features:
/// - Async operations using redis::aio::ConnectionManager
/// - Automatic connection pooling and reconnection
/// - Optional key prefixing for namespace isolation
/// - Millisecond TTLs via PSETEX
#[derive(Clone)]
pub struct RedisStore {
    /// Connection manager for pooled async operations
    conn_manager: Arc<ConnectionManager>,
    /// Key prefix for namespace isolation (e.g., "activity-service:"), empty when unset
    prefix: String,
}

impl RedisStore {
    /// Connect to Redis with a default timeout of 3 seconds
    ///
    /// # Example
    /// ```no_run
    /// use activity_guard::store::RedisStore;
    ///
    /// #[tokio::main]
    /// async fn main() -> anyhow::Result<()> {
    ///     let store = RedisStore::new("redis://localhost:6379", None).await?;
    ///     Ok(())
    /// }
    /// ```
    pub async fn new(url: &str, prefix: Option<&str>) -> Result<Self> {
        Self::with_timeout(url, prefix, Duration::from_secs(3)).await
    }

    /// Connect to Redis with a custom connection timeout
    pub async fn with_timeout(
        url: &str,
        prefix: Option<&str>,
        connection_timeout: Duration,
    ) -> Result<Self> {
        let client = Client::open(url).context("Failed to create Redis client")?;

        let conn_manager = timeout(connection_timeout, ConnectionManager::new(client))
            .await
            .context(format!(
                "Redis connection timeout after {:?}. Check Redis is running at: {}",
                connection_timeout, url
            ))?
            .context("Failed to create Redis connection manager")?;

        Ok(Self {
            conn_manager: Arc::new(conn_manager),
            prefix: prefix.map(|p| format!("{}:", p)).unwrap_or_default(),
        })
    }

    fn build_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn strip_key(&self, key: String) -> String {
        match key.strip_prefix(&self.prefix) {
            Some(stripped) => stripped.to_string(),
            None => key,
        }
    }

    fn connection(&self) -> ConnectionManager {
        (*self.conn_manager).clone()
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

/// Pull `used_memory` out of an `INFO memory` reply
fn parse_used_memory(info: &str) -> Option<u64> {
    info.lines()
        .find_map(|line| line.strip_prefix("used_memory:"))
        .and_then(|value| value.trim().parse().ok())
}

#[async_trait]
impl StateStore for RedisStore {
    #[tracing::instrument(skip(self), fields(store_key = %key))]
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let mut conn = self.connection();
        let data: Option<Vec<u8>> = conn.get(self.build_key(key)).await?;
        Ok(data)
    }

    #[tracing::instrument(skip(self, value), fields(store_key = %key, ttl = ?ttl))]
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> StoreResult<()> {
        let mut conn = self.connection();
        let full_key = self.build_key(key);

        match ttl {
            // PSETEX rejects a zero expiry
            Some(ttl) => {
                let millis = (ttl.as_millis() as u64).max(1);
                let _: () = conn.pset_ex(&full_key, value, millis).await?;
            }
            None => {
                let _: () = conn.set(&full_key, value).await?;
            }
        }

        Ok(())
    }

    #[tracing::instrument(skip(self), fields(store_key = %key))]
    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.connection();
        let deleted: u32 = conn.del(self.build_key(key)).await?;
        Ok(deleted > 0)
    }

    #[tracing::instrument(skip(self), fields(store_key = %key))]
    async fn incr(&self, key: &str, delta: i64) -> StoreResult<i64> {
        let mut conn = self.connection();
        let value: i64 = conn.incr(self.build_key(key), delta).await?;
        Ok(value)
    }

    #[tracing::instrument(skip(self), fields(store_key = %key))]
    async fn admit_window(
        &self,
        key: &str,
        max_requests: u32,
        window: Duration,
        now: f64,
    ) -> StoreResult<bool> {
        let mut conn = self.connection();
        let window_ms = (window.as_millis() as u64).max(1);

        let admitted: i64 = ADMIT_SCRIPT
            .key(self.build_key(key))
            .arg(max_requests)
            .arg(window.as_secs_f64())
            .arg(window_ms)
            .arg(clock::format_epoch(now))
            .invoke_async(&mut conn)
            .await
            .map_err(|err| {
                if err.to_string().contains(MALFORMED_WINDOW) {
                    StoreError::malformed(key, MALFORMED_WINDOW)
                } else {
                    StoreError::from(err)
                }
            })?;

        Ok(admitted == 1)
    }

    #[tracing::instrument(skip(self))]
    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.connection();
        let keys: Vec<String> = conn.keys(self.build_key(pattern)).await?;
        Ok(keys.into_iter().map(|key| self.strip_key(key)).collect())
    }

    #[tracing::instrument(skip(self), fields(store_key = %key))]
    async fn ttl(&self, key: &str) -> StoreResult<KeyTtl> {
        let mut conn = self.connection();
        let millis: i64 = conn.pttl(self.build_key(key)).await?;

        Ok(match millis {
            -2 => KeyTtl::Missing,
            -1 => KeyTtl::Persistent,
            left => KeyTtl::Remaining(Duration::from_millis(left.max(0) as u64)),
        })
    }

    async fn memory_usage(&self) -> StoreResult<Option<u64>> {
        let mut conn = self.connection();
        let info: String = redis::cmd("INFO")
            .arg("memory")
            .query_async(&mut conn)
            .await?;
        Ok(parse_used_memory(&info))
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.connection();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
