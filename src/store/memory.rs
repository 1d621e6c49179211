use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use regex::Regex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use super::{FixedWindow, KeyTtl, StateStore, StoreError, StoreResult};

/// Stored value with optional expiration
#[derive(Debug, Clone)]
struct Entry {
    data: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(data: Vec<u8>, ttl: Option<Duration>) -> Self {
        Self {
            data,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|expires_at| Instant::now() >= expires_at)
    }
}

/// In-process state store backed by `DashMap`
///
/// Mirrors the subset of Redis semantics the managers rely on: TTL per key,
/// atomic integer increments that keep an existing expiry, glob key scans.
/// Only one process can see it, so it suits tests and single-instance
/// development; production deployments share a [`RedisStore`](super::RedisStore).
///
/// Glob patterns support `*`, `?`, `[...]` classes and `\` escapes.
#[derive(Debug)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, Entry>>,
    sweeper: Option<JoinHandle<()>>,
}

impl MemoryStore {
    /// Create a store with the default shard count (CPU count * 4)
    pub fn new() -> Self {
        Self::with_shard_count(num_cpus::get() * 4)
    }

    /// Create a store with a specific shard count (must be a power of two)
    pub fn with_shard_count(shard_count: usize) -> Self {
        let entries = Arc::new(DashMap::with_shard_amount(shard_count.next_power_of_two().max(2)));
        let sweeper = Self::start_sweeper(Arc::clone(&entries));

        Self { entries, sweeper }
    }

    /// Sweep expired entries every 60 seconds when running inside a runtime
    fn start_sweeper(entries: Arc<DashMap<String, Entry>>) -> Option<JoinHandle<()>> {
        let handle = tokio::runtime::Handle::try_current().ok()?;

        Some(handle.spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));

            loop {
                interval.tick().await;

                let before = entries.len();
                entries.retain(|_, entry| !entry.is_expired());
                let swept = before.saturating_sub(entries.len());

                if swept > 0 {
                    tracing::debug!(swept, "Swept expired entries from memory store");
                }
            }
        }))
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| !entry.value().is_expired())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn live(&self, key: &str) -> Option<Entry> {
        let entry = self.entries.get(key)?;
        if entry.is_expired() {
            drop(entry);
            self.entries.remove_if(key, |_, entry| entry.is_expired());
            return None;
        }
        Some(entry.value().clone())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MemoryStore {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.take() {
            handle.abort();
        }
    }
}

/// Translate a store glob into an anchored regex
fn glob_to_regex(pattern: &str) -> StoreResult<Regex> {
    let mut out = String::with_capacity(pattern.len() * 2 + 2);
    out.push('^');

    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '\\' => {
                if let Some(next) = chars.next() {
                    out.push_str(&regex::escape(&next.to_string()));
                }
            }
            '[' => {
                out.push('[');
                for class_char in chars.by_ref() {
                    match class_char {
                        ']' => break,
                        '\\' | '[' | '&' | '~' => {
                            out.push('\\');
                            out.push(class_char);
                        }
                        _ => out.push(class_char),
                    }
                }
                out.push(']');
            }
            _ => out.push_str(&regex::escape(&c.to_string())),
        }
    }

    out.push('$');
    Regex::new(&out).map_err(|e| StoreError::Unavailable(format!("invalid pattern {pattern}: {e}")))
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.live(key).map(|entry| entry.data))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> StoreResult<()> {
        self.entries
            .insert(key.to_string(), Entry::new(value.to_vec(), ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, entry)| !entry.is_expired()))
    }

    async fn incr(&self, key: &str, delta: i64) -> StoreResult<i64> {
        match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.is_expired() {
                    *entry = Entry::new(delta.to_string().into_bytes(), None);
                    return Ok(delta);
                }

                let current = std::str::from_utf8(&entry.data)
                    .ok()
                    .and_then(|text| text.parse::<i64>().ok())
                    .ok_or_else(|| StoreError::malformed(key, "value is not an integer"))?;
                let next = current
                    .checked_add(delta)
                    .ok_or_else(|| StoreError::malformed(key, "increment would overflow"))?;
                entry.data = next.to_string().into_bytes();
                Ok(next)
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(Entry::new(delta.to_string().into_bytes(), None));
                Ok(delta)
            }
        }
    }

    async fn admit_window(
        &self,
        key: &str,
        max_requests: u32,
        window: Duration,
        now: f64,
    ) -> StoreResult<bool> {
        // The entry guard holds the shard lock for the whole read-decide-write
        match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                let current = if entry.is_expired() {
                    None
                } else {
                    let raw = std::str::from_utf8(&entry.data)
                        .map_err(|e| StoreError::malformed(key, e.to_string()))?;
                    Some(FixedWindow::parse(key, raw)?)
                };

                match FixedWindow::admit(current, max_requests, window, now) {
                    Some(next) => {
                        *entry = Entry::new(next.encode().into_bytes(), Some(window));
                        Ok(true)
                    }
                    None => Ok(false),
                }
            }
            MapEntry::Vacant(vacant) => match FixedWindow::admit(None, max_requests, window, now) {
                Some(next) => {
                    vacant.insert(Entry::new(next.encode().into_bytes(), Some(window)));
                    Ok(true)
                }
                None => Ok(false),
            },
        }
    }

    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let matcher = glob_to_regex(pattern)?;

        Ok(self
            .entries
            .iter()
            .filter(|entry| !entry.value().is_expired() && matcher.is_match(entry.key()))
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn ttl(&self, key: &str) -> StoreResult<KeyTtl> {
        let Some(entry) = self.entries.get(key) else {
            return Ok(KeyTtl::Missing);
        };

        Ok(match entry.expires_at {
            None => KeyTtl::Persistent,
            Some(expires_at) => {
                KeyTtl::Remaining(expires_at.saturating_duration_since(Instant::now()))
            }
        })
    }

    async fn memory_usage(&self) -> StoreResult<Option<u64>> {
        let bytes = self
            .entries
            .iter()
            .map(|entry| (entry.key().len() + entry.value().data.len()) as u64)
            .sum();
        Ok(Some(bytes))
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}
