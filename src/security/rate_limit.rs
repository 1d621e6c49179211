//! # Rate Limiting
//!
//! Fixed-window request budgets per (client, action), plus explicit client
//! blocks. Windows and blocks live in the shared state store so every service
//! instance enforces the same budget.
//!
//! ```text
//! rate_limit:{client_id}:{action}   "{count}:{window_start_epoch}"  TTL = time_window
//! blocked:{client_id}               reason                          TTL = block_duration
//! ```
//!
//! Admission is a single atomic store step ([`StateStore::admit_window`]), so
//! concurrent requests across any number of instances never take more than
//! the budget. Blocks are plain keyed writes.
//!
//! [`StateStore::admit_window`]: crate::store::StateStore::admit_window
//!
//! ## Example
//!
//! ```rust
//! use activity_guard::security::RateLimiter;
//! use activity_guard::store::{MemoryStore, SharedStore};
//!
//! # async fn example() {
//! let limiter = RateLimiter::new(SharedStore::new(MemoryStore::new()));
//!
//! if limiter.is_user_blocked("student-7").await.is_none()
//!     && limiter.check_rate_limit("student-7", "get_activities").await
//! {
//!     // handle the request
//! }
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use crate::clock;
use crate::config::{RateLimitConfig as RateLimitSettings, RateLimitPolicyConfig};
use crate::store::{FixedWindow, SharedStore, StoreResult};

/// Request budget for a single action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Requests admitted per window
    pub max_requests: u32,
    /// Window length
    pub time_window: Duration,
}

impl RateLimitPolicy {
    pub fn new(max_requests: u32, time_window: Duration) -> Self {
        Self {
            max_requests,
            time_window,
        }
    }
}

impl From<&RateLimitPolicyConfig> for RateLimitPolicy {
    fn from(config: &RateLimitPolicyConfig) -> Self {
        Self::new(config.max_requests, Duration::from_secs(config.time_window))
    }
}

/// Rate limiter configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Static per-action policy table
    pub policies: HashMap<String, RateLimitPolicy>,
    /// Default lifetime of an explicit block
    pub block_duration: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::from(&RateLimitSettings::default())
    }
}

impl From<&RateLimitSettings> for RateLimitConfig {
    fn from(settings: &RateLimitSettings) -> Self {
        Self {
            policies: settings
                .policies
                .iter()
                .map(|(action, policy)| (action.clone(), RateLimitPolicy::from(policy)))
                .collect(),
            block_duration: Duration::from_secs(settings.block_duration),
        }
    }
}

impl RateLimitConfig {
    /// Add or replace the policy for an action
    pub fn with_policy(mut self, action: impl Into<String>, policy: RateLimitPolicy) -> Self {
        self.policies.insert(action.into(), policy);
        self
    }
}

/// Usage of one action's budget by one client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateStat {
    pub current_count: u32,
    pub max_allowed: u32,
    /// Epoch seconds when the current window began
    pub window_start: f64,
}

/// Store-backed per-(client, action) rate limiter
///
/// Fails open: when the store cannot be read or written the request is
/// admitted and the error logged.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    store: SharedStore,
    config: RateLimitConfig,
}

impl RateLimiter {
    /// Create a rate limiter with the default policy table
    pub fn new(store: SharedStore) -> Self {
        Self::with_config(store, RateLimitConfig::default())
    }

    pub fn with_config(store: SharedStore, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Configured policy for an action, if any
    pub fn policy(&self, action: &str) -> Option<RateLimitPolicy> {
        self.config.policies.get(action).copied()
    }

    fn required_policy(&self, action: &str) -> RateLimitPolicy {
        match self.policy(action) {
            Some(policy) => policy,
            None => panic!(
                "no rate limit policy configured for action {:?}; add it to security.rate_limit.policies",
                action
            ),
        }
    }

    fn window_key(client_id: &str, action: &str) -> String {
        format!("rate_limit:{}:{}", client_id, action)
    }

    fn block_key(client_id: &str) -> String {
        format!("blocked:{}", client_id)
    }

    /// Admit or reject one request from `client_id` for `action`
    ///
    /// # Panics
    ///
    /// Panics if `action` has no configured policy; that is a configuration
    /// bug, not a runtime condition.
    #[tracing::instrument(skip(self))]
    pub async fn check_rate_limit(&self, client_id: &str, action: &str) -> bool {
        let policy = self.required_policy(action);

        let allowed = match self.try_check(client_id, action, policy).await {
            Ok(allowed) => allowed,
            Err(err) => {
                tracing::error!(
                    client_id = %client_id,
                    action = %action,
                    error = %err,
                    "Rate limit check failed, allowing request"
                );
                true
            }
        };

        crate::metrics::rate_limit_decision(action, allowed);
        if !allowed {
            tracing::warn!(
                client_id = %client_id,
                action = %action,
                max_requests = policy.max_requests,
                window_secs = policy.time_window.as_secs(),
                "Rate limit exceeded"
            );
        }

        allowed
    }

    /// [`check_rate_limit`](Self::check_rate_limit) without fail-open coalescing
    ///
    /// # Panics
    ///
    /// Panics if `action` has no configured policy.
    pub async fn try_check_rate_limit(&self, client_id: &str, action: &str) -> StoreResult<bool> {
        let policy = self.required_policy(action);
        self.try_check(client_id, action, policy).await
    }

    async fn try_check(
        &self,
        client_id: &str,
        action: &str,
        policy: RateLimitPolicy,
    ) -> StoreResult<bool> {
        self.store
            .admit_window(
                &Self::window_key(client_id, action),
                policy.max_requests,
                policy.time_window,
                clock::epoch_now(),
            )
            .await
    }

    /// Block a client for the configured block duration
    pub async fn block_user(&self, client_id: &str, reason: &str) -> bool {
        self.block_user_for(client_id, reason, self.config.block_duration)
            .await
    }

    /// Block a client for a specific duration
    #[tracing::instrument(skip(self))]
    pub async fn block_user_for(&self, client_id: &str, reason: &str, duration: Duration) -> bool {
        match self
            .store
            .set(&Self::block_key(client_id), reason.as_bytes(), Some(duration))
            .await
        {
            Ok(()) => {
                tracing::warn!(
                    client_id = %client_id,
                    reason = %reason,
                    duration_secs = duration.as_secs(),
                    "Client blocked"
                );
                true
            }
            Err(err) => {
                tracing::error!(client_id = %client_id, error = %err, "Failed to block client");
                false
            }
        }
    }

    /// Reason the client is blocked, `None` when not blocked
    ///
    /// Store errors report the client as not blocked.
    pub async fn is_user_blocked(&self, client_id: &str) -> Option<String> {
        match self.store.get(&Self::block_key(client_id)).await {
            Ok(reason) => reason.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()),
            Err(err) => {
                tracing::error!(
                    client_id = %client_id,
                    error = %err,
                    "Failed to read block entry, treating client as not blocked"
                );
                None
            }
        }
    }

    /// Lift a block before it expires
    #[tracing::instrument(skip(self))]
    pub async fn unblock_user(&self, client_id: &str) -> bool {
        match self.store.delete(&Self::block_key(client_id)).await {
            Ok(_) => {
                tracing::info!(client_id = %client_id, "Client unblocked");
                true
            }
            Err(err) => {
                tracing::error!(client_id = %client_id, error = %err, "Failed to unblock client");
                false
            }
        }
    }

    /// Current usage of every configured action by one client
    ///
    /// Best effort: missing, expired or unreadable windows report a zero
    /// count starting now.
    pub async fn get_rate_limit_stats(&self, client_id: &str) -> BTreeMap<String, RateStat> {
        let mut stats = BTreeMap::new();

        for (action, policy) in &self.config.policies {
            let key = Self::window_key(client_id, action);
            let now = clock::epoch_now();

            let window = match self.store.get_string(&key).await {
                Ok(Some(raw)) => FixedWindow::parse(&key, &raw)
                    .inspect_err(|err| tracing::error!(error = %err, "Unreadable rate window"))
                    .ok(),
                Ok(None) => None,
                Err(err) => {
                    tracing::error!(client_id = %client_id, error = %err, "Failed to read rate window");
                    None
                }
            };
            let window = window
                .filter(|window| !window.is_expired_at(policy.time_window, now))
                .unwrap_or_else(|| FixedWindow::starting_at(now));

            stats.insert(
                action.clone(),
                RateStat {
                    current_count: window.count,
                    max_allowed: policy.max_requests,
                    window_start: window.window_start,
                },
            );
        }

        stats
    }
}
