//! Fixed-window counter stored as `count:window_start`

use std::time::Duration;

use super::{StoreError, StoreResult};
use crate::clock;

/// Decoded rate window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedWindow {
    pub count: u32,
    /// Epoch seconds when the window began
    pub window_start: f64,
}

impl FixedWindow {
    pub fn starting_at(now: f64) -> Self {
        Self {
            count: 0,
            window_start: now,
        }
    }

    pub fn parse(key: &str, raw: &str) -> StoreResult<Self> {
        let (count, start) = raw
            .split_once(':')
            .ok_or_else(|| StoreError::malformed(key, "expected count:window_start"))?;

        Ok(Self {
            count: count
                .trim()
                .parse()
                .map_err(|_| StoreError::malformed(key, "count is not an integer"))?,
            window_start: clock::parse_epoch(start)
                .ok_or_else(|| StoreError::malformed(key, "window_start is not a timestamp"))?,
        })
    }

    pub fn encode(&self) -> String {
        format!("{}:{}", self.count, clock::format_epoch(self.window_start))
    }

    /// Strictly past the window; a request exactly on the boundary still
    /// counts against the old one
    pub fn is_expired_at(&self, window: Duration, now: f64) -> bool {
        now - self.window_start > window.as_secs_f64()
    }

    /// The window after admitting one request at `now`, `None` once the
    /// budget is spent
    ///
    /// A missing or expired window restarts at `now`.
    pub fn admit(current: Option<Self>, max_requests: u32, window: Duration, now: f64) -> Option<Self> {
        let current = match current {
            Some(current) if !current.is_expired_at(window, now) => current,
            _ => Self::starting_at(now),
        };

        if current.count >= max_requests {
            return None;
        }

        Some(Self {
            count: current.count + 1,
            ..current
        })
    }
}
