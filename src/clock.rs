//! Wall-clock helpers for timestamps persisted in the shared store
//!
//! Timestamps cross process boundaries, so they are stored as Unix epoch
//! seconds with a fractional part rather than as `Instant`s.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current Unix time in seconds
pub fn epoch_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Seconds elapsed since `since`, clamped at zero for clocks that drift backwards
pub fn elapsed_since(since: f64) -> Duration {
    Duration::try_from_secs_f64((epoch_now() - since).max(0.0)).unwrap_or(Duration::MAX)
}

/// Render a timestamp the way it is written to the store
pub fn format_epoch(epoch: f64) -> String {
    format!("{:.6}", epoch)
}

/// Parse a stored timestamp
pub fn parse_epoch(raw: &str) -> Option<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite() && *value >= 0.0)
}
