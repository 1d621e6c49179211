//! Log subscriber setup for binaries embedding the guard

use std::sync::OnceLock;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ObservabilityConfig;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Install a global `fmt` subscriber
///
/// `RUST_LOG` wins over `observability.log_level`. Safe to call more than
/// once; only the first call installs anything, and an already-installed
/// global subscriber is left alone.
pub fn init(config: &ObservabilityConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));

        let result = if config.json {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_target(true))
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_target(true))
                .try_init()
        };

        if result.is_err() {
            tracing::debug!("Global tracing subscriber already initialized - keeping it");
        }
    });
}
