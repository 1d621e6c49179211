//! Resilience metrics
//!
//! Recording goes through the `metrics` facade and is a no-op until a
//! recorder is installed; [`ResilienceMetrics::install`] installs the
//! Prometheus one.

use metrics::{counter, describe_counter};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::{Arc, Mutex};

use crate::resilience::CircuitState;

static PROMETHEUS_HANDLE: Mutex<Option<PrometheusHandle>> = Mutex::new(None);

pub(crate) fn circuit_transition(dependency: &str, from: CircuitState, to: CircuitState) {
    counter!(
        "circuit_breaker_transitions_total",
        "dependency" => dependency.to_string(),
        "from" => from.as_str(),
        "to" => to.as_str()
    )
    .increment(1);
}

pub(crate) fn circuit_rejection(dependency: &str) {
    counter!("circuit_breaker_rejections_total", "dependency" => dependency.to_string())
        .increment(1);
}

pub(crate) fn rate_limit_decision(action: &str, allowed: bool) {
    let outcome = if allowed { "allowed" } else { "rejected" };
    counter!(
        "rate_limit_decisions_total",
        "action" => action.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub(crate) fn cache_lookup(hit: bool) {
    if hit {
        counter!("cache_hits_total").increment(1);
    } else {
        counter!("cache_misses_total").increment(1);
    }
}

pub(crate) fn cache_invalidated(count: u64) {
    counter!("cache_invalidations_total").increment(count);
}

pub(crate) fn store_error(operation: &'static str) {
    counter!("state_store_errors_total", "operation" => operation).increment(1);
}

/// Handle to the process-wide Prometheus recorder
#[derive(Clone)]
pub struct ResilienceMetrics {
    prometheus_handle: Arc<PrometheusHandle>,
}

impl ResilienceMetrics {
    /// Install the Prometheus recorder, or reuse it if already installed
    pub fn install(config: Option<&crate::config::AppConfig>) -> anyhow::Result<Self> {
        let mut slot = PROMETHEUS_HANDLE
            .lock()
            .map_err(|_| anyhow::anyhow!("metrics recorder lock poisoned"))?;

        if let Some(handle) = slot.as_ref() {
            return Ok(Self {
                prometheus_handle: Arc::new(handle.clone()),
            });
        }

        let builder = PrometheusBuilder::new();
        let builder = match config {
            Some(cfg) => builder
                .add_global_label("service", cfg.app.name.clone())
                .add_global_label("environment", cfg.app.environment.clone()),
            None => builder,
        };

        let handle = builder.install_recorder()?;
        Self::describe_metrics();
        *slot = Some(handle.clone());

        Ok(Self {
            prometheus_handle: Arc::new(handle),
        })
    }

    fn describe_metrics() {
        describe_counter!(
            "circuit_breaker_transitions_total",
            "Circuit breaker state transitions by dependency"
        );
        describe_counter!(
            "circuit_breaker_rejections_total",
            "Calls rejected because a circuit was open"
        );
        describe_counter!(
            "rate_limit_decisions_total",
            "Rate limit decisions by action and outcome"
        );
        describe_counter!("cache_hits_total", "Total number of cache hits");
        describe_counter!("cache_misses_total", "Total number of cache misses");
        describe_counter!(
            "cache_invalidations_total",
            "Cache entries removed by explicit invalidation"
        );
        describe_counter!(
            "state_store_errors_total",
            "Shared state store errors and timeouts by operation"
        );
    }

    /// Prometheus text exposition
    pub fn render(&self) -> String {
        self.prometheus_handle.render()
    }
}

impl std::fmt::Debug for ResilienceMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilienceMetrics").finish_non_exhaustive()
    }
}
