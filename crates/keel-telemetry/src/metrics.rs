//! Prometheus metrics for the filter pipeline.
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `keel_filter_short_circuits_total` | Counter | `category` | Stages stopped by a filter |
//! | `keel_authorization_decisions_total` | Counter | `outcome` | `allowed`, `anonymous`, `challenge`, `forbid` |
//! | `keel_action_exceptions_total` | Counter | `handled` | Errors offered to exception filters |
//! | `keel_action_invocation_duration_seconds` | Histogram | `action` | Pipeline latency |
//!
//! # Example
//!
//! ```rust,ignore
//! use keel_telemetry::metrics::{record_short_circuit, ShortCircuitCategory};
//!
//! record_short_circuit(ShortCircuitCategory::Authorization);
//! ```

use crate::error::TelemetryError;
use crate::TelemetryResult;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

/// Global metrics handle for rendering.
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Whether metrics are enabled.
    pub enabled: bool,

    /// Address to expose metrics on (e.g., "0.0.0.0:9090").
    pub addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: "0.0.0.0:9090".to_string(),
        }
    }
}

/// The pipeline stage a short circuit happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShortCircuitCategory {
    /// An authorization filter set a result.
    Authorization,
    /// A resource filter set a result or did not call `next`.
    Resource,
    /// An action filter set a result or did not call `next`.
    Action,
    /// A result filter cancelled result execution.
    Result,
}

impl ShortCircuitCategory {
    /// Returns the label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Authorization => "authorization",
            Self::Resource => "resource",
            Self::Action => "action",
            Self::Result => "result",
        }
    }
}

/// Installs the Prometheus recorder and its HTTP listener.
///
/// Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns `TelemetryError::InvalidAddress` for an unparsable address and
/// `TelemetryError::MetricsInit` if a recorder is already installed.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let addr: SocketAddr = config
        .addr
        .parse()
        .map_err(|e| TelemetryError::InvalidAddress(format!("{}: {e}", config.addr)))?;

    let handle = PrometheusBuilder::new()
        .with_http_listener(addr)
        .install_recorder()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    let _ = METRICS_HANDLE.set(handle);

    register_metric_descriptions();

    Ok(())
}

/// Renders metrics in Prometheus format.
///
/// Returns `None` if metrics are not initialized.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

fn register_metric_descriptions() {
    describe_counter!(
        "keel_filter_short_circuits_total",
        "Pipeline stages stopped early by a filter"
    );
    describe_counter!(
        "keel_authorization_decisions_total",
        "Authorization decisions by outcome"
    );
    describe_counter!(
        "keel_action_exceptions_total",
        "Action-stage errors offered to exception filters"
    );
    describe_histogram!(
        "keel_action_invocation_duration_seconds",
        "Duration of a full action invocation in seconds"
    );
}

/// Records a short circuit.
pub fn record_short_circuit(category: ShortCircuitCategory) {
    counter!(
        "keel_filter_short_circuits_total",
        "category" => category.as_str()
    )
    .increment(1);
}

/// Records an authorization decision.
///
/// `outcome` is one of `allowed`, `anonymous`, `challenge`, `forbid`.
pub fn record_authorization_decision(outcome: &'static str) {
    counter!(
        "keel_authorization_decisions_total",
        "outcome" => outcome
    )
    .increment(1);
}

/// Records an action-stage error and whether an exception filter handled it.
pub fn record_action_exception(handled: bool) {
    counter!(
        "keel_action_exceptions_total",
        "handled" => if handled { "true" } else { "false" }
    )
    .increment(1);
}

/// Records the duration of a full invocation.
pub fn record_invocation(action: &str, duration: Duration) {
    histogram!(
        "keel_action_invocation_duration_seconds",
        "action" => action.to_string()
    )
    .record(duration.as_secs_f64());
}
