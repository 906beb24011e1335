//! Observability for the Keel filter pipeline.
//!
//! - **Logging**: structured logs through `tracing-subscriber`, JSON in
//!   production and pretty output in development
//! - **Metrics**: Prometheus-format pipeline metrics via the `metrics` crate
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `keel_filter_short_circuits_total` | Counter | `category` | Stages stopped by a filter result |
//! | `keel_authorization_decisions_total` | Counter | `outcome` | Authorization outcomes |
//! | `keel_action_exceptions_total` | Counter | `handled` | Action-stage errors seen by exception filters |
//! | `keel_action_invocation_duration_seconds` | Histogram | `action` | Full pipeline duration |
//!
//! Recording is a no-op until [`metrics::init_metrics`] installs a recorder.
//!
//! # Example
//!
//! ```rust,ignore
//! use keel_telemetry::logging::{init_logging, LogConfig};
//!
//! init_logging(&LogConfig::development())?;
//! tracing::info!(request_id = "abc", "pipeline ready");
//! ```

#![doc(html_root_url = "https://docs.rs/keel-telemetry/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod error;
pub mod logging;
pub mod metrics;

pub use self::error::TelemetryError;
pub use self::logging::{init_logging, LogConfig};
pub use self::metrics::{init_metrics, MetricsConfig};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
