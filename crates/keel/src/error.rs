//! Errors raised while assembling an application.

use keel_authz::AuthzError;
use keel_config::ConfigError;
use keel_telemetry::TelemetryError;
use thiserror::Error;

/// Result type for application assembly.
pub type KeelResult<T> = Result<T, KeelError>;

/// Error assembling or starting an application.
#[derive(Debug, Error)]
pub enum KeelError {
    /// The configuration is invalid.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A configured policy could not be built.
    #[error("authorization error: {0}")]
    Authorization(#[from] AuthzError),

    /// Logging or metrics could not be installed.
    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
}
