//! The root configuration type and its builder.

use serde::{Deserialize, Serialize};

use crate::{
    AuthorizationConfig, ConfigError, CorsConfig, FiltersConfig, LoggingConfig, MetricsConfig,
    TimeoutConfig,
};
use keel_telemetry::logging::LogFormat;

/// Complete Keel configuration.
///
/// Use [`ConfigLoader`](crate::ConfigLoader) to load it from files and
/// environment variables.
///
/// # Example
///
/// ```
/// use keel_config::KeelConfig;
///
/// let config = KeelConfig::default();
/// assert!(config.filters.cors_first);
/// assert!(!config.timeout.enabled);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct KeelConfig {
    /// Logging.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Filter pipeline.
    #[serde(default)]
    pub filters: FiltersConfig,

    /// Authorization policies.
    #[serde(default)]
    pub authorization: AuthorizationConfig,

    /// CORS.
    #[serde(default)]
    pub cors: CorsConfig,

    /// Request timeout.
    #[serde(default)]
    pub timeout: TimeoutConfig,
}

impl KeelConfig {
    /// Creates a configuration builder.
    #[must_use]
    pub fn builder() -> KeelConfigBuilder {
        KeelConfigBuilder::new()
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if:
    /// - The metrics address is not a socket address while metrics are enabled
    /// - `timeout_ms` is 0 while the timeout is enabled
    /// - A policy has no requirement
    /// - CORS allows any origin together with credentials
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.metrics.enabled && self.metrics.addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::invalid_value(
                "metrics.addr",
                format!("invalid socket address: {}", self.metrics.addr),
            ));
        }

        if self.timeout.enabled && self.timeout.timeout_ms == 0 {
            return Err(ConfigError::invalid_value(
                "timeout.timeout_ms",
                "must be greater than 0",
            ));
        }

        if let Some((name, _)) = self
            .authorization
            .policies
            .iter()
            .find(|(_, policy)| !policy.has_requirements())
        {
            return Err(ConfigError::invalid_value(
                format!("authorization.policies.{name}"),
                "a policy requires at least one requirement",
            ));
        }

        if self.cors.enabled && self.cors.allow_credentials && self.cors.allows_any_origin() {
            return Err(ConfigError::invalid_value(
                "cors.allowed_origins",
                "a wildcard origin cannot be combined with allow_credentials",
            ));
        }

        Ok(())
    }

    /// Development preset: pretty debug logs, no exporters.
    #[must_use]
    pub fn development() -> Self {
        Self {
            logging: LoggingConfig {
                level: "debug".to_string(),
                format: LogFormat::Pretty,
                span_events: true,
                ..LoggingConfig::default()
            },
            ..Self::default()
        }
    }

    /// Production preset: JSON logs, metrics exporter, 30s request timeout.
    #[must_use]
    pub fn production() -> Self {
        Self {
            metrics: MetricsConfig {
                enabled: true,
                ..MetricsConfig::default()
            },
            timeout: TimeoutConfig {
                enabled: true,
                ..TimeoutConfig::default()
            },
            ..Self::default()
        }
    }
}

/// Builder for [`KeelConfig`].
#[derive(Debug, Default)]
pub struct KeelConfigBuilder {
    config: KeelConfig,
}

impl KeelConfigBuilder {
    /// Creates a builder holding the defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the logging section.
    #[must_use]
    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.config.logging = logging;
        self
    }

    /// Sets the metrics section.
    #[must_use]
    pub fn metrics(mut self, metrics: MetricsConfig) -> Self {
        self.config.metrics = metrics;
        self
    }

    /// Sets the filters section.
    #[must_use]
    pub fn filters(mut self, filters: FiltersConfig) -> Self {
        self.config.filters = filters;
        self
    }

    /// Sets the authorization section.
    #[must_use]
    pub fn authorization(mut self, authorization: AuthorizationConfig) -> Self {
        self.config.authorization = authorization;
        self
    }

    /// Sets the CORS section.
    #[must_use]
    pub fn cors(mut self, cors: CorsConfig) -> Self {
        self.config.cors = cors;
        self
    }

    /// Sets the timeout section.
    #[must_use]
    pub fn timeout(mut self, timeout: TimeoutConfig) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Builds the configuration without validating it.
    #[must_use]
    pub fn build(self) -> KeelConfig {
        self.config
    }
}
