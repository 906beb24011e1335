//! Configuration schema types.
//!
//! Every section rejects unknown fields and falls back to its defaults for
//! fields left out.

use keel_telemetry::logging::{LogConfig, LogFormat};
use keel_telemetry::metrics::MetricsConfig as TelemetryMetricsConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Logging section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Enable logging.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// `EnvFilter` directive (e.g. "info" or "keel_filters=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Include span open/close events.
    #[serde(default)]
    pub span_events: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: default_log_level(),
            format: LogFormat::Json,
            span_events: false,
        }
    }
}

impl LoggingConfig {
    /// Converts to the subscriber configuration.
    #[must_use]
    pub fn to_log_config(&self) -> LogConfig {
        let base = match self.format {
            LogFormat::Json => LogConfig::production(),
            LogFormat::Pretty => LogConfig::development(),
        };
        LogConfig {
            enabled: self.enabled,
            level: self.level.clone(),
            format: self.format,
            span_events: self.span_events,
            ..base
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Metrics section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Install the Prometheus exporter.
    #[serde(default)]
    pub enabled: bool,

    /// Prometheus listener address.
    #[serde(default = "default_metrics_addr")]
    pub addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: default_metrics_addr(),
        }
    }
}

impl MetricsConfig {
    /// Converts to the exporter configuration.
    #[must_use]
    pub fn to_metrics_config(&self) -> TelemetryMetricsConfig {
        TelemetryMetricsConfig {
            enabled: self.enabled,
            addr: self.addr.clone(),
        }
    }
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9090".to_string()
}

/// Filter pipeline section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FiltersConfig {
    /// Sort CORS authorization filters ahead of everything else.
    #[serde(default = "default_true")]
    pub cors_first: bool,
}

impl Default for FiltersConfig {
    fn default() -> Self {
        Self { cors_first: true }
    }
}

/// A claim a configured policy requires.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ClaimConfig {
    /// The claim type.
    pub claim_type: String,

    /// Accepted values. Empty accepts any value.
    #[serde(default)]
    pub allowed_values: Vec<String>,
}

/// A named authorization policy.
///
/// # Example
///
/// ```
/// use keel_config::PolicyConfig;
///
/// let policy: PolicyConfig = toml::from_str(r#"
///     roles = ["Admin"]
///     claims = [{ claim_type = "department", allowed_values = ["ops"] }]
/// "#).unwrap();
///
/// assert!(policy.has_requirements());
/// assert!(!policy.require_authenticated_user);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    /// The user must be in at least one of these roles.
    #[serde(default)]
    pub roles: Vec<String>,

    /// The user must be authenticated.
    #[serde(default)]
    pub require_authenticated_user: bool,

    /// The user must carry each claim.
    #[serde(default)]
    pub claims: Vec<ClaimConfig>,

    /// The user must have this name.
    #[serde(default)]
    pub user_name: Option<String>,

    /// Schemes to authenticate with. Empty uses `default_schemes`.
    #[serde(default)]
    pub authentication_schemes: Vec<String>,
}

impl PolicyConfig {
    /// Returns true if the policy demands anything at all.
    #[must_use]
    pub fn has_requirements(&self) -> bool {
        self.require_authenticated_user
            || !self.roles.is_empty()
            || !self.claims.is_empty()
            || self.user_name.is_some()
    }
}

/// Authorization section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AuthorizationConfig {
    /// Schemes for policies that name none.
    #[serde(default)]
    pub default_schemes: Vec<String>,

    /// Named policies.
    #[serde(default)]
    pub policies: BTreeMap<String, PolicyConfig>,

    /// Require an authenticated user on endpoints without any declaration.
    #[serde(default)]
    pub require_authenticated_fallback: bool,

    /// Keep running authorization handlers after one fails.
    #[serde(default = "default_true")]
    pub invoke_handlers_after_failure: bool,
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        Self {
            default_schemes: Vec::new(),
            policies: BTreeMap::new(),
            require_authenticated_fallback: false,
            invoke_handlers_after_failure: true,
        }
    }
}

/// CORS section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CorsConfig {
    /// Install the CORS authorization filter.
    #[serde(default)]
    pub enabled: bool,

    /// Allowed origins. `"*"` allows any origin.
    #[serde(default)]
    pub allowed_origins: Vec<String>,

    /// Allowed methods. Empty keeps the filter's defaults.
    #[serde(default)]
    pub allowed_methods: Vec<String>,

    /// Allowed request headers. Empty keeps the filter's defaults.
    #[serde(default)]
    pub allowed_headers: Vec<String>,

    /// Response headers exposed to scripts.
    #[serde(default)]
    pub exposed_headers: Vec<String>,

    /// Allow credentials.
    #[serde(default)]
    pub allow_credentials: bool,

    /// Preflight cache lifetime. `None` omits the header.
    #[serde(default = "default_max_age")]
    pub max_age_secs: Option<u64>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allowed_origins: Vec::new(),
            allowed_methods: Vec::new(),
            allowed_headers: Vec::new(),
            exposed_headers: Vec::new(),
            allow_credentials: false,
            max_age_secs: default_max_age(),
        }
    }
}

impl CorsConfig {
    /// Returns true if any origin is allowed.
    #[must_use]
    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.iter().any(|o| o == "*")
    }
}

#[allow(clippy::unnecessary_wraps)]
fn default_max_age() -> Option<u64> {
    Some(86400)
}

/// Request timeout section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TimeoutConfig {
    /// Install the request timeout filter.
    #[serde(default)]
    pub enabled: bool,

    /// Deadline in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    30000
}

fn default_true() -> bool {
    true
}
