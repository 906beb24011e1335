//! Typed configuration for Keel.
//!
//! - TOML and JSON configuration files
//! - Environment variable overrides (`KEEL__SECTION__KEY`)
//! - Strict parsing: unknown fields are errors
//! - Layered loading: defaults, then file, then environment
//!
//! # Configuration File Format
//!
//! ```toml
//! [logging]
//! level = "info"
//! format = "json"
//!
//! [metrics]
//! enabled = false
//! addr = "0.0.0.0:9090"
//!
//! [filters]
//! cors_first = true
//!
//! [authorization]
//! default_schemes = ["Bearer"]
//!
//! [authorization.policies.admins]
//! roles = ["Admin"]
//! require_authenticated_user = true
//! claims = [{ claim_type = "department", allowed_values = ["ops"] }]
//!
//! [cors]
//! enabled = true
//! allowed_origins = ["https://app.example.com"]
//! allow_credentials = true
//! max_age_secs = 600
//!
//! [timeout]
//! enabled = true
//! timeout_ms = 30000
//! ```
//!
//! # Environment Variable Overrides
//!
//! - `KEEL__LOGGING__LEVEL=debug`
//! - `KEEL__TIMEOUT__TIMEOUT_MS=5000`
//! - `KEEL__CORS__ALLOWED_ORIGINS=https://a.example.com,https://b.example.com`

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod config;
mod error;
mod loader;
mod schema;

pub use config::{KeelConfig, KeelConfigBuilder};
pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::{
    AuthorizationConfig, ClaimConfig, CorsConfig, FiltersConfig, LoggingConfig, MetricsConfig,
    PolicyConfig, TimeoutConfig,
};
