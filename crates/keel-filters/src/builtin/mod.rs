//! Filters shipped with the pipeline.
//!
//! - [`CorsAuthorizationFilter`] answers preflight requests before any other
//!   authorization filter runs.
//! - [`RateLimitHandler`] is a parametrized resource filter limiting requests
//!   per caller and action.
//! - [`RequestTimeoutFilter`] bounds how long the inner pipeline may run.

pub mod cors;
pub mod rate_limit;
pub mod timeout;

pub use cors::{AllowedOrigins, CorsAuthorizationFilter, CorsBuilder};
pub use rate_limit::{RateLimit, RateLimitDecision, RateLimitHandler};
pub use timeout::{RequestTimeout, RequestTimeoutFilter};
