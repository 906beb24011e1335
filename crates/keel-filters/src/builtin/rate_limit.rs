//! Sliding-window rate limiting as a parametrized resource filter.
//!
//! [`RateLimitHandler`] is registered once in the container and holds the
//! counters. Each endpoint declares its own [`RateLimit`] through a
//! [`ParametrizedFilterFactory`](crate::ParametrizedFilterFactory), so two
//! actions with different limits share one handler but never one counter.
//!
//! # Example
//!
//! ```
//! use keel_core::di::Container;
//! use keel_filters::builtin::{RateLimit, RateLimitHandler};
//! use keel_filters::{ActionEndpoint, ParametrizedFilterFactory};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let mut services = Container::new();
//! services.register(Arc::new(RateLimitHandler::new()));
//!
//! let endpoint = ActionEndpoint::builder("orders.create")
//!     .filter(ParametrizedFilterFactory::<RateLimitHandler, RateLimit>::new(
//!         RateLimit::new(10, Duration::from_secs(1)),
//!     ))
//!     .build();
//! ```

use crate::context::ResourceExecutingContext;
use crate::parametrized::ParametrizedFilter;
use bytes::Bytes;
use dashmap::DashMap;
use http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use http::StatusCode;
use keel_core::{ActionContext, ActionResult, BoxFuture, HttpContext, PipelineResult};
use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Rate limit header names.
pub mod headers {
    /// Requests allowed per window.
    pub const LIMIT: &str = "x-ratelimit-limit";
    /// Requests left in the current window.
    pub const REMAINING: &str = "x-ratelimit-remaining";
    /// Seconds until the window resets.
    pub const RESET: &str = "x-ratelimit-reset";
    /// Seconds the caller should wait before retrying.
    pub const RETRY_AFTER: &str = "retry-after";
}

/// Declaration data: how many requests a caller may make per window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    permits: u64,
    window: Duration,
}

impl RateLimit {
    /// Allows `permits` requests per `window`.
    #[must_use]
    pub const fn new(permits: u64, window: Duration) -> Self {
        Self { permits, window }
    }

    /// Allows `permits` requests per second.
    #[must_use]
    pub const fn per_second(permits: u64) -> Self {
        Self::new(permits, Duration::from_secs(1))
    }

    /// Allows `permits` requests per minute.
    #[must_use]
    pub const fn per_minute(permits: u64) -> Self {
        Self::new(permits, Duration::from_secs(60))
    }

    /// Requests per window.
    #[must_use]
    pub const fn permits(&self) -> u64 {
        self.permits
    }

    /// Window length.
    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// The request may proceed.
    Allowed {
        /// Requests per window.
        limit: u64,
        /// Requests left in the window.
        remaining: u64,
        /// Time until the window resets.
        reset_in: Duration,
    },
    /// The request is rejected.
    Limited {
        /// Requests per window.
        limit: u64,
        /// Time until the window resets.
        reset_in: Duration,
    },
}

impl RateLimitDecision {
    /// Returns true if the request may proceed.
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// Checks between sweeps of expired counters.
const DEFAULT_PURGE_INTERVAL: u64 = 1024;

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u64,
    previous: u64,
    started: Instant,
    length: Duration,
}

impl Window {
    /// Two full windows without a check leave nothing worth keeping.
    fn expired(&self, now: Instant) -> bool {
        now.duration_since(self.started) >= self.length * 2
    }
}

/// Holds sliding-window counters keyed by action and caller.
///
/// Every `purge_interval` checks the handler drops counters that have
/// been idle for two of their windows, so rotating caller keys cannot
/// grow the map without bound.
#[derive(Debug)]
pub struct RateLimitHandler {
    windows: DashMap<String, Window>,
    checks: AtomicU64,
    purge_interval: u64,
}

impl Default for RateLimitHandler {
    fn default() -> Self {
        Self::with_purge_interval(DEFAULT_PURGE_INTERVAL)
    }
}

impl RateLimitHandler {
    /// Creates a handler with no recorded requests.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a handler that sweeps expired counters every `interval` checks.
    #[must_use]
    pub fn with_purge_interval(interval: u64) -> Self {
        Self {
            windows: DashMap::new(),
            checks: AtomicU64::new(0),
            purge_interval: interval.max(1),
        }
    }

    /// Records one request for `key` and decides whether it may proceed.
    ///
    /// The previous window's count is weighted by how much of it still
    /// overlaps the sliding window ending now.
    pub fn check(&self, key: &str, limit: &RateLimit) -> RateLimitDecision {
        let now = Instant::now();
        let window = limit.window.max(Duration::from_millis(1));

        // Sweep before taking an entry guard; `retain` locks every shard.
        let checks = self.checks.fetch_add(1, Ordering::Relaxed) + 1;
        if checks % self.purge_interval == 0 {
            self.purge_expired(now);
        }

        let mut entry = self.windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            previous: 0,
            started: now,
            length: window,
        });
        entry.length = window;

        let elapsed = now.duration_since(entry.started);
        if elapsed >= window {
            let passed = elapsed.as_nanos() / window.as_nanos();
            entry.previous = if passed >= 2 { 0 } else { entry.count };
            entry.count = 0;
            let advance = u32::try_from(passed).map_or(elapsed, |passed| window * passed);
            entry.started += advance;
        }

        let in_window = now.duration_since(entry.started);
        let progress = in_window.as_secs_f64() / window.as_secs_f64();
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            clippy::cast_precision_loss
        )]
        let weighted = entry.count + (entry.previous as f64 * (1.0 - progress)) as u64;
        let reset_in = window.saturating_sub(in_window);

        if weighted >= limit.permits {
            return RateLimitDecision::Limited {
                limit: limit.permits,
                reset_in,
            };
        }

        entry.count += 1;
        RateLimitDecision::Allowed {
            limit: limit.permits,
            remaining: limit.permits.saturating_sub(weighted + 1),
            reset_in,
        }
    }

    /// Number of tracked counters.
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    /// Drops counters idle for two or more of their windows.
    pub fn purge_idle(&self) {
        self.purge_expired(Instant::now());
    }

    fn purge_expired(&self, now: Instant) {
        let before = self.windows.len();
        self.windows.retain(|_, w| !w.expired(now));
        let dropped = before.saturating_sub(self.windows.len());
        if dropped > 0 {
            debug!(dropped, "Purged idle rate limit counters");
        }
    }

    fn caller_key(http: &HttpContext) -> String {
        if let Some(name) = http.user().name() {
            return format!("user:{name}");
        }
        http.header("x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .or_else(|| http.header("x-real-ip"))
            .map_or_else(|| "anonymous".to_string(), |ip| format!("ip:{}", ip.trim()))
    }
}

impl ParametrizedFilter<RateLimit> for RateLimitHandler {
    fn on_resource_executing(
        &self,
        ctx: &mut ResourceExecutingContext,
        params: &RateLimit,
    ) -> PipelineResult<()> {
        let key = format!("{}|{}", ctx.action().id(), Self::caller_key(ctx.http()));

        match self.check(&key, params) {
            RateLimitDecision::Allowed {
                limit,
                remaining,
                reset_in,
            } => {
                let mut response = ctx.http().response();
                write_headers(&mut response.headers, limit, remaining, reset_in);
            }
            RateLimitDecision::Limited { limit, reset_in } => {
                debug!(key = %key, limit, "Rate limit exceeded");
                ctx.result = Some(Arc::new(TooManyRequests { limit, reset_in }));
            }
        }
        Ok(())
    }
}

/// `429 Too Many Requests` with a JSON error body.
#[derive(Debug, Clone, Copy)]
struct TooManyRequests {
    limit: u64,
    reset_in: Duration,
}

impl ActionResult for TooManyRequests {
    fn execute_result<'a>(&'a self, ctx: &'a ActionContext) -> BoxFuture<'a, PipelineResult<()>> {
        Box::pin(async move {
            let body = serde_json::json!({
                "error": {
                    "code": "RATE_LIMITED",
                    "message": "Too many requests. Please retry later.",
                }
            });
            let mut response = ctx.http.response();
            response.status = StatusCode::TOO_MANY_REQUESTS;
            write_headers(&mut response.headers, self.limit, 0, self.reset_in);
            insert(
                &mut response.headers,
                headers::RETRY_AFTER,
                seconds(self.reset_in).max(1),
            );
            response
                .headers
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            response.body = Bytes::from(body.to_string());
            Ok(())
        })
    }

    fn status_code(&self) -> Option<StatusCode> {
        Some(StatusCode::TOO_MANY_REQUESTS)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn seconds(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}

fn write_headers(map: &mut HeaderMap, limit: u64, remaining: u64, reset_in: Duration) {
    insert(map, headers::LIMIT, limit);
    insert(map, headers::REMAINING, remaining);
    insert(map, headers::RESET, seconds(reset_in));
}

fn insert(map: &mut HeaderMap, name: &'static str, value: u64) {
    map.insert(HeaderName::from_static(name), HeaderValue::from(value));
}
