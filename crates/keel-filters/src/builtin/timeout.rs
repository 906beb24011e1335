//! Request deadlines.
//!
//! [`RequestTimeoutFilter`] wraps the inner pipeline of a request with a
//! deadline. It does not abort work on its own: it publishes a
//! [`RequestTimeout`] item carrying a [`CancellationToken`] that is cancelled
//! once the deadline passes, and actions or filters that do long-running work
//! check it (or `select!` on it) at their own await points.

use crate::context::ResourceExecutingContext;
use crate::filter::{AsyncResourceFilter, FilterMetadata};
use crate::invoker::ResourceNext;
use keel_core::{BoxFuture, HttpContext, PipelineError, PipelineResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// The deadline of the current request.
#[derive(Debug, Clone)]
pub struct RequestTimeout {
    token: CancellationToken,
    deadline: Instant,
}

impl RequestTimeout {
    /// Returns the deadline published for `http`, if any.
    #[must_use]
    pub fn current(http: &HttpContext) -> Option<Arc<Self>> {
        http.item::<Self>()
    }

    /// Token cancelled once the deadline passes.
    #[must_use]
    pub const fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// When the request times out.
    #[must_use]
    pub const fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Returns true once the deadline has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fails with [`PipelineError::Cancelled`] once the deadline has passed.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` after the deadline.
    pub fn check(&self) -> PipelineResult<()> {
        if self.is_expired() {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Resource filter that gives each request a deadline.
#[derive(Debug, Clone, Copy)]
pub struct RequestTimeoutFilter {
    timeout: Duration,
    order: i32,
}

impl RequestTimeoutFilter {
    /// Creates a filter with the given timeout.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            order: i32::MIN + 200,
        }
    }

    /// Overrides the filter order.
    #[must_use]
    pub const fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    /// The configured timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl AsyncResourceFilter for RequestTimeoutFilter {
    fn on_resource_execution<'a>(
        &'a self,
        ctx: &'a mut ResourceExecutingContext,
        next: ResourceNext<'a>,
    ) -> BoxFuture<'a, PipelineResult<()>> {
        Box::pin(async move {
            let token = CancellationToken::new();
            let finished = CancellationToken::new();
            ctx.http().insert_item(RequestTimeout {
                token: token.clone(),
                deadline: Instant::now() + self.timeout,
            });

            let _watchdog = {
                let token = token.clone();
                let finished = finished.clone();
                let timeout = self.timeout;
                tokio::spawn(async move {
                    tokio::select! {
                        () = tokio::time::sleep(timeout) => token.cancel(),
                        () = finished.cancelled() => {}
                    }
                })
            };
            let _stop = finished.drop_guard();

            let executed = next.run(ctx).await;
            if token.is_cancelled() {
                warn!(
                    timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                    canceled = executed.canceled,
                    "Request exceeded its timeout"
                );
            }
            Ok(())
        })
    }
}

impl FilterMetadata for RequestTimeoutFilter {
    fn order(&self) -> Option<i32> {
        Some(self.order)
    }

    fn as_async_resource_filter(&self) -> Option<&dyn AsyncResourceFilter> {
        Some(self)
    }
}
