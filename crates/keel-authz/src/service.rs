//! Evaluating a policy's requirements against a user.

use crate::handler::{AuthorizationHandler, AuthorizationHandlerContext, PassThroughHandler};
use crate::policy::AuthorizationPolicy;
use keel_core::{ActionContext, BoxFuture, ClaimsPrincipal, PipelineResult};
use std::sync::Arc;
use tracing::debug;

/// Why authorization failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizationFailure {
    /// A handler explicitly failed the evaluation.
    pub fail_called: bool,
    /// Requirements left unsatisfied.
    pub failed_requirements: Vec<&'static str>,
    /// Reasons given by failing handlers.
    pub reasons: Vec<String>,
}

/// Outcome of evaluating a policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationResult {
    /// Every requirement was satisfied.
    Success,
    /// At least one requirement was not satisfied, or a handler failed.
    Failed(AuthorizationFailure),
}

impl AuthorizationResult {
    /// Returns true on success.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        matches!(self, Self::Success)
    }

    fn from_context(ctx: &AuthorizationHandlerContext) -> Self {
        if ctx.has_succeeded() {
            Self::Success
        } else {
            Self::Failed(AuthorizationFailure {
                fail_called: ctx.has_failed(),
                failed_requirements: ctx.failed_requirements(),
                reasons: ctx.failure_reasons().to_vec(),
            })
        }
    }
}

/// Decides whether a user satisfies a policy.
///
/// Registered in the service container as `dyn AuthorizationService`.
pub trait AuthorizationService: Send + Sync + 'static {
    /// Evaluates `policy` for `user` accessing `resource`.
    fn authorize<'a>(
        &'a self,
        user: &'a ClaimsPrincipal,
        resource: Option<&'a ActionContext>,
        policy: &'a AuthorizationPolicy,
    ) -> BoxFuture<'a, PipelineResult<AuthorizationResult>>;
}

/// Runs every registered handler over the policy's requirements.
#[derive(Clone)]
pub struct DefaultAuthorizationService {
    handlers: Vec<Arc<dyn AuthorizationHandler>>,
    invoke_handlers_after_failure: bool,
}

impl Default for DefaultAuthorizationService {
    fn default() -> Self {
        Self::new()
    }
}

impl DefaultAuthorizationService {
    /// Creates a service with the [`PassThroughHandler`] only.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: vec![Arc::new(PassThroughHandler)],
            invoke_handlers_after_failure: true,
        }
    }

    /// Adds a handler, run after the ones already registered.
    #[must_use]
    pub fn with_handler(mut self, handler: impl AuthorizationHandler + 'static) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    /// Whether handlers keep running after one calls `fail`.
    #[must_use]
    pub const fn invoke_handlers_after_failure(mut self, enabled: bool) -> Self {
        self.invoke_handlers_after_failure = enabled;
        self
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

impl std::fmt::Debug for DefaultAuthorizationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultAuthorizationService")
            .field("handlers", &self.handlers.len())
            .field(
                "invoke_handlers_after_failure",
                &self.invoke_handlers_after_failure,
            )
            .finish()
    }
}

impl AuthorizationService for DefaultAuthorizationService {
    fn authorize<'a>(
        &'a self,
        user: &'a ClaimsPrincipal,
        resource: Option<&'a ActionContext>,
        policy: &'a AuthorizationPolicy,
    ) -> BoxFuture<'a, PipelineResult<AuthorizationResult>> {
        Box::pin(async move {
            let mut ctx = AuthorizationHandlerContext::new(
                user.clone(),
                policy.requirements().to_vec(),
                resource.cloned(),
            );

            for handler in &self.handlers {
                handler.handle(&mut ctx).await?;
                if ctx.has_failed() && !self.invoke_handlers_after_failure {
                    break;
                }
            }

            let result = AuthorizationResult::from_context(&ctx);
            debug!(
                user = user.name().unwrap_or("anonymous"),
                requirements = policy.requirements().len(),
                succeeded = result.succeeded(),
                "Policy evaluated"
            );
            Ok(result)
        })
    }
}
