//! Authorization handlers and their shared evaluation state.

use crate::requirement::AuthorizationRequirement;
use keel_core::{ActionContext, BoxFuture, ClaimsPrincipal, PipelineResult};
use std::fmt;
use std::sync::Arc;

/// State of one policy evaluation, shared by every handler.
///
/// A requirement is satisfied once any handler marks it succeeded. Any
/// handler may instead fail the whole evaluation.
pub struct AuthorizationHandlerContext {
    user: ClaimsPrincipal,
    resource: Option<ActionContext>,
    requirements: Vec<Arc<dyn AuthorizationRequirement>>,
    succeeded: Vec<bool>,
    failure_reasons: Vec<String>,
    fail_called: bool,
}

impl AuthorizationHandlerContext {
    /// Creates the state for evaluating `requirements` against `user`.
    #[must_use]
    pub fn new(
        user: ClaimsPrincipal,
        requirements: Vec<Arc<dyn AuthorizationRequirement>>,
        resource: Option<ActionContext>,
    ) -> Self {
        let succeeded = vec![false; requirements.len()];
        Self {
            user,
            resource,
            requirements,
            succeeded,
            failure_reasons: Vec::new(),
            fail_called: false,
        }
    }

    /// The principal being authorized.
    #[must_use]
    pub const fn user(&self) -> &ClaimsPrincipal {
        &self.user
    }

    /// The action being accessed, when authorizing inside the pipeline.
    #[must_use]
    pub const fn resource(&self) -> Option<&ActionContext> {
        self.resource.as_ref()
    }

    /// Every requirement of the policy.
    #[must_use]
    pub fn requirements(&self) -> &[Arc<dyn AuthorizationRequirement>] {
        &self.requirements
    }

    /// Requirements not yet satisfied, with their index.
    pub fn pending_requirements(
        &self,
    ) -> impl Iterator<Item = (usize, &Arc<dyn AuthorizationRequirement>)> + '_ {
        self.requirements
            .iter()
            .enumerate()
            .filter(|(index, _)| !self.succeeded[*index])
    }

    /// Marks the requirement at `index` satisfied. Out-of-range indexes are ignored.
    pub fn succeed(&mut self, index: usize) {
        if let Some(slot) = self.succeeded.get_mut(index) {
            *slot = true;
        }
    }

    /// Marks every requirement of type `R` satisfied.
    pub fn succeed_all<R: AuthorizationRequirement>(&mut self) {
        for (slot, requirement) in self.succeeded.iter_mut().zip(&self.requirements) {
            if requirement.is::<R>() {
                *slot = true;
            }
        }
    }

    /// Fails the evaluation regardless of requirements.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.fail_called = true;
        self.failure_reasons.push(reason.into());
    }

    /// Returns true once a handler called [`fail`](Self::fail).
    #[must_use]
    pub const fn has_failed(&self) -> bool {
        self.fail_called
    }

    /// Returns true if no handler failed and every requirement is satisfied.
    #[must_use]
    pub fn has_succeeded(&self) -> bool {
        !self.fail_called && self.succeeded.iter().all(|s| *s)
    }

    /// Names of the requirements still pending.
    #[must_use]
    pub fn failed_requirements(&self) -> Vec<&'static str> {
        self.pending_requirements().map(|(_, r)| r.name()).collect()
    }

    /// Reasons given to [`fail`](Self::fail).
    #[must_use]
    pub fn failure_reasons(&self) -> &[String] {
        &self.failure_reasons
    }
}

impl fmt::Debug for AuthorizationHandlerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationHandlerContext")
            .field("user", &self.user.name())
            .field("requirements", &self.requirements)
            .field("succeeded", &self.succeeded)
            .field("fail_called", &self.fail_called)
            .finish()
    }
}

/// Decides requirements it recognizes.
///
/// # Example
///
/// ```
/// use keel_authz::{AuthorizationHandler, AuthorizationHandlerContext, AuthorizationRequirement};
/// use keel_core::{BoxFuture, PipelineResult};
/// use std::any::Any;
///
/// #[derive(Debug)]
/// struct BusinessHours;
///
/// impl AuthorizationRequirement for BusinessHours {
///     fn as_any(&self) -> &dyn Any {
///         self
///     }
/// }
///
/// struct AlwaysOpen;
///
/// impl AuthorizationHandler for AlwaysOpen {
///     fn handle<'a>(
///         &'a self,
///         ctx: &'a mut AuthorizationHandlerContext,
///     ) -> BoxFuture<'a, PipelineResult<()>> {
///         Box::pin(async move {
///             ctx.succeed_all::<BusinessHours>();
///             Ok(())
///         })
///     }
/// }
/// ```
pub trait AuthorizationHandler: Send + Sync {
    /// Inspects the pending requirements and marks the ones it satisfies.
    fn handle<'a>(
        &'a self,
        ctx: &'a mut AuthorizationHandlerContext,
    ) -> BoxFuture<'a, PipelineResult<()>>;
}

/// Lets self-evaluating requirements decide for themselves.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThroughHandler;

impl AuthorizationHandler for PassThroughHandler {
    fn handle<'a>(
        &'a self,
        ctx: &'a mut AuthorizationHandlerContext,
    ) -> BoxFuture<'a, PipelineResult<()>> {
        Box::pin(async move {
            let state: &AuthorizationHandlerContext = ctx;
            let satisfied: Vec<usize> = state
                .pending_requirements()
                .filter(|(_, requirement)| requirement.evaluate(state) == Some(true))
                .map(|(index, _)| index)
                .collect();
            for index in satisfied {
                ctx.succeed(index);
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::requirement::{DenyAnonymousRequirement, RolesRequirement};
    use keel_core::ClaimsIdentity;

    fn requirements() -> Vec<Arc<dyn AuthorizationRequirement>> {
        vec![
            Arc::new(DenyAnonymousRequirement),
            Arc::new(RolesRequirement::new(["Admin"])),
        ]
    }

    #[tokio::test]
    async fn test_pass_through_satisfies_known_requirements() {
        let user = ClaimsPrincipal::from_identity(ClaimsIdentity::authenticated("Bearer"));
        let mut ctx = AuthorizationHandlerContext::new(user, requirements(), None);

        PassThroughHandler.handle(&mut ctx).await.unwrap();

        assert!(!ctx.has_succeeded());
        assert_eq!(ctx.pending_requirements().count(), 1);
        assert!(ctx.failed_requirements()[0].ends_with("RolesRequirement"));
    }

    #[test]
    fn test_succeed_all_by_type() {
        let mut ctx =
            AuthorizationHandlerContext::new(ClaimsPrincipal::anonymous(), requirements(), None);
        ctx.succeed_all::<RolesRequirement>();
        ctx.succeed(0);
        ctx.succeed(99);
        assert!(ctx.has_succeeded());
    }

    #[test]
    fn test_fail_wins() {
        let mut ctx =
            AuthorizationHandlerContext::new(ClaimsPrincipal::anonymous(), requirements(), None);
        ctx.succeed(0);
        ctx.succeed(1);
        ctx.fail("account locked");
        assert!(!ctx.has_succeeded());
        assert!(ctx.has_failed());
        assert_eq!(ctx.failure_reasons(), ["account locked"]);
    }
}
