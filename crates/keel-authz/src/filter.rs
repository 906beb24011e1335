//! Authorization filters.
//!
//! Several [`AuthorizeFilter`]s on one request (global, controller and
//! action scope) are evaluated once, as a single combined policy, by the last
//! of them in execution order. The others pass through.
//!
//! An [`AllowAnonymousFilter`] anywhere on the request skips authentication
//! and evaluation. A caller still anonymous after authentication is
//! challenged without its requirements being evaluated.

use crate::error::AuthzError;
use crate::evaluator::{PolicyAuthorizationResult, PolicyEvaluator};
use crate::options::PolicyProvider;
use crate::policy::{combine, AuthorizationPolicy, AuthorizationPolicyBuilder, Authorize};
use crate::service::{AuthorizationService, DefaultAuthorizationService};
use keel_core::result::{ChallengeResult, ForbidResult};
use keel_core::{BoxFuture, Claim, PipelineResult};
use keel_filters::{
    AsyncAuthorizationFilter, AuthorizationFilter, AuthorizationFilterContext, FilterMetadata,
};
use keel_telemetry::metrics::record_authorization_decision;
use std::sync::Arc;
use tracing::{debug, warn};

/// Requires the request to satisfy an authorization policy.
///
/// # Example
///
/// ```
/// use keel_authz::{AllowAnonymousFilter, AuthorizeFilter};
/// use keel_filters::ActionEndpoint;
///
/// let endpoint = ActionEndpoint::builder("reports.list")
///     .controller_filter(AuthorizeFilter::roles(["Admin", "Auditor"]))
///     .filter(AllowAnonymousFilter)
///     .build();
/// assert_eq!(endpoint.filters().len(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct AuthorizeFilter {
    policy: Option<AuthorizationPolicy>,
    data: Vec<Authorize>,
    fallback: bool,
}

impl Default for AuthorizeFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthorizeFilter {
    /// Requires any authenticated user (the provider's default policy).
    #[must_use]
    pub fn new() -> Self {
        Self::from_data(vec![Authorize::new()])
    }

    /// Requires a concrete policy.
    #[must_use]
    pub fn with_policy(policy: AuthorizationPolicy) -> Self {
        Self {
            policy: Some(policy),
            data: Vec::new(),
            fallback: false,
        }
    }

    /// Requires the policy registered as `name`.
    pub fn named(name: impl Into<String>) -> Self {
        Self::from_data(vec![Authorize::policy(name)])
    }

    /// Requires one of the roles.
    pub fn roles<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_data(vec![Authorize::roles(roles)])
    }

    /// Requires every declaration, resolved against the policy provider.
    #[must_use]
    pub fn from_data(data: Vec<Authorize>) -> Self {
        Self {
            policy: None,
            data,
            fallback: false,
        }
    }

    /// Applies the provider's fallback policy, and only to requests that
    /// carry no other [`AuthorizeFilter`].
    #[must_use]
    pub fn fallback() -> Self {
        Self {
            policy: None,
            data: Vec::new(),
            fallback: true,
        }
    }

    /// The concrete policy, if one was given.
    #[must_use]
    pub const fn policy(&self) -> Option<&AuthorizationPolicy> {
        self.policy.as_ref()
    }

    /// The declarations.
    #[must_use]
    pub fn data(&self) -> &[Authorize] {
        &self.data
    }

    /// Returns true for the fallback filter.
    #[must_use]
    pub const fn is_fallback(&self) -> bool {
        self.fallback
    }

    /// Builds the effective policy from every declaration on the request.
    /// `None` means nothing applies.
    fn effective_policy(
        provider: Option<&dyn PolicyProvider>,
        siblings: &[&Self],
    ) -> PipelineResult<Option<AuthorizationPolicy>> {
        if siblings.iter().all(|f| f.fallback) {
            return Ok(provider.and_then(|p| p.fallback_policy()));
        }

        let declared = siblings.iter().filter(|f| !f.fallback);
        let data: Vec<Authorize> = declared
            .clone()
            .flat_map(|f| f.data.iter().cloned())
            .collect();

        let mut builder = AuthorizationPolicyBuilder::default();
        if let Some(combined) = combine(provider, &data)? {
            builder = builder.combine(&combined);
        }
        for policy in declared.filter_map(|f| f.policy.as_ref()) {
            builder = builder.combine(policy);
        }
        Ok(Some(builder.build()?))
    }

    async fn authorize(&self, ctx: &mut AuthorizationFilterContext) -> PipelineResult<()> {
        if ctx.has_allow_anonymous() {
            debug!(action = ctx.action().id(), "Anonymous access allowed");
            return Ok(());
        }

        let services = Arc::clone(ctx.action_context().services());
        let policy = {
            let mut siblings: Vec<&Self> = ctx
                .filters()
                .iter()
                .filter_map(|f| f.as_ref().downcast_ref::<Self>())
                .collect();
            if !siblings.iter().any(|f| std::ptr::eq(*f, self)) {
                siblings.push(self);
            }

            let declared = siblings.iter().any(|f| !f.fallback);
            let evaluating = siblings
                .iter()
                .rev()
                .find(|f| f.fallback != declared)
                .map_or(true, |last| std::ptr::eq(*last, self));
            if !evaluating {
                return Ok(());
            }

            let provider = services.resolve_service::<dyn PolicyProvider>();
            match Self::effective_policy(provider.as_deref(), &siblings)? {
                Some(policy) => policy,
                None => return Ok(()),
            }
        };

        let evaluator = match services.resolve::<PolicyEvaluator>() {
            Some(evaluator) => evaluator,
            None => {
                let authorization = services
                    .resolve_service::<dyn AuthorizationService>()
                    .unwrap_or_else(|| Arc::new(DefaultAuthorizationService::new()));
                Arc::new(PolicyEvaluator::new(authorization))
            }
        };

        let http = Arc::clone(ctx.http());
        let authenticated = evaluator.authenticate(&policy, &http).await?;

        let schemes = policy.authentication_schemes().to_vec();
        let resource = ctx.action_context().clone();
        let outcome = if authenticated {
            evaluator
                .authorize(&policy, authenticated, &http, Some(&resource))
                .await?
        } else {
            PolicyAuthorizationResult::Challenge
        };
        match outcome {
            PolicyAuthorizationResult::Success => {
                record_authorization_decision("allowed");
            }
            PolicyAuthorizationResult::Challenge => {
                warn!(action = ctx.action().id(), "Authorization failed, challenging");
                record_authorization_decision("challenge");
                ctx.result = Some(Arc::new(ChallengeResult::new(schemes)));
            }
            PolicyAuthorizationResult::Forbid => {
                warn!(
                    action = ctx.action().id(),
                    user = http.user().name().unwrap_or("unknown"),
                    "Authorization failed, forbidding"
                );
                record_authorization_decision("forbid");
                ctx.result = Some(Arc::new(ForbidResult::new(schemes)));
            }
        }
        Ok(())
    }
}

impl AsyncAuthorizationFilter for AuthorizeFilter {
    fn on_authorization_async<'a>(
        &'a self,
        ctx: &'a mut AuthorizationFilterContext,
    ) -> BoxFuture<'a, PipelineResult<()>> {
        Box::pin(self.authorize(ctx))
    }
}

impl FilterMetadata for AuthorizeFilter {
    fn as_async_authorization_filter(&self) -> Option<&dyn AsyncAuthorizationFilter> {
        Some(self)
    }
}

/// Opens the request to anonymous callers.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAnonymousFilter;

impl FilterMetadata for AllowAnonymousFilter {
    fn is_allow_anonymous(&self) -> bool {
        true
    }
}

/// Requires an authenticated user carrying every listed claim.
///
/// Unlike [`AuthorizeFilter`] it checks the request user directly, without
/// policies or authentication schemes.
#[derive(Debug, Clone, Default)]
pub struct ClaimsAuthorizeFilter {
    claims: Vec<Claim>,
}

impl ClaimsAuthorizeFilter {
    /// Requires every claim in `claims`.
    #[must_use]
    pub fn new(claims: Vec<Claim>) -> Self {
        Self { claims }
    }

    /// Adds a required claim.
    #[must_use]
    pub fn with_claim(mut self, claim_type: impl Into<String>, value: impl Into<String>) -> Self {
        self.claims.push(Claim::new(claim_type, value));
        self
    }

    /// The required claims.
    #[must_use]
    pub fn claims(&self) -> &[Claim] {
        &self.claims
    }
}

impl AuthorizationFilter for ClaimsAuthorizeFilter {
    fn on_authorization(&self, ctx: &mut AuthorizationFilterContext) -> PipelineResult<()> {
        if self.claims.is_empty() {
            return Err(AuthzError::EmptyClaims.into());
        }
        if ctx.has_allow_anonymous() {
            return Ok(());
        }

        let user = ctx.http().user();
        if !user.is_authenticated() {
            record_authorization_decision("challenge");
            ctx.result = Some(Arc::new(ChallengeResult::default()));
        } else if !self
            .claims
            .iter()
            .all(|claim| user.has_claim(&claim.claim_type, &claim.value))
        {
            warn!(
                action = ctx.action().id(),
                user = user.name().unwrap_or("unknown"),
                "Required claims missing"
            );
            record_authorization_decision("forbid");
            ctx.result = Some(Arc::new(ForbidResult::default()));
        } else {
            record_authorization_decision("allowed");
        }
        Ok(())
    }
}

impl FilterMetadata for ClaimsAuthorizeFilter {
    fn as_authorization_filter(&self) -> Option<&dyn AuthorizationFilter> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::{
        ActionContext, ActionDescriptor, ClaimsIdentity, ClaimsPrincipal, HttpContext,
        PipelineError,
    };
    use keel_filters::FilterContext;

    fn context(
        user: ClaimsPrincipal,
        filters: Vec<Arc<dyn FilterMetadata>>,
    ) -> AuthorizationFilterContext {
        let http = Arc::new(HttpContext::builder().user(user).build());
        let action = ActionContext::new(http, Arc::new(ActionDescriptor::new("orders.list")));
        AuthorizationFilterContext::new(FilterContext::new(action, filters.into()))
    }

    fn member() -> ClaimsPrincipal {
        ClaimsPrincipal::from_identity(
            ClaimsIdentity::authenticated("Bearer")
                .with_name("ada")
                .with_claim(Claim::new("tier", "gold")),
        )
    }

    #[test]
    fn test_claims_filter() {
        let filter = ClaimsAuthorizeFilter::default().with_claim("tier", "gold");
        let filters: Vec<Arc<dyn FilterMetadata>> = vec![Arc::new(filter.clone())];

        let mut ctx = context(member(), filters.clone());
        filter.on_authorization(&mut ctx).unwrap();
        assert!(ctx.result.is_none());

        let mut ctx = context(ClaimsPrincipal::anonymous(), filters.clone());
        filter.on_authorization(&mut ctx).unwrap();
        assert!(ctx.result.as_ref().unwrap().is::<ChallengeResult>());

        let strict = filter.with_claim("tier", "platinum");
        let mut ctx = context(member(), filters);
        strict.on_authorization(&mut ctx).unwrap();
        assert!(ctx.result.as_ref().unwrap().is::<ForbidResult>());
    }

    #[test]
    fn test_claims_filter_requires_claims() {
        let filter = ClaimsAuthorizeFilter::new(Vec::new());
        let filters: Vec<Arc<dyn FilterMetadata>> =
            vec![Arc::new(filter.clone()), Arc::new(AllowAnonymousFilter)];
        let err = filter
            .on_authorization(&mut context(member(), filters))
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidOperation { .. }));
    }

    #[test]
    fn test_claims_filter_honors_allow_anonymous() {
        let filter = ClaimsAuthorizeFilter::default().with_claim("tier", "gold");
        let filters: Vec<Arc<dyn FilterMetadata>> =
            vec![Arc::new(filter.clone()), Arc::new(AllowAnonymousFilter)];
        let mut ctx = context(ClaimsPrincipal::anonymous(), filters);
        filter.on_authorization(&mut ctx).unwrap();
        assert!(ctx.result.is_none());
    }

    #[tokio::test]
    async fn test_only_last_authorize_filter_evaluates() {
        let outer = Arc::new(AuthorizeFilter::new());
        let inner = Arc::new(AuthorizeFilter::roles(["Admin"]));
        let filters: Vec<Arc<dyn FilterMetadata>> = vec![outer.clone(), inner.clone()];

        let mut ctx = context(member(), filters);
        outer.on_authorization_async(&mut ctx).await.unwrap();
        assert!(ctx.result.is_none());

        inner.on_authorization_async(&mut ctx).await.unwrap();
        assert!(ctx.result.as_ref().unwrap().is::<ForbidResult>());
    }

    #[tokio::test]
    async fn test_fallback_yields_to_declared_filters() {
        let fallback = Arc::new(AuthorizeFilter::fallback());
        let declared = Arc::new(AuthorizeFilter::new());
        let filters: Vec<Arc<dyn FilterMetadata>> = vec![declared.clone(), fallback.clone()];

        let mut ctx = context(ClaimsPrincipal::anonymous(), filters);
        fallback.on_authorization_async(&mut ctx).await.unwrap();
        assert!(ctx.result.is_none());

        declared.on_authorization_async(&mut ctx).await.unwrap();
        assert!(ctx.result.as_ref().unwrap().is::<ChallengeResult>());
    }

    #[tokio::test]
    async fn test_fallback_without_policy_is_open() {
        let fallback = Arc::new(AuthorizeFilter::fallback());
        let filters: Vec<Arc<dyn FilterMetadata>> = vec![fallback.clone()];
        let mut ctx = context(ClaimsPrincipal::anonymous(), filters);
        fallback.on_authorization_async(&mut ctx).await.unwrap();
        assert!(ctx.result.is_none());
        assert!(fallback.is_fallback());
    }
}
