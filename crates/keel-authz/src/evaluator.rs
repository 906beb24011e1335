//! Authenticating and authorizing a request against a policy.

use crate::error::AuthzError;
use crate::policy::AuthorizationPolicy;
use crate::service::{AuthorizationResult, AuthorizationService};
use keel_core::{
    ActionContext, AuthenticateResult, AuthenticationService, ClaimsPrincipal, HttpContext,
    PipelineResult,
};
use std::sync::Arc;
use tracing::{debug, instrument};

/// What the pipeline should do after evaluating a policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyAuthorizationResult {
    /// Proceed.
    Success,
    /// The caller is not authenticated: ask them to authenticate (401).
    Challenge,
    /// The caller is authenticated but not allowed (403).
    Forbid,
}

/// Two-step evaluation: establish the user, then check requirements.
#[derive(Clone)]
pub struct PolicyEvaluator {
    authorization: Arc<dyn AuthorizationService>,
}

impl PolicyEvaluator {
    /// Creates an evaluator delegating requirement checks to `authorization`.
    #[must_use]
    pub fn new(authorization: Arc<dyn AuthorizationService>) -> Self {
        Self { authorization }
    }

    /// Establishes the user for `policy` and returns whether it is authenticated.
    ///
    /// When the policy names schemes, each is authenticated through the
    /// registered [`AuthenticationService`]; the successful principals are
    /// merged and replace the request user. Otherwise the request user is
    /// used as is.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidOperation` when schemes are named but no
    /// authentication service is registered, and propagates errors from the
    /// authentication service.
    #[instrument(skip_all, fields(schemes = ?policy.authentication_schemes()))]
    pub async fn authenticate(
        &self,
        policy: &AuthorizationPolicy,
        http: &HttpContext,
    ) -> PipelineResult<bool> {
        let schemes = policy.authentication_schemes();
        if schemes.is_empty() {
            return Ok(http.user().is_authenticated());
        }

        let authentication = http
            .services()
            .resolve_service::<dyn AuthenticationService>()
            .ok_or_else(|| AuthzError::NoAuthenticationService(schemes.to_vec()))?;

        let mut principal = ClaimsPrincipal::anonymous();
        for scheme in schemes {
            match authentication.authenticate(http, scheme).await? {
                AuthenticateResult::Success(user) => principal.merge(user),
                AuthenticateResult::NoResult => debug!(scheme = %scheme, "No credentials"),
                AuthenticateResult::Fail(reason) => {
                    debug!(scheme = %scheme, reason = %reason, "Authentication failed");
                }
            }
        }

        let authenticated = principal.is_authenticated();
        http.set_user(principal);
        Ok(authenticated)
    }

    /// Checks the current request user against `policy`.
    ///
    /// A failed check yields [`PolicyAuthorizationResult::Forbid`] for an
    /// authenticated user and [`PolicyAuthorizationResult::Challenge`]
    /// otherwise.
    ///
    /// # Errors
    ///
    /// Propagates errors from the authorization service.
    pub async fn authorize(
        &self,
        policy: &AuthorizationPolicy,
        authenticated: bool,
        http: &HttpContext,
        resource: Option<&ActionContext>,
    ) -> PipelineResult<PolicyAuthorizationResult> {
        let user = http.user();
        let result = self.authorization.authorize(&user, resource, policy).await?;
        Ok(match result {
            AuthorizationResult::Success => PolicyAuthorizationResult::Success,
            AuthorizationResult::Failed(_) if authenticated => PolicyAuthorizationResult::Forbid,
            AuthorizationResult::Failed(_) => PolicyAuthorizationResult::Challenge,
        })
    }
}

impl std::fmt::Debug for PolicyEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyEvaluator").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::DefaultAuthorizationService;
    use keel_core::di::Container;
    use keel_core::{BoxFuture, ClaimsIdentity, PipelineError};

    struct ApiKeys;

    impl AuthenticationService for ApiKeys {
        fn authenticate<'a>(
            &'a self,
            http: &'a HttpContext,
            scheme: &'a str,
        ) -> BoxFuture<'a, PipelineResult<AuthenticateResult>> {
            Box::pin(async move {
                Ok(match (scheme, http.header("x-api-key")) {
                    ("ApiKey", Some("admin-key")) => AuthenticateResult::Success(
                        ClaimsPrincipal::from_identity(
                            ClaimsIdentity::authenticated("ApiKey")
                                .with_name("ops")
                                .with_role("Admin"),
                        ),
                    ),
                    ("ApiKey", Some(_)) => AuthenticateResult::Fail("unknown key".into()),
                    _ => AuthenticateResult::NoResult,
                })
            })
        }
    }

    fn evaluator() -> PolicyEvaluator {
        PolicyEvaluator::new(Arc::new(DefaultAuthorizationService::new()))
    }

    fn services() -> Arc<Container> {
        let mut container = Container::new();
        container.register_service::<dyn AuthenticationService>(Arc::new(ApiKeys));
        Arc::new(container)
    }

    fn admin_policy(schemes: &[&str]) -> AuthorizationPolicy {
        AuthorizationPolicy::builder()
            .add_authentication_schemes(schemes.iter().copied())
            .require_role("Admin")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_authenticate_with_schemes_replaces_user() {
        let http = HttpContext::builder()
            .header("x-api-key", "admin-key")
            .services(services())
            .build();
        let policy = admin_policy(&["ApiKey", "Cookie"]);

        assert!(evaluator().authenticate(&policy, &http).await.unwrap());
        assert_eq!(http.user().name(), Some("ops"));

        let outcome = evaluator().authorize(&policy, true, &http, None).await.unwrap();
        assert_eq!(outcome, PolicyAuthorizationResult::Success);
    }

    #[tokio::test]
    async fn test_failed_scheme_leaves_anonymous() {
        let http = HttpContext::builder()
            .header("x-api-key", "stolen")
            .services(services())
            .build();
        let policy = admin_policy(&["ApiKey"]);

        let authenticated = evaluator().authenticate(&policy, &http).await.unwrap();
        assert!(!authenticated);

        let outcome = evaluator()
            .authorize(&policy, authenticated, &http, None)
            .await
            .unwrap();
        assert_eq!(outcome, PolicyAuthorizationResult::Challenge);
    }

    #[tokio::test]
    async fn test_authenticated_but_not_allowed_is_forbid() {
        let http = HttpContext::builder()
            .user(ClaimsPrincipal::from_identity(
                ClaimsIdentity::authenticated("Cookie").with_name("guest"),
            ))
            .build();
        let policy = admin_policy(&[]);

        let authenticated = evaluator().authenticate(&policy, &http).await.unwrap();
        assert!(authenticated);
        let outcome = evaluator()
            .authorize(&policy, authenticated, &http, None)
            .await
            .unwrap();
        assert_eq!(outcome, PolicyAuthorizationResult::Forbid);
    }

    #[tokio::test]
    async fn test_schemes_without_authentication_service() {
        let http = HttpContext::builder().build();
        let err = evaluator()
            .authenticate(&admin_policy(&["ApiKey"]), &http)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidOperation { .. }));
    }
}
