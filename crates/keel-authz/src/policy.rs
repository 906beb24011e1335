//! Authorization policies and how declared authorization data combines
//! into one effective policy.

use crate::error::{AuthzError, AuthzResult};
use crate::handler::AuthorizationHandlerContext;
use crate::options::PolicyProvider;
use crate::requirement::{
    AssertionRequirement, AuthorizationRequirement, ClaimsRequirement, DenyAnonymousRequirement,
    NameRequirement, RolesRequirement,
};
use keel_core::PipelineResult;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A set of requirements plus the authentication schemes that produce the
/// user they are evaluated against.
///
/// # Example
///
/// ```
/// use keel_authz::AuthorizationPolicy;
///
/// let policy = AuthorizationPolicy::builder()
///     .add_authentication_schemes(["Bearer"])
///     .require_role("Admin")
///     .build()
///     .unwrap();
///
/// assert_eq!(policy.requirements().len(), 1);
/// assert_eq!(policy.authentication_schemes(), ["Bearer"]);
/// ```
#[derive(Debug, Clone)]
pub struct AuthorizationPolicy {
    requirements: Vec<Arc<dyn AuthorizationRequirement>>,
    authentication_schemes: Vec<String>,
}

impl AuthorizationPolicy {
    /// Creates a policy builder.
    #[must_use]
    pub fn builder() -> AuthorizationPolicyBuilder {
        AuthorizationPolicyBuilder::default()
    }

    /// The policy used when authorization is requested without a policy
    /// name or roles: any authenticated user.
    #[must_use]
    pub fn default_policy() -> Self {
        Self {
            requirements: vec![Arc::new(DenyAnonymousRequirement)],
            authentication_schemes: Vec::new(),
        }
    }

    /// The requirements, all of which must be satisfied.
    #[must_use]
    pub fn requirements(&self) -> &[Arc<dyn AuthorizationRequirement>] {
        &self.requirements
    }

    /// Schemes to authenticate with before evaluation. Empty uses the
    /// user already on the request.
    #[must_use]
    pub fn authentication_schemes(&self) -> &[String] {
        &self.authentication_schemes
    }

    /// Combines several policies into one holding every requirement and scheme.
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::NoRequirements`] if the policies carry no requirement.
    pub fn combine_all<'p>(policies: impl IntoIterator<Item = &'p Self>) -> AuthzResult<Self> {
        policies
            .into_iter()
            .fold(Self::builder(), AuthorizationPolicyBuilder::combine)
            .build()
    }
}

/// Builder for [`AuthorizationPolicy`].
#[derive(Debug, Default)]
pub struct AuthorizationPolicyBuilder {
    requirements: Vec<Arc<dyn AuthorizationRequirement>>,
    authentication_schemes: Vec<String>,
}

impl AuthorizationPolicyBuilder {
    /// Adds authentication schemes. Duplicates are ignored.
    pub fn add_authentication_schemes<I, S>(mut self, schemes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for scheme in schemes {
            let scheme = scheme.into();
            if !self.authentication_schemes.contains(&scheme) {
                self.authentication_schemes.push(scheme);
            }
        }
        self
    }

    /// Adds a requirement.
    pub fn add_requirement(mut self, requirement: impl AuthorizationRequirement) -> Self {
        self.requirements.push(Arc::new(requirement));
        self
    }

    /// Requires an authenticated user.
    pub fn require_authenticated_user(self) -> Self {
        self.add_requirement(DenyAnonymousRequirement)
    }

    /// Requires the given role.
    pub fn require_role(self, role: impl Into<String>) -> Self {
        self.add_requirement(RolesRequirement::new([role.into()]))
    }

    /// Requires any of the given roles.
    pub fn require_roles<I, S>(self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_requirement(RolesRequirement::new(roles))
    }

    /// Requires a claim of the given type with any value.
    pub fn require_claim(self, claim_type: impl Into<String>) -> Self {
        self.add_requirement(ClaimsRequirement::new(claim_type))
    }

    /// Requires a claim of the given type with one of `values`.
    pub fn require_claim_values<I, S>(self, claim_type: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_requirement(ClaimsRequirement::with_values(claim_type, values))
    }

    /// Requires the user with the given name.
    pub fn require_user_name(self, name: impl Into<String>) -> Self {
        self.add_requirement(NameRequirement::new(name))
    }

    /// Requires the closure to return true.
    pub fn require_assertion<F>(self, assertion: F) -> Self
    where
        F: Fn(&AuthorizationHandlerContext) -> bool + Send + Sync + 'static,
    {
        self.add_requirement(AssertionRequirement::new(assertion))
    }

    /// Adds every requirement and scheme of `policy`.
    pub fn combine(mut self, policy: &AuthorizationPolicy) -> Self {
        self = self.add_authentication_schemes(policy.authentication_schemes.iter().cloned());
        self.requirements
            .extend(policy.requirements.iter().map(Arc::clone));
        self
    }

    /// Builds the policy.
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::NoRequirements`] if no requirement was added.
    pub fn build(self) -> AuthzResult<AuthorizationPolicy> {
        if self.requirements.is_empty() {
            return Err(AuthzError::NoRequirements);
        }
        Ok(AuthorizationPolicy {
            requirements: self.requirements,
            authentication_schemes: self.authentication_schemes,
        })
    }
}

/// Authorization declared on a controller or action.
///
/// An empty declaration means "any authenticated user" and resolves to the
/// provider's default policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Authorize {
    /// Name of a registered policy.
    pub policy: Option<String>,
    /// The user must be in at least one of these roles.
    pub roles: Vec<String>,
    /// Schemes to authenticate with.
    pub authentication_schemes: Vec<String>,
}

impl Authorize {
    /// Requires any authenticated user.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires the named policy.
    pub fn policy(name: impl Into<String>) -> Self {
        Self {
            policy: Some(name.into()),
            ..Self::default()
        }
    }

    /// Requires one of the roles.
    pub fn roles<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            roles: roles.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Adds authentication schemes.
    pub fn with_schemes<I, S>(mut self, schemes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authentication_schemes
            .extend(schemes.into_iter().map(Into::into));
        self
    }
}

/// Combines every declaration into one effective policy.
///
/// Roles become a [`RolesRequirement`] added ahead of the named policy's
/// requirements. A declaration with neither a policy nor roles contributes
/// the provider's default policy (the built-in one without a provider).
/// Returns `Ok(None)` for an empty slice.
///
/// # Errors
///
/// Fails with `InvalidOperation` when a declaration names a policy and
/// `provider` is `None`, or when the provider does not know the name.
pub fn combine(
    provider: Option<&dyn PolicyProvider>,
    data: &[Authorize],
) -> PipelineResult<Option<AuthorizationPolicy>> {
    if data.is_empty() {
        return Ok(None);
    }

    let mut builder = AuthorizationPolicy::builder();
    let mut use_default = false;
    for declared in data {
        if !declared.roles.is_empty() {
            builder = builder.require_roles(declared.roles.iter().cloned());
        }

        match &declared.policy {
            Some(name) => {
                let provider =
                    provider.ok_or_else(|| AuthzError::NoPolicyProvider(name.clone()))?;
                let policy = provider
                    .get_policy(name)
                    .ok_or_else(|| AuthzError::policy_not_found(name))?;
                builder = builder.combine(&policy);
            }
            None if declared.roles.is_empty() => use_default = true,
            None => {}
        }

        builder =
            builder.add_authentication_schemes(declared.authentication_schemes.iter().cloned());
    }

    if use_default {
        let default = provider.map_or_else(AuthorizationPolicy::default_policy, |p| {
            p.default_policy()
        });
        builder = builder.combine(&default);
    }

    Ok(Some(builder.build()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{AuthorizationOptions, DefaultPolicyProvider};
    use keel_core::PipelineError;

    fn provider() -> DefaultPolicyProvider {
        let mut options = AuthorizationOptions::default();
        options.add_policy(
            "Reports",
            AuthorizationPolicy::builder()
                .add_authentication_schemes(["Bearer"])
                .require_claim("department")
                .build()
                .unwrap(),
        );
        DefaultPolicyProvider::new(options)
    }

    #[test]
    fn test_build_requires_a_requirement() {
        let err = AuthorizationPolicy::builder()
            .add_authentication_schemes(["Bearer"])
            .build()
            .unwrap_err();
        assert_eq!(err, AuthzError::NoRequirements);
    }

    #[test]
    fn test_schemes_are_deduplicated() {
        let policy = AuthorizationPolicy::builder()
            .add_authentication_schemes(["Bearer", "Cookie", "Bearer"])
            .require_authenticated_user()
            .build()
            .unwrap();
        assert_eq!(policy.authentication_schemes(), ["Bearer", "Cookie"]);
    }

    #[test]
    fn test_combine_empty_is_none() {
        assert!(combine(None, &[]).unwrap().is_none());
    }

    #[test]
    fn test_combine_default_without_provider() {
        let policy = combine(None, &[Authorize::new()]).unwrap().unwrap();
        assert_eq!(policy.requirements().len(), 1);
        assert!(policy.requirements()[0].is::<DenyAnonymousRequirement>());
    }

    #[test]
    fn test_combine_roles_before_named_policy() {
        let provider = provider();
        let data = [
            Authorize::policy("Reports"),
            Authorize::roles(["Admin", "Auditor"]).with_schemes(["Cookie"]),
        ];
        let policy = combine(Some(&provider), &data).unwrap().unwrap();

        assert!(policy.requirements()[0].is::<ClaimsRequirement>());
        assert!(policy.requirements()[1].is::<RolesRequirement>());
        assert_eq!(policy.authentication_schemes(), ["Bearer", "Cookie"]);
    }

    #[test]
    fn test_combine_roles_precede_policy_in_same_declaration() {
        let provider = provider();
        let data = [Authorize {
            policy: Some("Reports".to_string()),
            roles: vec!["Admin".to_string()],
            authentication_schemes: Vec::new(),
        }];
        let policy = combine(Some(&provider), &data).unwrap().unwrap();
        assert!(policy.requirements()[0].is::<RolesRequirement>());
        assert!(policy.requirements()[1].is::<ClaimsRequirement>());
    }

    #[test]
    fn test_combine_named_policy_without_provider() {
        let err = combine(None, &[Authorize::policy("Reports")]).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidOperation { .. }));
    }

    #[test]
    fn test_combine_unknown_policy() {
        let err = combine(Some(&provider()), &[Authorize::policy("Missing")]).unwrap_err();
        assert!(err.to_string().contains("Missing"));
    }

    #[test]
    fn test_combine_all() {
        let admin = AuthorizationPolicy::builder().require_role("Admin").build().unwrap();
        let combined =
            AuthorizationPolicy::combine_all([&admin, &AuthorizationPolicy::default_policy()])
                .unwrap();
        assert_eq!(combined.requirements().len(), 2);
    }

    #[test]
    fn test_authorize_deserializes() {
        let declared: Authorize =
            serde_json::from_str(r#"{"roles":["Admin"],"authentication_schemes":["Bearer"]}"#)
                .unwrap();
        assert_eq!(declared, Authorize::roles(["Admin"]).with_schemes(["Bearer"]));
    }
}
