//! Registered policies and the provider that serves them.

use crate::policy::AuthorizationPolicy;
use std::collections::HashMap;
use std::sync::Arc;

/// Authorization settings: named policies plus the default and fallback.
#[derive(Debug, Clone)]
pub struct AuthorizationOptions {
    /// Used for declarations that name neither a policy nor roles.
    pub default_policy: AuthorizationPolicy,
    /// Used for endpoints without any authorization declaration. `None`
    /// leaves them open.
    pub fallback_policy: Option<AuthorizationPolicy>,
    /// Keep running handlers after one calls `fail`.
    pub invoke_handlers_after_failure: bool,
    policies: HashMap<String, AuthorizationPolicy>,
}

impl Default for AuthorizationOptions {
    fn default() -> Self {
        Self {
            default_policy: AuthorizationPolicy::default_policy(),
            fallback_policy: None,
            invoke_handlers_after_failure: true,
            policies: HashMap::new(),
        }
    }
}

impl AuthorizationOptions {
    /// Registers a policy, replacing one with the same name.
    pub fn add_policy(&mut self, name: impl Into<String>, policy: AuthorizationPolicy) {
        self.policies.insert(name.into(), policy);
    }

    /// Looks a policy up by name.
    #[must_use]
    pub fn get_policy(&self, name: &str) -> Option<&AuthorizationPolicy> {
        self.policies.get(name)
    }

    /// Names of the registered policies.
    pub fn policy_names(&self) -> impl Iterator<Item = &str> {
        self.policies.keys().map(String::as_str)
    }
}

/// Serves policies by name.
///
/// Registered in the service container as `dyn PolicyProvider`.
pub trait PolicyProvider: Send + Sync + 'static {
    /// Returns the policy registered as `name`.
    fn get_policy(&self, name: &str) -> Option<AuthorizationPolicy>;

    /// Returns the policy for declarations without a name or roles.
    fn default_policy(&self) -> AuthorizationPolicy;

    /// Returns the policy for endpoints without any declaration.
    fn fallback_policy(&self) -> Option<AuthorizationPolicy>;
}

/// [`PolicyProvider`] backed by [`AuthorizationOptions`].
#[derive(Debug, Clone)]
pub struct DefaultPolicyProvider {
    options: Arc<AuthorizationOptions>,
}

impl DefaultPolicyProvider {
    /// Creates a provider over `options`.
    #[must_use]
    pub fn new(options: AuthorizationOptions) -> Self {
        Self {
            options: Arc::new(options),
        }
    }

    /// The underlying options.
    #[must_use]
    pub fn options(&self) -> &AuthorizationOptions {
        &self.options
    }
}

impl PolicyProvider for DefaultPolicyProvider {
    fn get_policy(&self, name: &str) -> Option<AuthorizationPolicy> {
        self.options.get_policy(name).cloned()
    }

    fn default_policy(&self) -> AuthorizationPolicy {
        self.options.default_policy.clone()
    }

    fn fallback_policy(&self) -> Option<AuthorizationPolicy> {
        self.options.fallback_policy.clone()
    }
}
