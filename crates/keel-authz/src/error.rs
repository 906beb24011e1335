//! Error types for the authorization crate.

use keel_core::PipelineError;
use thiserror::Error;

/// Result type for authorization configuration.
pub type AuthzResult<T> = Result<T, AuthzError>;

/// Authorization misconfiguration.
///
/// Every variant is a programming or configuration defect. Inside the
/// pipeline they surface as [`PipelineError::InvalidOperation`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum AuthzError {
    /// A named policy was requested but none is registered under that name.
    #[error("the authorization policy named '{0}' was not found")]
    PolicyNotFound(String),

    /// A policy was built without any requirement.
    #[error("an authorization policy requires at least one requirement")]
    NoRequirements,

    /// A named policy was requested but no policy provider is registered.
    #[error("no PolicyProvider is registered; it is required to resolve policy '{0}'")]
    NoPolicyProvider(String),

    /// Claims-only authorization was declared without claims.
    #[error("claims-only authorization requires at least one claim")]
    EmptyClaims,

    /// The policy names authentication schemes but nothing can authenticate.
    #[error("no AuthenticationService is registered to authenticate schemes {0:?}")]
    NoAuthenticationService(Vec<String>),
}

impl AuthzError {
    /// Creates a policy-not-found error.
    pub fn policy_not_found(name: impl Into<String>) -> Self {
        Self::PolicyNotFound(name.into())
    }
}

impl From<AuthzError> for PipelineError {
    fn from(err: AuthzError) -> Self {
        Self::invalid_operation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            AuthzError::policy_not_found("admins").to_string(),
            "the authorization policy named 'admins' was not found"
        );
    }

    #[test]
    fn test_into_pipeline_error() {
        let err: PipelineError = AuthzError::EmptyClaims.into();
        assert!(matches!(err, PipelineError::InvalidOperation { .. }));
        assert!(err.is_configuration_error());
    }
}
