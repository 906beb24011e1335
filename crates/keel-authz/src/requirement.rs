//! Authorization requirements.
//!
//! A requirement is a condition a policy demands. The built-in requirements
//! evaluate themselves; they are satisfied by the [`PassThroughHandler`]
//! that every [`DefaultAuthorizationService`] runs. Custom requirements
//! return `None` from [`AuthorizationRequirement::evaluate`] and are handled
//! by a custom [`AuthorizationHandler`].
//!
//! [`PassThroughHandler`]: crate::PassThroughHandler
//! [`DefaultAuthorizationService`]: crate::DefaultAuthorizationService
//! [`AuthorizationHandler`]: crate::AuthorizationHandler

use crate::handler::AuthorizationHandlerContext;
use keel_core::claim_types;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A condition of an authorization policy.
pub trait AuthorizationRequirement: fmt::Debug + Send + Sync + 'static {
    /// Name used in logs and failure reports.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Evaluates a self-contained requirement.
    ///
    /// `Some(true)` marks it satisfied, `Some(false)` leaves it pending and
    /// `None` means another handler decides.
    fn evaluate(&self, _ctx: &AuthorizationHandlerContext) -> Option<bool> {
        None
    }

    /// Returns `self` as `Any` so handlers can recognize their requirements.
    fn as_any(&self) -> &dyn Any;
}

impl dyn AuthorizationRequirement {
    /// Downcasts to a concrete requirement.
    #[must_use]
    pub fn downcast_ref<T: AuthorizationRequirement>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Returns true if the requirement is of type `T`.
    #[must_use]
    pub fn is<T: AuthorizationRequirement>(&self) -> bool {
        self.as_any().is::<T>()
    }
}

/// Satisfied by any authenticated user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DenyAnonymousRequirement;

impl AuthorizationRequirement for DenyAnonymousRequirement {
    fn evaluate(&self, ctx: &AuthorizationHandlerContext) -> Option<bool> {
        Some(ctx.user().is_authenticated())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Satisfied when the user is in at least one of the roles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolesRequirement {
    roles: Vec<String>,
}

impl RolesRequirement {
    /// Creates a requirement for any of `roles`.
    pub fn new<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    /// The accepted roles.
    #[must_use]
    pub fn roles(&self) -> &[String] {
        &self.roles
    }
}

impl AuthorizationRequirement for RolesRequirement {
    fn evaluate(&self, ctx: &AuthorizationHandlerContext) -> Option<bool> {
        Some(self.roles.iter().any(|role| ctx.user().is_in_role(role)))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Satisfied when the user carries a claim of the type, optionally with one
/// of the allowed values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimsRequirement {
    claim_type: String,
    allowed_values: Vec<String>,
}

impl ClaimsRequirement {
    /// Requires any value for `claim_type`.
    pub fn new(claim_type: impl Into<String>) -> Self {
        Self {
            claim_type: claim_type.into(),
            allowed_values: Vec::new(),
        }
    }

    /// Requires one of `values` for `claim_type`.
    pub fn with_values<I, S>(claim_type: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            claim_type: claim_type.into(),
            allowed_values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// The claim type.
    #[must_use]
    pub fn claim_type(&self) -> &str {
        &self.claim_type
    }

    /// The accepted values. Empty accepts any value.
    #[must_use]
    pub fn allowed_values(&self) -> &[String] {
        &self.allowed_values
    }
}

impl AuthorizationRequirement for ClaimsRequirement {
    fn evaluate(&self, ctx: &AuthorizationHandlerContext) -> Option<bool> {
        let mut claims = ctx
            .user()
            .claims()
            .filter(|c| c.claim_type.eq_ignore_ascii_case(&self.claim_type));
        let satisfied = if self.allowed_values.is_empty() {
            claims.next().is_some()
        } else {
            claims.any(|c| self.allowed_values.contains(&c.value))
        };
        Some(satisfied)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Satisfied when the user's name claim equals the given name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameRequirement {
    name: String,
}

impl NameRequirement {
    /// Requires the user named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// The required name.
    #[must_use]
    pub fn required_name(&self) -> &str {
        &self.name
    }
}

impl AuthorizationRequirement for NameRequirement {
    fn evaluate(&self, ctx: &AuthorizationHandlerContext) -> Option<bool> {
        Some(ctx.user().has_claim(claim_types::NAME, &self.name))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

type Assertion = dyn Fn(&AuthorizationHandlerContext) -> bool + Send + Sync;

/// Satisfied when the closure returns true.
#[derive(Clone)]
pub struct AssertionRequirement {
    assertion: Arc<Assertion>,
}

impl AssertionRequirement {
    /// Wraps `assertion`.
    pub fn new<F>(assertion: F) -> Self
    where
        F: Fn(&AuthorizationHandlerContext) -> bool + Send + Sync + 'static,
    {
        Self {
            assertion: Arc::new(assertion),
        }
    }
}

impl fmt::Debug for AssertionRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AssertionRequirement")
    }
}

impl AuthorizationRequirement for AssertionRequirement {
    fn evaluate(&self, ctx: &AuthorizationHandlerContext) -> Option<bool> {
        Some((self.assertion)(ctx))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
