//! Claims-based caller identity.
//!
//! A [`ClaimsPrincipal`] is the "current user" of a request. It aggregates
//! one [`ClaimsIdentity`] per authentication scheme that produced one. An
//! identity is authenticated when it carries an authentication type; a
//! principal with no authenticated identity is anonymous.

use serde::{Deserialize, Serialize};

/// Well-known claim types.
pub mod claim_types {
    /// The display name of the subject.
    pub const NAME: &str = "name";
    /// A role the subject is a member of.
    pub const ROLE: &str = "role";
    /// The stable identifier of the subject.
    pub const NAME_IDENTIFIER: &str = "sub";
    /// The subject's email address.
    pub const EMAIL: &str = "email";
}

/// A single statement about a subject.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Claim {
    /// The claim type, for example `role`.
    pub claim_type: String,
    /// The claim value, for example `Admin`.
    pub value: String,
    /// Who issued the claim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
}

impl Claim {
    /// Creates a claim with no issuer.
    #[must_use]
    pub fn new(claim_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            claim_type: claim_type.into(),
            value: value.into(),
            issuer: None,
        }
    }

    /// Sets the issuer.
    #[must_use]
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    /// Returns true if the type matches (ASCII case-insensitively) and the value matches exactly.
    #[must_use]
    pub fn matches(&self, claim_type: &str, value: &str) -> bool {
        self.claim_type.eq_ignore_ascii_case(claim_type) && self.value == value
    }
}

/// A set of claims issued by one authentication scheme.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimsIdentity {
    authentication_type: Option<String>,
    claims: Vec<Claim>,
}

impl ClaimsIdentity {
    /// Creates an unauthenticated identity.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Creates an identity authenticated by the given scheme.
    #[must_use]
    pub fn authenticated(authentication_type: impl Into<String>) -> Self {
        Self {
            authentication_type: Some(authentication_type.into()),
            claims: Vec::new(),
        }
    }

    /// Adds a claim.
    #[must_use]
    pub fn with_claim(mut self, claim: Claim) -> Self {
        self.claims.push(claim);
        self
    }

    /// Adds a `name` claim.
    #[must_use]
    pub fn with_name(self, name: impl Into<String>) -> Self {
        self.with_claim(Claim::new(claim_types::NAME, name))
    }

    /// Adds a `role` claim.
    #[must_use]
    pub fn with_role(self, role: impl Into<String>) -> Self {
        self.with_claim(Claim::new(claim_types::ROLE, role))
    }

    /// Returns the authentication type, if authenticated.
    #[must_use]
    pub fn authentication_type(&self) -> Option<&str> {
        self.authentication_type.as_deref()
    }

    /// Returns true if this identity was produced by an authentication scheme.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.authentication_type.is_some()
    }

    /// Returns the value of the first `name` claim.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.find_first(claim_types::NAME)
    }

    /// Returns all claims.
    #[must_use]
    pub fn claims(&self) -> &[Claim] {
        &self.claims
    }

    /// Returns the value of the first claim of the given type.
    #[must_use]
    pub fn find_first(&self, claim_type: &str) -> Option<&str> {
        self.claims
            .iter()
            .find(|c| c.claim_type.eq_ignore_ascii_case(claim_type))
            .map(|c| c.value.as_str())
    }
}

/// The caller of a request.
///
/// # Example
///
/// ```
/// use keel_core::{ClaimsIdentity, ClaimsPrincipal};
///
/// let anonymous = ClaimsPrincipal::anonymous();
/// assert!(!anonymous.is_authenticated());
///
/// let alice = ClaimsPrincipal::from_identity(
///     ClaimsIdentity::authenticated("Bearer")
///         .with_name("alice")
///         .with_role("Admin"),
/// );
/// assert!(alice.is_authenticated());
/// assert!(alice.is_in_role("Admin"));
/// assert_eq!(alice.name(), Some("alice"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimsPrincipal {
    identities: Vec<ClaimsIdentity>,
}

impl ClaimsPrincipal {
    /// Creates a principal with no identities.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Creates a principal from a single identity.
    #[must_use]
    pub fn from_identity(identity: ClaimsIdentity) -> Self {
        Self {
            identities: vec![identity],
        }
    }

    /// Adds an identity.
    pub fn add_identity(&mut self, identity: ClaimsIdentity) {
        self.identities.push(identity);
    }

    /// Merges the identities of another principal into this one.
    pub fn merge(&mut self, other: Self) {
        self.identities.extend(other.identities);
    }

    /// Returns all identities.
    #[must_use]
    pub fn identities(&self) -> &[ClaimsIdentity] {
        &self.identities
    }

    /// Returns the primary identity: the first authenticated one, else the first one.
    #[must_use]
    pub fn identity(&self) -> Option<&ClaimsIdentity> {
        self.identities
            .iter()
            .find(|i| i.is_authenticated())
            .or_else(|| self.identities.first())
    }

    /// Returns true if any identity is authenticated.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.identities.iter().any(ClaimsIdentity::is_authenticated)
    }

    /// Returns the name of the primary identity.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.identity().and_then(ClaimsIdentity::name)
    }

    /// Returns true if any identity carries a `role` claim with the given value.
    #[must_use]
    pub fn is_in_role(&self, role: &str) -> bool {
        self.has_claim(claim_types::ROLE, role)
    }

    /// Returns true if any identity carries the given claim.
    #[must_use]
    pub fn has_claim(&self, claim_type: &str, value: &str) -> bool {
        self.claims().any(|c| c.matches(claim_type, value))
    }

    /// Iterates the claims of every identity.
    pub fn claims(&self) -> impl Iterator<Item = &Claim> {
        self.identities.iter().flat_map(|i| i.claims.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anonymous_principal() {
        let principal = ClaimsPrincipal::anonymous();
        assert!(!principal.is_authenticated());
        assert!(principal.identity().is_none());
        assert!(principal.name().is_none());
    }

    #[test]
    fn test_unauthenticated_identity_is_anonymous() {
        let principal =
            ClaimsPrincipal::from_identity(ClaimsIdentity::anonymous().with_name("ghost"));
        assert!(!principal.is_authenticated());
        assert_eq!(principal.name(), Some("ghost"));
    }

    #[test]
    fn test_roles_and_claims() {
        let principal = ClaimsPrincipal::from_identity(
            ClaimsIdentity::authenticated("Cookies")
                .with_role("Editor")
                .with_claim(Claim::new("department", "ops")),
        );

        assert!(principal.is_in_role("Editor"));
        assert!(!principal.is_in_role("editor"));
        assert!(principal.has_claim("Department", "ops"));
        assert!(!principal.has_claim("department", "sales"));
    }

    #[test]
    fn test_primary_identity_prefers_authenticated() {
        let mut principal =
            ClaimsPrincipal::from_identity(ClaimsIdentity::anonymous().with_name("first"));
        principal.add_identity(ClaimsIdentity::authenticated("Bearer").with_name("second"));

        assert_eq!(principal.name(), Some("second"));
        assert_eq!(principal.identities().len(), 2);
    }

    #[test]
    fn test_merge() {
        let mut a =
            ClaimsPrincipal::from_identity(ClaimsIdentity::authenticated("A").with_role("x"));
        let b = ClaimsPrincipal::from_identity(ClaimsIdentity::authenticated("B").with_role("y"));
        a.merge(b);

        assert!(a.is_in_role("x"));
        assert!(a.is_in_role("y"));
    }

    #[test]
    fn test_serialization() {
        let principal = ClaimsPrincipal::from_identity(
            ClaimsIdentity::authenticated("Bearer").with_name("u1"),
        );
        let json = serde_json::to_string(&principal).expect("serialization should work");
        let parsed: ClaimsPrincipal =
            serde_json::from_str(&json).expect("deserialization should work");
        assert_eq!(principal, parsed);
    }
}
