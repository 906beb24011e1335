//! The authentication collaborator contract.
//!
//! Keel does not authenticate requests itself. A host registers an
//! [`AuthenticationService`] in the container as
//! `Arc<dyn AuthenticationService>`. Authorization uses it to re-resolve
//! the principal for specific schemes, and challenge/forbid results use it
//! to produce scheme-specific responses.

use crate::context::HttpContext;
use crate::error::PipelineResult;
use crate::identity::ClaimsPrincipal;
use crate::BoxFuture;

/// Outcome of authenticating one scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticateResult {
    /// The scheme produced a principal.
    Success(ClaimsPrincipal),
    /// The scheme found no credentials for it.
    NoResult,
    /// Credentials were present but invalid.
    Fail(String),
}

impl AuthenticateResult {
    /// Returns true if a principal was produced.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns the principal, if any.
    #[must_use]
    pub const fn principal(&self) -> Option<&ClaimsPrincipal> {
        match self {
            Self::Success(principal) => Some(principal),
            _ => None,
        }
    }

    /// Consumes the result and returns the principal, if any.
    #[must_use]
    pub fn into_principal(self) -> Option<ClaimsPrincipal> {
        match self {
            Self::Success(principal) => Some(principal),
            _ => None,
        }
    }
}

/// Authentication collaborator.
///
/// # Example
///
/// ```
/// use keel_core::{
///     AuthenticateResult, AuthenticationService, BoxFuture, ClaimsIdentity, ClaimsPrincipal,
///     HttpContext, PipelineResult,
/// };
///
/// struct HeaderAuth;
///
/// impl AuthenticationService for HeaderAuth {
///     fn authenticate<'a>(
///         &'a self,
///         http: &'a HttpContext,
///         scheme: &'a str,
///     ) -> BoxFuture<'a, PipelineResult<AuthenticateResult>> {
///         Box::pin(async move {
///             Ok(match http.header("x-user") {
///                 Some(name) => AuthenticateResult::Success(ClaimsPrincipal::from_identity(
///                     ClaimsIdentity::authenticated(scheme).with_name(name),
///                 )),
///                 None => AuthenticateResult::NoResult,
///             })
///         })
///     }
/// }
/// ```
pub trait AuthenticationService: Send + Sync + 'static {
    /// Authenticates the request with one scheme.
    fn authenticate<'a>(
        &'a self,
        http: &'a HttpContext,
        scheme: &'a str,
    ) -> BoxFuture<'a, PipelineResult<AuthenticateResult>>;

    /// Asks the caller to authenticate. `scheme` is `None` for the default scheme.
    ///
    /// The default writes `401 Unauthorized` with a `www-authenticate` header
    /// naming the scheme.
    fn challenge<'a>(
        &'a self,
        http: &'a HttpContext,
        scheme: Option<&'a str>,
    ) -> BoxFuture<'a, PipelineResult<()>> {
        Box::pin(async move {
            let mut response = http.response();
            response.status = http::StatusCode::UNAUTHORIZED;
            if let Some(value) = scheme.and_then(|s| http::HeaderValue::from_str(s).ok()) {
                response
                    .headers
                    .append(http::header::WWW_AUTHENTICATE, value);
            }
            Ok(())
        })
    }

    /// Tells an authenticated caller it may not access the resource.
    ///
    /// The default writes `403 Forbidden`.
    fn forbid<'a>(
        &'a self,
        http: &'a HttpContext,
        _scheme: Option<&'a str>,
    ) -> BoxFuture<'a, PipelineResult<()>> {
        Box::pin(async move {
            http.response().status = http::StatusCode::FORBIDDEN;
            Ok(())
        })
    }
}
