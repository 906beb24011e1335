//! # Keel Core
//!
//! Core types shared by every Keel crate.
//!
//! - [`HttpContext`] - Per-request state: request data, current principal,
//!   request-scoped items and the response being produced
//! - [`ActionContext`] / [`ActionDescriptor`] - The action selected for a request
//! - [`ClaimsPrincipal`] - The authenticated (or anonymous) caller
//! - [`AuthenticationService`] - The authentication collaborator contract
//! - [`Container`](di::Container) - Explicit-registration dependency injection
//! - [`ActionResult`] - Results produced by actions and filters
//! - [`PipelineError`] - Error taxonomy of the request pipeline

#![doc(html_root_url = "https://docs.rs/keel-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod authentication;
mod context;
pub mod di;
mod error;
mod identity;
pub mod result;

use std::future::Future;
use std::pin::Pin;

pub use authentication::{AuthenticateResult, AuthenticationService};
pub use context::{
    ActionContext, ActionDescriptor, HttpContext, HttpContextBuilder, RequestId, ResponseState,
};
pub use error::{PipelineError, PipelineResult};
pub use identity::{claim_types, Claim, ClaimsIdentity, ClaimsPrincipal};
pub use result::{ActionResult, BoxedResult};

/// A boxed, sendable future.
///
/// Every asynchronous hook in Keel returns one of these so the hooks can be
/// called through trait objects.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
