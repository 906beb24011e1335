//! # Keel Authz
//!
//! Policy-based authorization for the Keel filter pipeline.
//!
//! - [`AuthorizationPolicy`] - Requirements plus the schemes that establish the user
//! - [`AuthorizationRequirement`] / [`AuthorizationHandler`] - What a policy demands and who
//!   decides it
//! - [`PolicyProvider`] - Named, default and fallback policies, resolved from the container
//! - [`PolicyEvaluator`] - Authenticate, then authorize, then challenge (401) or forbid (403)
//! - [`AuthorizeFilter`] / [`AllowAnonymousFilter`] / [`ClaimsAuthorizeFilter`] - The filters
//!
//! ## Example
//!
//! ```
//! use keel_authz::{AllowAnonymousFilter, AuthorizeFilter};
//! use keel_core::result::{ChallengeResult, StatusCodeResult};
//! use keel_core::HttpContext;
//! use keel_filters::{action_fn, ActionEndpoint, ActionInvokerFactory};
//! use http::StatusCode;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let endpoint = ActionEndpoint::builder("orders.list")
//!     .controller_filter(AuthorizeFilter::new())
//!     .method(action_fn(|_| async { Ok(StatusCodeResult::boxed(StatusCode::OK)) }))
//!     .build();
//! let invoker = ActionInvokerFactory::default().create(Arc::new(endpoint));
//!
//! let result = invoker
//!     .invoke(Arc::new(HttpContext::builder().build()))
//!     .await
//!     .unwrap()
//!     .unwrap();
//! assert!(result.is::<ChallengeResult>());
//! # });
//! ```

#![doc(html_root_url = "https://docs.rs/keel-authz/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod error;
mod evaluator;
mod filter;
mod handler;
mod options;
mod policy;
mod requirement;
mod service;

pub use error::{AuthzError, AuthzResult};
pub use evaluator::{PolicyAuthorizationResult, PolicyEvaluator};
pub use filter::{AllowAnonymousFilter, AuthorizeFilter, ClaimsAuthorizeFilter};
pub use handler::{AuthorizationHandler, AuthorizationHandlerContext, PassThroughHandler};
pub use options::{AuthorizationOptions, DefaultPolicyProvider, PolicyProvider};
pub use policy::{combine, AuthorizationPolicy, AuthorizationPolicyBuilder, Authorize};
pub use requirement::{
    AssertionRequirement, AuthorizationRequirement, ClaimsRequirement, DenyAnonymousRequirement,
    NameRequirement, RolesRequirement,
};
pub use service::{
    AuthorizationFailure, AuthorizationResult, AuthorizationService, DefaultAuthorizationService,
};
