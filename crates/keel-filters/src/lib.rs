//! # Keel Filters
//!
//! The filter pipeline that wraps every action invocation.
//!
//! A request passes five filter categories, each an ordered list built from
//! the same resolved filter set:
//!
//! ```text
//! authorization ─▶ resource ─▶ ( binding ─▶ action ─▶ method ) ─▶ result ─▶ execute
//!                                └────── exception filters ─────┘
//! ```
//!
//! - Authorization filters run in sequence; the first one that sets a result
//!   stops the request and that result is executed.
//! - Resource, action and result filters form onions: before hooks run
//!   outer to inner, after hooks inner to outer. Setting a result (or `cancel`
//!   for result filters) short-circuits the rest of the onion.
//! - Exception filters see errors from binding, action filters and the action
//!   method, never from result filters.
//!
//! ## Example
//!
//! ```
//! use keel_core::result::StatusCodeResult;
//! use keel_core::HttpContext;
//! use keel_filters::{action_fn, ActionEndpoint, ActionInvokerFactory};
//! use http::StatusCode;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let endpoint = ActionEndpoint::builder("health.get")
//!     .method(action_fn(|_| async { Ok(StatusCodeResult::boxed(StatusCode::NO_CONTENT)) }))
//!     .build();
//!
//! let invoker = ActionInvokerFactory::default().create(Arc::new(endpoint));
//! let http = Arc::new(HttpContext::builder().build());
//! invoker.invoke(http.clone()).await.unwrap();
//!
//! assert_eq!(http.response().status, StatusCode::NO_CONTENT);
//! # });
//! ```

#![doc(html_root_url = "https://docs.rs/keel-filters/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod activator;
pub mod builtin;
mod context;
mod controller;
mod descriptor;
mod endpoint;
mod factory;
mod filter;
mod invoker;
mod parametrized;
mod provider;

pub use activator::FilterActivator;
pub use context::{
    ActionExecutedContext, ActionExecutingContext, AuthorizationFilterContext, ExceptionContext,
    FilterContext, ResourceExecutedContext, ResourceExecutingContext, ResultExecutedContext,
    ResultExecutingContext,
};
pub use controller::{
    ActivatedControllerFactory, Controller, ControllerActionFilter, ControllerFactory,
    ControllerResultFilter,
};
pub use descriptor::{
    CorsFirstFilterOrder, DefaultFilterOrder, FilterDescriptor, FilterItem, FilterOrdering,
    FilterScope,
};
pub use endpoint::{
    action_fn, ActionEndpoint, ActionEndpointBuilder, ActionFn, ActionInvocation, ActionMethod,
    ArgumentBinder,
};
pub use factory::{FilterCollection, ServiceFilter, TypeFilter};
pub use filter::{
    ActionFilter, AsAny, AsyncActionFilter, AsyncAuthorizationFilter, AsyncExceptionFilter,
    AsyncResourceFilter, AsyncResultFilter, AuthorizationFilter, ExceptionFilter, FilterContainer,
    FilterDefinition, FilterFactory, FilterMetadata, ResourceFilter, ResultFilter,
};
pub use invoker::{ActionInvoker, ActionInvokerFactory, ActionNext, ResourceNext, ResultNext};
pub use parametrized::{ParametrizedFilter, ParametrizedFilterFactory, ParametrizedFilterWrapper};
pub use provider::{DefaultFilterProvider, FilterProvider, FilterProviderContext};

/// Convenient re-exports for filter authors.
pub mod prelude {
    pub use crate::{
        ActionExecutedContext, ActionExecutingContext, ActionFilter, ActionNext,
        AsyncActionFilter, AsyncAuthorizationFilter, AsyncExceptionFilter, AsyncResourceFilter,
        AsyncResultFilter, AuthorizationFilter, AuthorizationFilterContext, ExceptionContext,
        ExceptionFilter, FilterMetadata, FilterScope, ResourceExecutedContext,
        ResourceExecutingContext, ResourceFilter, ResourceNext, ResultExecutedContext,
        ResultExecutingContext, ResultFilter, ResultNext,
    };
    pub use keel_core::{BoxFuture, BoxedResult, PipelineError, PipelineResult};
}
