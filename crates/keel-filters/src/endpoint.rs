//! Action endpoints.
//!
//! An [`ActionEndpoint`] is everything the invoker needs to run one action:
//! the descriptor, the filters declared on the controller and the action,
//! the action method itself and the optional controller and binder
//! collaborators.

use crate::context::ActionExecutingContext;
use crate::controller::{
    Controller, ControllerActionFilter, ControllerFactory, ControllerResultFilter,
};
use crate::descriptor::{FilterDescriptor, FilterScope};
use crate::filter::FilterMetadata;
use keel_core::result::EmptyResult;
use keel_core::{ActionContext, ActionDescriptor, BoxFuture, BoxedResult, PipelineResult};
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// The action method: the innermost operation of the action stage.
pub trait ActionMethod: Send + Sync {
    /// Runs the action with the bound arguments of `ctx`.
    fn invoke<'a>(
        &'a self,
        ctx: &'a ActionExecutingContext,
    ) -> BoxFuture<'a, PipelineResult<BoxedResult>>;
}

/// Owned view of an action call, handed to [`action_fn`] closures.
#[derive(Debug, Clone)]
pub struct ActionInvocation {
    /// The request and action.
    pub context: ActionContext,
    /// Bound arguments.
    pub arguments: Map<String, Value>,
    /// The controller instance, for controller actions.
    pub controller: Option<Arc<dyn Controller>>,
}

impl ActionInvocation {
    /// Returns a bound argument.
    #[must_use]
    pub fn argument(&self, name: &str) -> Option<&Value> {
        self.arguments.get(name)
    }
}

/// An [`ActionMethod`] backed by an async closure.
pub struct ActionFn<F>(F);

/// Wraps an async closure as an action method.
///
/// # Example
///
/// ```
/// use keel_core::result::ContentResult;
/// use keel_core::BoxedResult;
/// use keel_filters::{action_fn, ActionInvocation};
/// use std::sync::Arc;
///
/// let hello = action_fn(|call: ActionInvocation| async move {
///     let name = call.argument("name").and_then(|v| v.as_str()).unwrap_or("world").to_string();
///     let result: BoxedResult = Arc::new(ContentResult::new(format!("hello {name}")));
///     Ok(result)
/// });
/// ```
pub fn action_fn<F, Fut>(f: F) -> ActionFn<F>
where
    F: Fn(ActionInvocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = PipelineResult<BoxedResult>> + Send + 'static,
{
    ActionFn(f)
}

impl<F, Fut> ActionMethod for ActionFn<F>
where
    F: Fn(ActionInvocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = PipelineResult<BoxedResult>> + Send + 'static,
{
    fn invoke<'a>(
        &'a self,
        ctx: &'a ActionExecutingContext,
    ) -> BoxFuture<'a, PipelineResult<BoxedResult>> {
        let invocation = ActionInvocation {
            context: ctx.action_context().clone(),
            arguments: ctx.arguments.clone(),
            controller: ctx.controller.clone(),
        };
        Box::pin((self.0)(invocation))
    }
}

impl<F> fmt::Debug for ActionFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ActionFn")
    }
}

/// Action method used when none is configured.
#[derive(Debug, Clone, Copy, Default)]
struct EmptyAction;

impl ActionMethod for EmptyAction {
    fn invoke<'a>(
        &'a self,
        _ctx: &'a ActionExecutingContext,
    ) -> BoxFuture<'a, PipelineResult<BoxedResult>> {
        Box::pin(async { Ok(EmptyResult::boxed()) })
    }
}

/// Fills the action arguments before action filters run.
///
/// Binding errors are seen by exception filters.
pub trait ArgumentBinder: Send + Sync {
    /// Binds arguments for the action.
    fn bind<'a>(
        &'a self,
        ctx: &'a ActionContext,
        arguments: &'a mut Map<String, Value>,
    ) -> BoxFuture<'a, PipelineResult<()>>;
}

/// An action with its filters and collaborators.
pub struct ActionEndpoint {
    descriptor: Arc<ActionDescriptor>,
    filters: Vec<FilterDescriptor>,
    method: Arc<dyn ActionMethod>,
    controller: Option<Arc<dyn ControllerFactory>>,
    binder: Option<Arc<dyn ArgumentBinder>>,
}

impl ActionEndpoint {
    /// Starts building an endpoint for the action `id`.
    #[must_use]
    pub fn builder(id: impl Into<String>) -> ActionEndpointBuilder {
        ActionEndpointBuilder::new(ActionDescriptor::new(id))
    }

    /// Returns the action descriptor.
    #[must_use]
    pub const fn descriptor(&self) -> &Arc<ActionDescriptor> {
        &self.descriptor
    }

    /// Returns the controller and action scoped filters, in declaration order.
    #[must_use]
    pub fn filters(&self) -> &[FilterDescriptor] {
        &self.filters
    }

    /// Returns the action method.
    #[must_use]
    pub const fn method(&self) -> &Arc<dyn ActionMethod> {
        &self.method
    }

    /// Returns the controller factory, for controller actions.
    #[must_use]
    pub const fn controller_factory(&self) -> Option<&Arc<dyn ControllerFactory>> {
        self.controller.as_ref()
    }

    /// Returns the argument binder.
    #[must_use]
    pub const fn binder(&self) -> Option<&Arc<dyn ArgumentBinder>> {
        self.binder.as_ref()
    }
}

impl fmt::Debug for ActionEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionEndpoint")
            .field("action", &self.descriptor.id())
            .field("filters", &self.filters)
            .field("controller", &self.controller.is_some())
            .field("binder", &self.binder.is_some())
            .finish()
    }
}

/// Builder for [`ActionEndpoint`].
///
/// # Example
///
/// ```
/// use keel_filters::prelude::*;
/// use keel_filters::{ActionEndpoint, Controller, FilterScope};
/// use std::sync::Arc;
///
/// struct Audit;
/// impl FilterMetadata for Audit {}
///
/// struct Orders;
/// impl Controller for Orders {}
///
/// let endpoint = ActionEndpoint::builder("orders.list")
///     .display_name("Orders.List")
///     .controller(|_: &keel_core::ActionContext| -> PipelineResult<Arc<dyn Controller>> {
///         Ok(Arc::new(Orders))
///     })
///     .filter(Audit)
///     .build();
///
/// // Two controller adapters plus the action filter.
/// assert_eq!(endpoint.filters().len(), 3);
/// assert_eq!(endpoint.filters()[2].scope(), FilterScope::Action);
/// ```
#[must_use]
pub struct ActionEndpointBuilder {
    descriptor: ActionDescriptor,
    filters: Vec<FilterDescriptor>,
    method: Option<Arc<dyn ActionMethod>>,
    controller: Option<Arc<dyn ControllerFactory>>,
    binder: Option<Arc<dyn ArgumentBinder>>,
}

impl ActionEndpointBuilder {
    /// Creates a builder for a descriptor.
    pub fn new(descriptor: ActionDescriptor) -> Self {
        Self {
            descriptor,
            filters: Vec::new(),
            method: None,
            controller: None,
            binder: None,
        }
    }

    /// Sets the display name.
    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.descriptor = self.descriptor.with_display_name(name);
        self
    }

    /// Adds a route value.
    pub fn route_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.descriptor = self.descriptor.with_route_value(key, value);
        self
    }

    /// Sets the action method. Without one the action returns an empty result.
    pub fn method(mut self, method: impl ActionMethod + 'static) -> Self {
        self.method = Some(Arc::new(method));
        self
    }

    /// Adds a filter declared on the action.
    pub fn filter<F: FilterMetadata>(self, filter: F) -> Self {
        self.filter_at(Arc::new(filter), FilterScope::Action)
    }

    /// Adds a filter declared on the controller.
    pub fn controller_filter<F: FilterMetadata>(self, filter: F) -> Self {
        self.filter_at(Arc::new(filter), FilterScope::Controller)
    }

    /// Adds a shared filter at the given scope.
    pub fn filter_at(mut self, filter: Arc<dyn FilterMetadata>, scope: FilterScope) -> Self {
        self.filters.push(FilterDescriptor::new(filter, scope));
        self
    }

    /// Adds a prepared descriptor.
    pub fn descriptor(mut self, descriptor: FilterDescriptor) -> Self {
        self.filters.push(descriptor);
        self
    }

    /// Makes this a controller action.
    ///
    /// The controller adapters are added the first time this is called.
    pub fn controller(mut self, factory: impl ControllerFactory + 'static) -> Self {
        if self.controller.is_none() {
            self.filters.push(FilterDescriptor::new(
                Arc::new(ControllerActionFilter),
                FilterScope::Controller,
            ));
            self.filters.push(FilterDescriptor::new(
                Arc::new(ControllerResultFilter),
                FilterScope::Controller,
            ));
        }
        self.controller = Some(Arc::new(factory));
        self
    }

    /// Sets the argument binder.
    pub fn binder(mut self, binder: impl ArgumentBinder + 'static) -> Self {
        self.binder = Some(Arc::new(binder));
        self
    }

    /// Builds the endpoint.
    pub fn build(self) -> ActionEndpoint {
        ActionEndpoint {
            descriptor: Arc::new(self.descriptor),
            filters: self.filters,
            method: self.method.unwrap_or_else(|| Arc::new(EmptyAction)),
            controller: self.controller,
            binder: self.binder,
        }
    }
}
