//! Parametrized filters.
//!
//! A [`ParametrizedFilter<P>`] is a service holding the behavior of a filter
//! (and any state it needs, such as counters), while `P` is the data a
//! declaration carries (for example "10 requests per second"). The
//! [`ParametrizedFilterWrapper`] binds one handler to one `P` and exposes the
//! pair as an ordinary filter in every category.
//!
//! # Example
//!
//! ```
//! use keel_core::di::Container;
//! use keel_filters::prelude::*;
//! use keel_filters::{ActionEndpoint, ParametrizedFilter, ParametrizedFilterFactory};
//! use std::sync::Arc;
//!
//! struct Tag(&'static str);
//!
//! struct Tagger;
//!
//! impl ParametrizedFilter<Tag> for Tagger {
//!     fn on_action_executing(
//!         &self,
//!         ctx: &mut ActionExecutingContext,
//!         params: &Tag,
//!     ) -> PipelineResult<()> {
//!         ctx.arguments.insert("tag".into(), params.0.into());
//!         Ok(())
//!     }
//! }
//!
//! let mut services = Container::new();
//! services.register(Arc::new(Tagger));
//!
//! let endpoint = ActionEndpoint::builder("orders.list")
//!     .filter(ParametrizedFilterFactory::<Tagger, Tag>::new(Tag("orders")))
//!     .build();
//! ```

use crate::context::{
    ActionExecutedContext, ActionExecutingContext, AuthorizationFilterContext, ExceptionContext,
    ResourceExecutedContext, ResourceExecutingContext, ResultExecutedContext,
    ResultExecutingContext,
};
use crate::filter::{
    ActionFilter, AsyncActionFilter, AsyncAuthorizationFilter, AsyncExceptionFilter,
    AsyncResourceFilter, AsyncResultFilter, AuthorizationFilter, ExceptionFilter, FilterFactory,
    FilterMetadata, ResourceFilter, ResultFilter,
};
use crate::invoker::{ActionNext, ResourceNext, ResultNext};
use keel_core::di::Container;
use keel_core::{BoxFuture, PipelineError, PipelineResult};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Filter behavior that takes declaration data `P` as a second argument.
///
/// Every hook has a default. The async hooks default to calling the sync
/// hooks around `next`, so a handler overrides whichever flavor it needs.
pub trait ParametrizedFilter<P: Send + Sync + 'static>: Send + Sync + 'static {
    /// See [`AuthorizationFilter::on_authorization`].
    fn on_authorization(
        &self,
        _ctx: &mut AuthorizationFilterContext,
        _params: &P,
    ) -> PipelineResult<()> {
        Ok(())
    }

    /// See [`AsyncAuthorizationFilter::on_authorization_async`].
    fn on_authorization_async<'a>(
        &'a self,
        ctx: &'a mut AuthorizationFilterContext,
        params: &'a P,
    ) -> BoxFuture<'a, PipelineResult<()>> {
        Box::pin(async move { self.on_authorization(ctx, params) })
    }

    /// See [`ResourceFilter::on_resource_executing`].
    fn on_resource_executing(
        &self,
        _ctx: &mut ResourceExecutingContext,
        _params: &P,
    ) -> PipelineResult<()> {
        Ok(())
    }

    /// See [`ResourceFilter::on_resource_executed`].
    fn on_resource_executed(
        &self,
        _ctx: &mut ResourceExecutedContext,
        _params: &P,
    ) -> PipelineResult<()> {
        Ok(())
    }

    /// See [`AsyncResourceFilter::on_resource_execution`].
    fn on_resource_execution<'a>(
        &'a self,
        ctx: &'a mut ResourceExecutingContext,
        next: ResourceNext<'a>,
        params: &'a P,
    ) -> BoxFuture<'a, PipelineResult<()>> {
        Box::pin(async move {
            self.on_resource_executing(ctx, params)?;
            if ctx.result.is_none() {
                let executed = next.run(ctx).await;
                self.on_resource_executed(executed, params)?;
            }
            Ok(())
        })
    }

    /// See [`ActionFilter::on_action_executing`].
    fn on_action_executing(
        &self,
        _ctx: &mut ActionExecutingContext,
        _params: &P,
    ) -> PipelineResult<()> {
        Ok(())
    }

    /// See [`ActionFilter::on_action_executed`].
    fn on_action_executed(
        &self,
        _ctx: &mut ActionExecutedContext,
        _params: &P,
    ) -> PipelineResult<()> {
        Ok(())
    }

    /// See [`AsyncActionFilter::on_action_execution`].
    fn on_action_execution<'a>(
        &'a self,
        ctx: &'a mut ActionExecutingContext,
        next: ActionNext<'a>,
        params: &'a P,
    ) -> BoxFuture<'a, PipelineResult<()>> {
        Box::pin(async move {
            self.on_action_executing(ctx, params)?;
            if ctx.result.is_none() {
                let executed = next.run(ctx).await;
                self.on_action_executed(executed, params)?;
            }
            Ok(())
        })
    }

    /// See [`ExceptionFilter::on_exception`].
    fn on_exception(&self, _ctx: &mut ExceptionContext, _params: &P) -> PipelineResult<()> {
        Ok(())
    }

    /// See [`AsyncExceptionFilter::on_exception_async`].
    fn on_exception_async<'a>(
        &'a self,
        ctx: &'a mut ExceptionContext,
        params: &'a P,
    ) -> BoxFuture<'a, PipelineResult<()>> {
        Box::pin(async move { self.on_exception(ctx, params) })
    }

    /// See [`ResultFilter::on_result_executing`].
    fn on_result_executing(
        &self,
        _ctx: &mut ResultExecutingContext,
        _params: &P,
    ) -> PipelineResult<()> {
        Ok(())
    }

    /// See [`ResultFilter::on_result_executed`].
    fn on_result_executed(
        &self,
        _ctx: &mut ResultExecutedContext,
        _params: &P,
    ) -> PipelineResult<()> {
        Ok(())
    }

    /// See [`AsyncResultFilter::on_result_execution`].
    fn on_result_execution<'a>(
        &'a self,
        ctx: &'a mut ResultExecutingContext,
        next: ResultNext<'a>,
        params: &'a P,
    ) -> BoxFuture<'a, PipelineResult<()>> {
        Box::pin(async move {
            self.on_result_executing(ctx, params)?;
            if !ctx.cancel {
                let executed = next.run(ctx).await;
                self.on_result_executed(executed, params)?;
            }
            Ok(())
        })
    }
}

/// One handler bound to one set of parameters.
pub struct ParametrizedFilterWrapper<H, P> {
    handler: Arc<H>,
    params: Arc<P>,
    order: Option<i32>,
}

impl<H, P> ParametrizedFilterWrapper<H, P>
where
    H: ParametrizedFilter<P>,
    P: Send + Sync + 'static,
{
    /// Binds `handler` to `params`.
    #[must_use]
    pub fn new(handler: Arc<H>, params: Arc<P>) -> Self {
        Self {
            handler,
            params,
            order: None,
        }
    }

    /// Sets the filter order.
    #[must_use]
    pub const fn with_order(mut self, order: i32) -> Self {
        self.order = Some(order);
        self
    }

    /// Returns the handler.
    #[must_use]
    pub const fn handler(&self) -> &Arc<H> {
        &self.handler
    }

    /// Returns the parameters.
    #[must_use]
    pub const fn params(&self) -> &Arc<P> {
        &self.params
    }
}

impl<H, P> fmt::Debug for ParametrizedFilterWrapper<H, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParametrizedFilterWrapper")
            .field("handler", &std::any::type_name::<H>())
            .field("params", &std::any::type_name::<P>())
            .field("order", &self.order)
            .finish()
    }
}

impl<H: ParametrizedFilter<P>, P: Send + Sync + 'static> AuthorizationFilter
    for ParametrizedFilterWrapper<H, P>
{
    fn on_authorization(&self, ctx: &mut AuthorizationFilterContext) -> PipelineResult<()> {
        <H as ParametrizedFilter<P>>::on_authorization(&self.handler, ctx, &self.params)
    }
}

impl<H: ParametrizedFilter<P>, P: Send + Sync + 'static> AsyncAuthorizationFilter
    for ParametrizedFilterWrapper<H, P>
{
    fn on_authorization_async<'a>(
        &'a self,
        ctx: &'a mut AuthorizationFilterContext,
    ) -> BoxFuture<'a, PipelineResult<()>> {
        <H as ParametrizedFilter<P>>::on_authorization_async(&self.handler, ctx, &self.params)
    }
}

impl<H: ParametrizedFilter<P>, P: Send + Sync + 'static> ResourceFilter
    for ParametrizedFilterWrapper<H, P>
{
    fn on_resource_executing(&self, ctx: &mut ResourceExecutingContext) -> PipelineResult<()> {
        <H as ParametrizedFilter<P>>::on_resource_executing(&self.handler, ctx, &self.params)
    }

    fn on_resource_executed(&self, ctx: &mut ResourceExecutedContext) -> PipelineResult<()> {
        <H as ParametrizedFilter<P>>::on_resource_executed(&self.handler, ctx, &self.params)
    }
}

impl<H: ParametrizedFilter<P>, P: Send + Sync + 'static> AsyncResourceFilter
    for ParametrizedFilterWrapper<H, P>
{
    fn on_resource_execution<'a>(
        &'a self,
        ctx: &'a mut ResourceExecutingContext,
        next: ResourceNext<'a>,
    ) -> BoxFuture<'a, PipelineResult<()>> {
        <H as ParametrizedFilter<P>>::on_resource_execution(&self.handler, ctx, next, &self.params)
    }
}

impl<H: ParametrizedFilter<P>, P: Send + Sync + 'static> ActionFilter
    for ParametrizedFilterWrapper<H, P>
{
    fn on_action_executing(&self, ctx: &mut ActionExecutingContext) -> PipelineResult<()> {
        <H as ParametrizedFilter<P>>::on_action_executing(&self.handler, ctx, &self.params)
    }

    fn on_action_executed(&self, ctx: &mut ActionExecutedContext) -> PipelineResult<()> {
        <H as ParametrizedFilter<P>>::on_action_executed(&self.handler, ctx, &self.params)
    }
}

impl<H: ParametrizedFilter<P>, P: Send + Sync + 'static> AsyncActionFilter
    for ParametrizedFilterWrapper<H, P>
{
    fn on_action_execution<'a>(
        &'a self,
        ctx: &'a mut ActionExecutingContext,
        next: ActionNext<'a>,
    ) -> BoxFuture<'a, PipelineResult<()>> {
        <H as ParametrizedFilter<P>>::on_action_execution(&self.handler, ctx, next, &self.params)
    }
}

impl<H: ParametrizedFilter<P>, P: Send + Sync + 'static> ExceptionFilter
    for ParametrizedFilterWrapper<H, P>
{
    fn on_exception(&self, ctx: &mut ExceptionContext) -> PipelineResult<()> {
        <H as ParametrizedFilter<P>>::on_exception(&self.handler, ctx, &self.params)
    }
}

impl<H: ParametrizedFilter<P>, P: Send + Sync + 'static> AsyncExceptionFilter
    for ParametrizedFilterWrapper<H, P>
{
    fn on_exception_async<'a>(
        &'a self,
        ctx: &'a mut ExceptionContext,
    ) -> BoxFuture<'a, PipelineResult<()>> {
        <H as ParametrizedFilter<P>>::on_exception_async(&self.handler, ctx, &self.params)
    }
}

impl<H: ParametrizedFilter<P>, P: Send + Sync + 'static> ResultFilter
    for ParametrizedFilterWrapper<H, P>
{
    fn on_result_executing(&self, ctx: &mut ResultExecutingContext) -> PipelineResult<()> {
        <H as ParametrizedFilter<P>>::on_result_executing(&self.handler, ctx, &self.params)
    }

    fn on_result_executed(&self, ctx: &mut ResultExecutedContext) -> PipelineResult<()> {
        <H as ParametrizedFilter<P>>::on_result_executed(&self.handler, ctx, &self.params)
    }
}

impl<H: ParametrizedFilter<P>, P: Send + Sync + 'static> AsyncResultFilter
    for ParametrizedFilterWrapper<H, P>
{
    fn on_result_execution<'a>(
        &'a self,
        ctx: &'a mut ResultExecutingContext,
        next: ResultNext<'a>,
    ) -> BoxFuture<'a, PipelineResult<()>> {
        <H as ParametrizedFilter<P>>::on_result_execution(&self.handler, ctx, next, &self.params)
    }
}

impl<H: ParametrizedFilter<P>, P: Send + Sync + 'static> FilterMetadata
    for ParametrizedFilterWrapper<H, P>
{
    fn name(&self) -> &'static str {
        std::any::type_name::<H>()
    }

    fn order(&self) -> Option<i32> {
        self.order
    }

    fn as_authorization_filter(&self) -> Option<&dyn AuthorizationFilter> {
        Some(self)
    }

    fn as_async_authorization_filter(&self) -> Option<&dyn AsyncAuthorizationFilter> {
        Some(self)
    }

    fn as_resource_filter(&self) -> Option<&dyn ResourceFilter> {
        Some(self)
    }

    fn as_async_resource_filter(&self) -> Option<&dyn AsyncResourceFilter> {
        Some(self)
    }

    fn as_action_filter(&self) -> Option<&dyn ActionFilter> {
        Some(self)
    }

    fn as_async_action_filter(&self) -> Option<&dyn AsyncActionFilter> {
        Some(self)
    }

    fn as_exception_filter(&self) -> Option<&dyn ExceptionFilter> {
        Some(self)
    }

    fn as_async_exception_filter(&self) -> Option<&dyn AsyncExceptionFilter> {
        Some(self)
    }

    fn as_result_filter(&self) -> Option<&dyn ResultFilter> {
        Some(self)
    }

    fn as_async_result_filter(&self) -> Option<&dyn AsyncResultFilter> {
        Some(self)
    }
}

/// Declares a parametrized filter: resolves the handler `H` from the
/// container per request and binds it to the declared parameters.
pub struct ParametrizedFilterFactory<H, P> {
    params: Arc<P>,
    order: Option<i32>,
    _handler: PhantomData<fn() -> H>,
}

impl<H, P> ParametrizedFilterFactory<H, P>
where
    H: ParametrizedFilter<P>,
    P: Send + Sync + 'static,
{
    /// Creates a declaration with the given parameters.
    #[must_use]
    pub fn new(params: P) -> Self {
        Self {
            params: Arc::new(params),
            order: None,
            _handler: PhantomData,
        }
    }

    /// Sets the order of the produced filter.
    #[must_use]
    pub const fn with_order(mut self, order: i32) -> Self {
        self.order = Some(order);
        self
    }

    /// Returns the declared parameters.
    #[must_use]
    pub fn params(&self) -> &P {
        &self.params
    }
}

impl<H, P> FilterFactory for ParametrizedFilterFactory<H, P>
where
    H: ParametrizedFilter<P>,
    P: Send + Sync + 'static,
{
    fn create_instance(
        &self,
        services: &Container,
    ) -> PipelineResult<Option<Arc<dyn FilterMetadata>>> {
        let handler = services.resolve::<H>().ok_or_else(|| {
            PipelineError::invalid_operation(format!(
                "parametrized filter handler '{}' is not registered",
                std::any::type_name::<H>()
            ))
        })?;

        let mut wrapper = ParametrizedFilterWrapper::new(handler, Arc::clone(&self.params));
        wrapper.order = self.order;
        Ok(Some(Arc::new(wrapper)))
    }

    fn is_reusable(&self) -> bool {
        true
    }
}

impl<H, P> FilterMetadata for ParametrizedFilterFactory<H, P>
where
    H: ParametrizedFilter<P>,
    P: Send + Sync + 'static,
{
    fn order(&self) -> Option<i32> {
        self.order
    }

    fn as_filter_factory(&self) -> Option<&dyn FilterFactory> {
        Some(self)
    }
}

impl<H, P> fmt::Debug for ParametrizedFilterFactory<H, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParametrizedFilterFactory")
            .field("handler", &std::any::type_name::<H>())
            .field("order", &self.order)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{action_fn, ActionEndpoint, ActionInvocation};
    use crate::invoker::ActionInvokerFactory;
    use http::StatusCode;
    use keel_core::result::StatusCodeResult;
    use keel_core::HttpContext;
    use parking_lot::Mutex;

    struct Label(&'static str);

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl ParametrizedFilter<Label> for Recorder {
        fn on_resource_executing(
            &self,
            _ctx: &mut ResourceExecutingContext,
            params: &Label,
        ) -> PipelineResult<()> {
            self.calls.lock().push(format!("resource:{}", params.0));
            Ok(())
        }

        fn on_action_executing(
            &self,
            ctx: &mut ActionExecutingContext,
            params: &Label,
        ) -> PipelineResult<()> {
            self.calls.lock().push(format!("action:{}", params.0));
            ctx.arguments.insert("label".into(), params.0.into());
            Ok(())
        }

        fn on_result_executed(
            &self,
            _ctx: &mut ResultExecutedContext,
            params: &Label,
        ) -> PipelineResult<()> {
            self.calls.lock().push(format!("result:{}", params.0));
            Ok(())
        }
    }

    #[test]
    fn test_wrapper_exposes_every_category() {
        let wrapper: Arc<dyn FilterMetadata> = Arc::new(ParametrizedFilterWrapper::new(
            Arc::new(Recorder::default()),
            Arc::new(Label("x")),
        ));
        assert!(wrapper.has_authorization());
        assert!(wrapper.has_resource());
        assert!(wrapper.has_action());
        assert!(wrapper.has_exception());
        assert!(wrapper.has_result());
        assert!(wrapper.name().ends_with("Recorder"));
    }

    #[test]
    fn test_factory_requires_registered_handler() {
        let factory = ParametrizedFilterFactory::<Recorder, Label>::new(Label("x"));
        let err = factory.create_instance(&Container::new()).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidOperation { .. }));
    }

    #[tokio::test]
    async fn test_handler_receives_declared_params() {
        let recorder = Arc::new(Recorder::default());
        let mut services = Container::new();
        services.register(recorder.clone());

        let endpoint = ActionEndpoint::builder("orders.list")
            .filter(ParametrizedFilterFactory::<Recorder, Label>::new(Label("orders")))
            .method(action_fn(|call: ActionInvocation| async move {
                assert_eq!(call.argument("label").and_then(|v| v.as_str()), Some("orders"));
                Ok(StatusCodeResult::boxed(StatusCode::OK))
            }))
            .build();
        let invoker = ActionInvokerFactory::default().create(Arc::new(endpoint));

        let http = Arc::new(HttpContext::builder().services(Arc::new(services)).build());
        invoker.invoke(http.clone()).await.unwrap();

        assert_eq!(http.response().status, StatusCode::OK);
        assert_eq!(
            *recorder.calls.lock(),
            vec!["resource:orders", "action:orders", "result:orders"]
        );
    }
}
