//! The action invoker.
//!
//! [`ActionInvoker::invoke`] resolves the filters of one request and walks
//! them through five stages:
//!
//! 1. **Authorization** - sequential; the first result set is executed and
//!    ends the request.
//! 2. **Resource** - an onion around everything below. A short circuit
//!    executes its result in place.
//! 3. **Action** - controller creation, argument binding, then an onion
//!    around the action method. A short circuit hands its result to the
//!    result stage.
//! 4. **Exception** - offered errors from stage 3 only, outermost filter
//!    first. A handled error's result is executed directly.
//! 5. **Result** - an onion around executing the result. Errors here never
//!    reach exception filters.
//!
//! Onion layers are driven by index over the per-category filter list. An
//! async filter receives a `*Next` continuation; a sync filter gets its
//! before hook, the rest of the onion, then its after hook. Errors raised
//! inside a layer are captured into the executed context so outer after
//! hooks always run, and are re-raised at the end of the stage unless a
//! filter marked them handled.

use crate::context::{
    ActionExecutedContext, ActionExecutingContext, AuthorizationFilterContext, ExceptionContext,
    FilterContext, ResourceExecutedContext, ResourceExecutingContext, ResultExecutedContext,
    ResultExecutingContext,
};
use crate::controller::Controller;
use crate::descriptor::{DefaultFilterOrder, FilterDescriptor, FilterItem, FilterOrdering};
use crate::endpoint::ActionEndpoint;
use crate::factory::FilterCollection;
use crate::filter::FilterMetadata;
use crate::provider::{DefaultFilterProvider, FilterProvider, FilterProviderContext};
use keel_core::result::EmptyResult;
use keel_core::{ActionContext, BoxFuture, BoxedResult, HttpContext, PipelineError, PipelineResult};
use keel_telemetry::metrics::{
    record_action_exception, record_invocation, record_short_circuit, ShortCircuitCategory,
};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

/// Continuation of the resource stage.
///
/// Consumed by [`run`](Self::run); dropping it without running is a short
/// circuit.
pub struct ResourceNext<'a> {
    pipeline: &'a Pipeline,
    index: usize,
}

impl<'a> ResourceNext<'a> {
    /// Runs the inner resource filters and the rest of the pipeline.
    pub fn run<'b>(
        self,
        ctx: &'b mut ResourceExecutingContext,
    ) -> BoxFuture<'b, &'b mut ResourceExecutedContext>
    where
        'a: 'b,
    {
        Box::pin(async move {
            let executed = self.pipeline.resource_layer(self.index, ctx).await;
            ctx.executed.insert(executed)
        })
    }
}

/// Continuation of the action stage.
pub struct ActionNext<'a> {
    pipeline: &'a Pipeline,
    index: usize,
}

impl<'a> ActionNext<'a> {
    /// Runs the inner action filters and the action method.
    pub fn run<'b>(
        self,
        ctx: &'b mut ActionExecutingContext,
    ) -> BoxFuture<'b, &'b mut ActionExecutedContext>
    where
        'a: 'b,
    {
        Box::pin(async move {
            let executed = self.pipeline.action_layer(self.index, ctx).await;
            ctx.executed.insert(executed)
        })
    }
}

/// Continuation of the result stage.
pub struct ResultNext<'a> {
    pipeline: &'a Pipeline,
    index: usize,
}

impl<'a> ResultNext<'a> {
    /// Runs the inner result filters and executes the result.
    pub fn run<'b>(
        self,
        ctx: &'b mut ResultExecutingContext,
    ) -> BoxFuture<'b, &'b mut ResultExecutedContext>
    where
        'a: 'b,
    {
        Box::pin(async move {
            let executed = self.pipeline.result_layer(self.index, ctx).await;
            ctx.executed.insert(executed)
        })
    }
}

macro_rules! debug_next {
    ($($ty:ident),*) => {
        $(
            impl fmt::Debug for $ty<'_> {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.debug_struct(stringify!($ty))
                        .field("index", &self.index)
                        .finish()
                }
            }
        )*
    };
}

debug_next!(ResourceNext, ActionNext, ResultNext);

/// Per-request state: the resolved filters split by category.
struct Pipeline {
    endpoint: Arc<ActionEndpoint>,
    filter_context: FilterContext,
    authorization: Vec<Arc<dyn FilterMetadata>>,
    resource: Vec<Arc<dyn FilterMetadata>>,
    action: Vec<Arc<dyn FilterMetadata>>,
    exception: Vec<Arc<dyn FilterMetadata>>,
    result: Vec<Arc<dyn FilterMetadata>>,
}

impl Pipeline {
    fn new(endpoint: Arc<ActionEndpoint>, filter_context: FilterContext) -> Self {
        let select = |has: fn(&(dyn FilterMetadata + 'static)) -> bool| {
            filter_context
                .filters()
                .iter()
                .filter(|&filter| has(&**filter))
                .cloned()
                .collect::<Vec<_>>()
        };

        let authorization = select(<dyn FilterMetadata>::has_authorization);
        let resource = select(<dyn FilterMetadata>::has_resource);
        let action = select(<dyn FilterMetadata>::has_action);
        let exception = select(<dyn FilterMetadata>::has_exception);
        let result = select(<dyn FilterMetadata>::has_result);

        Self {
            endpoint,
            filter_context,
            authorization,
            resource,
            action,
            exception,
            result,
        }
    }

    fn action_context(&self) -> &ActionContext {
        self.filter_context.action_context()
    }

    async fn execute(&self, result: &BoxedResult) -> PipelineResult<()> {
        result.execute_result(self.action_context()).await
    }

    async fn run(&self) -> PipelineResult<Option<BoxedResult>> {
        if let Some(result) = self.authorization_stage().await? {
            record_short_circuit(ShortCircuitCategory::Authorization);
            self.execute(&result).await?;
            return Ok(Some(result));
        }

        let mut ctx = ResourceExecutingContext::new(self.filter_context.clone());
        let mut executed = self.resource_layer(0, &mut ctx).await;

        if let Some(err) = executed.take_unhandled() {
            return Err(err);
        }
        if let Some(err) = executed.exception.take() {
            debug!(error = %err, "Exception handled by a resource filter");
            if let Some(result) = executed.pending_result().cloned() {
                self.execute(&result).await?;
            }
        }
        Ok(executed.result)
    }

    async fn authorization_stage(&self) -> PipelineResult<Option<BoxedResult>> {
        let mut ctx = AuthorizationFilterContext::new(self.filter_context.clone());

        for filter in &self.authorization {
            if let Some(async_filter) = filter.as_async_authorization_filter() {
                async_filter.on_authorization_async(&mut ctx).await?;
            } else if let Some(sync_filter) = filter.as_authorization_filter() {
                sync_filter.on_authorization(&mut ctx)?;
            }

            if ctx.result.is_some() {
                debug!(
                    filter = filter.name(),
                    category = "authorization",
                    "Filter short-circuited"
                );
                return Ok(ctx.result);
            }
        }

        Ok(None)
    }

    fn resource_layer<'a>(
        &'a self,
        index: usize,
        ctx: &'a mut ResourceExecutingContext,
    ) -> BoxFuture<'a, ResourceExecutedContext> {
        Box::pin(async move {
            let Some(filter) = self.resource.get(index) else {
                return self.inner_stage().await;
            };

            if let Some(async_filter) = filter.as_async_resource_filter() {
                ctx.executed = None;
                let next = ResourceNext {
                    pipeline: self,
                    index: index + 1,
                };
                let outcome = async_filter.on_resource_execution(ctx, next).await;
                let executed = ctx.executed.take();

                return match (outcome, executed) {
                    (Ok(()), Some(executed)) => executed,
                    (Ok(()), None) => self.resource_short_circuit(filter, ctx.result.clone()).await,
                    (Err(err), Some(mut executed)) => {
                        executed.fail(err);
                        executed
                    }
                    (Err(err), None) => {
                        ResourceExecutedContext::faulted(self.filter_context.clone(), err)
                    }
                };
            }

            let Some(sync_filter) = filter.as_resource_filter() else {
                return self.resource_layer(index + 1, ctx).await;
            };

            if let Err(err) = sync_filter.on_resource_executing(ctx) {
                return ResourceExecutedContext::faulted(self.filter_context.clone(), err);
            }
            if ctx.result.is_some() {
                return self.resource_short_circuit(filter, ctx.result.clone()).await;
            }

            let mut executed = self.resource_layer(index + 1, ctx).await;
            if let Err(err) = sync_filter.on_resource_executed(&mut executed) {
                executed.fail(err);
            }
            executed
        })
    }

    async fn resource_short_circuit(
        &self,
        filter: &Arc<dyn FilterMetadata>,
        result: Option<BoxedResult>,
    ) -> ResourceExecutedContext {
        debug!(
            filter = filter.name(),
            category = "resource",
            "Filter short-circuited"
        );
        record_short_circuit(ShortCircuitCategory::Resource);

        let mut executed = ResourceExecutedContext::canceled(self.filter_context.clone(), result);
        if let Some(result) = executed.result.clone() {
            executed.mark_executed();
            if let Err(err) = self.execute(&result).await {
                executed.fail(err);
            }
        }
        executed
    }

    /// Everything inside the resource onion.
    async fn inner_stage(&self) -> ResourceExecutedContext {
        let mut executed = ResourceExecutedContext::new(self.filter_context.clone());

        let outcome = match self.action_stage().await {
            Ok((result, controller)) => self.result_stage(result, controller).await,
            Err(err) => self.exception_stage(err).await,
        };

        match outcome {
            Ok(result) => {
                executed.result = Some(result);
                executed.mark_executed();
            }
            Err(err) => executed.exception = Some(err),
        }
        executed
    }

    async fn action_stage(&self) -> PipelineResult<(BoxedResult, Option<Arc<dyn Controller>>)> {
        let controller = match self.endpoint.controller_factory() {
            Some(factory) => Some(factory.create_controller(self.action_context())?),
            None => None,
        };

        let mut ctx = ActionExecutingContext::new(self.filter_context.clone(), controller.clone());
        if let Some(binder) = self.endpoint.binder() {
            binder.bind(self.action_context(), &mut ctx.arguments).await?;
        }

        let mut executed = self.action_layer(0, &mut ctx).await;
        if let Some(err) = executed.take_unhandled() {
            return Err(err);
        }

        let result = executed.result.take().unwrap_or_else(EmptyResult::boxed);
        Ok((result, controller))
    }

    fn action_layer<'a>(
        &'a self,
        index: usize,
        ctx: &'a mut ActionExecutingContext,
    ) -> BoxFuture<'a, ActionExecutedContext> {
        Box::pin(async move {
            let Some(filter) = self.action.get(index) else {
                return self.invoke_action(ctx).await;
            };

            if let Some(async_filter) = filter.as_async_action_filter() {
                ctx.executed = None;
                let next = ActionNext {
                    pipeline: self,
                    index: index + 1,
                };
                let outcome = async_filter.on_action_execution(ctx, next).await;
                let executed = ctx.executed.take();

                return match (outcome, executed) {
                    (Ok(()), Some(executed)) => executed,
                    (Ok(()), None) => self.action_short_circuit(filter, ctx),
                    (Err(err), executed) => {
                        let mut executed = executed.unwrap_or_else(|| {
                            ActionExecutedContext::new(
                                self.filter_context.clone(),
                                ctx.controller.clone(),
                            )
                        });
                        executed.fail(err);
                        executed
                    }
                };
            }

            let Some(sync_filter) = filter.as_action_filter() else {
                return self.action_layer(index + 1, ctx).await;
            };

            if let Err(err) = sync_filter.on_action_executing(ctx) {
                let mut executed =
                    ActionExecutedContext::new(self.filter_context.clone(), ctx.controller.clone());
                executed.fail(err);
                return executed;
            }
            if ctx.result.is_some() {
                return self.action_short_circuit(filter, ctx);
            }

            let mut executed = self.action_layer(index + 1, ctx).await;
            if let Err(err) = sync_filter.on_action_executed(&mut executed) {
                executed.fail(err);
            }
            executed
        })
    }

    fn action_short_circuit(
        &self,
        filter: &Arc<dyn FilterMetadata>,
        ctx: &ActionExecutingContext,
    ) -> ActionExecutedContext {
        debug!(
            filter = filter.name(),
            category = "action",
            "Filter short-circuited"
        );
        record_short_circuit(ShortCircuitCategory::Action);

        let mut executed =
            ActionExecutedContext::new(self.filter_context.clone(), ctx.controller.clone());
        executed.canceled = true;
        executed.result = ctx.result.clone();
        executed
    }

    async fn invoke_action(&self, ctx: &ActionExecutingContext) -> ActionExecutedContext {
        let mut executed =
            ActionExecutedContext::new(self.filter_context.clone(), ctx.controller.clone());
        match self.endpoint.method().invoke(ctx).await {
            Ok(result) => executed.result = Some(result),
            Err(err) => executed.exception = Some(err),
        }
        executed
    }

    async fn exception_stage(&self, error: PipelineError) -> PipelineResult<BoxedResult> {
        let mut ctx = ExceptionContext::new(self.filter_context.clone(), error);

        for filter in &self.exception {
            if let Some(async_filter) = filter.as_async_exception_filter() {
                async_filter.on_exception_async(&mut ctx).await?;
            } else if let Some(sync_filter) = filter.as_exception_filter() {
                sync_filter.on_exception(&mut ctx)?;
            }

            if ctx.is_handled() {
                debug!(filter = filter.name(), "Exception handled");
                break;
            }
        }

        let handled = ctx.is_handled();
        record_action_exception(handled);

        if !handled {
            if let Some(err) = ctx.exception.take() {
                warn!(
                    action = self.filter_context.action().id(),
                    error = %err,
                    "Unhandled action exception"
                );
                return Err(err);
            }
        }

        let result = ctx.result.take().unwrap_or_else(EmptyResult::boxed);
        self.execute(&result).await?;
        Ok(result)
    }

    async fn result_stage(
        &self,
        result: BoxedResult,
        controller: Option<Arc<dyn Controller>>,
    ) -> PipelineResult<BoxedResult> {
        let mut ctx = ResultExecutingContext::new(self.filter_context.clone(), result, controller);
        let mut executed = self.result_layer(0, &mut ctx).await;

        if let Some(err) = executed.take_unhandled() {
            return Err(err);
        }
        Ok(executed.result)
    }

    fn result_layer<'a>(
        &'a self,
        index: usize,
        ctx: &'a mut ResultExecutingContext,
    ) -> BoxFuture<'a, ResultExecutedContext> {
        Box::pin(async move {
            let Some(filter) = self.result.get(index) else {
                return self.execute_innermost(ctx).await;
            };

            if let Some(async_filter) = filter.as_async_result_filter() {
                ctx.executed = None;
                let next = ResultNext {
                    pipeline: self,
                    index: index + 1,
                };
                let outcome = async_filter.on_result_execution(ctx, next).await;
                let executed = ctx.executed.take();

                return match (outcome, executed) {
                    (Ok(()), Some(executed)) => executed,
                    (Ok(()), None) => {
                        ctx.cancel = true;
                        self.result_canceled(filter, ctx)
                    }
                    (Err(err), executed) => {
                        let mut executed = executed.unwrap_or_else(|| self.result_executed(ctx));
                        executed.fail(err);
                        executed
                    }
                };
            }

            let Some(sync_filter) = filter.as_result_filter() else {
                return self.result_layer(index + 1, ctx).await;
            };

            if let Err(err) = sync_filter.on_result_executing(ctx) {
                let mut executed = self.result_executed(ctx);
                executed.fail(err);
                return executed;
            }
            if ctx.cancel {
                return self.result_canceled(filter, ctx);
            }

            let mut executed = self.result_layer(index + 1, ctx).await;
            if let Err(err) = sync_filter.on_result_executed(&mut executed) {
                executed.fail(err);
            }
            executed
        })
    }

    fn result_executed(&self, ctx: &ResultExecutingContext) -> ResultExecutedContext {
        ResultExecutedContext::new(
            self.filter_context.clone(),
            Arc::clone(&ctx.result),
            ctx.controller.clone(),
        )
    }

    fn result_canceled(
        &self,
        filter: &Arc<dyn FilterMetadata>,
        ctx: &ResultExecutingContext,
    ) -> ResultExecutedContext {
        debug!(
            filter = filter.name(),
            category = "result",
            "Filter cancelled result execution"
        );
        record_short_circuit(ShortCircuitCategory::Result);

        let mut executed = self.result_executed(ctx);
        executed.canceled = true;
        executed
    }

    async fn execute_innermost(&self, ctx: &ResultExecutingContext) -> ResultExecutedContext {
        let mut executed = self.result_executed(ctx);
        if let Err(err) = self.execute(&ctx.result).await {
            executed.exception = Some(err);
        }
        executed
    }
}

/// Runs the filter pipeline of one action.
///
/// Created by [`ActionInvokerFactory::create`]. The global and endpoint
/// filters are sorted once here; filter instances are resolved again for
/// every request.
pub struct ActionInvoker {
    endpoint: Arc<ActionEndpoint>,
    descriptors: Arc<[FilterDescriptor]>,
    providers: Arc<[Arc<dyn FilterProvider>]>,
    ordering: Arc<dyn FilterOrdering>,
}

impl ActionInvoker {
    /// Returns the endpoint.
    #[must_use]
    pub const fn endpoint(&self) -> &Arc<ActionEndpoint> {
        &self.endpoint
    }

    /// Returns the sorted filter descriptors.
    #[must_use]
    pub fn descriptors(&self) -> &[FilterDescriptor] {
        &self.descriptors
    }

    /// Resolves the filter instances for one request.
    ///
    /// Providers run in ascending order, then again in reverse for their
    /// `on_providers_executed` hook. The same instance appearing twice is
    /// kept once. The result is re-sorted with the ordering strategy.
    ///
    /// # Errors
    ///
    /// Any error a provider or filter factory raises.
    pub fn resolve_filters(
        &self,
        action_context: &ActionContext,
    ) -> PipelineResult<Vec<Arc<dyn FilterMetadata>>> {
        let items = self.descriptors.iter().cloned().map(FilterItem::new).collect();
        let mut ctx = FilterProviderContext::new(action_context.clone(), items);

        for provider in self.providers.iter() {
            provider.on_providers_executing(&mut ctx)?;
        }
        for provider in self.providers.iter().rev() {
            provider.on_providers_executed(&mut ctx)?;
        }

        let mut unique: Vec<FilterItem> = Vec::with_capacity(ctx.results.len());
        for item in ctx.results {
            let Some(filter) = &item.filter else {
                continue;
            };
            let seen = unique
                .iter()
                .filter_map(|u| u.filter.as_ref())
                .any(|existing| same_instance(existing, filter));
            if !seen {
                unique.push(item);
            }
        }

        self.ordering.sort_items(&mut unique);
        Ok(unique.into_iter().filter_map(|item| item.filter).collect())
    }

    /// Runs the pipeline for a request.
    ///
    /// Returns the result that ended the request, if any. The result has
    /// already been executed into the response of `http`.
    ///
    /// # Errors
    ///
    /// Filter resolution errors, errors no filter handled, and errors from
    /// result execution.
    pub async fn invoke(&self, http: Arc<HttpContext>) -> PipelineResult<Option<BoxedResult>> {
        let action = Arc::clone(self.endpoint.descriptor());
        let span = info_span!(
            "action",
            request_id = %http.request_id(),
            action = action.id()
        );

        async move {
            let started = Instant::now();
            let outcome = self.run(http).await;
            let elapsed = started.elapsed();
            record_invocation(action.id(), elapsed);

            match &outcome {
                Ok(_) => info!(
                    duration_ms = elapsed.as_secs_f64() * 1000.0,
                    "Action pipeline completed"
                ),
                Err(err) => warn!(
                    duration_ms = elapsed.as_secs_f64() * 1000.0,
                    error = %err,
                    "Action pipeline failed"
                ),
            }
            outcome
        }
        .instrument(span)
        .await
    }

    async fn run(&self, http: Arc<HttpContext>) -> PipelineResult<Option<BoxedResult>> {
        let action_context = ActionContext::new(http, Arc::clone(self.endpoint.descriptor()));
        let filters = self.resolve_filters(&action_context)?;
        debug!(filters = filters.len(), "Filters resolved");

        let filter_context = FilterContext::new(action_context, filters.into());
        Pipeline::new(Arc::clone(&self.endpoint), filter_context)
            .run()
            .await
    }
}

impl fmt::Debug for ActionInvoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionInvoker")
            .field("action", &self.endpoint.descriptor().id())
            .field("descriptors", &self.descriptors)
            .field("ordering", &self.ordering)
            .finish()
    }
}

fn same_instance(a: &Arc<dyn FilterMetadata>, b: &Arc<dyn FilterMetadata>) -> bool {
    std::ptr::eq(Arc::as_ptr(a).cast::<()>(), Arc::as_ptr(b).cast::<()>())
}

/// Creates [`ActionInvoker`]s from endpoints.
///
/// # Example
///
/// ```
/// use keel_filters::{ActionInvokerFactory, CorsFirstFilterOrder, FilterCollection};
/// use std::sync::Arc;
///
/// let factory = ActionInvokerFactory::new()
///     .with_filters(FilterCollection::new())
///     .with_ordering(Arc::new(CorsFirstFilterOrder));
/// ```
pub struct ActionInvokerFactory {
    filters: FilterCollection,
    providers: Vec<Arc<dyn FilterProvider>>,
    ordering: Arc<dyn FilterOrdering>,
}

impl ActionInvokerFactory {
    /// Creates a factory with no global filters, the default provider and
    /// the default ordering.
    #[must_use]
    pub fn new() -> Self {
        Self {
            filters: FilterCollection::new(),
            providers: vec![Arc::new(DefaultFilterProvider)],
            ordering: Arc::new(DefaultFilterOrder),
        }
    }

    /// Replaces the global filters.
    #[must_use]
    pub fn with_filters(mut self, filters: FilterCollection) -> Self {
        self.filters = filters;
        self
    }

    /// Adds a filter provider.
    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn FilterProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Replaces the ordering strategy.
    #[must_use]
    pub fn with_ordering(mut self, ordering: Arc<dyn FilterOrdering>) -> Self {
        self.ordering = ordering;
        self
    }

    /// Returns the global filters.
    #[must_use]
    pub const fn filters(&self) -> &FilterCollection {
        &self.filters
    }

    /// Returns the global filters for modification.
    pub fn filters_mut(&mut self) -> &mut FilterCollection {
        &mut self.filters
    }

    /// Builds the invoker of an endpoint.
    #[must_use]
    pub fn create(&self, endpoint: Arc<ActionEndpoint>) -> ActionInvoker {
        let mut descriptors: Vec<FilterDescriptor> = self
            .filters
            .descriptors()
            .iter()
            .chain(endpoint.filters())
            .cloned()
            .collect();
        self.ordering.sort(&mut descriptors);

        let mut providers = self.providers.clone();
        providers.sort_by_key(|provider| provider.order());

        debug!(
            action = endpoint.descriptor().id(),
            filters = descriptors.len(),
            "Action invoker created"
        );

        ActionInvoker {
            endpoint,
            descriptors: descriptors.into(),
            providers: providers.into(),
            ordering: Arc::clone(&self.ordering),
        }
    }
}

impl Default for ActionInvokerFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ActionInvokerFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionInvokerFactory")
            .field("filters", &self.filters)
            .field("providers", &self.providers.len())
            .field("ordering", &self.ordering)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::FilterScope;
    use crate::endpoint::action_fn;
    use crate::filter::{AuthorizationFilter, ResultFilter};
    use http::StatusCode;
    use keel_core::result::StatusCodeResult;
    use parking_lot::Mutex;

    struct Deny;

    impl AuthorizationFilter for Deny {
        fn on_authorization(&self, ctx: &mut AuthorizationFilterContext) -> PipelineResult<()> {
            ctx.result = Some(StatusCodeResult::boxed(StatusCode::FORBIDDEN));
            Ok(())
        }
    }

    impl FilterMetadata for Deny {
        fn as_authorization_filter(&self) -> Option<&dyn AuthorizationFilter> {
            Some(self)
        }
    }

    #[derive(Default)]
    struct Observe {
        seen: Mutex<Vec<bool>>,
    }

    impl ResultFilter for Observe {
        fn on_result_executed(&self, ctx: &mut ResultExecutedContext) -> PipelineResult<()> {
            self.seen.lock().push(ctx.canceled);
            Ok(())
        }
    }

    impl FilterMetadata for Observe {
        fn as_result_filter(&self) -> Option<&dyn ResultFilter> {
            Some(self)
        }
    }

    fn endpoint() -> ActionEndpoint {
        ActionEndpoint::builder("orders.get")
            .method(action_fn(|_| async {
                Ok(StatusCodeResult::boxed(StatusCode::OK))
            }))
            .build()
    }

    fn http() -> Arc<HttpContext> {
        Arc::new(HttpContext::builder().build())
    }

    #[tokio::test]
    async fn test_plain_action_executes_result() {
        let invoker = ActionInvokerFactory::default().create(Arc::new(endpoint()));
        let http = http();

        let result = invoker.invoke(http.clone()).await.unwrap().unwrap();

        assert_eq!(result.status_code(), Some(StatusCode::OK));
        assert_eq!(http.response().status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_authorization_short_circuit_skips_result_filters() {
        let observe = Arc::new(Observe::default());
        let mut filters = FilterCollection::new();
        filters.add(Deny).add_shared(observe.clone());

        let invoker = ActionInvokerFactory::new()
            .with_filters(filters)
            .create(Arc::new(endpoint()));
        let http = http();

        invoker.invoke(http.clone()).await.unwrap();

        assert_eq!(http.response().status, StatusCode::FORBIDDEN);
        assert!(observe.seen.lock().is_empty());
    }

    #[test]
    fn test_create_sorts_global_and_endpoint_filters() {
        let mut filters = FilterCollection::new();
        filters.add_with_order(Deny, 10);

        let endpoint = ActionEndpoint::builder("a").filter(Deny).build();
        let invoker = ActionInvokerFactory::new()
            .with_filters(filters)
            .create(Arc::new(endpoint));

        let keys: Vec<_> = invoker
            .descriptors()
            .iter()
            .map(|d| (d.order(), d.scope()))
            .collect();
        assert_eq!(keys, vec![(0, FilterScope::Action), (10, FilterScope::Global)]);
    }

    #[test]
    fn test_resolve_filters_dedupes_instances() {
        let shared: Arc<dyn FilterMetadata> = Arc::new(Deny);
        let endpoint = ActionEndpoint::builder("a")
            .filter_at(shared.clone(), FilterScope::Controller)
            .filter_at(shared.clone(), FilterScope::Action)
            .build();
        let invoker = ActionInvokerFactory::default().create(Arc::new(endpoint));

        let action_context =
            ActionContext::new(http(), Arc::clone(invoker.endpoint().descriptor()));
        let filters = invoker.resolve_filters(&action_context).unwrap();

        assert_eq!(filters.len(), 1);
        assert!(same_instance(&filters[0], &shared));
    }
}
