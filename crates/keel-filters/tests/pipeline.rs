//! End-to-end tests of the filter pipeline.
//!
//! Each test builds an endpoint, runs it through an `ActionInvoker` and
//! checks the order in which hooks fired.

use http::StatusCode;
use keel_core::di::Container;
use keel_core::result::{ContentResult, StatusCodeResult};
use keel_core::{ActionContext, ActionDescriptor, HttpContext};
use keel_filters::prelude::*;
use keel_filters::{
    action_fn, ActionEndpoint, ActionInvocation, ActionInvoker, ActionInvokerFactory, Controller,
    DefaultFilterProvider, FilterDescriptor, FilterFactory, FilterItem, ServiceFilter,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
struct Log(Arc<Mutex<Vec<String>>>);

impl Log {
    fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

/// Sync action filter that records its hooks.
struct Step {
    name: &'static str,
    order: i32,
    log: Log,
    short_circuit: bool,
    fail: bool,
}

impl Step {
    fn new(name: &'static str, order: i32, log: &Log) -> Self {
        Self {
            name,
            order,
            log: log.clone(),
            short_circuit: false,
            fail: false,
        }
    }

    fn short_circuit(mut self) -> Self {
        self.short_circuit = true;
        self
    }

    fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

impl ActionFilter for Step {
    fn on_action_executing(&self, ctx: &mut ActionExecutingContext) -> PipelineResult<()> {
        self.log.push(format!("{}:before", self.name));
        if self.fail {
            return Err(PipelineError::filter(self.name, "refused"));
        }
        if self.short_circuit {
            ctx.result = Some(StatusCodeResult::boxed(StatusCode::ACCEPTED));
        }
        Ok(())
    }

    fn on_action_executed(&self, ctx: &mut ActionExecutedContext) -> PipelineResult<()> {
        let suffix = if ctx.canceled { ":canceled" } else { "" };
        self.log.push(format!("{}:after{suffix}", self.name));
        Ok(())
    }
}

impl FilterMetadata for Step {
    fn order(&self) -> Option<i32> {
        Some(self.order)
    }

    fn as_action_filter(&self) -> Option<&dyn ActionFilter> {
        Some(self)
    }
}

/// Async action filter that records around `next`.
struct Around {
    name: &'static str,
    order: i32,
    log: Log,
}

impl AsyncActionFilter for Around {
    fn on_action_execution<'a>(
        &'a self,
        ctx: &'a mut ActionExecutingContext,
        next: ActionNext<'a>,
    ) -> BoxFuture<'a, PipelineResult<()>> {
        Box::pin(async move {
            self.log.push(format!("{}:before", self.name));
            let executed = next.run(ctx).await;
            let state = if executed.exception.is_some() {
                ":faulted"
            } else {
                ""
            };
            self.log.push(format!("{}:after{state}", self.name));
            Ok(())
        })
    }
}

impl FilterMetadata for Around {
    fn order(&self) -> Option<i32> {
        Some(self.order)
    }

    fn as_async_action_filter(&self) -> Option<&dyn AsyncActionFilter> {
        Some(self)
    }
}

/// Exception filter that optionally handles with a 500 content result.
struct Recover {
    name: &'static str,
    order: i32,
    handle: bool,
    log: Log,
}

impl ExceptionFilter for Recover {
    fn on_exception(&self, ctx: &mut ExceptionContext) -> PipelineResult<()> {
        self.log.push(format!("{}:exception", self.name));
        if self.handle {
            ctx.result = Some(Arc::new(
                ContentResult::new(format!("recovered by {}", self.name))
                    .with_status(StatusCode::INTERNAL_SERVER_ERROR),
            ));
            ctx.exception_handled = true;
        }
        Ok(())
    }
}

impl FilterMetadata for Recover {
    fn order(&self) -> Option<i32> {
        Some(self.order)
    }

    fn as_exception_filter(&self) -> Option<&dyn ExceptionFilter> {
        Some(self)
    }
}

/// Result filter that fails or cancels.
struct Outcome {
    order: i32,
    log: Log,
    cancel: bool,
}

impl ResultFilter for Outcome {
    fn on_result_executing(&self, ctx: &mut ResultExecutingContext) -> PipelineResult<()> {
        self.log.push(format!("outcome{}:before", self.order));
        if self.cancel {
            ctx.cancel = true;
            return Ok(());
        }
        Err(PipelineError::filter("Outcome", "broken result filter"))
    }

    fn on_result_executed(&self, ctx: &mut ResultExecutedContext) -> PipelineResult<()> {
        let suffix = if ctx.canceled { ":canceled" } else { "" };
        self.log.push(format!("outcome{}:after{suffix}", self.order));
        Ok(())
    }
}

impl FilterMetadata for Outcome {
    fn order(&self) -> Option<i32> {
        Some(self.order)
    }

    fn as_result_filter(&self) -> Option<&dyn ResultFilter> {
        Some(self)
    }
}

/// Result filter that only records.
struct Watch {
    order: i32,
    log: Log,
}

impl ResultFilter for Watch {
    fn on_result_executing(&self, _ctx: &mut ResultExecutingContext) -> PipelineResult<()> {
        self.log.push(format!("watch{}:before", self.order));
        Ok(())
    }

    fn on_result_executed(&self, ctx: &mut ResultExecutedContext) -> PipelineResult<()> {
        let suffix = if ctx.canceled { ":canceled" } else { "" };
        self.log.push(format!("watch{}:after{suffix}", self.order));
        Ok(())
    }
}

impl FilterMetadata for Watch {
    fn order(&self) -> Option<i32> {
        Some(self.order)
    }

    fn as_result_filter(&self) -> Option<&dyn ResultFilter> {
        Some(self)
    }
}

/// Resource filter that answers the request itself.
struct Cached {
    log: Log,
}

impl ResourceFilter for Cached {
    fn on_resource_executing(&self, ctx: &mut ResourceExecutingContext) -> PipelineResult<()> {
        self.log.push("cache:hit");
        ctx.result = Some(Arc::new(ContentResult::new("cached")));
        Ok(())
    }
}

impl FilterMetadata for Cached {
    fn order(&self) -> Option<i32> {
        Some(10)
    }

    fn as_resource_filter(&self) -> Option<&dyn ResourceFilter> {
        Some(self)
    }
}

/// Resource filter that records the unwind.
struct Envelope {
    log: Log,
}

impl ResourceFilter for Envelope {
    fn on_resource_executing(&self, _ctx: &mut ResourceExecutingContext) -> PipelineResult<()> {
        self.log.push("envelope:before");
        Ok(())
    }

    fn on_resource_executed(&self, ctx: &mut ResourceExecutedContext) -> PipelineResult<()> {
        let suffix = if ctx.canceled { ":canceled" } else { "" };
        self.log.push(format!("envelope:after{suffix}"));
        Ok(())
    }
}

impl FilterMetadata for Envelope {
    fn order(&self) -> Option<i32> {
        Some(0)
    }

    fn as_resource_filter(&self) -> Option<&dyn ResourceFilter> {
        Some(self)
    }
}

async fn record(log: Log) -> PipelineResult<BoxedResult> {
    log.push("action");
    Ok(Arc::new(ContentResult::new("done")))
}

async fn fail(log: Log) -> PipelineResult<BoxedResult> {
    log.push("action");
    Err(PipelineError::action("database unavailable"))
}

fn recording_action(log: &Log) -> impl keel_filters::ActionMethod + 'static {
    let log = log.clone();
    action_fn(move |_call: ActionInvocation| record(log.clone()))
}

fn failing_action(log: &Log) -> impl keel_filters::ActionMethod + 'static {
    let log = log.clone();
    action_fn(move |_call: ActionInvocation| fail(log.clone()))
}

fn invoker(endpoint: ActionEndpoint) -> ActionInvoker {
    ActionInvokerFactory::new().create(Arc::new(endpoint))
}

fn request() -> Arc<HttpContext> {
    Arc::new(HttpContext::builder().build())
}

#[tokio::test]
async fn test_onion_order_with_mixed_sync_and_async_filters() {
    let log = Log::default();
    let endpoint = ActionEndpoint::builder("orders.list")
        .filter(Step::new("c", 3, &log))
        .filter(Around {
            name: "b",
            order: 2,
            log: log.clone(),
        })
        .filter(Step::new("a", 1, &log))
        .method(recording_action(&log))
        .build();

    let http = request();
    let result = invoker(endpoint).invoke(Arc::clone(&http)).await.unwrap();

    assert!(result.unwrap().is::<ContentResult>());
    assert_eq!(
        log.entries(),
        [
            "a:before", "b:before", "c:before", "action", "c:after", "b:after", "a:after"
        ]
    );
    assert_eq!(http.response_snapshot().body, "done");
}

#[tokio::test]
async fn test_short_circuit_unwinds_outer_filters_only() {
    let log = Log::default();
    let endpoint = ActionEndpoint::builder("orders.list")
        .filter(Step::new("a", 1, &log))
        .filter(Around {
            name: "b",
            order: 2,
            log: log.clone(),
        })
        .filter(Step::new("c", 3, &log).short_circuit())
        .filter(Step::new("d", 4, &log))
        .method(recording_action(&log))
        .build();

    let http = request();
    let result = invoker(endpoint).invoke(Arc::clone(&http)).await.unwrap();

    assert_eq!(
        log.entries(),
        ["a:before", "b:before", "c:before", "b:after", "a:after:canceled"]
    );
    // The short-circuit result still flows through result execution.
    assert_eq!(result.unwrap().status_code(), Some(StatusCode::ACCEPTED));
    assert_eq!(http.response_snapshot().status, StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_resource_short_circuit_skips_action() {
    let log = Log::default();
    let endpoint = ActionEndpoint::builder("catalog.show")
        .filter(Envelope { log: log.clone() })
        .filter(Cached { log: log.clone() })
        .filter(Step::new("a", 1, &log))
        .method(recording_action(&log))
        .build();

    let http = request();
    invoker(endpoint).invoke(Arc::clone(&http)).await.unwrap();

    assert_eq!(
        log.entries(),
        ["envelope:before", "cache:hit", "envelope:after:canceled"]
    );
    assert_eq!(http.response_snapshot().body, "cached");
}

#[tokio::test]
async fn test_action_filter_error_reaches_exception_filters() {
    let log = Log::default();
    let endpoint = ActionEndpoint::builder("orders.create")
        .filter(Around {
            name: "outer",
            order: 1,
            log: log.clone(),
        })
        .filter(Step::new("guard", 2, &log).failing())
        .filter(Recover {
            name: "recover",
            order: 0,
            handle: true,
            log: log.clone(),
        })
        .method(recording_action(&log))
        .build();

    let http = request();
    let result = invoker(endpoint).invoke(Arc::clone(&http)).await.unwrap();

    assert_eq!(
        log.entries(),
        [
            "outer:before",
            "guard:before",
            "outer:after:faulted",
            "recover:exception"
        ]
    );
    assert_eq!(
        result.unwrap().status_code(),
        Some(StatusCode::INTERNAL_SERVER_ERROR)
    );
    assert_eq!(http.response_snapshot().body, "recovered by recover");
}

#[tokio::test]
async fn test_outermost_exception_filter_handles_first() {
    let log = Log::default();
    let endpoint = ActionEndpoint::builder("orders.create")
        .filter(Recover {
            name: "inner",
            order: 5,
            handle: true,
            log: log.clone(),
        })
        .filter(Recover {
            name: "observer",
            order: -10,
            handle: false,
            log: log.clone(),
        })
        .filter(Recover {
            name: "outer",
            order: 0,
            handle: true,
            log: log.clone(),
        })
        .method(failing_action(&log))
        .build();

    let http = request();
    invoker(endpoint).invoke(Arc::clone(&http)).await.unwrap();

    assert_eq!(
        log.entries(),
        ["action", "observer:exception", "outer:exception"]
    );
    assert_eq!(http.response_snapshot().body, "recovered by outer");
}

#[tokio::test]
async fn test_unhandled_action_error_propagates() {
    let log = Log::default();
    let endpoint = ActionEndpoint::builder("orders.create")
        .filter(Recover {
            name: "observer",
            order: 0,
            handle: false,
            log: log.clone(),
        })
        .method(failing_action(&log))
        .build();

    let err = invoker(endpoint).invoke(request()).await.unwrap_err();
    assert!(matches!(err, PipelineError::Action { .. }));
    assert_eq!(log.entries(), ["action", "observer:exception"]);
}

#[tokio::test]
async fn test_result_filter_error_bypasses_exception_filters() {
    let log = Log::default();
    let endpoint = ActionEndpoint::builder("orders.list")
        .filter(Recover {
            name: "recover",
            order: 0,
            handle: true,
            log: log.clone(),
        })
        .filter(Outcome {
            order: 1,
            log: log.clone(),
            cancel: false,
        })
        .method(recording_action(&log))
        .build();

    let err = invoker(endpoint).invoke(request()).await.unwrap_err();

    assert!(matches!(err, PipelineError::Filter { .. }));
    assert_eq!(log.entries(), ["action", "outcome1:before"]);
}

#[tokio::test]
async fn test_result_cancel_skips_execution() {
    let log = Log::default();
    let endpoint = ActionEndpoint::builder("orders.list")
        .filter(Watch {
            order: 1,
            log: log.clone(),
        })
        .filter(Outcome {
            order: 2,
            log: log.clone(),
            cancel: true,
        })
        .filter(Watch {
            order: 3,
            log: log.clone(),
        })
        .method(recording_action(&log))
        .build();

    let http = request();
    invoker(endpoint).invoke(Arc::clone(&http)).await.unwrap();

    assert_eq!(
        log.entries(),
        ["action", "watch1:before", "outcome2:before", "watch1:after:canceled"]
    );
    assert!(http.response_snapshot().body.is_empty());
}

struct OrdersController {
    log: Log,
}

impl ActionFilter for OrdersController {
    fn on_action_executing(&self, _ctx: &mut ActionExecutingContext) -> PipelineResult<()> {
        self.log.push("controller:before");
        Ok(())
    }

    fn on_action_executed(&self, _ctx: &mut ActionExecutedContext) -> PipelineResult<()> {
        self.log.push("controller:after");
        Ok(())
    }
}

impl Controller for OrdersController {
    fn as_action_filter(&self) -> Option<&dyn ActionFilter> {
        Some(self)
    }
}

struct Audit {
    log: Log,
}

impl ActionFilter for Audit {
    fn on_action_executing(&self, _ctx: &mut ActionExecutingContext) -> PipelineResult<()> {
        self.log.push("audit:before");
        Ok(())
    }

    fn on_action_executed(&self, _ctx: &mut ActionExecutedContext) -> PipelineResult<()> {
        self.log.push("audit:after");
        Ok(())
    }
}

impl FilterMetadata for Audit {
    fn as_action_filter(&self) -> Option<&dyn ActionFilter> {
        Some(self)
    }
}

#[tokio::test]
async fn test_controller_filter_wraps_service_filter() {
    let log = Log::default();
    let mut services = Container::new();
    services.register(Arc::new(Audit { log: log.clone() }));

    let controller_log = log.clone();
    let endpoint = ActionEndpoint::builder("orders.index")
        .filter(ServiceFilter::<Audit>::new())
        .controller(
            move |_: &ActionContext| -> PipelineResult<Arc<dyn Controller>> {
                Ok(Arc::new(OrdersController {
                    log: controller_log.clone(),
                }))
            },
        )
        .method(recording_action(&log))
        .build();

    let http = Arc::new(
        HttpContext::builder()
            .services(Arc::new(services))
            .build(),
    );
    invoker(endpoint).invoke(http).await.unwrap();

    assert_eq!(
        log.entries(),
        [
            "controller:before",
            "audit:before",
            "action",
            "audit:after",
            "controller:after"
        ]
    );
}

#[tokio::test]
async fn test_controller_creation_error_reaches_exception_filters() {
    let log = Log::default();
    let endpoint = ActionEndpoint::builder("orders.index")
        .controller(|_: &ActionContext| -> PipelineResult<Arc<dyn Controller>> {
            Err(PipelineError::invalid_operation("no controller"))
        })
        .filter(Recover {
            name: "recover",
            order: 0,
            handle: true,
            log: log.clone(),
        })
        .method(recording_action(&log))
        .build();

    invoker(endpoint).invoke(request()).await.unwrap();
    assert_eq!(log.entries(), ["recover:exception"]);
}

struct CountingFactory {
    calls: AtomicUsize,
}

impl FilterFactory for CountingFactory {
    fn create_instance(
        &self,
        _services: &Container,
    ) -> PipelineResult<Option<Arc<dyn FilterMetadata>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Some(Arc::new(Audit {
            log: Log::default(),
        })))
    }
}

impl FilterMetadata for CountingFactory {
    fn as_filter_factory(&self) -> Option<&dyn FilterFactory> {
        Some(self)
    }
}

#[test]
fn test_resolution_is_idempotent() {
    let factory = Arc::new(CountingFactory {
        calls: AtomicUsize::new(0),
    });
    let descriptor = FilterDescriptor::new(factory.clone(), FilterScope::Action);
    let mut item = FilterItem::new(descriptor);
    let services = Container::new();

    DefaultFilterProvider
        .provide_filter(&mut item, &services)
        .unwrap();
    let first = item.filter.clone().unwrap();
    DefaultFilterProvider
        .provide_filter(&mut item, &services)
        .unwrap();

    assert_eq!(factory.calls.load(Ordering::SeqCst), 1);
    assert!(Arc::ptr_eq(&first, item.filter.as_ref().unwrap()));
}

#[test]
fn test_invoker_resolves_global_and_endpoint_filters() {
    let log = Log::default();
    let mut factory = ActionInvokerFactory::new();
    factory
        .filters_mut()
        .add_with_order(Step::new("global", 0, &log), 0);

    let endpoint = ActionEndpoint::builder("orders.list")
        .filter(Step::new("local", -1, &log))
        .build();
    let invoker = factory.create(Arc::new(endpoint));

    let http = request();
    let action = ActionContext::new(http, Arc::new(ActionDescriptor::new("orders.list")));
    let filters = invoker.resolve_filters(&action).unwrap();
    let names: Vec<_> = filters
        .iter()
        .map(|f| f.downcast_ref::<Step>().unwrap().name)
        .collect();
    assert_eq!(names, ["local", "global"]);
}

/// Reads the order id from a header, rejecting requests without one.
struct OrderIdBinder;

impl keel_filters::ArgumentBinder for OrderIdBinder {
    fn bind<'a>(
        &'a self,
        ctx: &'a ActionContext,
        arguments: &'a mut serde_json::Map<String, serde_json::Value>,
    ) -> BoxFuture<'a, PipelineResult<()>> {
        Box::pin(async move {
            let id = ctx
                .http
                .header("x-order-id")
                .ok_or_else(|| PipelineError::invalid_operation("missing x-order-id"))?;
            arguments.insert("id".to_string(), serde_json::Value::from(id));
            Ok(())
        })
    }
}

async fn echo_order(call: ActionInvocation) -> PipelineResult<BoxedResult> {
    let id = call
        .arguments
        .get("id")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("none")
        .to_string();
    Ok(Arc::new(ContentResult::new(id)))
}

#[tokio::test]
async fn test_binder_fills_arguments_before_action() {
    let endpoint = ActionEndpoint::builder("orders.get")
        .binder(OrderIdBinder)
        .method(action_fn(echo_order))
        .build();

    let http = Arc::new(HttpContext::builder().header("x-order-id", "42").build());
    invoker(endpoint).invoke(Arc::clone(&http)).await.unwrap();

    assert_eq!(http.response_snapshot().body, "42");
}

#[tokio::test]
async fn test_binder_error_reaches_exception_filters() {
    let log = Log::default();
    let endpoint = ActionEndpoint::builder("orders.get")
        .binder(OrderIdBinder)
        .filter(Step::new("audit", 0, &log))
        .filter(Recover {
            name: "recover",
            order: 0,
            handle: true,
            log: log.clone(),
        })
        .method(action_fn(echo_order))
        .build();

    let http = request();
    let result = invoker(endpoint).invoke(Arc::clone(&http)).await.unwrap();

    // Binding runs before action filters, so the audit step never starts.
    assert_eq!(log.entries(), ["recover:exception"]);
    assert_eq!(
        result.unwrap().status_code(),
        Some(StatusCode::INTERNAL_SERVER_ERROR)
    );
}

/// Counts how often it is executed.
#[derive(Debug, Default)]
struct CountedResult {
    runs: AtomicUsize,
}

impl keel_core::ActionResult for CountedResult {
    fn execute_result<'a>(&'a self, ctx: &'a ActionContext) -> BoxFuture<'a, PipelineResult<()>> {
        Box::pin(async move {
            self.runs.fetch_add(1, Ordering::SeqCst);
            ctx.http.response().status = StatusCode::OK;
            Ok(())
        })
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Resource filter whose after-hook fails, handles the failure, or both.
struct Cleanup {
    order: i32,
    fail: bool,
    handle_with: Option<BoxedResult>,
}

impl ResourceFilter for Cleanup {
    fn on_resource_executed(&self, ctx: &mut ResourceExecutedContext) -> PipelineResult<()> {
        if self.fail {
            return Err(PipelineError::filter("cleanup", "could not release lock"));
        }
        if ctx.exception.is_some() {
            ctx.exception_handled = true;
            if let Some(result) = &self.handle_with {
                ctx.result = Some(Arc::clone(result));
            }
        }
        Ok(())
    }
}

impl FilterMetadata for Cleanup {
    fn order(&self) -> Option<i32> {
        Some(self.order)
    }

    fn as_resource_filter(&self) -> Option<&dyn ResourceFilter> {
        Some(self)
    }
}

#[tokio::test]
async fn test_handled_resource_error_does_not_rerun_result() {
    let counted = Arc::new(CountedResult::default());
    let produced = Arc::clone(&counted);
    let endpoint = ActionEndpoint::builder("orders.lock")
        .filter(Cleanup {
            order: 0,
            fail: false,
            handle_with: None,
        })
        .filter(Cleanup {
            order: 1,
            fail: true,
            handle_with: None,
        })
        .method(action_fn(move |_| {
            let result: BoxedResult = produced.clone();
            async move { Ok(result) }
        }))
        .build();

    let outcome = invoker(endpoint).invoke(request()).await;

    assert!(outcome.unwrap().is_some());
    assert_eq!(counted.runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_replacement_result_from_resource_handler_runs_once() {
    let original = Arc::new(CountedResult::default());
    let replacement = Arc::new(CountedResult::default());
    let produced = Arc::clone(&original);
    let endpoint = ActionEndpoint::builder("orders.lock")
        .filter(Cleanup {
            order: 0,
            fail: false,
            handle_with: Some(replacement.clone()),
        })
        .filter(Cleanup {
            order: 1,
            fail: true,
            handle_with: None,
        })
        .method(action_fn(move |_| {
            let result: BoxedResult = produced.clone();
            async move { Ok(result) }
        }))
        .build();

    invoker(endpoint).invoke(request()).await.unwrap();

    assert_eq!(original.runs.load(Ordering::SeqCst), 1);
    assert_eq!(replacement.runs.load(Ordering::SeqCst), 1);
}
