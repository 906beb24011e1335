//! Context objects handed to filters.
//!
//! Every context dereferences to a [`FilterContext`]: the action context plus
//! the full ordered filter list of the request, so a filter can inspect its
//! siblings (for example to find an allow-anonymous marker).

use crate::controller::Controller;
use crate::filter::FilterMetadata;
use keel_core::{ActionContext, ActionDescriptor, BoxedResult, HttpContext, PipelineError};
use serde_json::{Map, Value};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Shared part of every filter context.
#[derive(Clone)]
pub struct FilterContext {
    action_context: ActionContext,
    filters: Arc<[Arc<dyn FilterMetadata>]>,
}

impl FilterContext {
    /// Creates a filter context.
    #[must_use]
    pub fn new(action_context: ActionContext, filters: Arc<[Arc<dyn FilterMetadata>]>) -> Self {
        Self {
            action_context,
            filters,
        }
    }

    /// Returns the action context.
    #[must_use]
    pub const fn action_context(&self) -> &ActionContext {
        &self.action_context
    }

    /// Returns the request state.
    #[must_use]
    pub fn http(&self) -> &Arc<HttpContext> {
        &self.action_context.http
    }

    /// Returns the selected action.
    #[must_use]
    pub fn action(&self) -> &ActionDescriptor {
        &self.action_context.action
    }

    /// Returns every filter of the request, in execution order.
    #[must_use]
    pub fn filters(&self) -> &[Arc<dyn FilterMetadata>] {
        &self.filters
    }

    /// Returns true if any filter of the request allows anonymous callers.
    #[must_use]
    pub fn has_allow_anonymous(&self) -> bool {
        self.filters.iter().any(|f| f.is_allow_anonymous())
    }
}

impl fmt::Debug for FilterContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterContext")
            .field("request_id", &self.http().request_id())
            .field("action", &self.action().id())
            .field("filters", &self.filters)
            .finish()
    }
}

macro_rules! deref_filter_context {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Deref for $ty {
                type Target = FilterContext;

                fn deref(&self) -> &FilterContext {
                    &self.filter_context
                }
            }
        )*
    };
}

deref_filter_context!(
    AuthorizationFilterContext,
    ResourceExecutingContext,
    ResourceExecutedContext,
    ActionExecutingContext,
    ActionExecutedContext,
    ExceptionContext,
    ResultExecutingContext,
    ResultExecutedContext,
);

/// Context of the authorization stage.
#[derive(Debug)]
pub struct AuthorizationFilterContext {
    filter_context: FilterContext,
    /// Setting a result stops the request; the result is executed at once.
    pub result: Option<BoxedResult>,
}

impl AuthorizationFilterContext {
    /// Creates a context with no result.
    #[must_use]
    pub fn new(filter_context: FilterContext) -> Self {
        Self {
            filter_context,
            result: None,
        }
    }
}

/// Context passed to resource filters before the rest of the pipeline.
#[derive(Debug)]
pub struct ResourceExecutingContext {
    filter_context: FilterContext,
    /// Setting a result short-circuits; the result is executed at once.
    pub result: Option<BoxedResult>,
    pub(crate) executed: Option<ResourceExecutedContext>,
}

impl ResourceExecutingContext {
    /// Creates a context with no result.
    #[must_use]
    pub fn new(filter_context: FilterContext) -> Self {
        Self {
            filter_context,
            result: None,
            executed: None,
        }
    }
}

/// Context passed to resource filters after the rest of the pipeline.
#[derive(Debug)]
pub struct ResourceExecutedContext {
    filter_context: FilterContext,
    /// True when an inner resource filter short-circuited.
    pub canceled: bool,
    /// The error raised by the inner pipeline, if any.
    pub exception: Option<PipelineError>,
    /// Set to true to stop the error from propagating.
    pub exception_handled: bool,
    /// The result of the inner pipeline.
    pub result: Option<BoxedResult>,
    executed_result: Option<BoxedResult>,
}

impl ResourceExecutedContext {
    pub(crate) fn new(filter_context: FilterContext) -> Self {
        Self {
            filter_context,
            canceled: false,
            exception: None,
            exception_handled: false,
            result: None,
            executed_result: None,
        }
    }

    /// Records that the current result has been executed.
    pub(crate) fn mark_executed(&mut self) {
        self.executed_result = self.result.clone();
    }

    /// The result, unless it is the one that already executed.
    pub(crate) fn pending_result(&self) -> Option<&BoxedResult> {
        match (&self.result, &self.executed_result) {
            (Some(current), Some(done)) if Arc::ptr_eq(current, done) => None,
            (current, _) => current.as_ref(),
        }
    }

    pub(crate) fn canceled(filter_context: FilterContext, result: Option<BoxedResult>) -> Self {
        Self {
            canceled: true,
            result,
            ..Self::new(filter_context)
        }
    }

    pub(crate) fn faulted(filter_context: FilterContext, error: PipelineError) -> Self {
        Self {
            exception: Some(error),
            ..Self::new(filter_context)
        }
    }

    /// Removes and returns the exception unless it was handled.
    pub(crate) fn take_unhandled(&mut self) -> Option<PipelineError> {
        if self.exception_handled {
            None
        } else {
            self.exception.take()
        }
    }

    /// Records an error raised by a hook, replacing any handled state.
    pub(crate) fn fail(&mut self, error: PipelineError) {
        self.exception = Some(error);
        self.exception_handled = false;
    }
}

/// Context passed to action filters before the action.
#[derive(Debug)]
pub struct ActionExecutingContext {
    filter_context: FilterContext,
    /// Setting a result short-circuits; the result goes to the result stage.
    pub result: Option<BoxedResult>,
    /// Bound action arguments.
    pub arguments: Map<String, Value>,
    /// The controller or page instance, for controller-based actions.
    pub controller: Option<Arc<dyn Controller>>,
    pub(crate) executed: Option<ActionExecutedContext>,
}

impl ActionExecutingContext {
    /// Creates a context with no result and no arguments.
    #[must_use]
    pub fn new(filter_context: FilterContext, controller: Option<Arc<dyn Controller>>) -> Self {
        Self {
            filter_context,
            result: None,
            arguments: Map::new(),
            controller,
            executed: None,
        }
    }
}

/// Context passed to action filters after the action.
#[derive(Debug)]
pub struct ActionExecutedContext {
    filter_context: FilterContext,
    /// The controller or page instance.
    pub controller: Option<Arc<dyn Controller>>,
    /// True when an inner action filter short-circuited.
    pub canceled: bool,
    /// The error raised by the action or an inner filter, if any.
    pub exception: Option<PipelineError>,
    /// Set to true to stop the error from reaching exception filters.
    pub exception_handled: bool,
    /// The action's result. May be replaced.
    pub result: Option<BoxedResult>,
}

impl ActionExecutedContext {
    pub(crate) fn new(
        filter_context: FilterContext,
        controller: Option<Arc<dyn Controller>>,
    ) -> Self {
        Self {
            filter_context,
            controller,
            canceled: false,
            exception: None,
            exception_handled: false,
            result: None,
        }
    }

    pub(crate) fn take_unhandled(&mut self) -> Option<PipelineError> {
        if self.exception_handled {
            None
        } else {
            self.exception.take()
        }
    }

    pub(crate) fn fail(&mut self, error: PipelineError) {
        self.exception = Some(error);
        self.exception_handled = false;
    }
}

/// Context passed to exception filters.
#[derive(Debug)]
pub struct ExceptionContext {
    filter_context: FilterContext,
    /// The error. Clearing it counts as handling it.
    pub exception: Option<PipelineError>,
    /// Set to true to mark the error handled.
    pub exception_handled: bool,
    /// Setting a result marks the error handled; the result is executed.
    pub result: Option<BoxedResult>,
}

impl ExceptionContext {
    /// Creates a context for an error.
    #[must_use]
    pub fn new(filter_context: FilterContext, exception: PipelineError) -> Self {
        Self {
            filter_context,
            exception: Some(exception),
            exception_handled: false,
            result: None,
        }
    }

    /// Returns true once a filter handled the error.
    #[must_use]
    pub fn is_handled(&self) -> bool {
        self.exception_handled || self.result.is_some() || self.exception.is_none()
    }
}

/// Context passed to result filters before the result executes.
#[derive(Debug)]
pub struct ResultExecutingContext {
    filter_context: FilterContext,
    /// The result about to execute. May be replaced.
    pub result: BoxedResult,
    /// Set to true to skip executing the result.
    pub cancel: bool,
    /// The controller or page instance.
    pub controller: Option<Arc<dyn Controller>>,
    pub(crate) executed: Option<ResultExecutedContext>,
}

impl ResultExecutingContext {
    /// Creates a context for a result.
    #[must_use]
    pub fn new(
        filter_context: FilterContext,
        result: BoxedResult,
        controller: Option<Arc<dyn Controller>>,
    ) -> Self {
        Self {
            filter_context,
            result,
            cancel: false,
            controller,
            executed: None,
        }
    }
}

/// Context passed to result filters after the result executed.
#[derive(Debug)]
pub struct ResultExecutedContext {
    filter_context: FilterContext,
    /// The controller or page instance.
    pub controller: Option<Arc<dyn Controller>>,
    /// True when an inner result filter cancelled execution.
    pub canceled: bool,
    /// The error raised while executing the result, if any.
    pub exception: Option<PipelineError>,
    /// Set to true to stop the error from propagating.
    pub exception_handled: bool,
    /// The result that executed (or would have).
    pub result: BoxedResult,
}

impl ResultExecutedContext {
    pub(crate) fn new(
        filter_context: FilterContext,
        result: BoxedResult,
        controller: Option<Arc<dyn Controller>>,
    ) -> Self {
        Self {
            filter_context,
            controller,
            canceled: false,
            exception: None,
            exception_handled: false,
            result,
        }
    }

    pub(crate) fn take_unhandled(&mut self) -> Option<PipelineError> {
        if self.exception_handled {
            None
        } else {
            self.exception.take()
        }
    }

    pub(crate) fn fail(&mut self, error: PipelineError) {
        self.exception = Some(error);
        self.exception_handled = false;
    }
}
