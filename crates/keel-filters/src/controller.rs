//! Controllers as filters.
//!
//! A controller (or page handler) instance may itself act as an action
//! filter and a result filter. Endpoints built with a controller carry the
//! two adapters below at [`FilterScope::Controller`](crate::FilterScope) and
//! order `i32::MIN`, so the controller's own hooks wrap every user filter.

use crate::context::{ActionExecutingContext, ResultExecutingContext};
use crate::filter::{
    ActionFilter, AsAny, AsyncActionFilter, AsyncResultFilter, FilterMetadata, ResultFilter,
};
use crate::invoker::{ActionNext, ResultNext};
use keel_core::di::Activate;
use keel_core::{ActionContext, BoxFuture, PipelineError, PipelineResult};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// A controller or page handler instance.
///
/// # Example
///
/// ```
/// use keel_filters::prelude::*;
/// use keel_filters::Controller;
///
/// struct OrdersController;
///
/// impl ActionFilter for OrdersController {
///     fn on_action_executing(&self, ctx: &mut ActionExecutingContext) -> PipelineResult<()> {
///         ctx.arguments.insert("tenant".into(), "acme".into());
///         Ok(())
///     }
/// }
///
/// impl Controller for OrdersController {
///     fn as_action_filter(&self) -> Option<&dyn ActionFilter> {
///         Some(self)
///     }
/// }
/// ```
pub trait Controller: AsAny + Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Sync action filter view.
    fn as_action_filter(&self) -> Option<&dyn ActionFilter> {
        None
    }

    /// Async action filter view.
    fn as_async_action_filter(&self) -> Option<&dyn AsyncActionFilter> {
        None
    }

    /// Sync result filter view.
    fn as_result_filter(&self) -> Option<&dyn ResultFilter> {
        None
    }

    /// Async result filter view.
    fn as_async_result_filter(&self) -> Option<&dyn AsyncResultFilter> {
        None
    }
}

impl dyn Controller {
    /// Downcasts to a concrete controller type.
    #[must_use]
    pub fn downcast_ref<T: Controller>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Returns true if the controller is of type `T`.
    #[must_use]
    pub fn is<T: Controller>(&self) -> bool {
        self.as_any().is::<T>()
    }
}

impl fmt::Debug for dyn Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Creates the controller instance of a request.
pub trait ControllerFactory: Send + Sync {
    /// Creates a controller for the action.
    ///
    /// # Errors
    ///
    /// Any error stops the request before action filters run.
    fn create_controller(&self, ctx: &ActionContext) -> PipelineResult<Arc<dyn Controller>>;
}

impl<F> ControllerFactory for F
where
    F: Fn(&ActionContext) -> PipelineResult<Arc<dyn Controller>> + Send + Sync,
{
    fn create_controller(&self, ctx: &ActionContext) -> PipelineResult<Arc<dyn Controller>> {
        self(ctx)
    }
}

/// Creates a fresh `T` per request through its [`Activate`] implementation.
pub struct ActivatedControllerFactory<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T: Controller + Activate> ActivatedControllerFactory<T> {
    /// Creates the factory.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T: Controller + Activate> Default for ActivatedControllerFactory<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Controller + Activate> ControllerFactory for ActivatedControllerFactory<T> {
    fn create_controller(&self, ctx: &ActionContext) -> PipelineResult<Arc<dyn Controller>> {
        let controller = T::activate(ctx.services())?;
        Ok(Arc::new(controller))
    }
}

impl<T> fmt::Debug for ActivatedControllerFactory<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivatedControllerFactory")
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

fn missing_controller(adapter: &str) -> PipelineError {
    PipelineError::invalid_operation(format!(
        "{adapter} requires a controller instance on the context"
    ))
}

/// Forwards action filter calls to the controller.
#[derive(Debug, Clone, Copy, Default)]
pub struct ControllerActionFilter;

impl AsyncActionFilter for ControllerActionFilter {
    fn on_action_execution<'a>(
        &'a self,
        ctx: &'a mut ActionExecutingContext,
        next: ActionNext<'a>,
    ) -> BoxFuture<'a, PipelineResult<()>> {
        Box::pin(async move {
            let controller = ctx
                .controller
                .clone()
                .ok_or_else(|| missing_controller("ControllerActionFilter"))?;

            if let Some(filter) = controller.as_async_action_filter() {
                return filter.on_action_execution(ctx, next).await;
            }

            if let Some(filter) = controller.as_action_filter() {
                filter.on_action_executing(ctx)?;
                if ctx.result.is_none() {
                    let executed = next.run(ctx).await;
                    filter.on_action_executed(executed)?;
                }
                return Ok(());
            }

            next.run(ctx).await;
            Ok(())
        })
    }
}

impl FilterMetadata for ControllerActionFilter {
    fn order(&self) -> Option<i32> {
        Some(i32::MIN)
    }

    fn as_async_action_filter(&self) -> Option<&dyn AsyncActionFilter> {
        Some(self)
    }
}

/// Forwards result filter calls to the controller.
#[derive(Debug, Clone, Copy, Default)]
pub struct ControllerResultFilter;

impl AsyncResultFilter for ControllerResultFilter {
    fn on_result_execution<'a>(
        &'a self,
        ctx: &'a mut ResultExecutingContext,
        next: ResultNext<'a>,
    ) -> BoxFuture<'a, PipelineResult<()>> {
        Box::pin(async move {
            let controller = ctx
                .controller
                .clone()
                .ok_or_else(|| missing_controller("ControllerResultFilter"))?;

            if let Some(filter) = controller.as_async_result_filter() {
                return filter.on_result_execution(ctx, next).await;
            }

            if let Some(filter) = controller.as_result_filter() {
                filter.on_result_executing(ctx)?;
                if !ctx.cancel {
                    let executed = next.run(ctx).await;
                    filter.on_result_executed(executed)?;
                }
                return Ok(());
            }

            next.run(ctx).await;
            Ok(())
        })
    }
}

impl FilterMetadata for ControllerResultFilter {
    fn order(&self) -> Option<i32> {
        Some(i32::MIN)
    }

    fn as_async_result_filter(&self) -> Option<&dyn AsyncResultFilter> {
        Some(self)
    }
}
