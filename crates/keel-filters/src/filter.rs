//! Filter capability traits.
//!
//! Every filter is a [`FilterMetadata`]. A filter advertises what it can do
//! by overriding the matching `as_*` view; the invoker sorts a filter into a
//! category list when either the sync or the async view of that category is
//! present. When both are present only the async view is used.
//!
//! # Example
//!
//! ```
//! use keel_filters::prelude::*;
//!
//! struct Audit;
//!
//! impl ActionFilter for Audit {
//!     fn on_action_executing(&self, ctx: &mut ActionExecutingContext) -> PipelineResult<()> {
//!         tracing::info!(action = ctx.action().display_name(), "entering");
//!         Ok(())
//!     }
//! }
//!
//! impl FilterMetadata for Audit {
//!     fn order(&self) -> Option<i32> {
//!         Some(-10)
//!     }
//!
//!     fn as_action_filter(&self) -> Option<&dyn ActionFilter> {
//!         Some(self)
//!     }
//! }
//! ```

use crate::context::{
    ActionExecutedContext, ActionExecutingContext, AuthorizationFilterContext, ExceptionContext,
    ResourceExecutedContext, ResourceExecutingContext, ResultExecutedContext,
    ResultExecutingContext,
};
use crate::invoker::{ActionNext, ResourceNext, ResultNext};
use keel_core::di::Container;
use keel_core::{BoxFuture, PipelineResult};
use parking_lot::RwLock;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Upcast to `Any`, implemented for every sized `'static` type.
///
/// Call it on a `&dyn FilterMetadata`, not on an `Arc`, or the `Arc` itself
/// is what gets upcast.
pub trait AsAny {
    /// Returns `self` as `Any`.
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// The single polymorphic filter type.
pub trait FilterMetadata: AsAny + Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Explicit order. `None` means order 0.
    ///
    /// Read once when the filter is placed in a [`FilterDescriptor`](crate::FilterDescriptor).
    fn order(&self) -> Option<i32> {
        None
    }

    /// Marks the request as open to anonymous callers.
    fn is_allow_anonymous(&self) -> bool {
        false
    }

    /// Marks a CORS authorization filter, sorted first by
    /// [`CorsFirstFilterOrder`](crate::CorsFirstFilterOrder).
    fn is_cors_authorization_filter(&self) -> bool {
        false
    }

    /// Sync authorization view.
    fn as_authorization_filter(&self) -> Option<&dyn AuthorizationFilter> {
        None
    }

    /// Async authorization view.
    fn as_async_authorization_filter(&self) -> Option<&dyn AsyncAuthorizationFilter> {
        None
    }

    /// Sync resource view.
    fn as_resource_filter(&self) -> Option<&dyn ResourceFilter> {
        None
    }

    /// Async resource view.
    fn as_async_resource_filter(&self) -> Option<&dyn AsyncResourceFilter> {
        None
    }

    /// Sync action view.
    fn as_action_filter(&self) -> Option<&dyn ActionFilter> {
        None
    }

    /// Async action view.
    fn as_async_action_filter(&self) -> Option<&dyn AsyncActionFilter> {
        None
    }

    /// Sync exception view.
    fn as_exception_filter(&self) -> Option<&dyn ExceptionFilter> {
        None
    }

    /// Async exception view.
    fn as_async_exception_filter(&self) -> Option<&dyn AsyncExceptionFilter> {
        None
    }

    /// Sync result view.
    fn as_result_filter(&self) -> Option<&dyn ResultFilter> {
        None
    }

    /// Async result view.
    fn as_async_result_filter(&self) -> Option<&dyn AsyncResultFilter> {
        None
    }

    /// Factory view: the filter produces the real filter per request.
    fn as_filter_factory(&self) -> Option<&dyn FilterFactory> {
        None
    }

    /// Container view: the filter wants to know which factory created it.
    fn as_filter_container(&self) -> Option<&dyn FilterContainer> {
        None
    }
}

impl dyn FilterMetadata {
    /// Downcasts to a concrete filter type.
    #[must_use]
    pub fn downcast_ref<T: FilterMetadata>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Returns true if the filter is of type `T`.
    #[must_use]
    pub fn is<T: FilterMetadata>(&self) -> bool {
        self.as_any().is::<T>()
    }

    pub(crate) fn has_authorization(&self) -> bool {
        self.as_async_authorization_filter().is_some() || self.as_authorization_filter().is_some()
    }

    pub(crate) fn has_resource(&self) -> bool {
        self.as_async_resource_filter().is_some() || self.as_resource_filter().is_some()
    }

    pub(crate) fn has_action(&self) -> bool {
        self.as_async_action_filter().is_some() || self.as_action_filter().is_some()
    }

    pub(crate) fn has_exception(&self) -> bool {
        self.as_async_exception_filter().is_some() || self.as_exception_filter().is_some()
    }

    pub(crate) fn has_result(&self) -> bool {
        self.as_async_result_filter().is_some() || self.as_result_filter().is_some()
    }
}

impl fmt::Debug for dyn FilterMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Runs early and may stop the request with a result.
pub trait AuthorizationFilter: Send + Sync {
    /// Called before anything else in the pipeline.
    fn on_authorization(&self, ctx: &mut AuthorizationFilterContext) -> PipelineResult<()>;
}

/// Async variant of [`AuthorizationFilter`].
pub trait AsyncAuthorizationFilter: Send + Sync {
    /// Called before anything else in the pipeline.
    fn on_authorization_async<'a>(
        &'a self,
        ctx: &'a mut AuthorizationFilterContext,
    ) -> BoxFuture<'a, PipelineResult<()>>;
}

/// Wraps everything after authorization.
pub trait ResourceFilter: Send + Sync {
    /// Before the rest of the pipeline. Setting `ctx.result` short-circuits.
    fn on_resource_executing(&self, _ctx: &mut ResourceExecutingContext) -> PipelineResult<()> {
        Ok(())
    }

    /// After the rest of the pipeline.
    fn on_resource_executed(&self, _ctx: &mut ResourceExecutedContext) -> PipelineResult<()> {
        Ok(())
    }
}

/// Async variant of [`ResourceFilter`]. Not calling `next` short-circuits.
pub trait AsyncResourceFilter: Send + Sync {
    /// Wraps the rest of the pipeline.
    fn on_resource_execution<'a>(
        &'a self,
        ctx: &'a mut ResourceExecutingContext,
        next: ResourceNext<'a>,
    ) -> BoxFuture<'a, PipelineResult<()>>;
}

/// Wraps the action method.
pub trait ActionFilter: Send + Sync {
    /// Before the action. Setting `ctx.result` short-circuits.
    fn on_action_executing(&self, _ctx: &mut ActionExecutingContext) -> PipelineResult<()> {
        Ok(())
    }

    /// After the action.
    fn on_action_executed(&self, _ctx: &mut ActionExecutedContext) -> PipelineResult<()> {
        Ok(())
    }
}

/// Async variant of [`ActionFilter`]. Not calling `next` short-circuits.
pub trait AsyncActionFilter: Send + Sync {
    /// Wraps the action.
    fn on_action_execution<'a>(
        &'a self,
        ctx: &'a mut ActionExecutingContext,
        next: ActionNext<'a>,
    ) -> BoxFuture<'a, PipelineResult<()>>;
}

/// Sees errors from binding, action filters and the action method.
pub trait ExceptionFilter: Send + Sync {
    /// Handle by setting `ctx.exception_handled` or `ctx.result`.
    fn on_exception(&self, ctx: &mut ExceptionContext) -> PipelineResult<()>;
}

/// Async variant of [`ExceptionFilter`].
pub trait AsyncExceptionFilter: Send + Sync {
    /// Handle by setting `ctx.exception_handled` or `ctx.result`.
    fn on_exception_async<'a>(
        &'a self,
        ctx: &'a mut ExceptionContext,
    ) -> BoxFuture<'a, PipelineResult<()>>;
}

/// Wraps execution of the action's result.
pub trait ResultFilter: Send + Sync {
    /// Before the result executes. Setting `ctx.cancel` short-circuits.
    fn on_result_executing(&self, _ctx: &mut ResultExecutingContext) -> PipelineResult<()> {
        Ok(())
    }

    /// After the result executed.
    fn on_result_executed(&self, _ctx: &mut ResultExecutedContext) -> PipelineResult<()> {
        Ok(())
    }
}

/// Async variant of [`ResultFilter`]. Not calling `next` cancels.
pub trait AsyncResultFilter: Send + Sync {
    /// Wraps result execution.
    fn on_result_execution<'a>(
        &'a self,
        ctx: &'a mut ResultExecutingContext,
        next: ResultNext<'a>,
    ) -> BoxFuture<'a, PipelineResult<()>>;
}

/// Produces a filter per request from the request's services.
pub trait FilterFactory: Send + Sync {
    /// Creates the filter. `Ok(None)` is a configuration error.
    fn create_instance(
        &self,
        services: &Container,
    ) -> PipelineResult<Option<Arc<dyn FilterMetadata>>>;

    /// Whether the instance may be shared between requests.
    fn is_reusable(&self) -> bool {
        false
    }
}

/// A filter that records the factory which created it.
pub trait FilterContainer: Send + Sync {
    /// The factory that created this filter.
    fn filter_definition(&self) -> Option<Arc<dyn FilterMetadata>>;

    /// Called by the filter provider right after creation.
    fn set_filter_definition(&self, definition: Arc<dyn FilterMetadata>);
}

/// Storage for a [`FilterContainer`] implementation.
#[derive(Default)]
pub struct FilterDefinition {
    slot: RwLock<Option<Arc<dyn FilterMetadata>>>,
}

impl FilterDefinition {
    /// Creates an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored definition.
    #[must_use]
    pub fn get(&self) -> Option<Arc<dyn FilterMetadata>> {
        self.slot.read().clone()
    }

    /// Stores a definition.
    pub fn set(&self, definition: Arc<dyn FilterMetadata>) {
        *self.slot.write() = Some(definition);
    }
}

impl fmt::Debug for FilterDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterDefinition")
            .field("definition", &self.slot.read().as_ref().map(|d| d.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Plain;

    impl FilterMetadata for Plain {}

    struct Both;

    impl ActionFilter for Both {}

    impl AsyncActionFilter for Both {
        fn on_action_execution<'a>(
            &'a self,
            ctx: &'a mut ActionExecutingContext,
            next: ActionNext<'a>,
        ) -> BoxFuture<'a, PipelineResult<()>> {
            Box::pin(async move {
                next.run(ctx).await;
                Ok(())
            })
        }
    }

    impl FilterMetadata for Both {
        fn order(&self) -> Option<i32> {
            Some(5)
        }

        fn as_action_filter(&self) -> Option<&dyn ActionFilter> {
            Some(self)
        }

        fn as_async_action_filter(&self) -> Option<&dyn AsyncActionFilter> {
            Some(self)
        }
    }

    #[test]
    fn test_defaults_advertise_nothing() {
        let filter: Arc<dyn FilterMetadata> = Arc::new(Plain);
        assert_eq!(filter.order(), None);
        assert!(!filter.is_allow_anonymous());
        assert!(!filter.is_cors_authorization_filter());
        assert!(!filter.has_authorization());
        assert!(!filter.has_resource());
        assert!(!filter.has_action());
        assert!(!filter.has_exception());
        assert!(!filter.has_result());
        assert!(filter.as_filter_factory().is_none());
        assert!(filter.name().ends_with("Plain"));
    }

    #[test]
    fn test_capability_views() {
        let filter: Arc<dyn FilterMetadata> = Arc::new(Both);
        assert!(filter.has_action());
        assert!(!filter.has_result());
        assert_eq!(filter.order(), Some(5));
    }

    #[test]
    fn test_downcast() {
        let filter: Arc<dyn FilterMetadata> = Arc::new(Plain);
        assert!(filter.is::<Plain>());
        assert!(filter.downcast_ref::<Both>().is_none());
        assert!(filter.downcast_ref::<Plain>().is_some());
    }

    #[test]
    fn test_filter_definition_slot() {
        let slot = FilterDefinition::new();
        assert!(slot.get().is_none());

        let definition: Arc<dyn FilterMetadata> = Arc::new(Plain);
        slot.set(definition.clone());
        assert!(Arc::ptr_eq(&slot.get().unwrap(), &definition));
        assert!(format!("{slot:?}").contains("Plain"));
    }
}
