//! Filter resolution.
//!
//! Providers turn the descriptors of an action into concrete filter
//! instances for one request. Providers run in ascending [`FilterProvider::order`]
//! for `on_providers_executing` and in reverse for `on_providers_executed`.

use crate::descriptor::FilterItem;
use keel_core::di::Container;
use keel_core::{ActionContext, PipelineError, PipelineResult};
use std::sync::Arc;
use tracing::debug;

/// State shared by the providers of one request.
#[derive(Debug)]
pub struct FilterProviderContext {
    action_context: ActionContext,
    /// The items to resolve. Providers may add or remove items.
    pub results: Vec<FilterItem>,
}

impl FilterProviderContext {
    /// Creates a provider context.
    #[must_use]
    pub fn new(action_context: ActionContext, results: Vec<FilterItem>) -> Self {
        Self {
            action_context,
            results,
        }
    }

    /// Returns the action context.
    #[must_use]
    pub const fn action_context(&self) -> &ActionContext {
        &self.action_context
    }
}

/// Resolves filter items into filter instances.
pub trait FilterProvider: Send + Sync {
    /// Providers run in ascending order.
    fn order(&self) -> i32 {
        -1000
    }

    /// Resolves items.
    fn on_providers_executing(&self, ctx: &mut FilterProviderContext) -> PipelineResult<()>;

    /// Runs after every provider's `on_providers_executing`, in reverse order.
    fn on_providers_executed(&self, _ctx: &mut FilterProviderContext) -> PipelineResult<()> {
        Ok(())
    }
}

/// Resolves plain filters as-is and filter factories through the container.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFilterProvider;

impl DefaultFilterProvider {
    /// Resolves one item. A no-op when the item is already resolved.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` when a factory returns no instance, or any error
    /// the factory raises.
    pub fn provide_filter(
        &self,
        item: &mut FilterItem,
        services: &Container,
    ) -> PipelineResult<()> {
        if item.filter.is_some() {
            return Ok(());
        }

        let definition = Arc::clone(item.descriptor.filter());
        let Some(factory) = definition.as_filter_factory() else {
            item.filter = Some(definition);
            item.is_reusable = true;
            return Ok(());
        };

        let filter = factory.create_instance(services)?.ok_or_else(|| {
            PipelineError::invalid_operation(format!(
                "filter factory '{}' returned no filter instance",
                definition.name()
            ))
        })?;

        if let Some(container) = filter.as_filter_container() {
            container.set_filter_definition(Arc::clone(&definition));
        }

        debug!(
            factory = definition.name(),
            filter = filter.name(),
            "Filter created by factory"
        );

        item.is_reusable = factory.is_reusable();
        item.filter = Some(filter);
        Ok(())
    }
}

impl FilterProvider for DefaultFilterProvider {
    fn on_providers_executing(&self, ctx: &mut FilterProviderContext) -> PipelineResult<()> {
        let services = Arc::clone(ctx.action_context.services());
        for item in &mut ctx.results {
            self.provide_filter(item, &services)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{FilterDescriptor, FilterScope};
    use crate::filter::{FilterContainer, FilterDefinition, FilterFactory, FilterMetadata};
    use keel_core::{ActionDescriptor, HttpContext};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Plain;

    impl FilterMetadata for Plain {}

    #[derive(Default)]
    struct Tracked {
        definition: FilterDefinition,
    }

    impl FilterContainer for Tracked {
        fn filter_definition(&self) -> Option<Arc<dyn FilterMetadata>> {
            self.definition.get()
        }

        fn set_filter_definition(&self, definition: Arc<dyn FilterMetadata>) {
            self.definition.set(definition);
        }
    }

    impl FilterMetadata for Tracked {
        fn as_filter_container(&self) -> Option<&dyn FilterContainer> {
            Some(self)
        }
    }

    struct CountingFactory {
        calls: AtomicUsize,
        produce: bool,
    }

    impl FilterFactory for CountingFactory {
        fn create_instance(
            &self,
            _services: &Container,
        ) -> PipelineResult<Option<Arc<dyn FilterMetadata>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .produce
                .then(|| Arc::new(Tracked::default()) as Arc<dyn FilterMetadata>))
        }
    }

    impl FilterMetadata for CountingFactory {
        fn as_filter_factory(&self) -> Option<&dyn FilterFactory> {
            Some(self)
        }
    }

    fn factory(produce: bool) -> Arc<CountingFactory> {
        Arc::new(CountingFactory {
            calls: AtomicUsize::new(0),
            produce,
        })
    }

    #[test]
    fn test_plain_filter_used_directly() {
        let plain: Arc<dyn FilterMetadata> = Arc::new(Plain);
        let mut item = FilterItem::new(FilterDescriptor::new(plain.clone(), FilterScope::Action));

        DefaultFilterProvider
            .provide_filter(&mut item, &Container::new())
            .unwrap();

        assert!(Arc::ptr_eq(item.filter.as_ref().unwrap(), &plain));
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let counting = factory(true);
        let mut item =
            FilterItem::new(FilterDescriptor::new(counting.clone(), FilterScope::Action));
        let services = Container::new();

        DefaultFilterProvider.provide_filter(&mut item, &services).unwrap();
        DefaultFilterProvider.provide_filter(&mut item, &services).unwrap();

        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_factory_returning_none_is_invalid_operation() {
        let mut item = FilterItem::new(FilterDescriptor::new(factory(false), FilterScope::Global));

        let err = DefaultFilterProvider
            .provide_filter(&mut item, &Container::new())
            .unwrap_err();

        assert!(matches!(err, PipelineError::InvalidOperation { .. }));
        assert!(err.to_string().contains("CountingFactory"));
    }

    #[test]
    fn test_container_receives_its_factory() {
        let counting = factory(true);
        let definition: Arc<dyn FilterMetadata> = counting.clone();
        let mut item =
            FilterItem::new(FilterDescriptor::new(definition.clone(), FilterScope::Action));

        DefaultFilterProvider
            .provide_filter(&mut item, &Container::new())
            .unwrap();

        let filter = item.filter.unwrap();
        let attached = filter.as_filter_container().unwrap().filter_definition().unwrap();
        assert!(Arc::ptr_eq(&attached, &definition));
    }

    #[test]
    fn test_provider_resolves_every_item() {
        let http = Arc::new(HttpContext::builder().build());
        let action = Arc::new(ActionDescriptor::new("a"));
        let mut ctx = FilterProviderContext::new(
            ActionContext::new(http, action),
            vec![
                FilterItem::new(FilterDescriptor::new(Arc::new(Plain), FilterScope::Global)),
                FilterItem::new(FilterDescriptor::new(factory(true), FilterScope::Action)),
            ],
        );

        DefaultFilterProvider.on_providers_executing(&mut ctx).unwrap();
        assert!(ctx.results.iter().all(|item| item.filter.is_some()));
        assert!(ctx.results[0].is_reusable);
        assert!(!ctx.results[1].is_reusable);
    }
}
