//! Filter factories and the global filter collection.

use crate::activator::FilterActivator;
use crate::descriptor::{FilterDescriptor, FilterScope};
use crate::filter::{FilterFactory, FilterMetadata};
use keel_core::di::{Activate, Container};
use keel_core::{PipelineError, PipelineResult};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// A factory that resolves a filter of type `T` from the container.
///
/// # Example
///
/// ```
/// use keel_core::di::Container;
/// use keel_filters::{FilterFactory, FilterMetadata, ServiceFilter};
/// use std::sync::Arc;
///
/// struct AuditFilter;
///
/// impl FilterMetadata for AuditFilter {}
///
/// let mut services = Container::new();
/// services.register(Arc::new(AuditFilter));
///
/// let factory = ServiceFilter::<AuditFilter>::new();
/// let filter = factory.create_instance(&services).unwrap().unwrap();
/// assert!(filter.is::<AuditFilter>());
/// ```
pub struct ServiceFilter<T> {
    order: Option<i32>,
    is_reusable: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T: FilterMetadata> ServiceFilter<T> {
    /// Creates a service filter factory.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            order: None,
            is_reusable: false,
            _marker: PhantomData,
        }
    }

    /// Sets the order of the produced filter.
    #[must_use]
    pub const fn with_order(mut self, order: i32) -> Self {
        self.order = Some(order);
        self
    }

    /// Marks the resolved instance as shareable between requests.
    #[must_use]
    pub const fn reusable(mut self, is_reusable: bool) -> Self {
        self.is_reusable = is_reusable;
        self
    }
}

impl<T: FilterMetadata> Default for ServiceFilter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: FilterMetadata> FilterFactory for ServiceFilter<T> {
    fn create_instance(
        &self,
        services: &Container,
    ) -> PipelineResult<Option<Arc<dyn FilterMetadata>>> {
        let filter = services.resolve::<T>().ok_or_else(|| {
            PipelineError::invalid_operation(format!(
                "no service of type '{}' is registered for ServiceFilter",
                std::any::type_name::<T>()
            ))
        })?;
        Ok(Some(filter))
    }

    fn is_reusable(&self) -> bool {
        self.is_reusable
    }
}

impl<T: FilterMetadata> FilterMetadata for ServiceFilter<T> {
    fn order(&self) -> Option<i32> {
        self.order
    }

    fn as_filter_factory(&self) -> Option<&dyn FilterFactory> {
        Some(self)
    }
}

impl<T> fmt::Debug for ServiceFilter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceFilter")
            .field("type", &std::any::type_name::<T>())
            .field("order", &self.order)
            .finish()
    }
}

/// A factory that constructs a filter of type `T` through the
/// [`FilterActivator`] registered in the container.
pub struct TypeFilter<T> {
    order: Option<i32>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: FilterMetadata + Activate> TypeFilter<T> {
    /// Creates a type filter factory for `T`.
    #[must_use]
    pub const fn of() -> Self {
        Self {
            order: None,
            _marker: PhantomData,
        }
    }

    /// Sets the order of the produced filter.
    #[must_use]
    pub const fn with_order(mut self, order: i32) -> Self {
        self.order = Some(order);
        self
    }
}

impl<T: FilterMetadata + Activate> FilterFactory for TypeFilter<T> {
    fn create_instance(
        &self,
        services: &Container,
    ) -> PipelineResult<Option<Arc<dyn FilterMetadata>>> {
        let activator = services.resolve::<FilterActivator>().ok_or_else(|| {
            PipelineError::invalid_operation("TypeFilter requires a FilterActivator service")
        })?;
        activator.create_instance::<T>(services).map(Some)
    }
}

impl<T: FilterMetadata + Activate> FilterMetadata for TypeFilter<T> {
    fn order(&self) -> Option<i32> {
        self.order
    }

    fn as_filter_factory(&self) -> Option<&dyn FilterFactory> {
        Some(self)
    }
}

impl<T> fmt::Debug for TypeFilter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeFilter")
            .field("type", &std::any::type_name::<T>())
            .field("order", &self.order)
            .finish()
    }
}

/// Filters applied to every action.
///
/// # Example
///
/// ```
/// use keel_filters::{FilterCollection, FilterMetadata, FilterScope};
///
/// struct Audit;
/// impl FilterMetadata for Audit {}
///
/// let mut filters = FilterCollection::new();
/// filters.add(Audit).add_with_order(Audit, -5);
///
/// let descriptors = filters.descriptors();
/// assert_eq!(descriptors.len(), 2);
/// assert!(descriptors.iter().all(|d| d.scope() == FilterScope::Global));
/// assert_eq!(descriptors[1].order(), -5);
/// ```
#[derive(Debug, Clone, Default)]
pub struct FilterCollection {
    descriptors: Vec<FilterDescriptor>,
}

impl FilterCollection {
    /// Creates an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a filter instance.
    pub fn add<F: FilterMetadata>(&mut self, filter: F) -> &mut Self {
        self.add_shared(Arc::new(filter))
    }

    /// Adds a filter instance with an explicit order.
    pub fn add_with_order<F: FilterMetadata>(&mut self, filter: F, order: i32) -> &mut Self {
        self.descriptors
            .push(FilterDescriptor::new(Arc::new(filter), FilterScope::Global).with_order(order));
        self
    }

    /// Adds an already shared filter.
    pub fn add_shared(&mut self, filter: Arc<dyn FilterMetadata>) -> &mut Self {
        self.descriptors
            .push(FilterDescriptor::new(filter, FilterScope::Global));
        self
    }

    /// Adds a filter resolved from the container per request.
    pub fn add_service<T: FilterMetadata>(&mut self) -> &mut Self {
        self.add(ServiceFilter::<T>::new())
    }

    /// Adds a filter constructed by the activator per request.
    pub fn add_type<T: FilterMetadata + Activate>(&mut self) -> &mut Self {
        self.add(TypeFilter::<T>::of())
    }

    /// Returns the number of filters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Returns true if no filter was added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Returns the descriptors, in insertion order.
    #[must_use]
    pub fn descriptors(&self) -> &[FilterDescriptor] {
        &self.descriptors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::di::InjectionError;

    struct Audit;

    impl FilterMetadata for Audit {}

    struct Stamp {
        tag: Arc<String>,
    }

    impl Activate for Stamp {
        fn activate(services: &Container) -> Result<Self, InjectionError> {
            Ok(Self {
                tag: services.resolve_required()?,
            })
        }
    }

    impl FilterMetadata for Stamp {}

    #[test]
    fn test_service_filter_missing_service() {
        let err = ServiceFilter::<Audit>::new()
            .create_instance(&Container::new())
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidOperation { .. }));
    }

    #[test]
    fn test_service_filter_order_and_reuse() {
        let factory = ServiceFilter::<Audit>::new().with_order(3).reusable(true);
        assert_eq!(FilterMetadata::order(&factory), Some(3));
        assert!(factory.is_reusable());
        assert!(factory.as_filter_factory().is_some());
    }

    #[test]
    fn test_type_filter_requires_activator() {
        let mut services = Container::new();
        services.register(Arc::new("tag".to_string()));

        let err = TypeFilter::<Stamp>::of()
            .create_instance(&services)
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidOperation { .. }));

        services.register(Arc::new(FilterActivator::new()));
        let filter = TypeFilter::<Stamp>::of()
            .create_instance(&services)
            .unwrap()
            .unwrap();
        assert_eq!(*filter.downcast_ref::<Stamp>().unwrap().tag, "tag");
    }

    #[test]
    fn test_collection_helpers() {
        let mut filters = FilterCollection::new();
        assert!(filters.is_empty());

        filters.add_service::<Audit>().add_type::<Stamp>();
        assert_eq!(filters.len(), 2);
        assert!(filters.descriptors()[0].filter().as_filter_factory().is_some());
        assert!(filters.descriptors()[1].filter().is::<TypeFilter<Stamp>>());
    }
}
