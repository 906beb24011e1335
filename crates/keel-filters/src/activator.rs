//! Constructor-injected filter creation.
//!
//! Filter types opt in by implementing [`Activate`]. The activator keeps one
//! constructor per type, built on first use and shared by every thread.

use crate::filter::FilterMetadata;
use dashmap::DashMap;
use keel_core::di::{Activate, Container, InjectionError};
use keel_core::{PipelineError, PipelineResult};
use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

type ObjectFactory =
    Arc<dyn Fn(&Container) -> Result<Arc<dyn FilterMetadata>, InjectionError> + Send + Sync>;

/// Creates filter instances through their [`Activate`] implementation.
///
/// # Example
///
/// ```
/// use keel_core::di::{Activate, Container, InjectionError};
/// use keel_filters::{FilterActivator, FilterMetadata};
/// use std::sync::Arc;
///
/// struct Clock;
///
/// struct StampFilter {
///     clock: Arc<Clock>,
/// }
///
/// impl Activate for StampFilter {
///     fn activate(services: &Container) -> Result<Self, InjectionError> {
///         Ok(Self { clock: services.resolve_required()? })
///     }
/// }
///
/// impl FilterMetadata for StampFilter {}
///
/// let mut services = Container::new();
/// services.register(Arc::new(Clock));
///
/// let activator = FilterActivator::new();
/// let filter = activator.create_instance::<StampFilter>(&services).unwrap();
/// assert!(filter.is::<StampFilter>());
/// ```
#[derive(Default)]
pub struct FilterActivator {
    factories: DashMap<TypeId, (&'static str, ObjectFactory)>,
}

impl FilterActivator {
    /// Creates an activator with no memoized constructors.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the constructor of `T` ahead of time, so it can be created
    /// by [`TypeId`] later.
    pub fn register<T: FilterMetadata + Activate>(&self) {
        self.factory_for::<T>();
    }

    /// Creates an instance of `T`, memoizing its constructor.
    ///
    /// # Errors
    ///
    /// Returns an injection error when a dependency is missing.
    pub fn create_instance<T: FilterMetadata + Activate>(
        &self,
        services: &Container,
    ) -> PipelineResult<Arc<dyn FilterMetadata>> {
        let factory = self.factory_for::<T>();
        Ok(factory(services)?)
    }

    /// Creates an instance of a type registered earlier.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` when no filter type with this ID was registered.
    pub fn create_instance_by_id(
        &self,
        type_id: TypeId,
        services: &Container,
    ) -> PipelineResult<Arc<dyn FilterMetadata>> {
        let factory = self
            .factories
            .get(&type_id)
            .map(|entry| Arc::clone(&entry.value().1))
            .ok_or_else(|| {
                PipelineError::invalid_operation(format!(
                    "type {type_id:?} is not a registered filter type"
                ))
            })?;
        Ok(factory(services)?)
    }

    /// Returns true if the constructor of `T` is memoized.
    #[must_use]
    pub fn is_registered<T: 'static>(&self) -> bool {
        self.factories.contains_key(&TypeId::of::<T>())
    }

    fn factory_for<T: FilterMetadata + Activate>(&self) -> ObjectFactory {
        let entry = self.factories.entry(TypeId::of::<T>()).or_insert_with(|| {
            let factory: ObjectFactory = Arc::new(|services: &Container| {
                T::activate(services).map(|filter| Arc::new(filter) as Arc<dyn FilterMetadata>)
            });
            (std::any::type_name::<T>(), factory)
        });
        Arc::clone(&entry.value().1)
    }
}

impl fmt::Debug for FilterActivator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let types: Vec<&'static str> = self.factories.iter().map(|entry| entry.value().0).collect();
        f.debug_struct("FilterActivator").field("types", &types).finish()
    }
}
