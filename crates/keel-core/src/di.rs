//! Dependency injection container.
//!
//! Services are registered explicitly at application startup, either as
//! shared instances or as constructor closures, and resolved by type while
//! requests are processed. There is no runtime reflection: a type that wants
//! to be constructed by the container implements [`Activate`] and is
//! registered with [`Container::register_activated`].
//!
//! # Example
//!
//! ```rust
//! use keel_core::di::{Activate, Container, InjectionError};
//! use std::sync::Arc;
//!
//! struct Clock;
//!
//! struct AuditLog {
//!     clock: Arc<Clock>,
//! }
//!
//! impl Activate for AuditLog {
//!     fn activate(services: &Container) -> Result<Self, InjectionError> {
//!         Ok(Self { clock: services.resolve_required()? })
//!     }
//! }
//!
//! let mut container = Container::new();
//! container.register(Arc::new(Clock));
//! container.register_activated::<AuditLog>();
//!
//! let log: Arc<AuditLog> = container.resolve().unwrap();
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Error when a dependency cannot be resolved.
#[derive(Debug, Clone)]
pub struct InjectionError {
    /// The type name that could not be resolved.
    pub type_name: &'static str,
    /// The reason for the failure.
    pub reason: String,
}

impl fmt::Display for InjectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Failed to inject {}: {}", self.type_name, self.reason)
    }
}

impl std::error::Error for InjectionError {}

impl InjectionError {
    /// Creates a new injection error for a missing service.
    pub fn not_registered<T: ?Sized>() -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            reason: "service not registered".to_string(),
        }
    }

    /// Creates a new injection error with a custom reason.
    pub fn custom<T: ?Sized>(reason: impl Into<String>) -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            reason: reason.into(),
        }
    }
}

/// Constructor injection.
///
/// Implemented by types the container (or the filter activator) may build
/// on demand. Dependencies are pulled from the given container.
pub trait Activate: Sized + Send + Sync + 'static {
    /// Builds an instance, resolving dependencies from `services`.
    fn activate(services: &Container) -> Result<Self, InjectionError>;
}

type Constructor =
    Arc<dyn Fn(&Container) -> Result<Arc<dyn Any + Send + Sync>, InjectionError> + Send + Sync>;

/// A dependency injection container.
///
/// Shared instances are returned as-is on every resolve. Constructor
/// registrations run on every resolve (transient lifetime); the container
/// never caches what a constructor returns.
///
/// # Thread Safety
///
/// The container is `Send + Sync` and is shared between requests behind an
/// `Arc`. It is immutable once request processing starts.
#[derive(Default)]
pub struct Container {
    services: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    constructors: HashMap<TypeId, Constructor>,
}

impl Container {
    /// Creates a new empty container.
    #[must_use]
    pub fn new() -> Self {
        Self {
            services: HashMap::new(),
            constructors: HashMap::new(),
        }
    }

    /// Registers a shared service instance.
    ///
    /// # Example
    ///
    /// ```rust
    /// use keel_core::di::Container;
    /// use std::sync::Arc;
    ///
    /// struct MyService;
    ///
    /// let mut container = Container::new();
    /// container.register(Arc::new(MyService));
    /// assert!(container.contains::<MyService>());
    /// ```
    pub fn register<T: Send + Sync + 'static>(&mut self, service: Arc<T>) {
        self.services.insert(TypeId::of::<T>(), service);
    }

    /// Registers a shared service behind a trait object.
    ///
    /// Resolve it again with [`Container::resolve_service`] using the same
    /// unsized type.
    ///
    /// # Example
    ///
    /// ```rust
    /// use keel_core::di::Container;
    /// use std::sync::Arc;
    ///
    /// trait Greeter: Send + Sync {
    ///     fn greet(&self) -> String;
    /// }
    ///
    /// struct English;
    ///
    /// impl Greeter for English {
    ///     fn greet(&self) -> String {
    ///         "hello".to_string()
    ///     }
    /// }
    ///
    /// let mut container = Container::new();
    /// container.register_service::<dyn Greeter>(Arc::new(English));
    ///
    /// let greeter = container.resolve_service::<dyn Greeter>().unwrap();
    /// assert_eq!(greeter.greet(), "hello");
    /// ```
    pub fn register_service<T: ?Sized + Send + Sync + 'static>(&mut self, service: Arc<T>) {
        self.services
            .insert(TypeId::of::<Arc<T>>(), Arc::new(service));
    }

    /// Registers a constructor closure, resolved transiently.
    pub fn register_factory<T, F>(&mut self, factory: F)
    where
        T: Send + Sync + 'static,
        F: Fn(&Container) -> Result<T, InjectionError> + Send + Sync + 'static,
    {
        let constructor: Constructor = Arc::new(move |container: &Container| {
            factory(container).map(|value| Arc::new(value) as Arc<dyn Any + Send + Sync>)
        });
        self.constructors.insert(TypeId::of::<T>(), constructor);
    }

    /// Registers a type built through its [`Activate`] implementation.
    pub fn register_activated<T: Activate>(&mut self) {
        self.register_factory::<T, _>(T::activate);
    }

    /// Resolves a service from the container.
    ///
    /// Shared instances win over constructor registrations for the same type.
    /// Returns `None` if the type is unknown or its constructor failed.
    #[must_use]
    pub fn resolve<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        match self.try_resolve::<T>() {
            Ok(service) => service,
            Err(error) => {
                debug!(
                    service = std::any::type_name::<T>(),
                    error = %error,
                    "Service constructor failed"
                );
                None
            }
        }
    }

    /// Resolves a service or returns an error.
    ///
    /// # Errors
    ///
    /// Returns `InjectionError` if the service is not registered or its
    /// constructor failed.
    pub fn resolve_required<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, InjectionError> {
        self.try_resolve::<T>()?
            .ok_or_else(InjectionError::not_registered::<T>)
    }

    /// Resolves a service registered with [`Container::register_service`].
    #[must_use]
    pub fn resolve_service<T: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.services
            .get(&TypeId::of::<Arc<T>>())
            .and_then(|s| s.downcast_ref::<Arc<T>>())
            .cloned()
    }

    /// Resolves a trait-object service or returns an error.
    pub fn resolve_service_required<T: ?Sized + Send + Sync + 'static>(
        &self,
    ) -> Result<Arc<T>, InjectionError> {
        self.resolve_service::<T>()
            .ok_or_else(InjectionError::not_registered::<T>)
    }

    /// Checks if a service is registered, as an instance or a constructor.
    #[must_use]
    pub fn contains<T: Send + Sync + 'static>(&self) -> bool {
        let id = TypeId::of::<T>();
        self.services.contains_key(&id) || self.constructors.contains_key(&id)
    }

    /// Returns the number of registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len() + self.constructors.len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty() && self.constructors.is_empty()
    }

    fn try_resolve<T: Send + Sync + 'static>(&self) -> Result<Option<Arc<T>>, InjectionError> {
        let id = TypeId::of::<T>();
        if let Some(service) = self.services.get(&id) {
            return Ok(service.clone().downcast::<T>().ok());
        }
        match self.constructors.get(&id) {
            Some(constructor) => Ok(constructor(self)?.downcast::<T>().ok()),
            None => Ok(None),
        }
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("service_count", &self.services.len())
            .field("constructor_count", &self.constructors.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct TestService {
        value: String,
    }

    impl TestService {
        fn new(value: &str) -> Self {
            Self {
                value: value.to_string(),
            }
        }
    }

    #[derive(Debug)]
    struct Dependent {
        inner: Arc<TestService>,
    }

    impl Activate for Dependent {
        fn activate(services: &Container) -> Result<Self, InjectionError> {
            Ok(Self {
                inner: services.resolve_required()?,
            })
        }
    }

    trait Named: Send + Sync {
        fn name(&self) -> &str;
    }

    impl Named for TestService {
        fn name(&self) -> &str {
            &self.value
        }
    }

    #[test]
    fn test_container_new() {
        let container = Container::new();
        assert!(container.is_empty());
        assert_eq!(container.len(), 0);
    }

    #[test]
    fn test_container_register_and_resolve() {
        let mut container = Container::new();
        container.register(Arc::new(TestService::new("hello")));

        let service: Option<Arc<TestService>> = container.resolve();
        assert_eq!(service.unwrap().value, "hello");
    }

    #[test]
    fn test_container_resolve_required_missing() {
        let container = Container::new();
        let result: Result<Arc<TestService>, _> = container.resolve_required();

        let err = result.unwrap_err();
        assert!(err.to_string().contains("TestService"));
        assert!(err.to_string().contains("not registered"));
    }

    #[test]
    fn test_activated_type_resolves_dependencies() {
        let mut container = Container::new();
        container.register(Arc::new(TestService::new("dep")));
        container.register_activated::<Dependent>();

        let dependent: Arc<Dependent> = container.resolve_required().unwrap();
        assert_eq!(dependent.inner.value, "dep");
    }

    #[test]
    fn test_activated_type_missing_dependency() {
        let mut container = Container::new();
        container.register_activated::<Dependent>();

        let err = container.resolve_required::<Dependent>().unwrap_err();
        assert!(err.type_name.contains("TestService"));
    }

    #[test]
    fn test_factory_is_transient() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let mut container = Container::new();
        container.register_factory(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(TestService::new("fresh"))
        });

        let a: Arc<TestService> = container.resolve().unwrap();
        let b: Arc<TestService> = container.resolve().unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_trait_object_service() {
        let mut container = Container::new();
        container.register_service::<dyn Named>(Arc::new(TestService::new("named")));

        let named = container.resolve_service::<dyn Named>().unwrap();
        assert_eq!(named.name(), "named");
        assert!(container.resolve::<TestService>().is_none());
    }

    #[test]
    fn test_container_debug() {
        let mut container = Container::new();
        container.register(Arc::new(TestService::new("debug")));

        let debug = format!("{:?}", container);
        assert!(debug.contains("Container"));
        assert!(debug.contains("service_count"));
    }
}
