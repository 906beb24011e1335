//! Application assembly: configuration, services and global filters in,
//! ready-to-run invokers out.

use crate::error::KeelResult;
use bytes::Bytes;
use keel_authz::{
    AuthorizationHandler, AuthorizationOptions, AuthorizationPolicy, AuthorizationPolicyBuilder,
    AuthorizationService, AuthorizeFilter, DefaultAuthorizationService, DefaultPolicyProvider,
    PolicyProvider,
};
use keel_config::{CorsConfig, KeelConfig, PolicyConfig};
use keel_core::di::Container;
use keel_core::{AuthenticationService, HttpContext, PipelineResult};
use keel_filters::builtin::{CorsAuthorizationFilter, RequestTimeoutFilter};
use keel_filters::{
    ActionEndpoint, ActionInvoker, ActionInvokerFactory, CorsFirstFilterOrder, DefaultFilterOrder,
    FilterCollection, FilterMetadata, FilterOrdering,
};
use keel_telemetry::{init_logging, init_metrics};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// An assembled application.
///
/// # Example
///
/// ```
/// use keel::prelude::*;
/// use keel::{Mvc, KeelConfig};
/// use keel::core::result::StatusCodeResult;
/// use http::StatusCode;
///
/// # tokio_test::block_on(async {
/// let mvc = Mvc::builder().config(&KeelConfig::default()).build().unwrap();
/// let invoker = mvc.invoker(
///     ActionEndpoint::builder("health.get")
///         .method(action_fn(|_| async { Ok(StatusCodeResult::boxed(StatusCode::NO_CONTENT)) }))
///         .build(),
/// );
///
/// let response = mvc.handle(&invoker, http::Request::new(bytes::Bytes::new())).await.unwrap();
/// assert_eq!(response.status(), StatusCode::NO_CONTENT);
/// # });
/// ```
pub struct Mvc {
    config: KeelConfig,
    services: Arc<Container>,
    factory: ActionInvokerFactory,
}

impl Mvc {
    /// Creates a builder.
    #[must_use]
    pub fn builder() -> MvcBuilder {
        MvcBuilder::new()
    }

    /// The configuration the application was built from.
    #[must_use]
    pub const fn config(&self) -> &KeelConfig {
        &self.config
    }

    /// The shared service container.
    #[must_use]
    pub const fn services(&self) -> &Arc<Container> {
        &self.services
    }

    /// The global filters.
    #[must_use]
    pub const fn filters(&self) -> &FilterCollection {
        self.factory.filters()
    }

    /// Builds the invoker of an endpoint, merging in the global filters.
    #[must_use]
    pub fn invoker(&self, endpoint: ActionEndpoint) -> ActionInvoker {
        self.factory.create(Arc::new(endpoint))
    }

    /// Creates the request state for `request`, wired to the container.
    #[must_use]
    pub fn context(&self, request: http::Request<Bytes>) -> HttpContext {
        HttpContext::from_request(request, Arc::clone(&self.services))
    }

    /// Runs `request` through `invoker` and returns the response it produced.
    ///
    /// # Errors
    ///
    /// Returns the pipeline error when no filter handled it.
    pub async fn handle(
        &self,
        invoker: &ActionInvoker,
        request: http::Request<Bytes>,
    ) -> PipelineResult<http::Response<Bytes>> {
        let http = Arc::new(self.context(request));
        invoker.invoke(Arc::clone(&http)).await?;
        Ok(http.response_snapshot().into_response())
    }

    /// Installs the log subscriber and the metrics exporter described by the
    /// configuration. Metrics need a running Tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails if a global subscriber or recorder is already installed.
    pub fn init_telemetry(&self) -> KeelResult<()> {
        init_logging(&self.config.logging.to_log_config())?;
        init_metrics(&self.config.metrics.to_metrics_config())?;
        Ok(())
    }
}

impl fmt::Debug for Mvc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mvc")
            .field("services", &self.services)
            .field("filters", &self.factory.filters().len())
            .finish_non_exhaustive()
    }
}

type ServiceSetup = Box<dyn FnOnce(&mut Container) + Send>;

/// Builder for [`Mvc`].
#[must_use]
pub struct MvcBuilder {
    config: KeelConfig,
    filters: FilterCollection,
    policies: Vec<(String, AuthorizationPolicy)>,
    handlers: Vec<Arc<dyn AuthorizationHandler>>,
    authentication: Option<Arc<dyn AuthenticationService>>,
    setup: Vec<ServiceSetup>,
}

impl Default for MvcBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MvcBuilder {
    /// Creates a builder with the default configuration.
    pub fn new() -> Self {
        Self {
            config: KeelConfig::default(),
            filters: FilterCollection::new(),
            policies: Vec::new(),
            handlers: Vec::new(),
            authentication: None,
            setup: Vec::new(),
        }
    }

    /// Uses a copy of `config`.
    pub fn config(mut self, config: &KeelConfig) -> Self {
        self.config = config.clone();
        self
    }

    /// Adds a global filter.
    pub fn filter<F: FilterMetadata>(mut self, filter: F) -> Self {
        self.filters.add(filter);
        self
    }

    /// Edits the global filters directly.
    pub fn filters(mut self, configure: impl FnOnce(&mut FilterCollection)) -> Self {
        configure(&mut self.filters);
        self
    }

    /// Registers a policy in addition to the configured ones.
    pub fn policy(mut self, name: impl Into<String>, policy: AuthorizationPolicy) -> Self {
        self.policies.push((name.into(), policy));
        self
    }

    /// Adds an authorization handler to the default authorization service.
    pub fn authorization_handler(mut self, handler: impl AuthorizationHandler + 'static) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    /// Sets the authentication collaborator.
    pub fn authentication(mut self, service: impl AuthenticationService) -> Self {
        self.authentication = Some(Arc::new(service));
        self
    }

    /// Registers services. Runs after the built-in registrations, so it may
    /// replace them.
    pub fn services(mut self, setup: impl FnOnce(&mut Container) + Send + 'static) -> Self {
        self.setup.push(Box::new(setup));
        self
    }

    /// Validates the configuration and assembles the application.
    ///
    /// # Errors
    ///
    /// Fails for an invalid configuration or a configured policy that
    /// cannot be built.
    pub fn build(self) -> KeelResult<Mvc> {
        let config = self.config;
        config.validate()?;

        let options = authorization_options(&config, self.policies)?;
        let fallback = options.fallback_policy.is_some();
        let policy_count = options.policy_names().count();

        let mut authorization = DefaultAuthorizationService::new()
            .invoke_handlers_after_failure(options.invoke_handlers_after_failure);
        for handler in self.handlers {
            authorization = authorization.with_handler(SharedHandler(handler));
        }

        let mut container = Container::new();
        container.register_service::<dyn PolicyProvider>(Arc::new(DefaultPolicyProvider::new(
            options,
        )));
        container.register_service::<dyn AuthorizationService>(Arc::new(authorization));
        if let Some(authentication) = self.authentication {
            container.register_service::<dyn AuthenticationService>(authentication);
        }
        for setup in self.setup {
            setup(&mut container);
        }

        let mut filters = self.filters;
        if config.cors.enabled {
            filters.add(cors_filter(&config.cors));
        }
        if config.timeout.enabled {
            filters.add(RequestTimeoutFilter::new(Duration::from_millis(
                config.timeout.timeout_ms,
            )));
        }
        if fallback {
            filters.add(AuthorizeFilter::fallback());
        }

        let ordering: Arc<dyn FilterOrdering> = if config.filters.cors_first {
            Arc::new(CorsFirstFilterOrder)
        } else {
            Arc::new(DefaultFilterOrder)
        };

        info!(
            global_filters = filters.len(),
            policies = policy_count,
            cors = config.cors.enabled,
            timeout = config.timeout.enabled,
            cors_first = config.filters.cors_first,
            "Application assembled"
        );

        Ok(Mvc {
            factory: ActionInvokerFactory::new()
                .with_filters(filters)
                .with_ordering(ordering),
            services: Arc::new(container),
            config,
        })
    }
}

impl fmt::Debug for MvcBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MvcBuilder")
            .field("config", &self.config)
            .field("filters", &self.filters.len())
            .field("policies", &self.policies.len())
            .finish_non_exhaustive()
    }
}

struct SharedHandler(Arc<dyn AuthorizationHandler>);

impl AuthorizationHandler for SharedHandler {
    fn handle<'a>(
        &'a self,
        ctx: &'a mut keel_authz::AuthorizationHandlerContext,
    ) -> keel_core::BoxFuture<'a, PipelineResult<()>> {
        self.0.handle(ctx)
    }
}

fn authorization_options(
    config: &KeelConfig,
    extra: Vec<(String, AuthorizationPolicy)>,
) -> KeelResult<AuthorizationOptions> {
    let authorization = &config.authorization;
    let mut options = AuthorizationOptions::default();

    options.default_policy = AuthorizationPolicy::builder()
        .add_authentication_schemes(authorization.default_schemes.iter().cloned())
        .require_authenticated_user()
        .build()?;
    if authorization.require_authenticated_fallback {
        options.fallback_policy = Some(options.default_policy.clone());
    }
    options.invoke_handlers_after_failure = authorization.invoke_handlers_after_failure;

    for (name, policy) in &authorization.policies {
        let policy = configured_policy(policy, &authorization.default_schemes)?;
        options.add_policy(name.clone(), policy);
    }
    for (name, policy) in extra {
        options.add_policy(name, policy);
    }
    Ok(options)
}

fn configured_policy(
    policy: &PolicyConfig,
    default_schemes: &[String],
) -> KeelResult<AuthorizationPolicy> {
    let schemes = if policy.authentication_schemes.is_empty() {
        default_schemes
    } else {
        &policy.authentication_schemes
    };

    let mut builder: AuthorizationPolicyBuilder =
        AuthorizationPolicy::builder().add_authentication_schemes(schemes.iter().cloned());
    if policy.require_authenticated_user {
        builder = builder.require_authenticated_user();
    }
    if !policy.roles.is_empty() {
        builder = builder.require_roles(policy.roles.iter().cloned());
    }
    for claim in &policy.claims {
        builder = if claim.allowed_values.is_empty() {
            builder.require_claim(claim.claim_type.clone())
        } else {
            builder.require_claim_values(
                claim.claim_type.clone(),
                claim.allowed_values.iter().cloned(),
            )
        };
    }
    if let Some(name) = &policy.user_name {
        builder = builder.require_user_name(name.clone());
    }
    Ok(builder.build()?)
}

fn cors_filter(config: &CorsConfig) -> CorsAuthorizationFilter {
    let mut builder = CorsAuthorizationFilter::builder();
    builder = if config.allows_any_origin() {
        builder.allow_any_origin()
    } else {
        builder.allow_origins(config.allowed_origins.iter().cloned())
    };
    if !config.allowed_methods.is_empty() {
        builder = builder.allow_methods(&config.allowed_methods);
    }
    builder = builder
        .allow_headers(config.allowed_headers.iter().cloned())
        .expose_headers(config.exposed_headers.iter().cloned())
        .allow_credentials(config.allow_credentials);
    builder = match config.max_age_secs {
        Some(secs) => builder.max_age(Duration::from_secs(secs)),
        None => builder.no_max_age(),
    };
    builder.build()
}
