//! # Keel
//!
//! An MVC-style filter pipeline: global, controller and action filters run
//! around every action in five stages (authorization, resource, action,
//! exception, result).
//!
//! This crate assembles the pieces:
//!
//! - [`core`]: request state, action results, service container, identity
//! - [`filters`]: filter traits, ordering, the invoker and the built-in filters
//! - [`authz`]: authorization policies and the `Authorize` filters
//! - [`config`]: typed configuration loaded from files and the environment
//! - [`telemetry`]: structured logging and Prometheus metrics
//!
//! [`Mvc`] turns a [`KeelConfig`] into a service container and a set of
//! global filters, then hands out invokers for individual endpoints.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod error;
mod mvc;

pub use error::{KeelError, KeelResult};
pub use keel_config::{ConfigLoader, KeelConfig};
pub use mvc::{Mvc, MvcBuilder};

pub use keel_authz as authz;
pub use keel_config as config;
pub use keel_core as core;
pub use keel_filters as filters;
pub use keel_telemetry as telemetry;

/// Everything needed to declare endpoints and write filters.
pub mod prelude {
    pub use crate::{KeelConfig, Mvc};
    pub use keel_authz::{AllowAnonymousFilter, AuthorizationPolicy, AuthorizeFilter};
    pub use keel_core::{ActionContext, HttpContext};
    pub use keel_filters::prelude::*;
    pub use keel_filters::{action_fn, ActionEndpoint, Controller, FilterCollection};
}
