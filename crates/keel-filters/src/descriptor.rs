//! Filter descriptors and ordering.
//!
//! A [`FilterDescriptor`] pairs a filter (or filter factory) with the scope
//! it was declared at and its order. Descriptors are built once per action
//! and never change; ordering is a pure function over them, supplied as a
//! [`FilterOrdering`] strategy.

use crate::filter::FilterMetadata;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Where a filter was declared. Used only to break order ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterScope {
    /// Registered for every action.
    Global = 10,
    /// Declared on a controller or page.
    Controller = 20,
    /// Declared on the action itself.
    Action = 30,
}

/// A filter plus its sort key.
#[derive(Clone)]
pub struct FilterDescriptor {
    filter: Arc<dyn FilterMetadata>,
    scope: FilterScope,
    order: i32,
}

impl FilterDescriptor {
    /// Creates a descriptor, reading the filter's order once.
    #[must_use]
    pub fn new(filter: Arc<dyn FilterMetadata>, scope: FilterScope) -> Self {
        let order = filter.order().unwrap_or(0);
        Self {
            filter,
            scope,
            order,
        }
    }

    /// Overrides the order read from the filter.
    #[must_use]
    pub const fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    /// Returns the filter or filter factory.
    #[must_use]
    pub const fn filter(&self) -> &Arc<dyn FilterMetadata> {
        &self.filter
    }

    /// Returns the declaration scope.
    #[must_use]
    pub const fn scope(&self) -> FilterScope {
        self.scope
    }

    /// Returns the order captured at creation.
    #[must_use]
    pub const fn order(&self) -> i32 {
        self.order
    }
}

impl fmt::Debug for FilterDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterDescriptor")
            .field("filter", &self.filter.name())
            .field("scope", &self.scope)
            .field("order", &self.order)
            .finish()
    }
}

/// A descriptor plus the filter instance resolved for one request.
#[derive(Debug, Clone)]
pub struct FilterItem {
    /// The descriptor.
    pub descriptor: FilterDescriptor,
    /// The resolved filter. `None` until a provider resolves it.
    pub filter: Option<Arc<dyn FilterMetadata>>,
    /// Whether the resolved instance may be shared between requests.
    pub is_reusable: bool,
}

impl FilterItem {
    /// Creates an unresolved item.
    #[must_use]
    pub const fn new(descriptor: FilterDescriptor) -> Self {
        Self {
            descriptor,
            filter: None,
            is_reusable: false,
        }
    }

    /// Creates an item that is already resolved.
    #[must_use]
    pub const fn resolved(descriptor: FilterDescriptor, filter: Arc<dyn FilterMetadata>) -> Self {
        Self {
            descriptor,
            filter: Some(filter),
            is_reusable: false,
        }
    }
}

/// A total, stable ordering strategy over filter descriptors.
pub trait FilterOrdering: Send + Sync + fmt::Debug {
    /// Compares two descriptors.
    fn compare(&self, a: &FilterDescriptor, b: &FilterDescriptor) -> Ordering;

    /// Sorts descriptors. Equal descriptors keep their discovery order.
    fn sort(&self, descriptors: &mut [FilterDescriptor]) {
        descriptors.sort_by(|a, b| self.compare(a, b));
    }

    /// Sorts resolved items by their descriptors, stably.
    fn sort_items(&self, items: &mut [FilterItem]) {
        items.sort_by(|a, b| self.compare(&a.descriptor, &b.descriptor));
    }
}

/// Order ascending, then scope ascending (Global < Controller < Action).
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFilterOrder;

impl FilterOrdering for DefaultFilterOrder {
    fn compare(&self, a: &FilterDescriptor, b: &FilterDescriptor) -> Ordering {
        a.order.cmp(&b.order).then(a.scope.cmp(&b.scope))
    }
}

/// CORS authorization filters first, then [`DefaultFilterOrder`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CorsFirstFilterOrder;

impl FilterOrdering for CorsFirstFilterOrder {
    fn compare(&self, a: &FilterDescriptor, b: &FilterDescriptor) -> Ordering {
        let a_cors = a.filter.is_cors_authorization_filter();
        let b_cors = b.filter.is_cors_authorization_filter();
        b_cors
            .cmp(&a_cors)
            .then_with(|| DefaultFilterOrder.compare(a, b))
    }
}
