//! Request and action context types.
//!
//! The [`HttpContext`] carries all per-request state through the filter
//! pipeline: the request itself, the current principal, request-scoped
//! items and the response being produced. It is shared behind an `Arc` by
//! every context object of a request, so the mutable parts use interior
//! mutability.

use crate::di::Container;
use crate::identity::ClaimsPrincipal;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode, Uri};
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// A unique identifier for each request, using UUID v7.
///
/// UUID v7 is time-ordered, which keeps request IDs sortable in logs.
///
/// # Example
///
/// ```
/// use keel_core::RequestId;
///
/// let id = RequestId::new();
/// assert_eq!(id.to_string().len(), 36);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Creates a new unique request ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `RequestId` from an existing UUID, for example one taken
    /// from an `x-request-id` header.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for RequestId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// The response being produced for a request.
///
/// Results write here when they execute. The host turns it into a real
/// HTTP response once the pipeline has finished.
#[derive(Debug, Clone, Default)]
pub struct ResponseState {
    /// Response status code. Defaults to `200 OK`.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body.
    pub body: Bytes,
}

impl ResponseState {
    /// Converts the state into an `http::Response`.
    #[must_use]
    pub fn into_response(self) -> http::Response<Bytes> {
        let mut response = http::Response::new(self.body);
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Per-request state shared by every stage of the pipeline.
///
/// # Example
///
/// ```
/// use keel_core::{ClaimsIdentity, ClaimsPrincipal, HttpContext};
/// use http::Method;
///
/// let http = HttpContext::builder()
///     .method(Method::POST)
///     .uri("/orders".parse().unwrap())
///     .build();
///
/// assert!(!http.user().is_authenticated());
/// http.set_user(ClaimsPrincipal::from_identity(ClaimsIdentity::authenticated("Bearer")));
/// assert!(http.user().is_authenticated());
/// ```
pub struct HttpContext {
    request_id: RequestId,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    started_at: Instant,
    user: RwLock<ClaimsPrincipal>,
    services: Arc<Container>,
    items: Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
    response: Mutex<ResponseState>,
}

impl HttpContext {
    /// Returns a builder for an `HttpContext`.
    #[must_use]
    pub fn builder() -> HttpContextBuilder {
        HttpContextBuilder::default()
    }

    /// Creates a context from an `http::Request`.
    ///
    /// An `x-request-id` header carrying a valid UUID is reused as the
    /// request ID.
    #[must_use]
    pub fn from_request(request: http::Request<Bytes>, services: Arc<Container>) -> Self {
        let (parts, body) = request.into_parts();
        let request_id = parts
            .headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v).ok())
            .map(RequestId::from_uuid);

        let mut builder = Self::builder()
            .method(parts.method)
            .uri(parts.uri)
            .headers(parts.headers)
            .body(body)
            .services(services);
        if let Some(id) = request_id {
            builder = builder.request_id(id);
        }
        builder.build()
    }

    /// Returns the request ID.
    #[must_use]
    pub const fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Returns the request method.
    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request URI.
    #[must_use]
    pub const fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Returns the request headers.
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns a header value as a string, if present and valid UTF-8.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns the request body.
    #[must_use]
    pub const fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns when the context was created.
    #[must_use]
    pub const fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Returns a snapshot of the current principal.
    #[must_use]
    pub fn user(&self) -> ClaimsPrincipal {
        self.user.read().clone()
    }

    /// Replaces the current principal.
    pub fn set_user(&self, user: ClaimsPrincipal) {
        *self.user.write() = user;
    }

    /// Returns the request's service container.
    #[must_use]
    pub fn services(&self) -> &Arc<Container> {
        &self.services
    }

    /// Stores a request-scoped item, replacing any item of the same type.
    pub fn insert_item<T: Send + Sync + 'static>(&self, item: T) {
        self.items.lock().insert(TypeId::of::<T>(), Arc::new(item));
    }

    /// Returns a request-scoped item.
    #[must_use]
    pub fn item<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.items
            .lock()
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|item| item.downcast::<T>().ok())
    }

    /// Removes a request-scoped item.
    pub fn remove_item<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.items
            .lock()
            .remove(&TypeId::of::<T>())
            .and_then(|item| item.downcast::<T>().ok())
    }

    /// Locks the response for writing.
    ///
    /// The guard must not be held across an `.await`.
    pub fn response(&self) -> MutexGuard<'_, ResponseState> {
        self.response.lock()
    }

    /// Returns a copy of the response produced so far.
    #[must_use]
    pub fn response_snapshot(&self) -> ResponseState {
        self.response.lock().clone()
    }
}

impl fmt::Debug for HttpContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpContext")
            .field("request_id", &self.request_id)
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("authenticated", &self.user.read().is_authenticated())
            .field("item_count", &self.items.lock().len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`HttpContext`].
#[derive(Debug, Default)]
pub struct HttpContextBuilder {
    request_id: Option<RequestId>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    user: ClaimsPrincipal,
    services: Option<Arc<Container>>,
}

impl HttpContextBuilder {
    /// Sets the request ID. A fresh one is generated otherwise.
    #[must_use]
    pub fn request_id(mut self, id: RequestId) -> Self {
        self.request_id = Some(id);
        self
    }

    /// Sets the request method. Defaults to `GET`.
    #[must_use]
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Sets the request URI. Defaults to `/`.
    #[must_use]
    pub fn uri(mut self, uri: Uri) -> Self {
        self.uri = uri;
        self
    }

    /// Replaces all request headers.
    #[must_use]
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Adds a request header. Invalid names or values are ignored.
    #[must_use]
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            http::header::HeaderName::from_bytes(name.as_bytes()),
            http::HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    /// Sets the request body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Sets the initial principal. Defaults to anonymous.
    #[must_use]
    pub fn user(mut self, user: ClaimsPrincipal) -> Self {
        self.user = user;
        self
    }

    /// Sets the service container. Defaults to an empty one.
    #[must_use]
    pub fn services(mut self, services: Arc<Container>) -> Self {
        self.services = Some(services);
        self
    }

    /// Builds the context.
    #[must_use]
    pub fn build(self) -> HttpContext {
        HttpContext {
            request_id: self.request_id.unwrap_or_default(),
            method: self.method,
            uri: self.uri,
            headers: self.headers,
            body: self.body,
            started_at: Instant::now(),
            user: RwLock::new(self.user),
            services: self.services.unwrap_or_default(),
            items: Mutex::new(HashMap::new()),
            response: Mutex::new(ResponseState::default()),
        }
    }
}

/// Describes the action selected for a request.
///
/// Descriptors are built once at startup and shared by every request that
/// routes to the action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionDescriptor {
    id: String,
    display_name: String,
    route_values: BTreeMap<String, String>,
}

impl ActionDescriptor {
    /// Creates a descriptor. The display name defaults to the ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
            route_values: BTreeMap::new(),
        }
    }

    /// Sets the display name used in logs.
    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    /// Adds a route value, for example `controller = "Orders"`.
    #[must_use]
    pub fn with_route_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.route_values.insert(key.into(), value.into());
        self
    }

    /// Returns the unique action ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the display name.
    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Returns the route values.
    #[must_use]
    pub const fn route_values(&self) -> &BTreeMap<String, String> {
        &self.route_values
    }
}

/// The request plus the action it was routed to.
#[derive(Debug, Clone)]
pub struct ActionContext {
    /// The request state.
    pub http: Arc<HttpContext>,
    /// The selected action.
    pub action: Arc<ActionDescriptor>,
}

impl ActionContext {
    /// Creates an action context.
    #[must_use]
    pub fn new(http: Arc<HttpContext>, action: Arc<ActionDescriptor>) -> Self {
        Self { http, action }
    }

    /// Returns the request's service container.
    #[must_use]
    pub fn services(&self) -> &Arc<Container> {
        self.http.services()
    }
}
