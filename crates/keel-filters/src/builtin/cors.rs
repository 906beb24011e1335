//! Cross-origin resource sharing.
//!
//! [`CorsAuthorizationFilter`] reports itself as a CORS authorization filter,
//! so the default ordering always places it ahead of every other
//! authorization filter. Preflight requests are answered without touching
//! the action; simple cross-origin requests get their response headers and
//! continue through the pipeline.
//!
//! # Example
//!
//! ```
//! use keel_filters::builtin::CorsAuthorizationFilter;
//! use std::time::Duration;
//!
//! let cors = CorsAuthorizationFilter::builder()
//!     .allow_origin("https://example.com")
//!     .allow_methods(["GET", "POST"])
//!     .allow_credentials(true)
//!     .max_age(Duration::from_secs(3600))
//!     .build();
//! assert!(cors.allowed_origins().is_allowed("https://example.com"));
//! ```

use crate::context::AuthorizationFilterContext;
use crate::filter::{AuthorizationFilter, FilterMetadata};
use keel_core::result::ContentResult;
use keel_core::{ActionContext, ActionResult, BoxFuture, PipelineResult};
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::{Method, StatusCode};
use std::any::Any;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// CORS header names.
pub mod headers {
    /// `Origin` request header.
    pub const ORIGIN: &str = "origin";
    /// `Access-Control-Request-Method` preflight header.
    pub const REQUEST_METHOD: &str = "access-control-request-method";
    /// `Access-Control-Request-Headers` preflight header.
    pub const REQUEST_HEADERS: &str = "access-control-request-headers";
    /// `Access-Control-Allow-Origin` response header.
    pub const ALLOW_ORIGIN: &str = "access-control-allow-origin";
    /// `Access-Control-Allow-Methods` response header.
    pub const ALLOW_METHODS: &str = "access-control-allow-methods";
    /// `Access-Control-Allow-Headers` response header.
    pub const ALLOW_HEADERS: &str = "access-control-allow-headers";
    /// `Access-Control-Allow-Credentials` response header.
    pub const ALLOW_CREDENTIALS: &str = "access-control-allow-credentials";
    /// `Access-Control-Expose-Headers` response header.
    pub const EXPOSE_HEADERS: &str = "access-control-expose-headers";
    /// `Access-Control-Max-Age` response header.
    pub const MAX_AGE: &str = "access-control-max-age";
    /// `Vary` response header.
    pub const VARY: &str = "vary";
}

/// Origins allowed to call the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedOrigins {
    /// Any origin (`*`).
    Any,
    /// An explicit list of origins.
    List(HashSet<String>),
}

impl AllowedOrigins {
    /// Returns true if `origin` may call the application.
    #[must_use]
    pub fn is_allowed(&self, origin: &str) -> bool {
        match self {
            Self::Any => true,
            Self::List(origins) => origins.contains(origin),
        }
    }

    /// The `Access-Control-Allow-Origin` value for `origin`.
    ///
    /// Credentialed requests never receive the `*` wildcard.
    fn header_value(&self, origin: &str, credentials: bool) -> String {
        match self {
            Self::Any if !credentials => "*".to_string(),
            _ => origin.to_string(),
        }
    }
}

impl Default for AllowedOrigins {
    fn default() -> Self {
        Self::List(HashSet::new())
    }
}

/// Builds a [`CorsAuthorizationFilter`].
#[derive(Debug, Clone)]
#[must_use]
pub struct CorsBuilder {
    origins: AllowedOrigins,
    methods: HashSet<Method>,
    headers: HashSet<String>,
    expose_headers: Vec<String>,
    credentials: bool,
    max_age: Option<Duration>,
}

impl Default for CorsBuilder {
    fn default() -> Self {
        Self {
            origins: AllowedOrigins::default(),
            methods: [
                Method::GET,
                Method::HEAD,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::PATCH,
            ]
            .into_iter()
            .collect(),
            headers: ["content-type", "authorization", "x-request-id"]
                .into_iter()
                .map(String::from)
                .collect(),
            expose_headers: Vec::new(),
            credentials: false,
            max_age: Some(Duration::from_secs(86_400)),
        }
    }
}

impl CorsBuilder {
    /// Allows every origin.
    pub fn allow_any_origin(mut self) -> Self {
        self.origins = AllowedOrigins::Any;
        self
    }

    /// Adds an allowed origin.
    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        match &mut self.origins {
            AllowedOrigins::Any => {}
            AllowedOrigins::List(origins) => {
                origins.insert(origin.into());
            }
        }
        self
    }

    /// Adds several allowed origins.
    pub fn allow_origins<I, S>(self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        origins
            .into_iter()
            .fold(self, |builder, origin| builder.allow_origin(origin))
    }

    /// Replaces the allowed methods. Unknown method names are skipped.
    pub fn allow_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.methods = methods
            .into_iter()
            .filter_map(|m| Method::from_bytes(m.as_ref().to_ascii_uppercase().as_bytes()).ok())
            .collect();
        self
    }

    /// Adds an allowed request header.
    pub fn allow_header(mut self, header: impl Into<String>) -> Self {
        self.headers.insert(header.into().to_ascii_lowercase());
        self
    }

    /// Adds several allowed request headers.
    pub fn allow_headers<I, S>(self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        headers
            .into_iter()
            .fold(self, |builder, header| builder.allow_header(header))
    }

    /// Sets the headers scripts may read from the response.
    pub fn expose_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expose_headers = headers.into_iter().map(Into::into).collect();
        self
    }

    /// Allows cookies and credentials on cross-origin requests.
    pub fn allow_credentials(mut self, credentials: bool) -> Self {
        self.credentials = credentials;
        self
    }

    /// Sets how long browsers may cache a preflight answer.
    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    /// Omits the `Access-Control-Max-Age` header.
    pub fn no_max_age(mut self) -> Self {
        self.max_age = None;
        self
    }

    /// Builds the filter.
    pub fn build(self) -> CorsAuthorizationFilter {
        let mut methods: Vec<&str> = self.methods.iter().map(Method::as_str).collect();
        methods.sort_unstable();
        let mut headers: Vec<&str> = self.headers.iter().map(String::as_str).collect();
        headers.sort_unstable();

        CorsAuthorizationFilter {
            allow_methods: methods.join(", "),
            allow_headers: headers.join(", "),
            origins: self.origins,
            methods: self.methods,
            headers: self.headers,
            expose_headers: self.expose_headers.join(", "),
            credentials: self.credentials,
            max_age: self.max_age,
        }
    }
}

/// Authorization filter implementing CORS.
#[derive(Debug, Clone)]
pub struct CorsAuthorizationFilter {
    origins: AllowedOrigins,
    methods: HashSet<Method>,
    headers: HashSet<String>,
    allow_methods: String,
    allow_headers: String,
    expose_headers: String,
    credentials: bool,
    max_age: Option<Duration>,
}

impl CorsAuthorizationFilter {
    /// Starts a builder with no allowed origin.
    pub fn builder() -> CorsBuilder {
        CorsBuilder::default()
    }

    /// Allows every origin, method and common header, without credentials.
    #[must_use]
    pub fn permissive() -> Self {
        Self::builder()
            .allow_any_origin()
            .allow_methods(["GET", "HEAD", "POST", "PUT", "DELETE", "PATCH", "OPTIONS"])
            .allow_headers(["accept", "accept-language", "content-language"])
            .build()
    }

    /// Returns the allowed origins.
    #[must_use]
    pub const fn allowed_origins(&self) -> &AllowedOrigins {
        &self.origins
    }

    fn is_preflight(ctx: &AuthorizationFilterContext) -> bool {
        let http = ctx.http();
        *http.method() == Method::OPTIONS
            && http.header(headers::ORIGIN).is_some()
            && http.header(headers::REQUEST_METHOD).is_some()
    }

    fn preflight(&self, ctx: &AuthorizationFilterContext, origin: &str) -> Arc<dyn ActionResult> {
        let http = ctx.http();

        let method_allowed = http
            .header(headers::REQUEST_METHOD)
            .and_then(|m| Method::from_bytes(m.as_bytes()).ok())
            .is_some_and(|m| self.methods.contains(&m));
        if !method_allowed {
            debug!(origin = %origin, "CORS preflight requested a method that is not allowed");
            return forbidden("CORS method not allowed");
        }

        let headers_allowed = http.header(headers::REQUEST_HEADERS).map_or(true, |list| {
            list.split(',')
                .map(|h| h.trim().to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .all(|h| self.headers.contains(&h))
        });
        if !headers_allowed {
            debug!(origin = %origin, "CORS preflight requested a header that is not allowed");
            return forbidden("CORS headers not allowed");
        }

        let mut response = HeaderMap::new();
        self.write_origin(&mut response, origin);
        insert(&mut response, headers::ALLOW_METHODS, &self.allow_methods);
        insert(&mut response, headers::ALLOW_HEADERS, &self.allow_headers);
        if let Some(max_age) = self.max_age {
            insert(&mut response, headers::MAX_AGE, &max_age.as_secs().to_string());
        }
        Arc::new(PreflightResult { headers: response })
    }

    fn write_origin(&self, response: &mut HeaderMap, origin: &str) {
        insert(
            response,
            headers::ALLOW_ORIGIN,
            &self.origins.header_value(origin, self.credentials),
        );
        if self.credentials {
            insert(response, headers::ALLOW_CREDENTIALS, "true");
        }
        if !matches!(self.origins, AllowedOrigins::Any) || self.credentials {
            insert(response, headers::VARY, "Origin");
        }
    }
}

impl AuthorizationFilter for CorsAuthorizationFilter {
    fn on_authorization(&self, ctx: &mut AuthorizationFilterContext) -> PipelineResult<()> {
        let Some(origin) = ctx.http().header(headers::ORIGIN).map(str::to_owned) else {
            return Ok(());
        };

        if !self.origins.is_allowed(&origin) {
            debug!(origin = %origin, "CORS origin not allowed");
            ctx.result = Some(forbidden("CORS origin not allowed"));
            return Ok(());
        }

        if Self::is_preflight(ctx) {
            ctx.result = Some(self.preflight(ctx, &origin));
            return Ok(());
        }

        let mut response = ctx.http().response();
        self.write_origin(&mut response.headers, &origin);
        if !self.expose_headers.is_empty() {
            insert(&mut response.headers, headers::EXPOSE_HEADERS, &self.expose_headers);
        }
        Ok(())
    }
}

impl FilterMetadata for CorsAuthorizationFilter {
    fn order(&self) -> Option<i32> {
        Some(i32::MIN + 100)
    }

    fn is_cors_authorization_filter(&self) -> bool {
        true
    }

    fn as_authorization_filter(&self) -> Option<&dyn AuthorizationFilter> {
        Some(self)
    }
}

/// Answers a preflight request with `204 No Content` and the CORS headers.
#[derive(Debug, Clone)]
struct PreflightResult {
    headers: HeaderMap,
}

impl ActionResult for PreflightResult {
    fn execute_result<'a>(&'a self, ctx: &'a ActionContext) -> BoxFuture<'a, PipelineResult<()>> {
        Box::pin(async move {
            let mut response = ctx.http.response();
            response.status = StatusCode::NO_CONTENT;
            for (name, value) in &self.headers {
                response.headers.insert(name.clone(), value.clone());
            }
            Ok(())
        })
    }

    fn status_code(&self) -> Option<StatusCode> {
        Some(StatusCode::NO_CONTENT)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn forbidden(message: &str) -> Arc<dyn ActionResult> {
    Arc::new(ContentResult::new(message).with_status(StatusCode::FORBIDDEN))
}

fn insert(map: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        map.insert(HeaderName::from_static(name), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::FilterContext;
    use keel_core::{ActionDescriptor, HttpContext};

    fn authorize(
        filter: &CorsAuthorizationFilter,
        http: HttpContext,
    ) -> AuthorizationFilterContext {
        let action = ActionContext::new(Arc::new(http), Arc::new(ActionDescriptor::new("cors")));
        let filters: Arc<[Arc<dyn FilterMetadata>]> = Vec::new().into();
        let mut ctx = AuthorizationFilterContext::new(FilterContext::new(action, filters));
        filter.on_authorization(&mut ctx).unwrap();
        ctx
    }

    fn preflight(origin: &str, method: &str) -> HttpContext {
        HttpContext::builder()
            .method(Method::OPTIONS)
            .header(headers::ORIGIN, origin)
            .header(headers::REQUEST_METHOD, method)
            .build()
    }

    fn example() -> CorsAuthorizationFilter {
        CorsAuthorizationFilter::builder()
            .allow_origin("https://example.com")
            .allow_methods(["GET", "POST"])
            .build()
    }

    #[test]
    fn test_reports_cors_capability() {
        let filter: &dyn FilterMetadata = &example();
        assert!(filter.is_cors_authorization_filter());
        assert!(filter.has_authorization());
    }

    #[test]
    fn test_same_origin_request_passes_through() {
        let ctx = authorize(&example(), HttpContext::builder().build());
        assert!(ctx.result.is_none());
        assert!(ctx.http().response_snapshot().headers.is_empty());
    }

    #[tokio::test]
    async fn test_preflight_allowed() {
        let ctx = authorize(&example(), preflight("https://example.com", "POST"));
        let result = ctx.result.clone().unwrap();
        assert_eq!(result.status_code(), Some(StatusCode::NO_CONTENT));

        result.execute_result(ctx.action_context()).await.unwrap();
        let response = ctx.http().response_snapshot();
        assert_eq!(response.status, StatusCode::NO_CONTENT);
        assert_eq!(
            response.headers.get(headers::ALLOW_ORIGIN).unwrap(),
            "https://example.com"
        );
        assert_eq!(response.headers.get(headers::ALLOW_METHODS).unwrap(), "GET, POST");
        assert_eq!(response.headers.get(headers::MAX_AGE).unwrap(), "86400");
        assert_eq!(response.headers.get(headers::VARY).unwrap(), "Origin");
    }

    #[test]
    fn test_preflight_disallowed_method() {
        let ctx = authorize(&example(), preflight("https://example.com", "DELETE"));
        assert_eq!(
            ctx.result.unwrap().status_code(),
            Some(StatusCode::FORBIDDEN)
        );
    }

    #[test]
    fn test_preflight_disallowed_header() {
        let http = HttpContext::builder()
            .method(Method::OPTIONS)
            .header(headers::ORIGIN, "https://example.com")
            .header(headers::REQUEST_METHOD, "GET")
            .header(headers::REQUEST_HEADERS, "content-type, x-secret")
            .build();
        let ctx = authorize(&example(), http);
        assert_eq!(
            ctx.result.unwrap().status_code(),
            Some(StatusCode::FORBIDDEN)
        );
    }

    #[test]
    fn test_disallowed_origin_is_forbidden() {
        let ctx = authorize(&example(), preflight("https://evil.test", "GET"));
        assert_eq!(
            ctx.result.unwrap().status_code(),
            Some(StatusCode::FORBIDDEN)
        );
    }

    #[test]
    fn test_simple_request_gets_headers() {
        let filter = CorsAuthorizationFilter::builder()
            .allow_any_origin()
            .expose_headers(["x-total-count"])
            .build();
        let http = HttpContext::builder()
            .header(headers::ORIGIN, "https://app.test")
            .build();
        let ctx = authorize(&filter, http);

        assert!(ctx.result.is_none());
        let response = ctx.http().response_snapshot();
        assert_eq!(response.headers.get(headers::ALLOW_ORIGIN).unwrap(), "*");
        assert_eq!(
            response.headers.get(headers::EXPOSE_HEADERS).unwrap(),
            "x-total-count"
        );
        assert!(response.headers.get(headers::VARY).is_none());
    }

    #[test]
    fn test_credentials_echo_origin() {
        let filter = CorsAuthorizationFilter::builder()
            .allow_any_origin()
            .allow_credentials(true)
            .build();
        let http = HttpContext::builder()
            .header(headers::ORIGIN, "https://app.test")
            .build();
        let ctx = authorize(&filter, http);

        let response = ctx.http().response_snapshot();
        assert_eq!(
            response.headers.get(headers::ALLOW_ORIGIN).unwrap(),
            "https://app.test"
        );
        assert_eq!(response.headers.get(headers::ALLOW_CREDENTIALS).unwrap(), "true");
    }

    #[test]
    fn test_permissive() {
        let filter = CorsAuthorizationFilter::permissive();
        assert_eq!(filter.allowed_origins(), &AllowedOrigins::Any);
        let ctx = authorize(&filter, preflight("https://any.test", "OPTIONS"));
        assert_eq!(
            ctx.result.unwrap().status_code(),
            Some(StatusCode::NO_CONTENT)
        );
    }
}
