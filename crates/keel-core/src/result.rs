//! Action results.
//!
//! An [`ActionResult`] is what an action (or a short-circuiting filter)
//! produces. Executing it writes the response into the request's
//! [`ResponseState`](crate::ResponseState).

use crate::authentication::AuthenticationService;
use crate::context::ActionContext;
use crate::error::{PipelineError, PipelineResult};
use crate::BoxFuture;
use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::StatusCode;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A shared, type-erased result.
pub type BoxedResult = Arc<dyn ActionResult>;

/// A result that knows how to write itself to the response.
pub trait ActionResult: fmt::Debug + Send + Sync + 'static {
    /// Writes the result to the response.
    fn execute_result<'a>(&'a self, ctx: &'a ActionContext) -> BoxFuture<'a, PipelineResult<()>>;

    /// The status code this result produces, when it is known up front.
    fn status_code(&self) -> Option<StatusCode> {
        None
    }

    /// Returns `self` as `Any` so callers can inspect concrete results.
    fn as_any(&self) -> &dyn Any;
}

impl dyn ActionResult {
    /// Downcasts to a concrete result type.
    #[must_use]
    pub fn downcast_ref<T: ActionResult>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Returns true if the result is of type `T`.
    #[must_use]
    pub fn is<T: ActionResult>(&self) -> bool {
        self.as_any().is::<T>()
    }
}

/// Writes a bare status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusCodeResult(pub StatusCode);

impl StatusCodeResult {
    /// Creates a shared status code result.
    #[must_use]
    pub fn boxed(status: StatusCode) -> BoxedResult {
        Arc::new(Self(status))
    }
}

impl ActionResult for StatusCodeResult {
    fn execute_result<'a>(&'a self, ctx: &'a ActionContext) -> BoxFuture<'a, PipelineResult<()>> {
        Box::pin(async move {
            ctx.http.response().status = self.0;
            Ok(())
        })
    }

    fn status_code(&self) -> Option<StatusCode> {
        Some(self.0)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Writes nothing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmptyResult;

impl EmptyResult {
    /// Creates a shared empty result.
    #[must_use]
    pub fn boxed() -> BoxedResult {
        Arc::new(Self)
    }
}

impl ActionResult for EmptyResult {
    fn execute_result<'a>(&'a self, _ctx: &'a ActionContext) -> BoxFuture<'a, PipelineResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Writes a text body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentResult {
    /// The body.
    pub content: String,
    /// The content type. Defaults to `text/plain; charset=utf-8`.
    pub content_type: String,
    /// The status code. Defaults to `200 OK`.
    pub status: StatusCode,
}

impl ContentResult {
    /// Creates a `text/plain` result.
    #[must_use]
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            content_type: "text/plain; charset=utf-8".to_string(),
            status: StatusCode::OK,
        }
    }

    /// Sets the content type.
    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Sets the status code.
    #[must_use]
    pub const fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }
}

impl ActionResult for ContentResult {
    fn execute_result<'a>(&'a self, ctx: &'a ActionContext) -> BoxFuture<'a, PipelineResult<()>> {
        Box::pin(async move {
            let content_type = HeaderValue::from_str(&self.content_type).map_err(|e| {
                PipelineError::result_execution(format!("invalid content type: {e}"))
            })?;
            let mut response = ctx.http.response();
            response.status = self.status;
            response.headers.insert(CONTENT_TYPE, content_type);
            response.body = Bytes::from(self.content.clone());
            Ok(())
        })
    }

    fn status_code(&self) -> Option<StatusCode> {
        Some(self.status)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Writes a JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonResult {
    /// The value to serialize.
    pub value: serde_json::Value,
    /// The status code. Defaults to `200 OK`.
    pub status: StatusCode,
}

impl JsonResult {
    /// Creates a JSON result.
    #[must_use]
    pub fn new(value: serde_json::Value) -> Self {
        Self {
            value,
            status: StatusCode::OK,
        }
    }

    /// Serializes any value into a JSON result.
    pub fn from_serialize<T: serde::Serialize>(value: &T) -> PipelineResult<Self> {
        serde_json::to_value(value)
            .map(Self::new)
            .map_err(|e| PipelineError::result_execution(format!("serialization failed: {e}")))
    }

    /// Sets the status code.
    #[must_use]
    pub const fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }
}

impl ActionResult for JsonResult {
    fn execute_result<'a>(&'a self, ctx: &'a ActionContext) -> BoxFuture<'a, PipelineResult<()>> {
        Box::pin(async move {
            let body = serde_json::to_vec(&self.value)
                .map_err(|e| {
                    PipelineError::result_execution(format!("serialization failed: {e}"))
                })?;
            let mut response = ctx.http.response();
            response.status = self.status;
            response
                .headers
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            response.body = Bytes::from(body);
            Ok(())
        })
    }

    fn status_code(&self) -> Option<StatusCode> {
        Some(self.status)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Asks the caller to authenticate (401 class).
///
/// With an [`AuthenticationService`] registered, every scheme is challenged
/// through it (the default scheme when the list is empty). Otherwise the
/// result writes `401 Unauthorized` itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChallengeResult {
    /// The schemes to challenge.
    pub schemes: Vec<String>,
}

impl ChallengeResult {
    /// Creates a challenge for the given schemes.
    #[must_use]
    pub fn new(schemes: Vec<String>) -> Self {
        Self { schemes }
    }
}

impl ActionResult for ChallengeResult {
    fn execute_result<'a>(&'a self, ctx: &'a ActionContext) -> BoxFuture<'a, PipelineResult<()>> {
        Box::pin(async move {
            match ctx.services().resolve_service::<dyn AuthenticationService>() {
                Some(auth) if self.schemes.is_empty() => auth.challenge(&ctx.http, None).await,
                Some(auth) => {
                    for scheme in &self.schemes {
                        auth.challenge(&ctx.http, Some(scheme)).await?;
                    }
                    Ok(())
                }
                None => {
                    let mut response = ctx.http.response();
                    response.status = StatusCode::UNAUTHORIZED;
                    for scheme in &self.schemes {
                        if let Ok(value) = HeaderValue::from_str(scheme) {
                            response
                                .headers
                                .append(http::header::WWW_AUTHENTICATE, value);
                        }
                    }
                    Ok(())
                }
            }
        })
    }

    fn status_code(&self) -> Option<StatusCode> {
        Some(StatusCode::UNAUTHORIZED)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Tells an authenticated caller access is denied (403).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForbidResult {
    /// The schemes to forbid with.
    pub schemes: Vec<String>,
}

impl ForbidResult {
    /// Creates a forbid result for the given schemes.
    #[must_use]
    pub fn new(schemes: Vec<String>) -> Self {
        Self { schemes }
    }
}

impl ActionResult for ForbidResult {
    fn execute_result<'a>(&'a self, ctx: &'a ActionContext) -> BoxFuture<'a, PipelineResult<()>> {
        Box::pin(async move {
            match ctx.services().resolve_service::<dyn AuthenticationService>() {
                Some(auth) if self.schemes.is_empty() => auth.forbid(&ctx.http, None).await,
                Some(auth) => {
                    for scheme in &self.schemes {
                        auth.forbid(&ctx.http, Some(scheme)).await?;
                    }
                    Ok(())
                }
                None => {
                    ctx.http.response().status = StatusCode::FORBIDDEN;
                    Ok(())
                }
            }
        })
    }

    fn status_code(&self) -> Option<StatusCode> {
        Some(StatusCode::FORBIDDEN)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
