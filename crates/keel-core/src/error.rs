//! Error types for the Keel request pipeline.
//!
//! The pipeline distinguishes three kinds of failure:
//!
//! | Kind | Representation |
//! |---|---|
//! | Configuration defects (null factory output, missing policy service, ...) | [`PipelineError::InvalidOperation`] |
//! | Authorization failures | Not an error: a challenge/forbid [`ActionResult`](crate::ActionResult) |
//! | Action, filter and result failures | [`PipelineError::Action`], [`PipelineError::Filter`], [`PipelineError::ResultExecution`] |
//!
//! Nothing in the pipeline retries. An error is either converted into a
//! result by an exception filter or propagated to the host.

use crate::di::InjectionError;
use http::StatusCode;
use thiserror::Error;

/// Result type alias using [`PipelineError`].
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors raised while running the filter and action pipeline.
///
/// # Example
///
/// ```
/// use keel_core::PipelineError;
///
/// let err = PipelineError::invalid_operation("filter factory returned no instance");
/// assert!(err.is_configuration_error());
/// assert_eq!(err.status_code().as_u16(), 500);
/// ```
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The pipeline was configured incorrectly.
    #[error("Invalid operation: {message}")]
    InvalidOperation {
        /// Human-readable error message.
        message: String,
    },

    /// A dependency could not be resolved from the container.
    #[error(transparent)]
    Injection(#[from] InjectionError),

    /// The action method failed.
    #[error("Action failed: {message}")]
    Action {
        /// Human-readable error message.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<anyhow::Error>,
    },

    /// A filter hook failed.
    #[error("Filter '{filter}' failed: {message}")]
    Filter {
        /// Name of the failing filter.
        filter: String,
        /// Human-readable error message.
        message: String,
    },

    /// Executing a result failed.
    #[error("Result execution failed: {message}")]
    ResultExecution {
        /// Human-readable error message.
        message: String,
    },

    /// The authentication collaborator failed (not the same as "not authenticated").
    #[error("Authentication with scheme '{scheme}' failed: {message}")]
    Authentication {
        /// The scheme that was being authenticated.
        scheme: String,
        /// Human-readable error message.
        message: String,
    },

    /// The request deadline elapsed and a stage chose to observe it.
    #[error("Request cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Creates a configuration error.
    #[must_use]
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an action error with a message only.
    #[must_use]
    pub fn action(message: impl Into<String>) -> Self {
        Self::Action {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an action error wrapping a source error.
    pub fn action_with_source(
        message: impl Into<String>,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        Self::Action {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Creates a filter error.
    #[must_use]
    pub fn filter(filter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Filter {
            filter: filter.into(),
            message: message.into(),
        }
    }

    /// Creates a result execution error.
    #[must_use]
    pub fn result_execution(message: impl Into<String>) -> Self {
        Self::ResultExecution {
            message: message.into(),
        }
    }

    /// Creates an authentication collaborator error.
    #[must_use]
    pub fn authentication(scheme: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Authentication {
            scheme: scheme.into(),
            message: message.into(),
        }
    }

    /// Returns true for errors that indicate a programming or configuration defect.
    #[must_use]
    pub const fn is_configuration_error(&self) -> bool {
        matches!(self, Self::InvalidOperation { .. } | Self::Injection(_))
    }

    /// Returns the status code a host should answer with when this error
    /// escapes the pipeline.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_operation_display() {
        let err = PipelineError::invalid_operation("no policy provider registered");
        assert_eq!(
            err.to_string(),
            "Invalid operation: no policy provider registered"
        );
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_injection_is_configuration_error() {
        let err: PipelineError = InjectionError::not_registered::<String>().into();
        assert!(err.is_configuration_error());
        assert!(err.to_string().contains("not registered"));
    }

    #[test]
    fn test_action_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = PipelineError::action_with_source("could not load order", io);
        assert!(!err.is_configuration_error());
        let source = std::error::Error::source(&err).expect("source should be kept");
        assert!(source.to_string().contains("disk gone"));
    }

    #[test]
    fn test_filter_error_display() {
        let err = PipelineError::filter("AuditFilter", "audit sink unavailable");
        assert_eq!(
            err.to_string(),
            "Filter 'AuditFilter' failed: audit sink unavailable"
        );
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            PipelineError::action("boom").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            PipelineError::Cancelled.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
