//! Provider error taxonomy
//!
//! Backends report failures as an [`OperationError`] carrying an
//! [`ErrorStatus`]. A backend with its own error type either converts into
//! [`OperationError`] (every [`ErrorStatus`] does) or keeps one as the
//! `#[source]` of its error, since classification walks the source chain.
//! Errors that carry no status are treated as [`ErrorReason::Unknown`],
//! which is never retryable, never "not found" and never suggests a delay.

use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

/// Type-erased underlying cause
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Why a provider operation failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorReason {
    /// The provider declined to give a specific reason.
    Unknown,
    /// The request requires valid credentials.
    Unauthorized,
    /// A resource required by the operation does not exist.
    NotFound,
    /// Unexpected internal failure; may carry a retry-after hint.
    InternalServerError,
    /// The service is temporarily unavailable; may carry a retry-after hint.
    ServiceUnavailable,
    /// The caller is being rate limited; may carry a retry-after hint.
    TooManyRequests,
    /// The request was invalid and must not be retried.
    BadRequest,
}

impl ErrorReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorReason::Unknown => "",
            ErrorReason::Unauthorized => "Unauthorized",
            ErrorReason::NotFound => "NotFound",
            ErrorReason::InternalServerError => "InternalServerError",
            ErrorReason::ServiceUnavailable => "ServiceUnavailable",
            ErrorReason::TooManyRequests => "TooManyRequests",
            ErrorReason::BadRequest => "BadRequest",
        }
    }
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extra data attached to some reasons
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorDetails {
    pub retry_after_seconds: i32,
}

/// Classified provider failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorStatus {
    reason: ErrorReason,
    details: Option<ErrorDetails>,
    message: String,
}

impl ErrorStatus {
    pub fn new(reason: ErrorReason, details: Option<ErrorDetails>, message: impl Into<String>) -> Self {
        Self {
            reason,
            details,
            message: message.into(),
        }
    }

    pub fn reason(&self) -> ErrorReason {
        self.reason
    }

    pub fn details(&self) -> Option<ErrorDetails> {
        self.details
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Error returned by providers for consumption by the agent
#[derive(Debug, Error)]
#[error("{}", .status.message)]
pub struct OperationError {
    status: ErrorStatus,
    #[source]
    orig_err: Option<BoxError>,
}

impl OperationError {
    fn new(
        reason: ErrorReason,
        details: Option<ErrorDetails>,
        message: impl Into<String>,
        err: Option<BoxError>,
    ) -> Self {
        Self {
            status: ErrorStatus::new(reason, details, message),
            orig_err: err,
        }
    }

    fn with_retry_after(
        reason: ErrorReason,
        message: impl Into<String>,
        retry_after_seconds: i32,
        err: Option<BoxError>,
    ) -> Self {
        Self::new(
            reason,
            Some(ErrorDetails {
                retry_after_seconds,
            }),
            message,
            err,
        )
    }

    pub fn not_found(message: impl Into<String>, err: Option<BoxError>) -> Self {
        Self::new(ErrorReason::NotFound, None, message, err)
    }

    pub fn unauthorized(message: impl Into<String>, err: Option<BoxError>) -> Self {
        Self::new(ErrorReason::Unauthorized, None, message, err)
    }

    pub fn bad_request(message: impl Into<String>, err: Option<BoxError>) -> Self {
        Self::new(ErrorReason::BadRequest, None, message, err)
    }

    pub fn unknown(message: impl Into<String>, err: Option<BoxError>) -> Self {
        Self::new(ErrorReason::Unknown, None, message, err)
    }

    /// The endpoint is not accepting requests from this client for now.
    pub fn too_many_requests(
        message: impl Into<String>,
        retry_after_seconds: i32,
        err: Option<BoxError>,
    ) -> Self {
        Self::with_retry_after(ErrorReason::TooManyRequests, message, retry_after_seconds, err)
    }

    pub fn internal_server_error(
        message: impl Into<String>,
        retry_after_seconds: i32,
        err: Option<BoxError>,
    ) -> Self {
        Self::with_retry_after(
            ErrorReason::InternalServerError,
            message,
            retry_after_seconds,
            err,
        )
    }

    pub fn service_unavailable(
        message: impl Into<String>,
        retry_after_seconds: i32,
        err: Option<BoxError>,
    ) -> Self {
        Self::with_retry_after(
            ErrorReason::ServiceUnavailable,
            message,
            retry_after_seconds,
            err,
        )
    }

    /// Build an error with an explicit reason and optional details
    pub fn with_status(
        reason: ErrorReason,
        details: Option<ErrorDetails>,
        message: impl Into<String>,
        err: Option<BoxError>,
    ) -> Self {
        Self::new(reason, details, message, err)
    }

    pub fn status(&self) -> &ErrorStatus {
        &self.status
    }

    pub fn orig_err(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.orig_err.as_deref()
    }
}

impl From<ErrorStatus> for OperationError {
    fn from(status: ErrorStatus) -> Self {
        Self {
            status,
            orig_err: None,
        }
    }
}

/// Find the first status in the error's source chain.
///
/// `#[error(transparent)]` wrappers hide the wrapped error from the chain;
/// wrap an [`OperationError`] with `#[source]` or `#[from]` instead.
pub fn status_of<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a ErrorStatus> {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(op) = e.downcast_ref::<OperationError>() {
            return Some(op.status());
        }
        current = e.source();
    }
    None
}

/// Reason carried by the error, or `Unknown` if it carries none
pub fn reason_for_error(err: &(dyn StdError + 'static)) -> ErrorReason {
    status_of(err)
        .map(ErrorStatus::reason)
        .unwrap_or(ErrorReason::Unknown)
}

pub fn is_not_found(err: &(dyn StdError + 'static)) -> bool {
    reason_for_error(err) == ErrorReason::NotFound
}

/// Whether the failed request may be retried.
///
/// `TooManyRequests`, `ServiceUnavailable` and `InternalServerError` are
/// retryable. Every other reason, including `Unknown`, is not.
pub fn is_retryable(err: &(dyn StdError + 'static)) -> bool {
    matches!(
        reason_for_error(err),
        ErrorReason::TooManyRequests
            | ErrorReason::ServiceUnavailable
            | ErrorReason::InternalServerError
    )
}

/// Seconds the client should wait before acting again, if the error asks for it.
///
/// `ServiceUnavailable` with details always returns its hint, whatever the
/// sign. Any other reason returns the hint only when it is positive. This
/// says nothing about whether the request should be retried at all.
pub fn suggests_client_delay(err: &(dyn StdError + 'static)) -> Option<i32> {
    let status = status_of(err)?;
    let details = status.details()?;
    if status.reason() == ErrorReason::ServiceUnavailable {
        return Some(details.retry_after_seconds);
    }
    if details.retry_after_seconds > 0 {
        return Some(details.retry_after_seconds);
    }
    None
}
