//! Error types for the search service client.
//!
//! # Design
//! `Error` is the single terminal value a call produces. Every variant maps
//! onto one `ErrorKind`, which is what retry decisions and callers branch on;
//! the `Display` strings are derived from structured fields and are not meant
//! to be parsed.
//!
//! `ApiError` is the service's own `{status, error}` envelope paired with the
//! HTTP status it arrived with. Its formatted form is
//! `"{status}: {message} (HTTP {http_status})"`.

use std::fmt;
use std::io;

use crate::envelope::is_retriable_status;
use crate::http::TransportError;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure reported by the service through its response envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    /// Envelope `status` field; `None` when the service omitted it.
    pub status: Option<String>,
    /// Envelope `error` field, empty when absent.
    pub message: String,
    pub http_status: u16,
}

impl ApiError {
    pub fn is_retriable(&self) -> bool {
        is_retriable_status(self.http_status)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} (HTTP {})",
            self.status.as_deref().unwrap_or(""),
            self.message,
            self.http_status
        )
    }
}

impl std::error::Error for ApiError {}

/// Coarse classification of an `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No HTTP response was obtained.
    Transport,
    /// The service answered with a status worth retrying.
    RetriableApi,
    /// The service answered with a status that will not change on retry.
    PermanentApi,
    /// A response body could not be decompressed or parsed.
    Decode,
    /// Rejected locally before any request was sent.
    Validation,
    /// The call context was cancelled or its deadline elapsed.
    Cancelled,
}

/// Errors returned by `Client` operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("transport failure: {0}")]
    Transport(#[source] TransportError),

    #[error("{0}")]
    Api(ApiError),

    /// The error body of a failed response was not a valid envelope.
    #[error("failed to decode api error: {source} (raw response: {raw_body}, status code: {http_status})")]
    Decode {
        http_status: u16,
        raw_body: String,
        #[source]
        source: serde_json::Error,
    },

    /// A successful response carried a payload of the wrong shape.
    #[error("failed to decode response: {source} (raw response: {raw_body}, status code: {http_status})")]
    Deserialization {
        http_status: u16,
        raw_body: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to decompress response body (status code: {http_status}): {source}")]
    Decompression {
        http_status: u16,
        #[source]
        source: io::Error,
    },

    #[error("failed to marshal request: {0}")]
    Serialization(#[source] serde_json::Error),

    #[error("failed to compress request body: {0}")]
    Compression(#[source] io::Error),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// A lower-level error annotated with the operation that produced it.
    #[error("failed to {operation}: {source}")]
    Context {
        operation: &'static str,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Transport(_) => ErrorKind::Transport,
            Error::Api(api) if api.is_retriable() => ErrorKind::RetriableApi,
            Error::Api(_) => ErrorKind::PermanentApi,
            Error::Decode { .. } | Error::Deserialization { .. } | Error::Decompression { .. } => {
                ErrorKind::Decode
            }
            Error::Serialization(_) | Error::Compression(_) | Error::Validation(_) => {
                ErrorKind::Validation
            }
            Error::Cancelled | Error::DeadlineExceeded => ErrorKind::Cancelled,
            Error::Context { source, .. } => source.kind(),
        }
    }

    /// Whether another attempt could plausibly succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transport | ErrorKind::RetriableApi)
    }

    /// The envelope error, looking through any operation context.
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Error::Api(api) => Some(api),
            Error::Context { source, .. } => source.api_error(),
            _ => None,
        }
    }

    /// The HTTP status associated with this error, when a response was received.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Error::Api(api) => Some(api.http_status),
            Error::Decode { http_status, .. }
            | Error::Deserialization { http_status, .. }
            | Error::Decompression { http_status, .. } => Some(*http_status),
            Error::Context { source, .. } => source.http_status(),
            _ => None,
        }
    }

    pub(crate) fn context(self, operation: &'static str) -> Self {
        Error::Context {
            operation,
            source: Box::new(self),
        }
    }
}

impl From<ApiError> for Error {
    fn from(err: ApiError) -> Self {
        Error::Api(err)
    }
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        Error::Transport(err)
    }
}

/// Extension for annotating results with the failing operation.
pub(crate) trait ResultExt<T> {
    fn context(self, operation: &'static str) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, operation: &'static str) -> Result<T> {
        self.map_err(|e| e.context(operation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(status: Option<&str>, message: &str, http_status: u16) -> ApiError {
        ApiError {
            status: status.map(str::to_string),
            message: message.to_string(),
            http_status,
        }
    }

    #[test]
    fn api_error_display_matches_wire_identity() {
        let err = api(Some("error"), "bad filter", 400);
        assert_eq!(err.to_string(), "error: bad filter (HTTP 400)");
    }

    #[test]
    fn api_error_display_with_missing_status() {
        let err = api(None, "boom", 500);
        assert_eq!(err.to_string(), ": boom (HTTP 500)");
    }

    #[test]
    fn api_errors_classify_by_http_status() {
        assert_eq!(Error::from(api(Some("error"), "x", 503)).kind(), ErrorKind::RetriableApi);
        assert_eq!(Error::from(api(Some("error"), "x", 429)).kind(), ErrorKind::RetriableApi);
        assert_eq!(Error::from(api(Some("error"), "x", 404)).kind(), ErrorKind::PermanentApi);
        assert_eq!(Error::from(api(Some("error"), "x", 200)).kind(), ErrorKind::PermanentApi);
    }

    #[test]
    fn context_preserves_kind_and_status() {
        let err = Error::from(api(Some("error"), "slow down", 429)).context("list namespaces");
        assert_eq!(err.kind(), ErrorKind::RetriableApi);
        assert_eq!(err.http_status(), Some(429));
        assert_eq!(
            err.to_string(),
            "failed to list namespaces: error: slow down (HTTP 429)"
        );
        assert_eq!(err.api_error().map(|a| a.message.as_str()), Some("slow down"));
    }

    #[test]
    fn local_failures_are_not_retriable() {
        assert!(!Error::Validation("nope".to_string()).is_retriable());
        assert!(!Error::Cancelled.is_retriable());
        assert_eq!(Error::DeadlineExceeded.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn transport_failures_are_retriable() {
        let err = Error::from(TransportError::new("connection refused"));
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(err.is_retriable());
        assert_eq!(err.to_string(), "transport failure: connection refused");
    }
}
