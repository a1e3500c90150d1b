//! Pipeline error classification.
//!
//! This module provides the error vocabulary shared by the pipeline and its
//! transports:
//! - [`ErrorKind`]: Classification of a failed (or retryable) outcome
//! - [`TransportErrorKind`]: What went wrong below the HTTP layer
//! - [`BodyError`]: Request and response body failures

use std::str::FromStr;

use serde::Serialize;

/// Classification of a pipeline outcome.
///
/// Every error surfaced by the pipeline maps to exactly one kind. The retry
/// policy only ever retries the two recoverable kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The pipeline was assembled incorrectly. Raised at construction time.
    Configuration,
    /// The pipeline or a message was used incorrectly. Raised at send time.
    Usage,
    /// The transport failed below HTTP (connect, timeout, I/O).
    TransientTransport,
    /// The server answered with a status in the retryable set.
    RetryableStatus,
    /// A failure that retrying cannot fix, or a retry budget that ran out.
    NonRetryable,
    /// The caller's cancellation signal fired.
    Canceled,
}

impl ErrorKind {
    /// Get the string representation of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Usage => "usage",
            ErrorKind::TransientTransport => "transient_transport",
            ErrorKind::RetryableStatus => "retryable_status",
            ErrorKind::NonRetryable => "non_retryable",
            ErrorKind::Canceled => "canceled",
        }
    }

    /// Returns whether this kind drives the retry state machine.
    ///
    /// # Example
    ///
    /// ```
    /// use http_pipeline_core::ErrorKind;
    ///
    /// assert!(ErrorKind::TransientTransport.is_retryable());
    /// assert!(ErrorKind::RetryableStatus.is_retryable());
    /// assert!(!ErrorKind::Canceled.is_retryable());
    /// assert!(!ErrorKind::Usage.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::TransientTransport | ErrorKind::RetryableStatus
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an [`ErrorKind`] from a string fails.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseErrorKindError(());

impl std::fmt::Display for ParseErrorKindError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown error kind")
    }
}

impl std::error::Error for ParseErrorKindError {}

impl FromStr for ErrorKind {
    type Err = ParseErrorKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "configuration" => Ok(ErrorKind::Configuration),
            "usage" => Ok(ErrorKind::Usage),
            "transient_transport" => Ok(ErrorKind::TransientTransport),
            "retryable_status" => Ok(ErrorKind::RetryableStatus),
            "non_retryable" => Ok(ErrorKind::NonRetryable),
            "canceled" | "cancelled" => Ok(ErrorKind::Canceled),
            _ => Err(ParseErrorKindError(())),
        }
    }
}

/// Failure modes of a transport call below the HTTP layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    /// The connection could not be established (refused, DNS, TLS handshake).
    Connect,
    /// No response arrived within the network timeout.
    Timeout,
    /// The connection broke while the exchange was in flight.
    Io,
    /// Any other transport failure.
    Other,
}

impl TransportErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportErrorKind::Connect => "connect",
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Io => "io",
            TransportErrorKind::Other => "other",
        }
    }
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request and response body errors.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BodyError {
    /// A one-shot body was already sent and cannot be sent again.
    #[error("request body is not replayable")]
    NotReplayable,

    /// Reading the body failed.
    #[error("failed to read body: {0}")]
    Read(String),
}
