//! Pipeline error types.
//!
//! This module provides [`PipelineError`], the error type for everything that
//! flows through a pipeline. Each variant classifies into one
//! [`ErrorKind`](http_pipeline_core::ErrorKind).

use http_pipeline_core::{BodyError, ErrorKind, TransportErrorKind};

/// Errors produced while building or driving a pipeline.
#[derive(Clone, Debug, thiserror::Error)]
pub enum PipelineError {
    /// The pipeline was assembled incorrectly.
    #[error("pipeline configuration error: {0}")]
    Configuration(String),

    /// The pipeline or a message was used incorrectly.
    #[error("pipeline usage error: {0}")]
    Usage(String),

    /// Transport-level failure (connection refused, timeout, broken connection).
    #[error("transport error ({kind}): {message}")]
    Transport {
        kind: TransportErrorKind,
        message: String,
    },

    /// The message's cancellation token fired.
    #[error("operation canceled: {0}")]
    Canceled(String),

    /// A request or response body could not be produced or read.
    #[error(transparent)]
    Body(#[from] BodyError),

    /// A policy rejected the message.
    #[error("policy error: {0}")]
    Policy(String),

    /// Every attempt allowed by the retry budget failed with a retryable error.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<PipelineError>,
    },
}

impl PipelineError {
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        PipelineError::Configuration(message.into())
    }

    pub fn usage<S: Into<String>>(message: S) -> Self {
        PipelineError::Usage(message.into())
    }

    pub fn transport<S: Into<String>>(kind: TransportErrorKind, message: S) -> Self {
        PipelineError::Transport {
            kind,
            message: message.into(),
        }
    }

    pub fn canceled<S: Into<String>>(message: S) -> Self {
        PipelineError::Canceled(message.into())
    }

    pub fn policy<S: Into<String>>(message: S) -> Self {
        PipelineError::Policy(message.into())
    }

    /// Get the classification of this error.
    ///
    /// - Configuration: `Configuration`
    /// - Usage: `Usage`
    /// - Transport: `TransientTransport`
    /// - Canceled: `Canceled`
    /// - Body/Policy/RetriesExhausted: `NonRetryable`
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Configuration(_) => ErrorKind::Configuration,
            PipelineError::Usage(_) => ErrorKind::Usage,
            PipelineError::Transport { .. } => ErrorKind::TransientTransport,
            PipelineError::Canceled(_) => ErrorKind::Canceled,
            PipelineError::Body(_)
            | PipelineError::Policy(_)
            | PipelineError::RetriesExhausted { .. } => ErrorKind::NonRetryable,
        }
    }

    /// Returns whether another attempt could succeed.
    ///
    /// # Example
    ///
    /// ```
    /// use http_pipeline::PipelineError;
    /// use http_pipeline_core::TransportErrorKind;
    ///
    /// let err = PipelineError::transport(TransportErrorKind::Connect, "connection refused");
    /// assert!(err.is_retryable());
    ///
    /// let err = PipelineError::canceled("caller gave up");
    /// assert!(!err.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, PipelineError::Canceled(_))
    }

    /// Get the transport failure mode, if this is a transport error.
    pub fn transport_kind(&self) -> Option<TransportErrorKind> {
        match self {
            PipelineError::Transport { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Get the error of the final attempt, unwrapping an exhausted retry budget.
    pub fn last_attempt_error(&self) -> &PipelineError {
        match self {
            PipelineError::RetriesExhausted { last, .. } => last.last_attempt_error(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_error_kinds() {
        assert_eq!(
            PipelineError::configuration("no transport").kind(),
            ErrorKind::Configuration
        );
        assert_eq!(PipelineError::usage("inert").kind(), ErrorKind::Usage);
        assert_eq!(
            PipelineError::transport(TransportErrorKind::Timeout, "slow").kind(),
            ErrorKind::TransientTransport
        );
        assert_eq!(PipelineError::canceled("stop").kind(), ErrorKind::Canceled);
        assert_eq!(
            PipelineError::from(BodyError::NotReplayable).kind(),
            ErrorKind::NonRetryable
        );
        assert_eq!(PipelineError::policy("denied").kind(), ErrorKind::NonRetryable);
    }

    #[test]
    fn test_retries_exhausted_is_not_retryable() {
        let last = PipelineError::transport(TransportErrorKind::Connect, "refused");
        assert!(last.is_retryable());

        let err = PipelineError::RetriesExhausted {
            attempts: 3,
            last: Box::new(last),
        };
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), ErrorKind::NonRetryable);
        assert_eq!(
            err.last_attempt_error().transport_kind(),
            Some(TransportErrorKind::Connect)
        );
        assert_eq!(
            err.to_string(),
            "retries exhausted after 3 attempts: transport error (connect): refused"
        );
    }

    #[test]
    fn test_body_error_is_transparent() {
        let err = PipelineError::from(BodyError::NotReplayable);
        assert_eq!(err.to_string(), "request body is not replayable");
        assert!(!err.is_canceled());
    }
}
