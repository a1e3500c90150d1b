//! Pipeline configuration.
//!
//! This module provides:
//! - [`PipelineOptions`]: Transport, client-configured policies, retry, timeouts
//! - [`RequestContext`]: Request-scoped policies and cancellation
//! - [`RetryOptions`]: Retry budget, backoff, and classification

mod options;
mod retry;

pub use options::{
    DEFAULT_NETWORK_TIMEOUT, DEFAULT_REQUEST_ID_HEADER, LoggingOptions, PipelineOptions,
    RequestContext,
};
pub use retry::{
    DelayFn, ExponentialBackoff, RetryClassifier, RetryMode, RetryOptions, StatusCodeClassifier,
    defaults,
};
