//! An ordered HTTP policy pipeline.
//!
//! Every request flows through a chain of policies and ends at a transport:
//!
//! ```text
//! [request id] [PerCall] -> RetryPolicy -> [PerRetry] [logging] [buffering] -> [BeforeTransport] -> Transport
//! ```
//!
//! - `PerCall` policies run once per logical operation.
//! - Everything after the retry stage runs once per attempt.
//! - Within each position bucket, policies come from three tiers in a fixed
//!   order: the [`PipelineBuilder`], the [`PipelineOptions`], then the
//!   [`RequestContext`] of the message.
//!
//! ## Example
//!
//! ```ignore
//! use http_pipeline::{
//!     HeaderPolicy, HyperTransport, PipelineBuilder, PipelineOptions, PipelinePosition,
//!     RequestContext, RetryOptions,
//! };
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! let options = PipelineOptions::new()
//!     .transport(HyperTransport::new()?)
//!     .retry(RetryOptions::new().max_retries(5))
//!     .network_timeout(Duration::from_secs(30))
//!     .add_policy(HeaderPolicy::new("x-client", "inventory"), PipelinePosition::PerRetry);
//! let pipeline = PipelineBuilder::new(options).build()?;
//!
//! let token = CancellationToken::new();
//! let mut message = pipeline.create_message(RequestContext::new().cancellation(token.clone()));
//! message.request_mut().set_uri("https://example.com/items".parse()?);
//!
//! pipeline.send(&mut message).await?;
//! let response = message.take_response();
//! ```
//!
//! ## Retries
//!
//! The retry stage replays the downstream segment on retryable outcomes:
//! statuses in the configured set (408, 429, 500, 502, 503, 504 by default)
//! and transport errors (connect failures, timeouts, broken connections).
//! Delays grow exponentially with jitter, or follow the server's
//! `Retry-After`. When the budget is spent on a retryable status, the last
//! response is returned as a success. Cancellation stops retrying at once.
//!
//! Buffered request bodies are replayed on every attempt. A streaming body
//! is sent once; a retry after it was consumed fails with
//! [`BodyError::NotReplayable`].
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `tls` (default) | `tls-ring` + `tls-native-roots` |
//! | `tls-ring` / `tls-aws-lc` | rustls crypto provider |
//! | `tls-native-roots` / `tls-webpki-roots` | Root certificates |
//! | `tracing` (default) | `http.pipeline.send` spans, retry logs, [`LoggingPolicy`] |

mod chain;
pub mod config;
mod error;
mod message;
mod pipeline;
pub mod policies;
mod policy;
mod request;
mod response;
pub mod transport;

pub use chain::PolicyDescriptor;
pub use config::{
    DEFAULT_NETWORK_TIMEOUT, DEFAULT_REQUEST_ID_HEADER, DelayFn, ExponentialBackoff,
    LoggingOptions, PipelineOptions, RequestContext, RetryClassifier, RetryMode, RetryOptions,
    StatusCodeClassifier,
};
pub use error::PipelineError;
pub use message::{Message, PropertyBag, keys};
pub use pipeline::{Pipeline, PipelineBuilder};
#[cfg(feature = "tracing")]
pub use policies::LoggingPolicy;
pub use policies::{RequestIdPolicy, ResponseBodyPolicy, RetryPolicy, retry_after};
pub use policy::{BoxFuture, FnPolicy, HeaderPolicy, Next, Policy, PolicyKind, SyncPolicy};
pub use request::Request;
pub use response::Response;
pub use transport::{
    HyperTransport, HyperTransportBuilder, MockReply, MockResponse, MockTransport, ReleaseProbe,
    RequestSnapshot, TlsClientConfig, Transport,
};

// Re-export core types
pub use http_pipeline_core::{
    BodyError, BodyStream, ErrorKind, PipelinePosition, RequestBody, ResponseBody, TransportBody,
    TransportErrorKind,
};
