//! Transports: the terminal stage of every chain.
//!
//! This module provides:
//!
//! - [`Transport`]: The network exchange contract
//! - [`HyperTransport`]: HTTP/1.1 and HTTP/2 over hyper_util's legacy client,
//!   with rustls TLS (feature-gated) and connection pooling
//! - [`MockTransport`]: A scripted test double that records every attempt
//!
//! Transports surface failures below HTTP as
//! [`PipelineError::Transport`](crate::PipelineError::Transport) so the retry
//! stage can classify them apart from status codes.
//!
//! # Feature Flags
//!
//! - `tls` (default) - Enables `tls-ring` + `tls-native-roots` for convenience
//! - `tls-ring` / `tls-aws-lc` - Crypto providers
//! - `tls-native-roots` / `tls-webpki-roots` - Root certificates

mod connector;
mod hyper;
mod mock;
mod stage;

pub use connector::{build_https_connector, has_tls_support};
pub use hyper::{HyperTransport, HyperTransportBuilder};
pub use mock::{MockReply, MockResponse, MockTransport, ReleaseProbe, RequestSnapshot};
pub(crate) use stage::{TransportStage, with_timeout};

#[cfg(any(feature = "tls-native-roots", feature = "tls-webpki-roots"))]
pub use connector::default_tls_config;

// Re-export rustls types that users might need for TLS configuration
pub use rustls::ClientConfig as TlsClientConfig;

use crate::policy::BoxFuture;
use crate::{PipelineError, Request, Response};

/// Performs one network exchange.
///
/// A transport never calls further policies. It receives the pipeline request
/// by mutable reference so that a one-shot body can be moved out for sending
/// while the request itself stays with the message.
pub trait Transport: Send + Sync {
    fn send<'a>(&'a self, request: &'a mut Request)
    -> BoxFuture<'a, Result<Response, PipelineError>>;
}
