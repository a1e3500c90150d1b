//! Hyper-based HTTP transport.
//!
//! This module provides [`HyperTransport`], the network transport built on
//! hyper_util's legacy client.

use std::error::Error as StdError;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use http_pipeline_core::{TransportBody, TransportErrorKind};
use hyper::body::Incoming;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::{Client, connect::HttpConnector};
use hyper_util::rt::{TokioExecutor, TokioTimer};
use rustls::ClientConfig;
use tower_service::Service;

use super::Transport;
use super::connector::{build_https_connector, resolve_tls_config};
use crate::policy::BoxFuture;
use crate::{PipelineError, Request, Response};

type HyperClient = Client<HttpsConnector<HttpConnector>, TransportBody>;

/// HTTP transport using hyper_util's legacy client.
///
/// Supports HTTP/1.1 and HTTP/2 with TLS, connection pooling, and protocol
/// negotiation via ALPN. Cloning is cheap and clones share the pool.
///
/// # Example
///
/// ```ignore
/// use http_pipeline::{HyperTransport, PipelineBuilder, PipelineOptions};
///
/// let transport = HyperTransport::builder()
///     .pool_max_idle_per_host(8)
///     .build()?;
///
/// let pipeline = PipelineBuilder::new(PipelineOptions::new().transport(transport)).build()?;
/// ```
#[derive(Clone)]
pub struct HyperTransport {
    client: HyperClient,
    http2_only: bool,
}

impl std::fmt::Debug for HyperTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperTransport")
            .field("http2_only", &self.http2_only)
            .finish_non_exhaustive()
    }
}

impl HyperTransport {
    pub fn builder() -> HyperTransportBuilder {
        HyperTransportBuilder::new()
    }

    /// Create a new transport with default settings.
    pub fn new() -> Result<Self, PipelineError> {
        Self::builder().build()
    }

    /// Send a wire request and receive the streaming response.
    pub async fn request(
        &self,
        request: http::Request<TransportBody>,
    ) -> Result<http::Response<Incoming>, PipelineError> {
        self.client.request(request).await.map_err(classify_error)
    }

    pub fn is_http2_only(&self) -> bool {
        self.http2_only
    }
}

impl Transport for HyperTransport {
    fn send<'a>(
        &'a self,
        request: &'a mut Request,
    ) -> BoxFuture<'a, Result<Response, PipelineError>> {
        Box::pin(async move {
            let wire = request.to_http()?;
            let response = self.request(wire).await?;
            Ok(Response::from_http(response))
        })
    }
}

/// Map a hyper client failure onto a transport error kind.
fn classify_error(error: hyper_util::client::legacy::Error) -> PipelineError {
    let kind = if error.is_connect() {
        TransportErrorKind::Connect
    } else if is_timeout(&error) {
        TransportErrorKind::Timeout
    } else {
        TransportErrorKind::Io
    };

    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    PipelineError::transport(kind, message)
}

fn is_timeout(error: &(dyn StdError + 'static)) -> bool {
    let mut source = Some(error);
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::TimedOut {
                return true;
            }
        }
        source = cause.source();
    }
    false
}

/// Builder for [`HyperTransport`].
///
/// # Example
///
/// ```ignore
/// use http_pipeline::HyperTransportBuilder;
/// use std::time::Duration;
///
/// let transport = HyperTransportBuilder::new()
///     .connect_timeout(Duration::from_secs(5))
///     .pool_idle_timeout(Duration::from_secs(90))
///     .build()?;
/// ```
pub struct HyperTransportBuilder {
    /// `None` falls back to the feature-selected default config.
    tls_config: Option<ClientConfig>,
    http2_only: bool,
    connect_timeout: Option<Duration>,
    /// `None` keeps idle connections forever.
    pool_idle_timeout: Option<Duration>,
    pool_max_idle_per_host: usize,
    h2_keep_alive_interval: Option<Duration>,
    h2_keep_alive_timeout: Option<Duration>,
}

impl Default for HyperTransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HyperTransportBuilder {
    pub fn new() -> Self {
        Self {
            tls_config: None,
            http2_only: false,
            connect_timeout: None,
            pool_idle_timeout: Some(Duration::from_secs(90)),
            pool_max_idle_per_host: 32,
            h2_keep_alive_interval: None,
            h2_keep_alive_timeout: None,
        }
    }

    /// Set a custom TLS configuration (custom roots, client certificates).
    pub fn tls_config(mut self, config: ClientConfig) -> Self {
        self.tls_config = Some(config);
        self
    }

    /// Use HTTP/2 without the HTTP/1.1 upgrade handshake.
    pub fn http2_only(mut self, enabled: bool) -> Self {
        self.http2_only = enabled;
        self
    }

    /// Bound the time spent establishing a TCP connection.
    ///
    /// Expiry surfaces as a connect failure and is retryable.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Close pooled connections idle for longer than `timeout`.
    ///
    /// Default: 90 seconds.
    pub fn pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.pool_idle_timeout = Some(timeout);
        self
    }

    /// Keep idle pooled connections open indefinitely.
    pub fn pool_idle_timeout_none(mut self) -> Self {
        self.pool_idle_timeout = None;
        self
    }

    /// Default: 32.
    pub fn pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.pool_max_idle_per_host = max;
        self
    }

    /// Send HTTP/2 PING frames at this interval.
    pub fn h2_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.h2_keep_alive_interval = Some(interval);
        self
    }

    /// How long to wait for a PING response before dropping the connection.
    pub fn h2_keep_alive_timeout(mut self, timeout: Duration) -> Self {
        self.h2_keep_alive_timeout = Some(timeout);
        self
    }

    /// Build the transport.
    ///
    /// Fails with a configuration error when no TLS configuration can be
    /// produced from the enabled features.
    pub fn build(self) -> Result<HyperTransport, PipelineError> {
        let tls_config = resolve_tls_config(self.tls_config)?;

        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_connect_timeout(self.connect_timeout);
        let https_connector = build_https_connector(tls_config, http);

        let mut builder = Client::builder(TokioExecutor::new());

        // Required for pool_idle_timeout to take effect
        builder.pool_timer(TokioTimer::new());

        if let Some(timeout) = self.pool_idle_timeout {
            builder.pool_idle_timeout(timeout);
        }
        builder.pool_max_idle_per_host(self.pool_max_idle_per_host);

        if self.http2_only {
            builder.http2_only(true);
        }
        if let Some(interval) = self.h2_keep_alive_interval {
            builder.http2_keep_alive_interval(interval);
        }
        if let Some(timeout) = self.h2_keep_alive_timeout {
            builder.http2_keep_alive_timeout(timeout);
        }

        Ok(HyperTransport {
            client: builder.build(https_connector),
            http2_only: self.http2_only,
        })
    }
}

impl std::fmt::Debug for HyperTransportBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperTransportBuilder")
            .field("tls_config", &self.tls_config.is_some())
            .field("http2_only", &self.http2_only)
            .field("connect_timeout", &self.connect_timeout)
            .field("pool_idle_timeout", &self.pool_idle_timeout)
            .field("pool_max_idle_per_host", &self.pool_max_idle_per_host)
            .field("h2_keep_alive_interval", &self.h2_keep_alive_interval)
            .field("h2_keep_alive_timeout", &self.h2_keep_alive_timeout)
            .finish()
    }
}

// Lets the transport sit under tower middleware outside a pipeline.
impl Service<http::Request<TransportBody>> for HyperTransport {
    type Response = http::Response<Incoming>;
    type Error = PipelineError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // hyper_util legacy::Client is always ready
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<TransportBody>) -> Self::Future {
        let client = self.client.clone();
        Box::pin(async move { client.request(req).await.map_err(classify_error) })
    }
}
