//! Pipeline and per-request options.
//!
//! [`PipelineOptions`] configures a pipeline once (the client options tier).
//! [`RequestContext`] configures one logical operation (the request tier).

use std::sync::Arc;
use std::time::Duration;

use http::header::HeaderName;
use http_pipeline_core::PipelinePosition;
use tokio_util::sync::CancellationToken;

use super::retry::RetryOptions;
use crate::chain::PolicyDescriptor;
use crate::policy::Policy;
use crate::transport::Transport;

/// Default bound on a single transport attempt.
pub const DEFAULT_NETWORK_TIMEOUT: Duration = Duration::from_secs(100);

/// Default header carrying the client request id.
pub const DEFAULT_REQUEST_ID_HEADER: HeaderName =
    HeaderName::from_static("x-ms-client-request-id");

/// Options for the built-in logging stage.
#[derive(Clone, Debug)]
pub struct LoggingOptions {
    /// Whether the logging stage is part of the chain.
    pub enabled: bool,
    /// Headers whose values are logged verbatim. All others are redacted.
    pub allowed_header_names: Vec<HeaderName>,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_header_names: [
                "accept",
                "cache-control",
                "content-length",
                "content-type",
                "date",
                "etag",
                "retry-after",
                "retry-after-ms",
                "user-agent",
                "x-ms-client-request-id",
                "x-ms-request-id",
                "x-ms-retry-after-ms",
            ]
            .into_iter()
            .map(HeaderName::from_static)
            .collect(),
        }
    }
}

impl LoggingOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options with the logging stage left out of the chain.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Log this header's value instead of redacting it.
    pub fn allow_header(mut self, name: HeaderName) -> Self {
        if !self.allowed_header_names.contains(&name) {
            self.allowed_header_names.push(name);
        }
        self
    }
}

/// Options for building a [`Pipeline`](crate::Pipeline).
///
/// # Example
///
/// ```ignore
/// use http_pipeline::{HeaderPolicy, HyperTransport, PipelineBuilder, PipelineOptions};
/// use std::time::Duration;
///
/// let options = PipelineOptions::new()
///     .transport(HyperTransport::new()?)
///     .per_call_policy(HeaderPolicy::new("x-app", "inventory"))
///     .network_timeout(Duration::from_secs(30));
///
/// let pipeline = PipelineBuilder::new(options).build()?;
/// ```
#[derive(Clone)]
pub struct PipelineOptions {
    pub(crate) transport: Option<Arc<dyn Transport>>,
    pub(crate) policies: Vec<PolicyDescriptor>,
    pub(crate) retry: RetryOptions,
    pub(crate) network_timeout: Option<Duration>,
    pub(crate) request_id_header: Option<HeaderName>,
    pub(crate) logging: LoggingOptions,
    pub(crate) buffer_responses: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            transport: None,
            policies: Vec::new(),
            retry: RetryOptions::default(),
            network_timeout: Some(DEFAULT_NETWORK_TIMEOUT),
            request_id_header: Some(DEFAULT_REQUEST_ID_HEADER),
            logging: LoggingOptions::default(),
            buffer_responses: true,
        }
    }
}

impl PipelineOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the transport that terminates the chain.
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Set a shared transport.
    pub fn transport_arc(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Add a policy that runs once per logical operation.
    pub fn per_call_policy(self, policy: impl Policy + 'static) -> Self {
        self.add_policy(policy, PipelinePosition::PerCall)
    }

    /// Add a policy that runs once per attempt.
    pub fn per_retry_policy(self, policy: impl Policy + 'static) -> Self {
        self.add_policy(policy, PipelinePosition::PerRetry)
    }

    /// Add a policy at any position.
    ///
    /// Policies are kept in the order they are added.
    pub fn add_policy(mut self, policy: impl Policy + 'static, position: PipelinePosition) -> Self {
        self.policies.push(PolicyDescriptor::new(policy, position));
        self
    }

    /// Add a shared policy at any position.
    pub fn add_policy_arc(mut self, policy: Arc<dyn Policy>, position: PipelinePosition) -> Self {
        self.policies.push(PolicyDescriptor::from_arc(policy, position));
        self
    }

    pub fn retry(mut self, retry: RetryOptions) -> Self {
        self.retry = retry;
        self
    }

    /// Bound each transport attempt (and response buffering) by `timeout`.
    ///
    /// Default: 100 seconds.
    pub fn network_timeout(mut self, timeout: Duration) -> Self {
        self.network_timeout = Some(timeout);
        self
    }

    /// Let transport attempts run without a time limit.
    pub fn no_network_timeout(mut self) -> Self {
        self.network_timeout = None;
        self
    }

    /// Set the header that carries the client request id.
    ///
    /// Default: `x-ms-client-request-id`.
    pub fn request_id_header(mut self, name: HeaderName) -> Self {
        self.request_id_header = Some(name);
        self
    }

    /// Do not add a client request id.
    pub fn no_request_id(mut self) -> Self {
        self.request_id_header = None;
        self
    }

    pub fn logging(mut self, logging: LoggingOptions) -> Self {
        self.logging = logging;
        self
    }

    /// Read every response body into memory inside the retry loop.
    ///
    /// Default: true.
    pub fn buffer_responses(mut self, enabled: bool) -> Self {
        self.buffer_responses = enabled;
        self
    }

    pub fn retry_options(&self) -> &RetryOptions {
        &self.retry
    }

    pub fn get_network_timeout(&self) -> Option<Duration> {
        self.network_timeout
    }
}

impl std::fmt::Debug for PipelineOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineOptions")
            .field("transport", &self.transport.is_some())
            .field("policies", &self.policies)
            .field("retry", &self.retry)
            .field("network_timeout", &self.network_timeout)
            .field("request_id_header", &self.request_id_header)
            .field("logging", &self.logging)
            .field("buffer_responses", &self.buffer_responses)
            .finish()
    }
}

/// Options for one logical operation.
///
/// # Example
///
/// ```
/// use http_pipeline::{HeaderPolicy, PipelinePosition, RequestContext};
/// use tokio_util::sync::CancellationToken;
///
/// let token = CancellationToken::new();
/// let context = RequestContext::new()
///     .add_policy(HeaderPolicy::new("x-tenant", "contoso"), PipelinePosition::PerCall)
///     .cancellation(token.clone());
/// ```
#[derive(Clone, Default)]
pub struct RequestContext {
    pub(crate) policies: Vec<PolicyDescriptor>,
    pub(crate) cancellation: Option<CancellationToken>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a policy for this operation only.
    pub fn add_policy(mut self, policy: impl Policy + 'static, position: PipelinePosition) -> Self {
        self.policies.push(PolicyDescriptor::new(policy, position));
        self
    }

    pub fn add_policy_arc(mut self, policy: Arc<dyn Policy>, position: PipelinePosition) -> Self {
        self.policies.push(PolicyDescriptor::from_arc(policy, position));
        self
    }

    /// Attach the caller's cancellation token.
    ///
    /// Without one, the message gets a fresh token that is never canceled.
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("policies", &self.policies)
            .field("cancellation", &self.cancellation.is_some())
            .finish()
    }
}
