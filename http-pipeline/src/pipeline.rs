//! The pipeline orchestrator.
//!
//! [`PipelineBuilder`] turns [`PipelineOptions`] plus builder-supplied
//! policies into a [`Pipeline`]. A pipeline creates messages, resolves the
//! effective chain for each one, and drives it to completion.
//!
//! # Example
//!
//! ```ignore
//! use http_pipeline::{
//!     HeaderPolicy, HyperTransport, PipelineBuilder, PipelineOptions, PipelinePosition,
//!     RequestContext,
//! };
//!
//! let pipeline = PipelineBuilder::new(PipelineOptions::new().transport(HyperTransport::new()?))
//!     .per_call_policy(HeaderPolicy::new("user-agent", "inventory/1.0"))
//!     .build()?;
//!
//! let mut message = pipeline.create_message(
//!     RequestContext::new().add_policy(HeaderPolicy::new("x-tenant", "contoso"), PipelinePosition::PerRetry),
//! );
//! message.request_mut().set_uri("https://example.com/items".parse()?);
//! pipeline.send(&mut message).await?;
//! ```

use std::sync::Arc;

use http_pipeline_core::PipelinePosition;
use tokio_util::sync::CancellationToken;
#[cfg(feature = "tracing")]
use tracing::Instrument;

use crate::chain::{ChainBuilder, ChainTemplate, PolicyDescriptor, PolicyTier, check_ordinary};
use crate::config::{PipelineOptions, RequestContext};
#[cfg(feature = "tracing")]
use crate::policies::LoggingPolicy;
use crate::policies::{RequestIdPolicy, ResponseBodyPolicy, RetryPolicy};
use crate::policy::{Next, Policy};
use crate::transport::{Transport, TransportStage};
use crate::{Message, PipelineError, Request, Response};

/// Builder for a positioned [`Pipeline`].
///
/// Policies added here form the builder tier, which comes first in every
/// position bucket, ahead of the client options tier and the request tier.
pub struct PipelineBuilder {
    options: PipelineOptions,
    policies: Vec<PolicyDescriptor>,
}

impl PipelineBuilder {
    pub fn new(options: PipelineOptions) -> Self {
        Self {
            options,
            policies: Vec::new(),
        }
    }

    pub fn per_call_policy(self, policy: impl Policy + 'static) -> Self {
        self.add_policy(policy, PipelinePosition::PerCall)
    }

    pub fn per_retry_policy(self, policy: impl Policy + 'static) -> Self {
        self.add_policy(policy, PipelinePosition::PerRetry)
    }

    /// Add a builder-tier policy at any position.
    pub fn add_policy(mut self, policy: impl Policy + 'static, position: PipelinePosition) -> Self {
        self.policies.push(PolicyDescriptor::new(policy, position));
        self
    }

    pub fn add_policy_arc(mut self, policy: Arc<dyn Policy>, position: PipelinePosition) -> Self {
        self.policies.push(PolicyDescriptor::from_arc(policy, position));
        self
    }

    /// Validate the configuration and build the pipeline.
    ///
    /// Fails with a configuration error when the options carry no transport,
    /// when the retry options are invalid, or when a caller bucket contains a
    /// retry or transport stage.
    pub fn build(self) -> Result<Pipeline, PipelineError> {
        let options = self.options;
        options.retry.validate()?;
        let transport = options
            .transport
            .ok_or_else(|| PipelineError::configuration("pipeline options have no transport"))?;

        let request_id = options
            .request_id_header
            .map(|header| Arc::new(RequestIdPolicy::new(header)) as Arc<dyn Policy>);

        let mut chain = ChainBuilder::new()
            .request_id(request_id)
            .tier(PolicyTier::Builder, self.policies)
            .tier(PolicyTier::ClientOptions, options.policies)
            .retry(Arc::new(RetryPolicy::new(options.retry)));

        #[cfg(feature = "tracing")]
        if options.logging.enabled {
            chain = chain.per_retry_system(Arc::new(LoggingPolicy::new(&options.logging)));
        }
        if options.buffer_responses {
            chain = chain.per_retry_system(Arc::new(ResponseBodyPolicy::new(options.network_timeout)));
        }

        let template = chain
            .transport(Arc::new(TransportStage::new(transport, options.network_timeout)))
            .build()?;

        #[cfg(feature = "tracing")]
        tracing::debug!(stages = template.len(), "pipeline built");

        Ok(Pipeline {
            inner: Arc::new(Inner {
                layout: Layout::Positioned(template),
            }),
        })
    }
}

impl std::fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("options", &self.options)
            .field("policies", &self.policies)
            .finish()
    }
}

enum Layout {
    /// Position buckets merged per message.
    Positioned(ChainTemplate),
    /// A flat chain that cannot place request-scoped policies.
    Raw(Arc<[Arc<dyn Policy>]>),
}

struct Inner {
    layout: Layout,
}

/// An immutable, shareable policy pipeline.
///
/// Cloning is cheap. Concurrent sends share policy instances; all per-call
/// state lives in each [`Message`].
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<Inner>,
}

impl Pipeline {
    pub fn builder(options: PipelineOptions) -> PipelineBuilder {
        PipelineBuilder::new(options)
    }

    /// Build a pipeline from a flat policy list, bypassing position buckets.
    ///
    /// The chain is `policies` followed by `transport`, with no retry stage
    /// and no system policies. Messages carrying request-scoped policies are
    /// rejected by [`send`](Self::send) since they cannot be placed.
    pub fn from_policies(transport: impl Transport + 'static, policies: Vec<Arc<dyn Policy>>) -> Self {
        let mut chain = policies;
        chain.push(Arc::new(TransportStage::new(Arc::new(transport), None)));
        Self {
            inner: Arc::new(Inner {
                layout: Layout::Raw(Arc::from(chain)),
            }),
        }
    }

    /// Create an empty request owned by the pipeline caller.
    pub fn create_request(&self) -> Request {
        Request::default()
    }

    /// Create a message for one logical operation.
    ///
    /// The message takes the context's policies and cancellation token. A
    /// context without a token gets one that is never canceled.
    pub fn create_message(&self, context: RequestContext) -> Message {
        Message::new(
            self.create_request(),
            context.cancellation.unwrap_or_default(),
        )
        .with_policies(context.policies)
    }

    /// Send a message through the effective chain.
    ///
    /// On success the message holds the final response. A retryable status
    /// left over when the retry budget is spent is still a success.
    ///
    /// Fails with a usage error, before any policy runs, when the message was
    /// already sent, when its request-scoped policies include a retry or
    /// transport stage, or when this pipeline cannot place request-scoped
    /// policies at all.
    pub async fn send(&self, message: &mut Message) -> Result<(), PipelineError> {
        if message.is_sent() {
            return Err(PipelineError::usage(
                "message was already sent; create a new message per operation",
            ));
        }

        let chain = match &self.inner.layout {
            Layout::Positioned(template) => {
                check_ordinary(message.policies(), PolicyTier::Request)?;
                template.resolve(message.policies())
            }
            Layout::Raw(chain) => {
                if message.has_policies() {
                    return Err(PipelineError::usage(
                        "pipeline was built from a flat policy list and cannot place \
                         request-scoped policies; build it with PipelineBuilder",
                    ));
                }
                chain.clone()
            }
        };
        message.mark_sent();

        #[cfg(feature = "tracing")]
        let span = tracing::info_span!(
            "http.pipeline.send",
            http.method = %message.request().method(),
            http.url = %message.request().uri(),
        );
        let run = Next::new(&chain).run(message);
        #[cfg(feature = "tracing")]
        let run = run.instrument(span);
        run.await
    }

    /// Send a caller-owned request and return the final response.
    ///
    /// The request is lent to the pipeline for the duration of the call and
    /// handed back in place, with any headers the policies added. The
    /// response is moved out to the caller, so nothing the caller owns is
    /// released by the pipeline.
    pub async fn send_request(&self, request: &mut Request) -> Result<Response, PipelineError> {
        let mut message = Message::new(std::mem::take(request), CancellationToken::new());
        let result = self.send(&mut message).await;
        let (sent, response) = message.into_parts();
        *request = sent;
        result?;
        response.ok_or_else(|| PipelineError::usage("chain completed without a response"))
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner.layout {
            Layout::Positioned(template) => f
                .debug_struct("Pipeline")
                .field("stages", &template.len())
                .field("chain", template)
                .finish(),
            Layout::Raw(chain) => f
                .debug_struct("Pipeline")
                .field("stages", &chain.len())
                .field("raw", &true)
                .finish(),
        }
    }
}
