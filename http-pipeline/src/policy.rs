//! Policies: the middleware stages of a pipeline.
//!
//! A policy observes or modifies the request, delegates to the rest of the
//! chain through [`Next`], then observes or modifies the response.
//!
//! # Example
//!
//! ```ignore
//! use http_pipeline::{BoxFuture, Message, Next, PipelineError, Policy};
//!
//! struct Stamp;
//!
//! impl Policy for Stamp {
//!     fn process<'a>(
//!         &'a self,
//!         message: &'a mut Message,
//!         next: Next<'a>,
//!     ) -> BoxFuture<'a, Result<(), PipelineError>> {
//!         Box::pin(async move {
//!             message.request_mut().headers_mut().append("x-stamp", "1".parse().unwrap());
//!             next.run(&mut *message).await?;
//!             // inspect message.response() here
//!             Ok(())
//!         })
//!     }
//! }
//! ```
//!
//! Policies that never suspend can implement [`SyncPolicy`] instead; they run
//! in the same chain through a blanket [`Policy`] implementation.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use http::header::{HeaderName, HeaderValue};

use crate::{Message, PipelineError};

/// Type alias for a boxed future returning a result.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The role a policy plays in the chain.
///
/// Only one `Retry` and one `Transport` stage exist per effective chain; the
/// pipeline places both itself and rejects them in caller-supplied buckets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PolicyKind {
    Ordinary,
    Retry,
    Transport,
}

/// A unit of middleware.
///
/// Implementations are shared across concurrent sends and must keep per-call
/// state in the [`Message`] (usually its property bag).
pub trait Policy: Send + Sync {
    /// Process a message, calling `next` to run the rest of the chain.
    ///
    /// Returning without calling `next` short-circuits the chain; the policy
    /// should then install a response itself.
    fn process<'a>(
        &'a self,
        message: &'a mut Message,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<(), PipelineError>>;

    fn kind(&self) -> PolicyKind {
        PolicyKind::Ordinary
    }
}

/// The remainder of the chain after the current policy.
///
/// `run` consumes `Next`, so an ordinary policy can run the downstream chain
/// at most once.
pub struct Next<'a> {
    chain: &'a [Arc<dyn Policy>],
}

impl<'a> Next<'a> {
    pub(crate) fn new(chain: &'a [Arc<dyn Policy>]) -> Self {
        Self { chain }
    }

    /// A second handle to the same downstream segment, for the retry stage.
    pub(crate) fn fork(&self) -> Next<'a> {
        Next { chain: self.chain }
    }

    /// Run the rest of the chain.
    pub fn run<'b>(self, message: &'b mut Message) -> BoxFuture<'b, Result<(), PipelineError>>
    where
        'a: 'b,
    {
        match self.chain.split_first() {
            Some((policy, rest)) => policy.process(message, Next { chain: rest }),
            None => Box::pin(async {
                Err(PipelineError::usage(
                    "policy chain ended without a transport stage",
                ))
            }),
        }
    }
}

impl std::fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Next")
            .field("remaining", &self.chain.len())
            .finish()
    }
}

/// A policy that never suspends.
///
/// `on_sending_request` runs before the rest of the chain and
/// `on_received_response` after it completes successfully. Every `SyncPolicy`
/// is a [`Policy`].
pub trait SyncPolicy: Send + Sync {
    fn on_sending_request(&self, message: &mut Message) -> Result<(), PipelineError> {
        let _ = message;
        Ok(())
    }

    fn on_received_response(&self, message: &mut Message) -> Result<(), PipelineError> {
        let _ = message;
        Ok(())
    }
}

impl<T: SyncPolicy> Policy for T {
    fn process<'a>(
        &'a self,
        message: &'a mut Message,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<(), PipelineError>> {
        Box::pin(async move {
            self.on_sending_request(message)?;
            next.run(&mut *message).await?;
            self.on_received_response(message)
        })
    }
}

/// A policy that appends one header value to every request it sees.
///
/// # Example
///
/// ```
/// use http_pipeline::{HeaderPolicy, PipelineOptions, PipelinePosition};
///
/// let options = PipelineOptions::new()
///     .add_policy(HeaderPolicy::new("x-client", "inventory"), PipelinePosition::PerRetry);
/// ```
#[derive(Clone, Debug)]
pub struct HeaderPolicy {
    name: HeaderName,
    value: HeaderValue,
}

impl HeaderPolicy {
    /// Create a new header policy.
    ///
    /// # Panics
    ///
    /// Panics if the header name or value is invalid.
    pub fn new(name: &str, value: &str) -> Self {
        Self {
            name: name.parse().expect("invalid header name"),
            value: value.parse().expect("invalid header value"),
        }
    }

    /// Try to create a new header policy, returning an error if invalid.
    pub fn try_new(name: &str, value: &str) -> Result<Self, PipelineError> {
        let name = name
            .parse()
            .map_err(|_| PipelineError::configuration(format!("invalid header name: {}", name)))?;
        let value = value.parse().map_err(|_| {
            PipelineError::configuration(format!("invalid header value: {}", value))
        })?;
        Ok(Self { name, value })
    }

    /// Create a new header policy from pre-parsed values.
    pub fn from_parts(name: HeaderName, value: HeaderValue) -> Self {
        Self { name, value }
    }
}

impl SyncPolicy for HeaderPolicy {
    fn on_sending_request(&self, message: &mut Message) -> Result<(), PipelineError> {
        message
            .request_mut()
            .append_header(self.name.clone(), self.value.clone());
        Ok(())
    }
}

/// A policy built from a closure.
///
/// # Example
///
/// ```
/// use http_pipeline::FnPolicy;
///
/// let passthrough = FnPolicy::new(|message, next| next.run(message));
/// ```
pub struct FnPolicy<F> {
    f: F,
}

impl<F> FnPolicy<F>
where
    F: for<'a> Fn(&'a mut Message, Next<'a>) -> BoxFuture<'a, Result<(), PipelineError>>
        + Send
        + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> Policy for FnPolicy<F>
where
    F: for<'a> Fn(&'a mut Message, Next<'a>) -> BoxFuture<'a, Result<(), PipelineError>>
        + Send
        + Sync,
{
    fn process<'a>(
        &'a self,
        message: &'a mut Message,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<(), PipelineError>> {
        (self.f)(message, next)
    }
}

impl<F> std::fmt::Debug for FnPolicy<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnPolicy").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use http::StatusCode;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::{Request, Response};

    /// Terminal stage that answers 200 without touching the network.
    struct Answer;

    impl Policy for Answer {
        fn process<'a>(
            &'a self,
            message: &'a mut Message,
            _next: Next<'a>,
        ) -> BoxFuture<'a, Result<(), PipelineError>> {
            Box::pin(async move {
                message.set_response(Response::new(StatusCode::OK));
                Ok(())
            })
        }
    }

    struct CountResponses;

    impl SyncPolicy for CountResponses {
        fn on_received_response(&self, message: &mut Message) -> Result<(), PipelineError> {
            let seen = message.properties().get::<u32>("seen").copied().unwrap_or(0);
            message.properties_mut().insert("seen", seen + 1);
            Ok(())
        }
    }

    fn message() -> Message {
        Message::new(Request::default(), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_chain_runs_in_order() {
        let chain: Vec<Arc<dyn Policy>> = vec![
            Arc::new(HeaderPolicy::new("x-order", "a")),
            Arc::new(HeaderPolicy::new("x-order", "b")),
            Arc::new(CountResponses),
            Arc::new(Answer),
        ];
        let mut message = message();

        Next::new(&chain).run(&mut message).await.unwrap();

        let values: Vec<_> = message
            .request()
            .headers()
            .get_all("x-order")
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        assert_eq!(values, vec!["a", "b"]);
        assert_eq!(message.properties().get::<u32>("seen"), Some(&1));
        assert_eq!(message.response().unwrap().status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_empty_chain_is_usage_error() {
        let chain: Vec<Arc<dyn Policy>> = vec![Arc::new(HeaderPolicy::new("x-a", "1"))];
        let err = Next::new(&chain).run(&mut message()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Usage(_)));
    }

    #[tokio::test]
    async fn test_fn_policy_can_short_circuit() {
        let cached = FnPolicy::new(|message, _next| {
            Box::pin(async move {
                message.set_response(Response::new(StatusCode::NOT_MODIFIED));
                Ok(())
            })
        });
        let chain: Vec<Arc<dyn Policy>> = vec![Arc::new(cached), Arc::new(Answer)];
        let mut message = message();

        Next::new(&chain).run(&mut message).await.unwrap();
        assert_eq!(
            message.response().unwrap().status(),
            StatusCode::NOT_MODIFIED
        );
    }

    #[test]
    fn test_header_policy_try_new() {
        assert!(HeaderPolicy::try_new("x-valid", "value").is_ok());
        let err = HeaderPolicy::try_new("bad header", "value").unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn test_sync_policy_is_ordinary() {
        assert_eq!(HeaderPolicy::new("x-a", "1").kind(), PolicyKind::Ordinary);
    }
}
