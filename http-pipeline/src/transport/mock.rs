//! Scripted transport for tests.
//!
//! [`MockTransport`] answers each attempt with the next scripted
//! [`MockReply`] and records what it was sent. A [`ReleaseProbe`] taken from a
//! [`MockResponse`] reports whether the response built from it has been
//! dropped.
//!
//! # Example
//!
//! ```
//! use http::StatusCode;
//! use http_pipeline::{MockResponse, MockTransport};
//!
//! let transport = MockTransport::new()
//!     .respond(MockResponse::new(StatusCode::SERVICE_UNAVAILABLE))
//!     .respond(MockResponse::new(StatusCode::OK).body("done"));
//!
//! assert_eq!(transport.remaining(), 2);
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode, Uri};
use http_body_util::BodyExt;
use http_pipeline_core::ResponseBody;

use super::Transport;
use crate::policy::BoxFuture;
use crate::{PipelineError, Request, Response};

/// Reports whether a response has been released.
#[derive(Clone, Debug, Default)]
pub struct ReleaseProbe {
    released: Arc<AtomicBool>,
}

impl ReleaseProbe {
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

/// Flips its probe when the response carrying it is dropped.
struct ReleaseGuard(Arc<AtomicBool>);

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// A canned response.
#[derive(Clone, Debug)]
pub struct MockResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    delay: Option<Duration>,
    probe: ReleaseProbe,
}

impl MockResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            delay: None,
            probe: ReleaseProbe::default(),
        }
    }

    /// Append a response header.
    ///
    /// # Panics
    ///
    /// Panics if the header name or value is invalid.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        let name: HeaderName = name.parse().expect("invalid header name");
        let value: HeaderValue = value.parse().expect("invalid header value");
        self.headers.append(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Wait this long before answering.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Get a probe for the response built from this reply.
    pub fn probe(&self) -> ReleaseProbe {
        self.probe.clone()
    }

    /// Build the response, arming its release probe.
    pub fn into_response(self) -> Response {
        let mut response = Response::new(self.status);
        *response.headers_mut() = self.headers;
        response.set_body(ResponseBody::from_bytes(self.body));
        response
            .extensions_mut()
            .insert(Arc::new(ReleaseGuard(self.probe.released)));
        response
    }
}

/// One scripted outcome.
#[derive(Debug)]
pub enum MockReply {
    Response(MockResponse),
    Error(PipelineError),
}

/// What the transport received on one attempt.
#[derive(Clone, Debug)]
pub struct RequestSnapshot {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RequestSnapshot {
    /// All values of a header, in wire order.
    pub fn header_values(&self, name: &str) -> Vec<String> {
        self.headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect()
    }
}

#[derive(Default)]
struct MockState {
    replies: VecDeque<MockReply>,
    requests: Vec<RequestSnapshot>,
}

/// A transport that replays scripted replies, one per attempt.
///
/// Clones share the same script and recording, so a test can keep a handle
/// after giving the transport to a pipeline.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a response.
    pub fn respond(self, response: MockResponse) -> Self {
        self.push(MockReply::Response(response));
        self
    }

    /// Script a failure.
    pub fn fail(self, error: PipelineError) -> Self {
        self.push(MockReply::Error(error));
        self
    }

    pub fn push(&self, reply: MockReply) {
        self.lock().replies.push_back(reply);
    }

    /// Every request received so far, oldest first.
    pub fn requests(&self) -> Vec<RequestSnapshot> {
        self.lock().requests.clone()
    }

    pub fn call_count(&self) -> usize {
        self.lock().requests.len()
    }

    /// Number of scripted replies not yet consumed.
    pub fn remaining(&self) -> usize {
        self.lock().replies.len()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("MockTransport")
            .field("remaining", &state.replies.len())
            .field("calls", &state.requests.len())
            .finish()
    }
}

impl Transport for MockTransport {
    fn send<'a>(
        &'a self,
        request: &'a mut Request,
    ) -> BoxFuture<'a, Result<Response, PipelineError>> {
        Box::pin(async move {
            let (parts, body) = request.to_http()?.into_parts();
            let body = body.collect().await?.to_bytes();

            let reply = {
                let mut state = self.lock();
                state.requests.push(RequestSnapshot {
                    method: parts.method,
                    uri: parts.uri,
                    headers: parts.headers,
                    body,
                });
                state.replies.pop_front()
            };

            match reply {
                Some(MockReply::Response(response)) => {
                    if let Some(delay) = response.delay {
                        tokio::time::sleep(delay).await;
                    }
                    Ok(response.into_response())
                }
                Some(MockReply::Error(error)) => Err(error),
                None => Err(PipelineError::usage(
                    "mock transport has no scripted reply left",
                )),
            }
        })
    }
}
