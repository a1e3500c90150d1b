//! The per-operation container that flows through the chain.
//!
//! A [`Message`] pairs one [`Request`] with at most one live [`Response`], the
//! caller's cancellation token, and a [`PropertyBag`] that policies use to
//! hand state to each other.

use std::any::Any;
use std::borrow::Cow;
use std::collections::HashMap;

use tokio_util::sync::CancellationToken;

use crate::chain::PolicyDescriptor;
use crate::{Request, Response};

/// Well-known property bag keys written by the built-in policies.
pub mod keys {
    /// Attempt number of the current transport attempt (`u32`, 1-based).
    pub const RETRY_ATTEMPT: &str = "retry_attempt";

    /// Time since the first attempt started (`std::time::Duration`).
    pub const RETRY_ELAPSED: &str = "retry_elapsed";

    /// Client request id sent with the operation (`String`).
    pub const CLIENT_REQUEST_ID: &str = "client_request_id";
}

/// A string-keyed map of typed values private to one message.
#[derive(Default)]
pub struct PropertyBag {
    entries: HashMap<Cow<'static, str>, Box<dyn Any + Send + Sync>>,
}

impl PropertyBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, replacing any value stored under the same key.
    pub fn insert<T>(&mut self, key: impl Into<Cow<'static, str>>, value: T)
    where
        T: Any + Send + Sync,
    {
        self.entries.insert(key.into(), Box::new(value));
    }

    /// Get a value if it exists and has type `T`.
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.entries.get(key).and_then(|v| v.downcast_ref())
    }

    pub fn get_mut<T: Any>(&mut self, key: &str) -> Option<&mut T> {
        self.entries.get_mut(key).and_then(|v| v.downcast_mut())
    }

    /// Remove and return a value if it exists and has type `T`.
    ///
    /// A value of a different type is left in place.
    pub fn remove<T: Any>(&mut self, key: &str) -> Option<T> {
        if !self.entries.get(key)?.is::<T>() {
            return None;
        }
        self.entries
            .remove(key)
            .and_then(|v| v.downcast().ok())
            .map(|v| *v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for PropertyBag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

/// One logical operation travelling through a pipeline.
///
/// A message is single-use: [`Pipeline::send`](crate::Pipeline::send) rejects
/// a message that was already sent. Dropping a message releases its current
/// response.
pub struct Message {
    request: Request,
    response: Option<Response>,
    cancellation: CancellationToken,
    properties: PropertyBag,
    policies: Vec<PolicyDescriptor>,
    sent: bool,
}

impl Message {
    /// Create a message for a request.
    pub fn new(request: Request, cancellation: CancellationToken) -> Self {
        Self {
            request,
            response: None,
            cancellation,
            properties: PropertyBag::new(),
            policies: Vec::new(),
            sent: false,
        }
    }

    pub(crate) fn with_policies(mut self, policies: Vec<PolicyDescriptor>) -> Self {
        self.policies = policies;
        self
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    /// Get the current response, if an attempt produced one.
    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    pub fn response_mut(&mut self) -> Option<&mut Response> {
        self.response.as_mut()
    }

    /// Install the response of the latest attempt.
    ///
    /// The previous response, if any, is released before the new one is
    /// stored, so a message never holds two live responses.
    pub fn set_response(&mut self, response: Response) {
        self.release_response();
        self.response = Some(response);
    }

    /// Release the current response. Returns whether there was one.
    pub fn release_response(&mut self) -> bool {
        self.response.take().is_some()
    }

    /// Move the current response out to the caller.
    pub fn take_response(&mut self) -> Option<Response> {
        self.response.take()
    }

    /// Split the message into its request and final response.
    pub fn into_parts(self) -> (Request, Option<Response>) {
        (self.request, self.response)
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_canceled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn properties(&self) -> &PropertyBag {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut PropertyBag {
        &mut self.properties
    }

    /// Returns whether the message carries request-scoped policies.
    pub fn has_policies(&self) -> bool {
        !self.policies.is_empty()
    }

    pub(crate) fn policies(&self) -> &[PolicyDescriptor] {
        &self.policies
    }

    pub fn is_sent(&self) -> bool {
        self.sent
    }

    pub(crate) fn mark_sent(&mut self) {
        self.sent = true;
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("request", &self.request)
            .field("response", &self.response)
            .field("properties", &self.properties)
            .field("policies", &self.policies.len())
            .field("sent", &self.sent)
            .finish_non_exhaustive()
    }
}
