//! Pipeline responses.

use bytes::Bytes;
use http::{Extensions, HeaderMap, StatusCode};
use http_pipeline_core::ResponseBody;

/// An incoming HTTP response.
///
/// Ownership moves from the transport into the [`Message`](crate::Message)
/// that carried the request. Dropping a `Response` releases its body and the
/// connection resources behind it.
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: ResponseBody,
    extensions: Extensions,
}

impl Response {
    /// Create a response with an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: ResponseBody::empty(),
            extensions: Extensions::new(),
        }
    }

    /// Convert a streaming HTTP response received from the network.
    pub fn from_http<B>(response: http::Response<B>) -> Self
    where
        B: http_body::Body<Data = Bytes> + Send + 'static,
        B::Error: std::fmt::Display,
    {
        let (parts, body) = response.into_parts();
        Self {
            status: parts.status,
            headers: parts.headers,
            body: ResponseBody::from_body(body),
            extensions: parts.extensions,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns whether the status is in the 2xx range.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> &ResponseBody {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut ResponseBody {
        &mut self.body
    }

    pub fn set_body(&mut self, body: ResponseBody) {
        self.body = body;
    }

    pub fn into_body(self) -> ResponseBody {
        self.body
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }
}
