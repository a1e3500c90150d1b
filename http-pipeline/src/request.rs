//! Pipeline requests.

use http::header::{HeaderName, HeaderValue};
use http::{Extensions, HeaderMap, Method, Uri};
use http_pipeline_core::{RequestBody, TransportBody};

use crate::PipelineError;

/// An outgoing HTTP request owned by a [`Message`](crate::Message).
///
/// Headers are an ordered multimap with case-insensitive names. Policies add
/// values with [`append_header`](Self::append_header), which never overwrites
/// a value added earlier in the chain.
#[derive(Debug)]
pub struct Request {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: RequestBody,
    extensions: Extensions,
}

impl Request {
    /// Create a request with an empty body.
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            body: RequestBody::empty(),
            extensions: Extensions::new(),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn set_method(&mut self, method: Method) {
        self.method = method;
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn set_uri(&mut self, uri: Uri) {
        self.uri = uri;
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Append a header value after any existing values with the same name.
    pub fn append_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.append(name, value);
    }

    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut RequestBody {
        &mut self.body
    }

    pub fn set_body(&mut self, body: impl Into<RequestBody>) {
        self.body = body.into();
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    /// Build the wire request for one transport attempt.
    ///
    /// The pipeline request keeps its headers and a replayable body; only the
    /// body of a one-shot request is moved out.
    pub fn to_http(&mut self) -> Result<http::Request<TransportBody>, PipelineError> {
        let body = self.body.take_for_send()?;
        let mut request = http::Request::new(body);
        *request.method_mut() = self.method.clone();
        *request.uri_mut() = self.uri.clone();
        *request.headers_mut() = self.headers.clone();
        Ok(request)
    }
}

impl Default for Request {
    fn default() -> Self {
        Self::new(Method::GET, Uri::default())
    }
}
