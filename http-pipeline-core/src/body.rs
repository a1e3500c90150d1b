//! Request and response bodies.
//!
//! - [`RequestBody`]: The body owned by a pipeline request. Buffered bodies can
//!   be replayed on every retry attempt; streaming bodies can be sent once.
//! - [`TransportBody`]: The per-attempt body handed to a network transport.
//! - [`ResponseBody`]: A response body that is either still streaming or
//!   fully buffered in memory.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use http_body::{Body, Frame};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full};
use pin_project_lite::pin_project;

use crate::BodyError;

/// A boxed stream of body chunks.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, BodyError>> + Send>>;

enum RequestInner {
    Empty,
    Buffered(Bytes),
    /// `None` once the stream has been handed to a transport.
    Streaming(Option<BodyStream>),
}

/// The body of a pipeline request.
///
/// Each attempt obtains its own [`TransportBody`] through
/// [`take_for_send`](Self::take_for_send). Buffered bodies hand out a cheap
/// clone of the same bytes, so every attempt reads from the start. A streaming
/// body is handed out once; asking for it again fails with
/// [`BodyError::NotReplayable`].
pub struct RequestBody {
    inner: RequestInner,
}

impl RequestBody {
    /// Create an empty body.
    pub fn empty() -> Self {
        Self {
            inner: RequestInner::Empty,
        }
    }

    /// Create a replayable body from in-memory bytes.
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self {
            inner: RequestInner::Buffered(data.into()),
        }
    }

    /// Create a one-shot body from a stream of chunks.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, BodyError>> + Send + 'static,
    {
        Self {
            inner: RequestInner::Streaming(Some(Box::pin(stream))),
        }
    }

    /// Returns whether this body can be sent more than once.
    pub fn is_replayable(&self) -> bool {
        !matches!(self.inner, RequestInner::Streaming(_))
    }

    /// Returns whether a one-shot body has already been handed to a transport.
    pub fn is_consumed(&self) -> bool {
        matches!(self.inner, RequestInner::Streaming(None))
    }

    /// Get the buffered bytes, if this body is held in memory.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match &self.inner {
            RequestInner::Buffered(data) => Some(data),
            _ => None,
        }
    }

    /// Get the exact length of the body, if known without reading it.
    pub fn content_length(&self) -> Option<u64> {
        match &self.inner {
            RequestInner::Empty => Some(0),
            RequestInner::Buffered(data) => Some(data.len() as u64),
            RequestInner::Streaming(_) => None,
        }
    }

    /// Prepare the body to be sent again from its original position.
    ///
    /// Fails closed with [`BodyError::NotReplayable`] for a streaming body that
    /// was already sent.
    pub fn rewind(&mut self) -> Result<(), BodyError> {
        if self.is_consumed() {
            return Err(BodyError::NotReplayable);
        }
        Ok(())
    }

    /// Produce the body for one transport attempt.
    pub fn take_for_send(&mut self) -> Result<TransportBody, BodyError> {
        match &mut self.inner {
            RequestInner::Empty => Ok(TransportBody::empty()),
            RequestInner::Buffered(data) => Ok(TransportBody::full(data.clone())),
            RequestInner::Streaming(stream) => stream
                .take()
                .map(|stream| TransportBody::Streaming { stream })
                .ok_or(BodyError::NotReplayable),
        }
    }
}

impl Default for RequestBody {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Bytes> for RequestBody {
    fn from(data: Bytes) -> Self {
        Self::from_bytes(data)
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(data: Vec<u8>) -> Self {
        Self::from_bytes(data)
    }
}

impl From<String> for RequestBody {
    fn from(data: String) -> Self {
        Self::from_bytes(data)
    }
}

impl From<&'static str> for RequestBody {
    fn from(data: &'static str) -> Self {
        Self::from_bytes(data)
    }
}

impl std::fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            RequestInner::Empty => write!(f, "RequestBody::Empty"),
            RequestInner::Buffered(data) => f
                .debug_struct("RequestBody::Buffered")
                .field("len", &data.len())
                .finish(),
            RequestInner::Streaming(stream) => f
                .debug_struct("RequestBody::Streaming")
                .field("consumed", &stream.is_none())
                .finish(),
        }
    }
}

pin_project! {
    /// The body of a single transport attempt.
    ///
    /// This type can represent:
    /// - Empty bodies (most GET requests)
    /// - Full bodies (a clone of a buffered request body)
    /// - Streaming bodies (a one-shot request body)
    #[project = TransportBodyProj]
    pub enum TransportBody {
        /// Empty request body.
        Empty,
        /// Full request body with all data available.
        Full {
            data: Option<Bytes>,
        },
        /// Streaming request body from an async stream.
        Streaming {
            #[pin]
            stream: BodyStream,
        },
    }
}

impl TransportBody {
    /// Create an empty body.
    pub fn empty() -> Self {
        TransportBody::Empty
    }

    /// Create a body with the given data.
    pub fn full(data: Bytes) -> Self {
        TransportBody::Full { data: Some(data) }
    }
}

impl Body for TransportBody {
    type Data = Bytes;
    type Error = BodyError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.project() {
            TransportBodyProj::Empty => Poll::Ready(None),
            TransportBodyProj::Full { data } => Poll::Ready(data.take().map(|d| Ok(Frame::data(d)))),
            TransportBodyProj::Streaming { stream } => match stream.poll_next(cx) {
                Poll::Ready(Some(Ok(data))) => Poll::Ready(Some(Ok(Frame::data(data)))),
                Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(e))),
                Poll::Ready(None) => Poll::Ready(None),
                Poll::Pending => Poll::Pending,
            },
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            TransportBody::Empty => true,
            TransportBody::Full { data } => data.is_none(),
            TransportBody::Streaming { .. } => false,
        }
    }

    fn size_hint(&self) -> http_body::SizeHint {
        match self {
            TransportBody::Empty => http_body::SizeHint::with_exact(0),
            TransportBody::Full { data } => {
                http_body::SizeHint::with_exact(data.as_ref().map_or(0, |d| d.len() as u64))
            }
            TransportBody::Streaming { .. } => http_body::SizeHint::default(),
        }
    }
}

impl Default for TransportBody {
    fn default() -> Self {
        TransportBody::Empty
    }
}

impl std::fmt::Debug for TransportBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportBody::Empty => write!(f, "TransportBody::Empty"),
            TransportBody::Full { data } => f
                .debug_struct("TransportBody::Full")
                .field("data_len", &data.as_ref().map(|d| d.len()))
                .finish(),
            TransportBody::Streaming { .. } => write!(f, "TransportBody::Streaming"),
        }
    }
}

/// The body of a pipeline response.
///
/// A body starts out streaming (as received from the transport) or buffered
/// (as produced by a test double or a short-circuiting policy).
/// [`buffer`](Self::buffer) reads a streaming body into memory in place.
pub struct ResponseBody {
    buffered: Option<Bytes>,
    stream: Option<UnsyncBoxBody<Bytes, BodyError>>,
}

impl ResponseBody {
    /// Create an empty, buffered body.
    pub fn empty() -> Self {
        Self::from_bytes(Bytes::new())
    }

    /// Create a buffered body.
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self {
            buffered: Some(data.into()),
            stream: None,
        }
    }

    /// Wrap a streaming HTTP body.
    pub fn from_body<B>(body: B) -> Self
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: std::fmt::Display,
    {
        Self {
            buffered: None,
            stream: Some(body.map_err(|e| BodyError::Read(e.to_string())).boxed_unsync()),
        }
    }

    /// Returns whether the whole body is held in memory.
    pub fn is_buffered(&self) -> bool {
        self.stream.is_none()
    }

    /// Get the buffered bytes, if the body has been buffered.
    pub fn bytes(&self) -> Option<&Bytes> {
        if self.stream.is_some() {
            return None;
        }
        self.buffered.as_ref()
    }

    /// Read a streaming body into memory and return the bytes.
    ///
    /// Calling this on an already buffered body is free.
    pub async fn buffer(&mut self) -> Result<&Bytes, BodyError> {
        if let Some(stream) = self.stream.take() {
            self.buffered = Some(stream.collect().await?.to_bytes());
        }
        Ok(self.buffered.get_or_insert_with(Bytes::new))
    }

    /// Consume the body and return all of its bytes.
    pub async fn into_bytes(self) -> Result<Bytes, BodyError> {
        match self.stream {
            Some(stream) => Ok(stream.collect().await?.to_bytes()),
            None => Ok(self.buffered.unwrap_or_default()),
        }
    }

    /// Convert the body into a boxed HTTP body.
    pub fn into_http_body(self) -> UnsyncBoxBody<Bytes, BodyError> {
        match self.stream {
            Some(stream) => stream,
            None => Full::new(self.buffered.unwrap_or_default())
                .map_err(|never| match never {})
                .boxed_unsync(),
        }
    }
}

impl Default for ResponseBody {
    fn default() -> Self {
        Self::empty()
    }
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.stream, &self.buffered) {
            (Some(_), _) => write!(f, "ResponseBody::Streaming"),
            (None, data) => f
                .debug_struct("ResponseBody::Buffered")
                .field("len", &data.as_ref().map_or(0, |d| d.len()))
                .finish(),
        }
    }
}
