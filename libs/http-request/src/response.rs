use crate::classify;
use crate::config::TextEncoding;
use crate::decompress::DecodedBody;
use crate::error::{BoxError, RequestError};
use crate::tunnel_guard::TunnelGuard;
use bytes::Bytes;
use http::{HeaderMap, StatusCode, Version};
use http_body::{Body as HttpBody, Frame, SizeHint};
use http_body_util::BodyExt;
use pin_project_lite::pin_project;
use serde::de::DeserializeOwned;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

/// Type alias for the boxed, still-encoded response body produced by the
/// transport.
pub type RawBody = http_body_util::combinators::BoxBody<Bytes, BoxError>;

/// Response metadata: everything known once headers have been received.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    url: String,
    status: StatusCode,
    version: Version,
    headers: HeaderMap,
}

impl ResponseHead {
    pub(crate) fn new(url: String, status: StatusCode, version: Version, headers: HeaderMap) -> Self {
        Self {
            url,
            status,
            version,
            headers,
        }
    }

    pub(crate) fn from_parts(url: String, parts: &http::response::Parts) -> Self {
        Self::new(url, parts.status, parts.version, parts.headers.clone())
    }

    /// Final URL of the response (after redirects).
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Response status code.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// HTTP version the response was received with.
    #[must_use]
    pub fn version(&self) -> Version {
        self.version
    }

    /// Response headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Value of the `Content-Type` header, if present and valid ASCII.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }
}

/// Materialized response body.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Body {
    /// Decoded text
    Text(String),
    /// Parsed JSON (`parse_as_structured`)
    Json(serde_json::Value),
}

/// Fully buffered response: head plus materialized body.
#[derive(Debug, Clone)]
pub struct ResponseEnvelope {
    head: ResponseHead,
    body: Body,
}

impl ResponseEnvelope {
    pub(crate) fn new(head: ResponseHead, body: Body) -> Self {
        Self { head, body }
    }

    /// Response metadata.
    #[must_use]
    pub fn head(&self) -> &ResponseHead {
        &self.head
    }

    /// Response status code.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.head.status
    }

    /// Response headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.head.headers
    }

    /// Final URL of the response.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.head.url
    }

    /// The materialized body.
    #[must_use]
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Body text, when the body was not parsed as JSON.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match &self.body {
            Body::Text(text) => Some(text),
            Body::Json(_) => None,
        }
    }

    /// Parsed JSON value, when `parse_as_structured` was requested.
    #[must_use]
    pub fn json(&self) -> Option<&serde_json::Value> {
        match &self.body {
            Body::Json(value) => Some(value),
            Body::Text(_) => None,
        }
    }

    /// Deserialize the parsed JSON body into a typed value.
    ///
    /// # Errors
    /// Returns `serde_json::Error` if the body is text or does not match `T`.
    pub fn json_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match &self.body {
            Body::Json(value) => T::deserialize(value),
            Body::Text(text) => serde_json::from_str(text),
        }
    }

    /// Split into head and body.
    #[must_use]
    pub fn into_parts(self) -> (ResponseHead, Body) {
        (self.head, self.body)
    }
}

pin_project! {
    /// Live, decoded response body handed to the caller in stream mode.
    ///
    /// Wraps the decompression transform and carries the response metadata,
    /// so status and headers stay inspectable while the body is consumed.
    /// No status-based rejection is applied to streams: check
    /// [`status()`](Self::status) yourself.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let mut stream = spec.send().await?.into_stream().unwrap();
    /// while let Some(chunk) = stream.chunk().await {
    ///     process_chunk(&chunk?);
    /// }
    /// ```
    pub struct ResponseStream {
        head: ResponseHead,
        #[pin]
        inner: DecodedBody,
        guard: Option<TunnelGuard>,
    }
}

impl ResponseStream {
    pub(crate) fn new(head: ResponseHead, inner: DecodedBody, guard: Option<TunnelGuard>) -> Self {
        Self { head, inner, guard }
    }

    /// Response metadata.
    #[must_use]
    pub fn head(&self) -> &ResponseHead {
        &self.head
    }

    /// Response status code.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.head.status
    }

    /// Response headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.head.headers
    }

    /// Next decoded data chunk, or `None` at the end of the body.
    ///
    /// Trailer frames are skipped.
    pub async fn chunk(&mut self) -> Option<Result<Bytes, RequestError>> {
        loop {
            match self.frame().await? {
                Ok(frame) => {
                    if let Ok(data) = frame.into_data() {
                        return Some(Ok(data));
                    }
                }
                Err(err) => return Some(Err(err)),
            }
        }
    }

    /// Drain the rest of the stream and decode it as text.
    ///
    /// # Errors
    /// Returns `RequestError::BodyRead` if the stream fails mid-way.
    pub async fn text(self, encoding: TextEncoding) -> Result<String, RequestError> {
        crate::body::materialize(self, encoding).await
    }
}

impl fmt::Debug for ResponseStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseStream")
            .field("head", &self.head)
            .field("coding", &self.inner.coding())
            .field("proxied", &self.guard.is_some())
            .finish()
    }
}

impl HttpBody for ResponseStream {
    type Data = Bytes;
    type Error = RequestError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();
        match ready!(this.inner.poll_frame(cx)) {
            Some(Ok(frame)) => Poll::Ready(Some(Ok(frame))),
            Some(Err(err)) => Poll::Ready(Some(Err(classify::body_read_error(err, this.head)))),
            None => Poll::Ready(None),
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// Outcome of a successful request.
#[derive(Debug)]
pub enum RequestOutput {
    /// Fully materialized response (default mode)
    Buffered(ResponseEnvelope),
    /// Live decoded stream (`stream_output`)
    Stream(ResponseStream),
}

impl RequestOutput {
    /// Response metadata of either output mode.
    #[must_use]
    pub fn head(&self) -> &ResponseHead {
        match self {
            RequestOutput::Buffered(envelope) => envelope.head(),
            RequestOutput::Stream(stream) => stream.head(),
        }
    }

    /// The buffered envelope, or `None` in stream mode.
    #[must_use]
    pub fn into_envelope(self) -> Option<ResponseEnvelope> {
        match self {
            RequestOutput::Buffered(envelope) => Some(envelope),
            RequestOutput::Stream(_) => None,
        }
    }

    /// The live stream, or `None` in buffered mode.
    #[must_use]
    pub fn into_stream(self) -> Option<ResponseStream> {
        match self {
            RequestOutput::Stream(stream) => Some(stream),
            RequestOutput::Buffered(_) => None,
        }
    }
}
