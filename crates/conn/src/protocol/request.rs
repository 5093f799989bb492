//! HTTP request handling.
//!
//! [`RequestHeader`] wraps the standard `http::Request<()>` with the few protocol
//! questions the connection asks about a request (persistence, HEAD). [`Request`] is the
//! per-cycle parse state owned by a connection: it accumulates received bytes until a
//! complete request is available and then hands out the [`RequestContext`].

use bytes::BytesMut;
use http::request::Parts;
use http::{HeaderMap, Method, Request as HttpRequest, Uri, Version, header};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::codec::RequestDecoder;
use crate::protocol::{ParseError, RequestContext};

/// Represents an HTTP request header.
#[derive(Debug)]
pub struct RequestHeader {
    inner: HttpRequest<()>,
}

impl AsRef<HttpRequest<()>> for RequestHeader {
    fn as_ref(&self) -> &HttpRequest<()> {
        &self.inner
    }
}

impl AsMut<HttpRequest<()>> for RequestHeader {
    fn as_mut(&mut self) -> &mut HttpRequest<()> {
        &mut self.inner
    }
}

impl RequestHeader {
    /// Consumes the header and returns the inner `Request<()>`.
    pub fn into_inner(self) -> HttpRequest<()> {
        self.inner
    }

    /// Attaches a body to this header, converting it into a full `Request<T>`.
    pub fn body<T>(self, body: T) -> HttpRequest<T> {
        self.inner.map(|_| body)
    }

    pub fn method(&self) -> &Method {
        self.inner.method()
    }

    pub fn uri(&self) -> &Uri {
        self.inner.uri()
    }

    pub fn version(&self) -> Version {
        self.inner.version()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// Determines if this request may carry a body based on its HTTP method.
    ///
    /// Returns false for GET, HEAD, DELETE, OPTIONS and CONNECT.
    pub fn need_body(&self) -> bool {
        !matches!(self.method(), &Method::GET | &Method::HEAD | &Method::DELETE | &Method::OPTIONS | &Method::CONNECT)
    }

    pub fn is_head(&self) -> bool {
        self.method() == Method::HEAD
    }

    /// Whether the client asked to keep the connection open after this request.
    ///
    /// HTTP/1.1 is persistent unless `Connection: close` is present, HTTP/1.0 only when
    /// `Connection: keep-alive` is present.
    pub fn keep_alive(&self) -> bool {
        match self.version() {
            Version::HTTP_11 => !has_connection_token(self.headers(), "close"),
            Version::HTTP_10 => has_connection_token(self.headers(), "keep-alive"),
            _ => false,
        }
    }
}

/// Whether any `Connection` header lists `token`, compared case-insensitively.
pub(crate) fn has_connection_token(headers: &HeaderMap, token: &str) -> bool {
    headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|item| item.trim().eq_ignore_ascii_case(token))
}

impl From<Parts> for RequestHeader {
    #[inline]
    fn from(parts: Parts) -> Self {
        Self { inner: HttpRequest::from_parts(parts, ()) }
    }
}

impl From<HttpRequest<()>> for RequestHeader {
    #[inline]
    fn from(inner: HttpRequest<()>) -> Self {
        Self { inner }
    }
}

/// Parse state and metadata of the request currently owned by a connection.
///
/// Bytes fed through [`Request::parse`] are accumulated until the decoder yields a full
/// request. Bytes past the end of that request stay buffered; the connection carries them
/// over into the next cycle's `Request` with [`Request::take_buffer`].
#[derive(Debug, Default)]
pub struct Request {
    buf: BytesMut,
    decoder: RequestDecoder,
    context: Option<RequestContext>,
    keep_alive: bool,
    is_head: bool,
}

impl Request {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new request from bytes left over by the previous cycle.
    pub fn with_buffer(buf: BytesMut) -> Self {
        Self { buf, ..Self::default() }
    }

    /// Appends bytes without trying to parse them.
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Feeds bytes to the parser.
    ///
    /// Returns `Ok(true)` once a complete request is available, `Ok(false)` when more data
    /// is needed. Calling it again after completion only buffers the data.
    pub fn parse(&mut self, data: &[u8]) -> Result<bool, ParseError> {
        self.feed(data);
        self.try_complete()
    }

    /// Attempts to complete the request from what is already buffered.
    pub fn try_complete(&mut self) -> Result<bool, ParseError> {
        if self.context.is_some() {
            return Ok(true);
        }

        match self.decoder.decode(&mut self.buf)? {
            Some((header, body)) => {
                trace!(method = %header.method(), uri = %header.uri(), body_size = body.len(), "request parsed");
                self.keep_alive = header.keep_alive();
                self.is_head = header.is_head();
                self.context = Some(RequestContext::new(header, body));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.context.is_some()
    }

    /// The client's persistence preference, known once the request is complete.
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    pub fn is_head(&self) -> bool {
        self.is_head
    }

    pub fn context(&self) -> Option<&RequestContext> {
        self.context.as_ref()
    }

    pub fn context_mut(&mut self) -> Option<&mut RequestContext> {
        self.context.as_mut()
    }

    /// Moves the context out, typically to hand it to the application.
    pub fn take_context(&mut self) -> Option<RequestContext> {
        self.context.take()
    }

    pub fn set_remote_addr(&mut self, addr: impl Into<String>) {
        if let Some(context) = self.context.as_mut() {
            context.set_remote_addr(addr);
        }
    }

    /// Takes the bytes received past the end of this request.
    pub fn take_buffer(&mut self) -> BytesMut {
        std::mem::take(&mut self.buf)
    }

    pub fn has_buffered(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Releases the request body and context. Never fails.
    pub fn close(&mut self) {
        if let Some(context) = self.context.take() {
            trace!(body_size = context.body().len(), "release request");
        }
    }
}
