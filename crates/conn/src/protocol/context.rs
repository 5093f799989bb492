//! The per-request context handed to the application.
//!
//! Everything the application may read about a request lives in named fields here instead
//! of a loosely typed map: the parsed head, the body, the peer address, the execution mode
//! and the completion handle used to finish a suspended response later.

use std::sync::OnceLock;

use bytes::Bytes;
use http::{Extensions, HeaderMap, HeaderValue, Method, Uri, Version};
use tokio_util::sync::CancellationToken;

use crate::connection::AsyncCallback;
use crate::protocol::RequestHeader;

const X_FORWARDED_FOR: &str = "x-forwarded-for";

#[derive(Debug)]
pub struct RequestContext {
    header: RequestHeader,
    body: Bytes,
    remote_addr: Option<String>,
    forwarded_for: OnceLock<Option<String>>,
    threaded: bool,
    async_callback: Option<AsyncCallback>,
    closed: CancellationToken,
    extensions: Extensions,
}

impl RequestContext {
    pub fn new(header: RequestHeader, body: Bytes) -> Self {
        Self {
            header,
            body,
            remote_addr: None,
            forwarded_for: OnceLock::new(),
            threaded: false,
            async_callback: None,
            closed: CancellationToken::new(),
            extensions: Extensions::new(),
        }
    }

    pub fn header(&self) -> &RequestHeader {
        &self.header
    }

    pub fn method(&self) -> &Method {
        self.header.method()
    }

    pub fn uri(&self) -> &Uri {
        self.header.uri()
    }

    pub fn version(&self) -> Version {
        self.header.version()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.header.headers()
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Peer address of the connection, resolved by the engine before the application runs.
    pub fn remote_addr(&self) -> Option<&str> {
        self.remote_addr.as_deref()
    }

    pub(crate) fn set_remote_addr(&mut self, addr: impl Into<String>) {
        self.remote_addr = Some(addr.into());
    }

    /// First hop of the `X-Forwarded-For` header, resolved on first access.
    pub fn forwarded_for(&self) -> Option<&str> {
        self.forwarded_for
            .get_or_init(|| {
                self.headers()
                    .get(X_FORWARDED_FOR)
                    .and_then(|value: &HeaderValue| value.to_str().ok())
                    .and_then(|value| value.split(',').next())
                    .map(|value| value.trim().to_string())
                    .filter(|value| !value.is_empty())
            })
            .as_deref()
    }

    /// Whether the application is running on the worker pool for this request.
    pub fn is_threaded(&self) -> bool {
        self.threaded
    }

    pub(crate) fn set_threaded(&mut self, threaded: bool) {
        self.threaded = threaded;
    }

    pub(crate) fn install_async_callback(&mut self, callback: AsyncCallback) {
        self.async_callback = Some(callback);
    }

    /// Takes the completion handle of this request.
    ///
    /// An application that wants to answer later takes the handle, returns
    /// [`Outcome::Suspended`](crate::handler::Outcome::Suspended) and calls
    /// [`AsyncCallback::complete`] once the reply is ready. The handle can only be taken
    /// once.
    pub fn take_async_callback(&mut self) -> Option<AsyncCallback> {
        self.async_callback.take()
    }

    /// A token cancelled when the client connection goes away.
    pub fn close_signal(&self) -> CancellationToken {
        self.closed.clone()
    }

    pub(crate) fn set_close_signal(&mut self, closed: CancellationToken) {
        self.closed = closed;
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }
}

#[cfg(test)]
mod tests {
    use http::Request;

    use super::*;

    fn context_with(headers: &[(&str, &str)]) -> RequestContext {
        let mut builder = Request::builder().uri("/");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        RequestContext::new(RequestHeader::from(builder.body(()).unwrap()), Bytes::new())
    }

    #[test]
    fn forwarded_for_takes_first_hop() {
        let context = context_with(&[("X-Forwarded-For", "10.0.0.1, 192.168.1.1")]);
        assert_eq!(context.forwarded_for(), Some("10.0.0.1"));
    }

    #[test]
    fn forwarded_for_missing() {
        let context = context_with(&[]);
        assert_eq!(context.forwarded_for(), None);
        assert_eq!(context.remote_addr(), None);
    }

    #[test]
    fn async_callback_absent_until_installed() {
        let mut context = context_with(&[]);
        assert!(context.take_async_callback().is_none());
        assert!(!context.is_threaded());
    }
}
