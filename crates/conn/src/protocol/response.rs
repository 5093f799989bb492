//! The response of the current request cycle.
//!
//! A [`Response`] is filled from the application's reply, then encoded piece by piece:
//! the head first, then body data framed the way the head announces. It also decides
//! whether the connection may carry another request after this one.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, HeaderValue, StatusCode, header};
use tokio_util::codec::Encoder;
use tracing::{debug, trace};

use crate::codec::{PayloadEncoder, ResponseEncoder, ResponsePart};
use crate::handler::HandlerError;
use crate::protocol::body::DeferredBody;
use crate::protocol::request::has_connection_token;
use crate::protocol::{PayloadItem, ResponseBody, SendError};

/// Runs once when the response is released, whether it was sent or not.
pub type CloseHook = Box<dyn FnOnce() -> Result<(), HandlerError> + Send>;

const SERVER: HeaderValue = HeaderValue::from_static(concat!("micro-conn/", env!("CARGO_PKG_VERSION")));
const KEEP_ALIVE: HeaderValue = HeaderValue::from_static("keep-alive");
const CLOSE: HeaderValue = HeaderValue::from_static("close");

pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: ResponseBody,
    persistent: bool,
    skip_body: bool,
    close_hook: Option<CloseHook>,
    encoder: ResponseEncoder,
}

impl Response {
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: ResponseBody::empty(),
            persistent: false,
            skip_body: false,
            close_hook: None,
            encoder: ResponseEncoder::new(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn set_headers(&mut self, headers: HeaderMap) {
        self.headers = headers;
    }

    pub fn body(&self) -> &ResponseBody {
        &self.body
    }

    pub fn set_body(&mut self, body: ResponseBody) {
        self.body = body;
    }

    pub fn set_close_hook(&mut self, hook: Option<CloseHook>) {
        self.close_hook = hook;
    }

    /// Allows the connection to stay open after this response, if its framing permits.
    pub fn mark_persistent(&mut self) {
        self.persistent = true;
    }

    /// Suppresses the body, as for the response to a HEAD request.
    pub fn skip_body(&mut self) {
        self.skip_body = true;
    }

    /// Whether the connection can carry another request once this response is sent.
    ///
    /// Requires the persistence mark, no `Connection: close` from the handler, and a body
    /// whose end is visible to the client: a `Content-Length`, chunked framing, or no body
    /// at all.
    pub fn is_persistent(&self) -> bool {
        self.persistent
            && !has_connection_token(&self.headers, "close")
            && PayloadEncoder::for_response(self.status, &self.headers, self.skip_body)
                .is_ok_and(|encoder| encoder.is_delimited())
    }

    /// Encodes the status line and headers, deciding the `Connection` header on the way.
    ///
    /// A `Connection` header set by the handler is kept unless the connection is going to
    /// close, in which case it becomes `close`.
    pub fn encode_head(&mut self) -> Result<Bytes, SendError> {
        if !self.is_persistent() {
            self.headers.insert(header::CONNECTION, CLOSE);
        } else if !self.headers.contains_key(header::CONNECTION) {
            self.headers.insert(header::CONNECTION, KEEP_ALIVE);
        }
        if !self.headers.contains_key(header::SERVER) {
            self.headers.insert(header::SERVER, SERVER);
        }

        let mut dst = BytesMut::new();
        let head: ResponsePart<'_, Bytes> =
            ResponsePart::Head { status: self.status, headers: &self.headers, skip_body: self.skip_body };
        self.encoder.encode(head, &mut dst)?;
        trace!(status = self.status.as_u16(), head_size = dst.len(), "encoded response head");
        Ok(dst.freeze())
    }

    /// Frames one piece of body data. The result is empty when nothing goes on the wire.
    pub fn encode_chunk(&mut self, data: Bytes) -> Result<Bytes, SendError> {
        let mut dst = BytesMut::new();
        self.encoder.encode(ResponsePart::Body(PayloadItem::Chunk(data)), &mut dst)?;
        Ok(dst.freeze())
    }

    /// Ends the body, producing the chunked terminator if the framing needs one.
    pub fn encode_eof(&mut self) -> Result<Bytes, SendError> {
        let mut dst = BytesMut::new();
        self.encoder.encode(ResponsePart::Body(PayloadItem::<Bytes>::Eof), &mut dst)?;
        Ok(dst.freeze())
    }

    /// Encodes the head and an in-memory body, handing every non-empty piece to `f` in
    /// order. A deferred body is left in place; only the head is produced for it.
    pub fn for_each_chunk<F>(&mut self, mut f: F) -> Result<(), SendError>
    where
        F: FnMut(Bytes),
    {
        f(self.encode_head()?);

        let chunks = match std::mem::take(&mut self.body) {
            ResponseBody::Deferred(body) => {
                self.body = ResponseBody::Deferred(body);
                return Ok(());
            }
            ResponseBody::Full(bytes) => vec![bytes],
            ResponseBody::Chunks(chunks) => chunks,
        };

        for chunk in chunks {
            let framed = self.encode_chunk(chunk)?;
            if !framed.is_empty() {
                f(framed);
            }
        }

        let eof = self.encode_eof()?;
        if !eof.is_empty() {
            f(eof);
        }
        Ok(())
    }

    /// Moves a deferred body out so the connection can stream it.
    pub fn take_deferred(&mut self) -> Option<DeferredBody> {
        match std::mem::take(&mut self.body) {
            ResponseBody::Deferred(body) => Some(body),
            other => {
                self.body = other;
                None
            }
        }
    }

    /// Releases the response. Never fails: a failing close hook is only logged.
    pub fn close(&mut self) {
        if let ResponseBody::Deferred(body) = std::mem::take(&mut self.body) {
            body.fail();
        }

        if let Some(hook) = self.close_hook.take() {
            match catch_unwind(AssertUnwindSafe(hook)) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(cause = %e, "response close hook failed"),
                Err(_) => debug!("response close hook panicked"),
            }
        }
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("persistent", &self.persistent)
            .field("skip_body", &self.skip_body)
            .field("close_hook", &self.close_hook.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::protocol::body::channel;

    fn collect(response: &mut Response) -> Vec<u8> {
        let mut out = Vec::new();
        response.for_each_chunk(|chunk| out.extend_from_slice(&chunk)).unwrap();
        out
    }

    #[test]
    fn length_delimited_response_persists() {
        let mut response = Response::new();
        response.headers_mut().insert(header::CONTENT_LENGTH, HeaderValue::from(5));
        response.set_body(ResponseBody::from("hello"));
        response.mark_persistent();

        assert!(response.is_persistent());
        let out = String::from_utf8(collect(&mut response)).unwrap();
        assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(out.contains("connection: keep-alive\r\n"));
        assert!(out.ends_with("\r\n\r\nhello"));
    }

    #[test]
    fn undelimited_body_is_not_persistent() {
        let mut response = Response::new();
        response.set_body(ResponseBody::from("hello"));
        response.mark_persistent();

        assert!(!response.is_persistent());
        let out = String::from_utf8(collect(&mut response)).unwrap();
        assert!(out.contains("connection: close\r\n"));
        assert!(out.ends_with("hello"));
    }

    #[test]
    fn chunked_framing_and_head_skip() {
        let mut response = Response::new();
        response.headers_mut().insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        response.set_body(ResponseBody::chunks(["ab", "cde"]));
        let out = collect(&mut response);
        assert!(out.ends_with(b"\r\n\r\n2\r\nab\r\n3\r\ncde\r\n0\r\n\r\n"));

        let mut head = Response::new();
        head.headers_mut().insert(header::CONTENT_LENGTH, HeaderValue::from(5));
        head.set_body(ResponseBody::from("hello"));
        head.skip_body();
        head.mark_persistent();
        assert!(head.is_persistent());
        assert!(collect(&mut head).ends_with(b"\r\n\r\n"));
    }

    #[test]
    fn handler_connection_close_wins() {
        let mut response = Response::new();
        response.headers_mut().insert(header::CONTENT_LENGTH, HeaderValue::from(2));
        response.headers_mut().insert(header::CONNECTION, HeaderValue::from_static("Upgrade, Close"));
        response.set_body(ResponseBody::from("ok"));
        response.mark_persistent();

        assert!(!response.is_persistent());
        let out = String::from_utf8(collect(&mut response)).unwrap();
        assert!(out.contains("connection: close\r\n"));
        assert!(!out.contains("keep-alive"));
    }

    #[test]
    fn handler_connection_header_kept_when_persistent() {
        let mut response = Response::new();
        response.headers_mut().insert(header::CONTENT_LENGTH, HeaderValue::from(2));
        response.headers_mut().insert(header::CONNECTION, HeaderValue::from_static("Keep-Alive"));
        response.set_body(ResponseBody::from("ok"));
        response.mark_persistent();

        assert!(response.is_persistent());
        let out = String::from_utf8(collect(&mut response)).unwrap();
        assert!(out.contains("connection: Keep-Alive\r\n"));
    }

    #[test]
    fn not_modified_persists_without_length() {
        let mut response = Response::new();
        response.set_status(StatusCode::NOT_MODIFIED);
        response.mark_persistent();
        assert!(response.is_persistent());
    }

    #[test]
    fn deferred_body_stays_for_streaming() {
        let (_writer, body) = channel();
        let mut response = Response::new();
        response.set_body(ResponseBody::from(body));

        let mut pieces = 0;
        response.for_each_chunk(|_| pieces += 1).unwrap();
        assert_eq!(pieces, 1);
        assert!(response.take_deferred().is_some());
        assert!(response.take_deferred().is_none());
    }

    #[test]
    fn close_runs_hook_once_and_swallows_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let mut response = Response::new();
        response.set_close_hook(Some(Box::new(move || -> Result<(), HandlerError> {
            counter.fetch_add(1, Ordering::SeqCst);
            Err("hook failed".into())
        })));

        response.close();
        response.close();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn close_fails_unsent_deferred_body() {
        let (writer, body) = channel();
        let mut response = Response::new();
        response.set_body(ResponseBody::from(body));
        response.close();
        assert!(writer.is_aborted());
    }
}
