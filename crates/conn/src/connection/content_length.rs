//! Content-Length inference for in-memory response bodies.

use http::{HeaderMap, HeaderValue, StatusCode, header};

use crate::codec::{has_chunked_coding, status_has_body};
use crate::protocol::ResponseBody;

/// Whether the engine should compute a `Content-Length` for this response.
///
/// False when the header is already there, when the status never has a body (1xx, 204,
/// 304), when the handler chose chunked transfer coding, or when the body is deferred and
/// its length is unknown.
pub fn needs_content_length(status: StatusCode, headers: &HeaderMap, body: &ResponseBody) -> bool {
    if headers.contains_key(header::CONTENT_LENGTH) || !status_has_body(status) {
        return false;
    }

    !has_chunked_coding(headers) && !body.is_deferred()
}

/// Sets `Content-Length` to the body's length in bytes. Deferred bodies are left alone.
pub fn set_content_length(headers: &mut HeaderMap, body: &ResponseBody) {
    if let Some(length) = body.byte_len() {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    }
}
