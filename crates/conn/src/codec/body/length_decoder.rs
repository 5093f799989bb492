//! Decoder for bodies framed by a `Content-Length` header
//! ([RFC 9112 Section 6.2](https://www.rfc-editor.org/rfc/rfc9112#section-6.2)).
//!
//! The announced length is counted down as bytes arrive, so the decoder never reads past
//! the body into a pipelined request that follows it.

use std::cmp;

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::protocol::{ParseError, PayloadItem};

/// Yields up to `length` bytes as chunks, then [`PayloadItem::Eof`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LengthDecoder {
    /// Bytes of the body not read yet
    length: u64,
}

impl LengthDecoder {
    /// Creates a decoder for a body of `length` bytes.
    ///
    /// # Arguments
    /// * `length` - The body size announced by the `Content-Length` header
    pub fn new(length: u64) -> Self {
        Self { length }
    }
}

impl Decoder for LengthDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    /// Takes as much of the remaining body as `src` holds.
    ///
    /// # Returns
    /// * `Ok(Some(PayloadItem::Chunk(bytes)))` with at most the remaining length
    /// * `Ok(Some(PayloadItem::Eof))` once the whole body was read
    /// * `Ok(None)` when `src` is empty and body bytes are still due
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.length == 0 {
            return Ok(Some(PayloadItem::Eof));
        }

        if src.is_empty() {
            return Ok(None);
        }

        // never split past the end of the body
        let len = cmp::min(self.length, src.len() as u64);
        let bytes = src.split_to(usize::try_from(len).unwrap_or(usize::MAX)).freeze();

        self.length -= bytes.len() as u64;
        Ok(Some(PayloadItem::Chunk(bytes)))
    }
}
