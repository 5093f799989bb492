//! Dispatches request body decoding to the strategy announced by the request head.
//!
//! The head decoder reports a [`PayloadSize`]; this module turns it into one of:
//! - a `Content-Length` decoder reading exactly that many bytes
//! - a chunked transfer coding decoder
//! - a decoder for requests without a body, which reports the end right away

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::codec::body::chunked_decoder::ChunkedDecoder;
use crate::codec::body::length_decoder::LengthDecoder;
use crate::protocol::{ParseError, PayloadItem, PayloadSize};

/// Body decoder of one request, fixed once the head is parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadDecoder {
    /// The framing of the body being read
    kind: Kind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Kind {
    /// Body delimited by `Content-Length`
    Length(LengthDecoder),

    /// Body sent with `Transfer-Encoding: chunked`
    Chunked(ChunkedDecoder),

    /// No body follows the head
    NoBody,
}

impl PayloadDecoder {
    /// Creates a decoder for a request without a body.
    pub fn empty() -> Self {
        Self { kind: Kind::NoBody }
    }

    /// Creates a decoder for a chunked request body.
    pub fn chunked() -> Self {
        Self { kind: Kind::Chunked(ChunkedDecoder::new()) }
    }

    /// Creates a decoder for a body of known size.
    ///
    /// # Arguments
    /// * `size` - The body length in bytes, as announced by `Content-Length`
    pub fn fix_length(size: u64) -> Self {
        Self { kind: Kind::Length(LengthDecoder::new(size)) }
    }
}

impl From<PayloadSize> for PayloadDecoder {
    fn from(size: PayloadSize) -> Self {
        match size {
            PayloadSize::Length(n) => Self::fix_length(n),
            PayloadSize::Chunked => Self::chunked(),
            PayloadSize::Empty => Self::empty(),
        }
    }
}

impl Decoder for PayloadDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    /// Decodes the next piece of the body with the selected strategy.
    ///
    /// # Returns
    /// * `Ok(Some(PayloadItem::Chunk(bytes)))` for body data
    /// * `Ok(Some(PayloadItem::Eof))` once the body is complete, immediately for `NoBody`
    /// * `Ok(None)` when more bytes are needed
    /// * `Err(ParseError)` when the chunked framing is malformed
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match &mut self.kind {
            Kind::Length(length_decoder) => length_decoder.decode(src),
            Kind::Chunked(chunked_decoder) => chunked_decoder.decode(src),
            Kind::NoBody => Ok(Some(PayloadItem::Eof)),
        }
    }
}
