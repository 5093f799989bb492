//! Decodes a whole request: the head through [`HeaderDecoder`], then the body through
//! [`PayloadDecoder`], accumulated in memory until the body ends.
//!
//! The decoder keeps its progress between calls, so a request may arrive split across any
//! number of reads. Bytes past the end of the request are left in the source buffer.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::codec::body::PayloadDecoder;
use crate::codec::header::HeaderDecoder;
use crate::ensure;
use crate::protocol::{ParseError, PayloadItem, PayloadSize, RequestHeader};

/// Largest request body kept in memory
pub const MAX_BODY_SIZE: u64 = 16 * 1024 * 1024;

#[derive(Debug, Default)]
pub struct RequestDecoder {
    header_decoder: HeaderDecoder,
    pending: Option<PendingBody>,
}

#[derive(Debug)]
struct PendingBody {
    header: RequestHeader,
    decoder: PayloadDecoder,
    body: BytesMut,
}

impl RequestDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for RequestDecoder {
    type Item = (RequestHeader, Bytes);
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.pending.is_none() {
            let Some((header, payload_size)) = self.header_decoder.decode(src)? else {
                return Ok(None);
            };

            let capacity = match payload_size {
                PayloadSize::Length(length) => {
                    ensure!(length <= MAX_BODY_SIZE, ParseError::too_large_body(length, MAX_BODY_SIZE));
                    usize::try_from(length).unwrap_or(0)
                }
                PayloadSize::Chunked | PayloadSize::Empty => 0,
            };

            self.pending = Some(PendingBody { header, decoder: payload_size.into(), body: BytesMut::with_capacity(capacity) });
        }

        let Some(pending) = self.pending.as_mut() else {
            return Ok(None);
        };

        loop {
            match pending.decoder.decode(src)? {
                Some(PayloadItem::Chunk(bytes)) => {
                    let size = (pending.body.len() + bytes.len()) as u64;
                    ensure!(size <= MAX_BODY_SIZE, ParseError::too_large_body(size, MAX_BODY_SIZE));
                    pending.body.extend_from_slice(&bytes);
                }
                Some(PayloadItem::Eof) => {
                    let Some(PendingBody { header, body, .. }) = self.pending.take() else {
                        return Ok(None);
                    };
                    trace!(body_size = body.len(), "request body complete");
                    return Ok(Some((header, body.freeze())));
                }
                None => return Ok(None),
            }
        }
    }
}
