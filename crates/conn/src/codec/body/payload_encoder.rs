//! Frames response body data according to the response head.

use bytes::{Buf, BytesMut};
use http::{HeaderMap, StatusCode, header};
use tokio_util::codec::Encoder;

use crate::codec::body::chunked_encoder::ChunkedEncoder;
use crate::codec::body::length_encoder::LengthEncoder;
use crate::codec::header::has_chunked_coding;
use crate::protocol::{PayloadItem, SendError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadEncoder {
    kind: Kind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Kind {
    /// `Content-Length` delimited
    Length(LengthEncoder),

    /// `Transfer-Encoding: chunked`
    Chunked(ChunkedEncoder),

    /// delimited by closing the connection
    Raw,

    /// HEAD responses and body-less status codes
    NoBody,
}

impl PayloadEncoder {
    pub fn empty() -> Self {
        Self { kind: Kind::NoBody }
    }

    pub fn chunked() -> Self {
        Self { kind: Kind::Chunked(ChunkedEncoder::new()) }
    }

    pub fn fix_length(size: u64) -> Self {
        Self { kind: Kind::Length(LengthEncoder::new(size)) }
    }

    pub fn raw() -> Self {
        Self { kind: Kind::Raw }
    }

    /// Picks the framing a response with this head uses on the wire.
    pub fn for_response(status: StatusCode, headers: &HeaderMap, skip_body: bool) -> Result<Self, SendError> {
        if skip_body || !status_has_body(status) {
            return Ok(Self::empty());
        }

        if has_chunked_coding(headers) {
            return Ok(Self::chunked());
        }

        match headers.get(header::CONTENT_LENGTH) {
            Some(value) => {
                let length = value
                    .to_str()
                    .ok()
                    .and_then(|value| value.trim().parse::<u64>().ok())
                    .ok_or_else(|| SendError::invalid_header(format!("content-length {value:?} is not a number")))?;
                Ok(Self::fix_length(length))
            }
            None => Ok(Self::raw()),
        }
    }

    pub fn is_chunked(&self) -> bool {
        matches!(self.kind, Kind::Chunked(_))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.kind, Kind::NoBody)
    }

    /// Whether the end of the body can be found without closing the connection.
    pub fn is_delimited(&self) -> bool {
        !matches!(self.kind, Kind::Raw)
    }
}

/// 1xx, 204 and 304 responses never carry a body.
pub fn status_has_body(status: StatusCode) -> bool {
    !(status.is_informational() || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED)
}

impl<D: Buf> Encoder<PayloadItem<D>> for PayloadEncoder {
    type Error = SendError;

    fn encode(&mut self, item: PayloadItem<D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match &mut self.kind {
            Kind::Length(encoder) => encoder.encode(item, dst),
            Kind::Chunked(encoder) => encoder.encode(item, dst),
            Kind::Raw => {
                if let PayloadItem::Chunk(mut bytes) = item {
                    while bytes.has_remaining() {
                        let chunk = bytes.chunk();
                        let n = chunk.len();
                        dst.extend_from_slice(chunk);
                        bytes.advance(n);
                    }
                }
                Ok(())
            }
            Kind::NoBody => Ok(()),
        }
    }
}
