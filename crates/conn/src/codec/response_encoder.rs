use bytes::{Buf, BytesMut};
use http::{HeaderMap, StatusCode};
use tokio_util::codec::Encoder;
use tracing::error;

use crate::codec::body::PayloadEncoder;
use crate::codec::header::HeaderEncoder;
use crate::protocol::{PayloadItem, SendError};

/// One piece of an outgoing response.
#[derive(Debug)]
pub enum ResponsePart<'a, D: Buf = bytes::Bytes> {
    /// The head; `skip_body` suppresses the body of a HEAD response.
    Head { status: StatusCode, headers: &'a HeaderMap, skip_body: bool },
    Body(PayloadItem<D>),
}

/// Encodes a response as a head followed by body items framed the way the head announced.
#[derive(Debug, Default)]
pub struct ResponseEncoder {
    header_encoder: HeaderEncoder,
    payload_encoder: Option<PayloadEncoder>,
}

impl ResponseEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Framing chosen by the last encoded head, if any.
    pub fn payload_encoder(&self) -> Option<&PayloadEncoder> {
        self.payload_encoder.as_ref()
    }
}

impl<D: Buf> Encoder<ResponsePart<'_, D>> for ResponseEncoder {
    type Error = SendError;

    fn encode(&mut self, item: ResponsePart<'_, D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            ResponsePart::Head { status, headers, skip_body } => {
                if self.payload_encoder.is_some() {
                    error!("expect payload item but receive response head");
                    return Err(SendError::invalid_header("response head already sent"));
                }

                self.payload_encoder = Some(PayloadEncoder::for_response(status, headers, skip_body)?);
                self.header_encoder.encode((status, headers), dst)
            }

            ResponsePart::Body(payload_item) => {
                let Some(payload_encoder) = self.payload_encoder.as_mut() else {
                    error!("expect response header but receive payload item");
                    return Err(SendError::invalid_body("response body before head"));
                };

                payload_encoder.encode(payload_item, dst)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http::{HeaderValue, header};

    use super::*;

    #[test]
    fn head_then_chunked_body() {
        let mut headers = HeaderMap::new();
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));

        let mut encoder = ResponseEncoder::new();
        let mut dst = BytesMut::new();
        let head: ResponsePart<'_, Bytes> = ResponsePart::Head { status: StatusCode::OK, headers: &headers, skip_body: false };
        encoder.encode(head, &mut dst).unwrap();
        encoder.encode(ResponsePart::Body(PayloadItem::Chunk(Bytes::from_static(b"abc"))), &mut dst).unwrap();
        encoder.encode(ResponsePart::Body(PayloadItem::<Bytes>::Eof), &mut dst).unwrap();

        assert_eq!(&dst[..], b"HTTP/1.1 200 OK\r\ntransfer-encoding: chunked\r\n\r\n3\r\nabc\r\n0\r\n\r\n");
    }

    #[test]
    fn body_before_head_is_an_error() {
        let mut dst = BytesMut::new();
        let result = ResponseEncoder::new().encode(ResponsePart::Body(PayloadItem::Chunk(Bytes::from_static(b"x"))), &mut dst);
        assert!(result.is_err());
    }
}
