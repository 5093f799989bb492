//! Serializes a response head: the status line followed by the header fields.
//!
//! The connection decides `Connection`, `Content-Length` and `Transfer-Encoding` before
//! encoding, so the encoder writes the map as given.

use std::io::{self, Write};

use bytes::{BufMut, BytesMut};
use http::{HeaderMap, StatusCode};
use tokio_util::codec::Encoder;

use crate::protocol::SendError;

/// Initial buffer size reserved for a response head
const INIT_HEADER_SIZE: usize = 1024;

#[derive(Debug, Default, Clone, Copy)]
pub struct HeaderEncoder;

impl<'a> Encoder<(StatusCode, &'a HeaderMap)> for HeaderEncoder {
    type Error = SendError;

    fn encode(&mut self, item: (StatusCode, &'a HeaderMap), dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (status, headers) = item;

        dst.reserve(INIT_HEADER_SIZE);
        write!(FastWrite(dst), "HTTP/1.1 {} {}\r\n", status.as_str(), status.canonical_reason().unwrap_or(""))?;

        for (header_name, header_value) in headers {
            dst.put_slice(header_name.as_ref());
            dst.put_slice(b": ");
            dst.put_slice(header_value.as_ref());
            dst.put_slice(b"\r\n");
        }
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

struct FastWrite<'a>(&'a mut BytesMut);

impl Write for FastWrite<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
