//! Wire codecs for HTTP/1.x messages.
//!
//! Request side: [`RequestDecoder`] turns received bytes into a request head and its body,
//! using the [`header`] decoder and the body decoders for `Content-Length` and chunked
//! framing.
//!
//! Response side: [`ResponseEncoder`] writes a status line, header fields and body data
//! framed as the head announces (`Content-Length`, chunked, close-delimited or none).

mod body;
mod header;
mod request_decoder;
mod response_encoder;

pub use body::{PayloadDecoder, PayloadEncoder, status_has_body};
pub use header::{HeaderDecoder, HeaderEncoder};
pub(crate) use header::has_chunked_coding;
pub use request_decoder::{MAX_BODY_SIZE, RequestDecoder};
pub use response_encoder::{ResponseEncoder, ResponsePart};
