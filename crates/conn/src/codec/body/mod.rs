//! Body framing for requests and responses.
//!
//! - [`PayloadDecoder`] reads a request body framed by `Content-Length` or chunked
//!   transfer coding
//! - [`PayloadEncoder`] writes a response body framed the way its head announces

mod chunked_decoder;
mod chunked_encoder;
mod length_decoder;
mod length_encoder;
mod payload_decoder;
mod payload_encoder;

pub use payload_decoder::PayloadDecoder;
pub use payload_encoder::{PayloadEncoder, status_has_body};
