//! Request head decoding and response head encoding.
//!
//! - [`HeaderDecoder`] parses a request line and its header fields with `httparse` and
//!   enforces the header count and size limits
//! - [`HeaderEncoder`] writes a status line and header fields

mod header_decoder;
mod header_encoder;

pub(crate) use header_decoder::has_chunked_coding;
pub use header_decoder::HeaderDecoder;
pub use header_encoder::HeaderEncoder;
