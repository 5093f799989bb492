//! HTTP response body representations.
//!
//! A handler answers with one of three body shapes, and the shape decides what the
//! connection can know ahead of time:
//!
//! - [`ResponseBody::Full`]: a single buffer, length known eagerly
//! - [`ResponseBody::Chunks`]: a finite ordered sequence of buffers, length known eagerly
//! - [`ResponseBody::Deferred`]: a [`DeferredBody`] fed later through a [`BodyWriter`],
//!   length unknown until it reports completion or failure

mod deferred;

pub use deferred::{AbortHandle, BodyWriter, DeferredBody, channel};

use bytes::Bytes;

#[derive(Debug)]
pub enum ResponseBody {
    Full(Bytes),
    Chunks(Vec<Bytes>),
    Deferred(DeferredBody),
}

impl ResponseBody {
    pub fn empty() -> Self {
        ResponseBody::Chunks(Vec::new())
    }

    pub fn full(bytes: impl Into<Bytes>) -> Self {
        ResponseBody::Full(bytes.into())
    }

    pub fn chunks<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        ResponseBody::Chunks(chunks.into_iter().map(Into::into).collect())
    }

    /// Total length in bytes when it is known without producing the body.
    pub fn byte_len(&self) -> Option<u64> {
        match self {
            ResponseBody::Full(bytes) => Some(bytes.len() as u64),
            ResponseBody::Chunks(chunks) => Some(chunks.iter().map(|chunk| chunk.len() as u64).sum()),
            ResponseBody::Deferred(_) => None,
        }
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, ResponseBody::Deferred(_))
    }
}

impl Default for ResponseBody {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<&'static str> for ResponseBody {
    fn from(value: &'static str) -> Self {
        ResponseBody::Full(Bytes::from_static(value.as_bytes()))
    }
}

impl From<String> for ResponseBody {
    fn from(value: String) -> Self {
        ResponseBody::Full(Bytes::from(value))
    }
}

impl From<Bytes> for ResponseBody {
    fn from(value: Bytes) -> Self {
        ResponseBody::Full(value)
    }
}

impl From<Vec<u8>> for ResponseBody {
    fn from(value: Vec<u8>) -> Self {
        ResponseBody::Full(Bytes::from(value))
    }
}

impl From<Vec<Bytes>> for ResponseBody {
    fn from(value: Vec<Bytes>) -> Self {
        ResponseBody::Chunks(value)
    }
}

impl From<DeferredBody> for ResponseBody {
    fn from(value: DeferredBody) -> Self {
        ResponseBody::Deferred(value)
    }
}
