use std::fmt;

use bytes::Bytes;

use crate::protocol::body::DeferredBody;

/// Work submitted to the worker pool.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// An effect requested by a [`Connection`](super::Connection), performed by its driver in
/// queue order.
pub enum ConnectionAction {
    /// Write these bytes to the transport.
    Send(Bytes),

    /// Run this job on the worker pool.
    Defer(Job),

    /// Pump this body and feed its frames back through `on_body_frame`.
    Stream(DeferredBody),

    Close(CloseMode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseMode {
    /// Flush everything queued so far, then close.
    AfterWriting,

    /// Drop anything unwritten and close.
    Immediately,
}

impl fmt::Debug for ConnectionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionAction::Send(bytes) => f.debug_tuple("Send").field(&bytes.len()).finish(),
            ConnectionAction::Defer(_) => f.write_str("Defer"),
            ConnectionAction::Stream(body) => f.debug_tuple("Stream").field(body).finish(),
            ConnectionAction::Close(mode) => f.debug_tuple("Close").field(mode).finish(),
        }
    }
}
