//! The owner of live connections.
//!
//! A [`Backend`] hands out [`ConnectionId`]s and is told exactly once when each
//! connection is unbound. Connections only hold a `Weak` reference to it, so a backend
//! that is already gone is simply not notified.

use std::fmt;

/// Identifies a connection within its backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub trait Backend: Send + Sync {
    /// Called once per connection, when it is unbound.
    fn connection_finished(&self, id: ConnectionId);
}
