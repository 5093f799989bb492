//! Results travelling back to a connection from outside its reactor turn.
//!
//! Worker jobs and async callbacks both report through the connection's completion
//! channel. Every [`Completion`] carries the cycle it was issued for, so the connection
//! can recognize results that arrive after that cycle ended.

use std::fmt;

use http::StatusCode;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use crate::handler::{Outcome, Reply};

pub type CompletionSender = mpsc::UnboundedSender<Completion>;
pub type CompletionReceiver = mpsc::UnboundedReceiver<Completion>;

/// The result of one dispatch: `None` ends the cycle on the error path.
#[derive(Debug)]
pub struct Completion {
    pub(crate) cycle: u64,
    pub(crate) outcome: Option<Outcome>,
}

impl Completion {
    pub fn new(cycle: u64, outcome: Option<Outcome>) -> Self {
        Self { cycle, outcome }
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CallbackError {
    #[error("connection closed before the reply was delivered")]
    ConnectionClosed,

    #[error("a suspended request can't be completed with status {0}")]
    InvalidStatus(StatusCode),
}

/// Completion handle of a suspended request.
///
/// Taken from the [`RequestContext`](crate::protocol::RequestContext) by an application
/// that returns [`Outcome::Suspended`]. It can be moved to any thread and used once.
pub struct AsyncCallback {
    cycle: u64,
    sender: CompletionSender,
}

impl AsyncCallback {
    pub(crate) fn new(cycle: u64, sender: CompletionSender) -> Self {
        Self { cycle, sender }
    }

    /// Delivers the reply to the connection.
    ///
    /// A `100 Continue` reply would suspend the request again with no way to resume it, so
    /// it ends the cycle on the error path and is reported as
    /// [`CallbackError::InvalidStatus`].
    pub fn complete(self, reply: Reply) -> Result<(), CallbackError> {
        match Outcome::from(reply) {
            Outcome::Suspended => {
                self.send(None)?;
                Err(CallbackError::InvalidStatus(StatusCode::CONTINUE))
            }
            outcome => self.send(Some(outcome)),
        }
    }

    /// Gives up on the request; the connection closes without a response.
    pub fn fail(self) -> Result<(), CallbackError> {
        self.send(None)
    }

    /// Whether the connection is still there to receive a reply.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    fn send(self, outcome: Option<Outcome>) -> Result<(), CallbackError> {
        self.sender.send(Completion::new(self.cycle, outcome)).map_err(|_closed| {
            debug!(cycle = self.cycle, "async callback fired after the connection closed");
            CallbackError::ConnectionClosed
        })
    }
}

impl fmt::Debug for AsyncCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncCallback").field("cycle", &self.cycle).field("closed", &self.sender.is_closed()).finish()
    }
}
