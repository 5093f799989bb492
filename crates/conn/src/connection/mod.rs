//! Connection handling.
//!
//! - [`Connection`]: the sans-IO state machine for one client connection. It parses
//!   requests, dispatches them to the application synchronously or on the worker pool,
//!   turns the outcome into a response and decides between reset and close. All effects
//!   are queued as [`ConnectionAction`]s.
//! - [`HttpConnection`]: the driver that performs those actions on an async transport.
//! - [`AsyncCallback`] / [`Completion`]: how results produced elsewhere get back to the
//!   connection.
//! - [`needs_content_length`] / [`set_content_length`]: Content-Length inference for
//!   in-memory bodies.

mod action;
mod completion;
mod content_length;
mod http_connection;
mod message_writer;
mod state_machine;

pub use action::{CloseMode, ConnectionAction, Job};
pub use completion::{AsyncCallback, CallbackError, Completion, CompletionReceiver, CompletionSender};
pub use state_machine::{Connection, State};
pub use content_length::{needs_content_length, set_content_length};
pub use http_connection::{ConnectionOptions, DEFAULT_IDLE_TIMEOUT, HttpConnection};
