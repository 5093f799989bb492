//! A per-connection HTTP/1.x engine.
//!
//! The crate turns bytes received on a client connection into calls to an application
//! and writes the application's responses back, one request at a time per connection,
//! with keep-alive, pipelining and streamed response bodies.
//!
//! # Architecture
//!
//! - [`connection`]: the sans-IO [`Connection`](connection::Connection) state machine and
//!   the [`HttpConnection`](connection::HttpConnection) driver that runs it on a transport
//! - [`handler`]: the [`Application`](handler::Application) contract and the
//!   [`Reply`](handler::Reply) / [`Outcome`](handler::Outcome) it produces
//! - [`protocol`]: request parse state, request context, response, bodies and errors
//! - [`codec`]: HTTP/1.x wire decoding and encoding
//! - [`worker`]: the bounded pool that runs application calls off the reactor thread
//! - [`backend`]: the owner of live connections, told when each one ends
//! - [`server`]: a TCP server tying it together on a single reactor thread
//!
//! # Execution modes
//!
//! By default the application is called on the reactor thread as soon as a request is
//! complete. A connection configured as threaded, or an application whose
//! [`wants_deferred`](handler::Application::wants_deferred) returns true, runs the call on
//! the [`WorkerPool`](worker::WorkerPool) instead; the result comes back to the reactor
//! through the connection's completion channel.
//!
//! An application can also suspend a request: it takes the
//! [`AsyncCallback`](connection::AsyncCallback) from the context, returns
//! [`Outcome::Suspended`](handler::Outcome::Suspended) (or a reply with status 100) and
//! completes the callback later from anywhere.
//!
//! # Example
//!
//! ```no_run
//! use micro_conn::handler::{HandlerError, Reply, make_application};
//! use micro_conn::protocol::RequestContext;
//! use micro_conn::server::{Server, init_tracing};
//! use tracing::Level;
//!
//! fn hello(ctx: &mut RequestContext) -> Result<Reply, HandlerError> {
//!     Ok(Reply::ok().body(format!("hello {}\r\n", ctx.uri().path())))
//! }
//!
//! init_tracing(Level::INFO);
//! let server = Server::builder().address("127.0.0.1:8080").application(make_application(hello)).build().unwrap();
//! server.run().unwrap();
//! ```
//!
//! # Limitations
//!
//! - HTTP/1.0 and HTTP/1.1 only, no TLS
//! - No `Expect: 100-continue` interim responses
//! - Request bodies are held in memory, up to 16 MiB
//! - Maximum header size: 8KB, maximum number of headers: 64

pub mod backend;
pub mod codec;
pub mod connection;
pub mod handler;
pub mod protocol;
pub mod server;
pub mod worker;

mod utils;
pub(crate) use utils::ensure;
