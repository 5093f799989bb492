//! Protocol-level types of one request cycle.
//!
//! - [`Request`]: parse state of the request being received, yielding a [`RequestContext`]
//! - [`RequestHeader`]: the parsed request head
//! - [`RequestContext`]: everything the application sees about a request
//! - [`Response`]: the response being produced and its framing decisions
//! - [`ResponseBody`] and the [`body`] module: in-memory and deferred response bodies
//! - [`PayloadItem`] / [`PayloadSize`]: body data as seen by the codecs
//! - [`HttpError`], [`ParseError`], [`SendError`], [`BodyError`]: the error types

mod message;
pub use message::PayloadItem;
pub use message::PayloadSize;

mod request;
pub use request::Request;
pub use request::RequestHeader;

mod context;
pub use context::RequestContext;

mod response;
pub use response::CloseHook;
pub use response::Response;

mod error;
pub use error::BodyError;
pub use error::HttpError;
pub use error::ParseError;
pub use error::SendError;

pub mod body;
pub use body::ResponseBody;
