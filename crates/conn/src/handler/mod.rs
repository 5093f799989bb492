//! The application contract.
//!
//! An [`Application`] is called once per request with the [`RequestContext`] and answers
//! with an [`Outcome`]: either an immediate [`Reply`] or [`Outcome::Suspended`], meaning
//! the reply will be delivered later through the request's
//! [`AsyncCallback`](crate::connection::AsyncCallback).
//!
//! Calls are synchronous. When [`Application::wants_deferred`] returns true (or the
//! connection is configured as threaded) the call runs on the worker pool instead of the
//! connection's reactor thread.

use std::error::Error;
use std::fmt;

use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};

use crate::protocol::{CloseHook, RequestContext, ResponseBody};

/// Error type returned by applications.
pub type HandlerError = Box<dyn Error + Send + Sync>;

pub trait Application: Send + Sync + 'static {
    fn call(&self, ctx: &mut RequestContext) -> Result<Outcome, HandlerError>;

    /// Whether this request should run on the worker pool.
    fn wants_deferred(&self, _ctx: &RequestContext) -> bool {
        false
    }
}

/// What an application produced for a request.
#[derive(Debug)]
pub enum Outcome {
    Immediate(Reply),

    /// No reply yet; the application keeps the async callback and completes it later.
    Suspended,
}

impl From<Reply> for Outcome {
    /// A reply with status `100 Continue` is the suspension sentinel.
    fn from(reply: Reply) -> Self {
        if reply.status == StatusCode::CONTINUE { Outcome::Suspended } else { Outcome::Immediate(reply) }
    }
}

/// Status, headers and body of a response, as produced by an application.
pub struct Reply {
    pub(crate) status: StatusCode,
    pub(crate) headers: HeaderMap,
    pub(crate) body: ResponseBody,
    pub(crate) close_hook: Option<CloseHook>,
}

impl Reply {
    pub fn new(status: StatusCode) -> Self {
        Self { status, headers: HeaderMap::new(), body: ResponseBody::empty(), close_hook: None }
    }

    pub fn ok() -> Self {
        Self::new(StatusCode::OK)
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn body(mut self, body: impl Into<ResponseBody>) -> Self {
        self.body = body.into();
        self
    }

    /// Registers a hook run when the connection releases this reply's response.
    pub fn on_close<F>(mut self, hook: F) -> Self
    where
        F: FnOnce() -> Result<(), HandlerError> + Send + 'static,
    {
        self.close_hook = Some(Box::new(hook));
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn header_map(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn response_body(&self) -> &ResponseBody {
        &self.body
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reply")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("close_hook", &self.close_hook.is_some())
            .finish()
    }
}

#[derive(Debug)]
pub struct HandlerFn<F> {
    f: F,
}

impl<F, O> Application for HandlerFn<F>
where
    F: Fn(&mut RequestContext) -> Result<O, HandlerError> + Send + Sync + 'static,
    O: Into<Outcome>,
{
    fn call(&self, ctx: &mut RequestContext) -> Result<Outcome, HandlerError> {
        (self.f)(ctx).map(Into::into)
    }
}

/// Adapts a closure into an [`Application`].
///
/// The closure may return anything convertible into an [`Outcome`], usually a [`Reply`].
pub fn make_application<F, O>(f: F) -> HandlerFn<F>
where
    F: Fn(&mut RequestContext) -> Result<O, HandlerError> + Send + Sync + 'static,
    O: Into<Outcome>,
{
    HandlerFn { f }
}
