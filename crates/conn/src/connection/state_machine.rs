//! The per-connection request/response state machine.
//!
//! A [`Connection`] never touches a socket. The driver feeds it received bytes through
//! [`Connection::receive_data`], completions through [`Connection::post_process`] and
//! deferred body frames through [`Connection::on_body_frame`], and performs the
//! [`ConnectionAction`]s it queues, in order.
//!
//! One request is in flight at a time. A cycle starts when a request is complete and ends
//! either with a reset (the connection persists and parses the next request from the
//! bytes already buffered) or with a close. [`Connection::unbind`] tears everything down
//! and tells the backend, once.

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use http_body::Frame;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Span, debug, error, trace, warn};

use crate::backend::{Backend, ConnectionId};
use crate::connection::{
    AsyncCallback, CloseMode, Completion, CompletionReceiver, CompletionSender, ConnectionAction, needs_content_length,
    set_content_length,
};
use crate::handler::{Application, Outcome, Reply};
use crate::protocol::body::AbortHandle;
use crate::protocol::{BodyError, Request, RequestContext, Response};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Waiting for the rest of a request.
    Reading,

    /// The application is running, on this thread or on the worker pool.
    Dispatching,

    /// The application returned [`Outcome::Suspended`] and holds the async callback.
    Suspended,

    /// A deferred body is being pumped; the cycle ends when it completes or fails.
    Streaming,

    /// A close was queued; the driver will unbind.
    Closing,

    Terminated,
}

pub struct Connection<A> {
    id: ConnectionId,
    application: Arc<A>,
    backend: Weak<dyn Backend>,
    request: Request,
    response: Response,
    state: State,
    can_persist: bool,
    threaded: bool,
    remote_addr: Option<SocketAddr>,
    cycle: u64,
    actions: VecDeque<ConnectionAction>,
    completions: CompletionSender,
    close_signal: CancellationToken,
    body_abort: Option<AbortHandle>,
}

impl<A> fmt::Debug for Connection<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("cycle", &self.cycle)
            .field("can_persist", &self.can_persist)
            .field("threaded", &self.threaded)
            .field("remote_addr", &self.remote_addr)
            .field("pending_actions", &self.actions.len())
            .finish_non_exhaustive()
    }
}

impl<A: Application> Connection<A> {
    /// Creates a connection ready to read its first request, with the receiving end of its
    /// completion channel.
    pub fn new(id: ConnectionId, application: Arc<A>, backend: Weak<dyn Backend>) -> (Self, CompletionReceiver) {
        let (completions, receiver) = mpsc::unbounded_channel();
        let connection = Self {
            id,
            application,
            backend,
            request: Request::new(),
            response: Response::new(),
            state: State::Reading,
            can_persist: true,
            threaded: false,
            remote_addr: None,
            cycle: 0,
            actions: VecDeque::new(),
            completions,
            close_signal: CancellationToken::new(),
            body_abort: None,
        };
        (connection, receiver)
    }

    /// Whether the backend's keep-alive budget allows this connection to persist.
    pub fn with_can_persist(mut self, can_persist: bool) -> Self {
        self.can_persist = can_persist;
        self
    }

    /// Runs every request of this connection on the worker pool.
    pub fn with_threaded(mut self, threaded: bool) -> Self {
        self.threaded = threaded;
        self
    }

    pub fn with_remote_addr(mut self, remote_addr: Option<SocketAddr>) -> Self {
        self.remote_addr = remote_addr;
        self
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn is_reading(&self) -> bool {
        self.state == State::Reading
    }

    pub fn is_streaming(&self) -> bool {
        self.state == State::Streaming
    }

    pub fn is_terminated(&self) -> bool {
        self.state == State::Terminated
    }

    /// Next effect for the driver to perform.
    pub fn poll_action(&mut self) -> Option<ConnectionAction> {
        self.actions.pop_front()
    }

    /// Whether the request runs on the worker pool: the connection is configured as
    /// threaded, or the application asks for it.
    pub fn is_threaded(&self, ctx: &RequestContext) -> bool {
        self.threaded || self.application.wants_deferred(ctx)
    }

    /// Feeds received bytes. Bytes arriving while a cycle is in flight are buffered for
    /// the next request.
    pub fn receive_data(&mut self, data: &[u8]) {
        match self.state {
            State::Closing | State::Terminated => {
                trace!(len = data.len(), "dropping bytes received after close");
            }
            State::Reading => {
                self.request.feed(data);
                self.advance();
            }
            State::Dispatching | State::Suspended | State::Streaming => {
                trace!(len = data.len(), state = ?self.state, "buffering bytes for the next request");
                self.request.feed(data);
            }
        }
    }

    /// Re-entry point for results produced outside the current call: worker jobs and async
    /// callbacks. Completions for another cycle, or arriving when no result is expected,
    /// are ignored.
    pub fn post_process(&mut self, completion: Completion) {
        let Completion { cycle, outcome } = completion;

        if cycle != self.cycle || !matches!(self.state, State::Dispatching | State::Suspended) {
            debug!(cycle, current = self.cycle, state = ?self.state, "ignoring stale completion");
            return;
        }

        self.complete_cycle(outcome);
        self.advance();
    }

    /// Handles one frame of the deferred body being streamed. `None` means the body ended.
    pub fn on_body_frame(&mut self, frame: Option<Result<Frame<Bytes>, BodyError>>) {
        if self.state != State::Streaming {
            debug!(state = ?self.state, "ignoring body frame outside streaming");
            return;
        }

        match frame {
            Some(Ok(frame)) => {
                let Ok(data) = frame.into_data() else {
                    trace!("skipping non-data body frame");
                    return;
                };
                match self.response.encode_chunk(data) {
                    Ok(bytes) => self.send(bytes),
                    Err(e) => {
                        error!(cause = %e, "failed to encode body chunk");
                        self.fail_stream();
                    }
                }
            }
            Some(Err(e)) => {
                warn!(cause = %e, "deferred body failed, closing connection");
                self.fail_stream();
            }
            None => match self.response.encode_eof() {
                Ok(bytes) => {
                    self.send(bytes);
                    self.body_abort = None;
                    self.terminate_request();
                    self.advance();
                }
                Err(e) => {
                    error!(cause = %e, "failed to finish deferred body");
                    self.fail_stream();
                }
            },
        }
    }

    /// Tears the connection down after the transport closed. Safe to call more than once;
    /// the backend hears about it the first time only.
    pub fn unbind(&mut self) {
        if self.state == State::Terminated {
            return;
        }

        if let Some(abort) = self.body_abort.take() {
            abort.abort();
        }
        self.close_signal.cancel();
        self.release();
        self.state = State::Terminated;
        debug!(cycle = self.cycle, "connection unbound");

        match self.backend.upgrade() {
            Some(backend) => backend.connection_finished(self.id),
            None => debug!("backend gone, skipping notification"),
        }
    }

    /// Parses and dispatches buffered requests while the connection is idle.
    fn advance(&mut self) {
        while self.state == State::Reading {
            match self.request.try_complete() {
                Ok(true) => self.process(),
                Ok(false) => return,
                Err(e) => {
                    error!(cause = %e, "malformed request, closing connection");
                    self.request.close();
                    self.close(CloseMode::Immediately);
                }
            }
        }
    }

    fn process(&mut self) {
        let Some(mut ctx) = self.request.take_context() else {
            return;
        };

        self.state = State::Dispatching;
        let threaded = self.is_threaded(&ctx);
        ctx.set_threaded(threaded);
        ctx.set_close_signal(self.close_signal.clone());

        let cycle = self.cycle;
        let callback = AsyncCallback::new(cycle, self.completions.clone());
        let remote_addr = self.remote_addr;

        if threaded {
            debug!(cycle, "dispatching request to worker pool");
            let application = Arc::clone(&self.application);
            let completions = self.completions.clone();
            let span = Span::current();
            self.actions.push_back(ConnectionAction::Defer(Box::new(move || {
                let _entered = span.enter();
                let outcome = pre_process(application.as_ref(), ctx, callback, remote_addr);
                if completions.send(Completion::new(cycle, outcome)).is_err() {
                    debug!(cycle, "connection closed before worker finished");
                }
            })));
        } else {
            let outcome = pre_process(self.application.as_ref(), ctx, callback, remote_addr);
            self.complete_cycle(outcome);
        }
    }

    fn complete_cycle(&mut self, outcome: Option<Outcome>) {
        match outcome {
            None => {
                self.release();
                self.close(CloseMode::AfterWriting);
            }
            Some(Outcome::Suspended) => {
                debug!(cycle = self.cycle, "request suspended");
                self.state = State::Suspended;
            }
            Some(Outcome::Immediate(reply)) => self.respond(reply),
        }
    }

    fn respond(&mut self, reply: Reply) {
        let Reply { status, mut headers, body, close_hook } = reply;

        if needs_content_length(status, &headers, &body) {
            set_content_length(&mut headers, &body);
        }

        self.response.set_status(status);
        self.response.set_headers(headers);
        self.response.set_body(body);
        self.response.set_close_hook(close_hook);

        if self.request.keep_alive() && self.can_persist {
            self.response.mark_persistent();
        }
        if self.request.is_head() {
            self.response.skip_body();
        }

        let actions = &mut self.actions;
        if let Err(e) = self.response.for_each_chunk(|chunk| actions.push_back(ConnectionAction::Send(chunk))) {
            error!(cause = %e, "failed to send response");
            self.release();
            self.close(CloseMode::AfterWriting);
            return;
        }

        debug!(status = status.as_u16(), cycle = self.cycle, "response queued");

        if let Some(body) = self.response.take_deferred() {
            if self.request.is_head() {
                body.fail();
            } else {
                self.body_abort = Some(body.abort_handle());
                self.actions.push_back(ConnectionAction::Stream(body));
                self.state = State::Streaming;
                return;
            }
        }

        self.terminate_request();
    }

    /// Ends the cycle: release resources, then reset or close.
    fn terminate_request(&mut self) {
        let persistent = self.can_persist && self.response.is_persistent();
        self.release();

        if persistent {
            self.reset();
        } else {
            self.close(CloseMode::AfterWriting);
        }
    }

    fn reset(&mut self) {
        let buffered = self.request.take_buffer();
        self.cycle += 1;
        self.request = Request::with_buffer(buffered);
        self.response = Response::new();
        self.state = State::Reading;
        trace!(cycle = self.cycle, "connection reset for next request");
    }

    fn fail_stream(&mut self) {
        if let Some(abort) = self.body_abort.take() {
            abort.abort();
        }
        self.release();
        self.close(CloseMode::AfterWriting);
    }

    /// Best effort; never fails.
    fn release(&mut self) {
        self.request.close();
        self.response.close();
    }

    fn send(&mut self, bytes: Bytes) {
        if !bytes.is_empty() {
            self.actions.push_back(ConnectionAction::Send(bytes));
        }
    }

    fn close(&mut self, mode: CloseMode) {
        self.actions.push_back(ConnectionAction::Close(mode));
        self.state = State::Closing;
    }
}

/// Runs the application for one request. Errors and panics are logged and become `None`.
pub(crate) fn pre_process<A: Application>(
    application: &A,
    mut ctx: RequestContext,
    callback: AsyncCallback,
    remote_addr: Option<SocketAddr>,
) -> Option<Outcome> {
    if let Some(addr) = remote_addr {
        ctx.set_remote_addr(addr.ip().to_string());
    }
    ctx.install_async_callback(callback);

    match catch_unwind(AssertUnwindSafe(|| application.call(&mut ctx))) {
        Ok(Ok(outcome)) => Some(outcome),
        Ok(Err(e)) => {
            error!(cause = %e, method = %ctx.method(), uri = %ctx.uri(), "application failed");
            None
        }
        Err(panic) => {
            error!(cause = panic_message(panic.as_ref()), method = %ctx.method(), uri = %ctx.uri(), "application panicked");
            None
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use http::{HeaderValue, StatusCode, header};
    use indoc::indoc;

    use super::*;
    use crate::handler::{HandlerError, make_application};
    use crate::protocol::ResponseBody;
    use crate::protocol::body::channel;

    #[derive(Default)]
    struct RecordingBackend {
        finished: Mutex<Vec<ConnectionId>>,
    }

    impl Backend for RecordingBackend {
        fn connection_finished(&self, id: ConnectionId) {
            self.finished.lock().unwrap().push(id);
        }
    }

    struct Fixture<A> {
        connection: Connection<A>,
        completions: CompletionReceiver,
        backend: Arc<RecordingBackend>,
    }

    fn fixture<A: Application>(application: A) -> Fixture<A> {
        let backend = Arc::new(RecordingBackend::default());
        let weak: Weak<dyn Backend> = Arc::downgrade(&backend) as Weak<dyn Backend>;
        let (connection, completions) = Connection::new(ConnectionId::new(1), Arc::new(application), weak);
        Fixture { connection, completions, backend }
    }

    /// Drains queued actions: sent bytes concatenated, deferred jobs, the close mode if any.
    fn drain<A: Application>(connection: &mut Connection<A>) -> (Vec<u8>, Vec<crate::connection::Job>, Option<CloseMode>) {
        let mut written = Vec::new();
        let mut jobs = Vec::new();
        let mut close = None;
        while let Some(action) = connection.poll_action() {
            match action {
                ConnectionAction::Send(bytes) => written.extend_from_slice(&bytes),
                ConnectionAction::Defer(job) => jobs.push(job),
                ConnectionAction::Stream(_) => panic!("unexpected stream action"),
                ConnectionAction::Close(mode) => close = Some(mode),
            }
        }
        (written, jobs, close)
    }

    fn hello(ctx: &mut RequestContext) -> Result<Reply, HandlerError> {
        Ok(Reply::ok().body(format!("hello {}", ctx.uri().path())))
    }

    const GET: &str = indoc! {r##"
        GET /a HTTP/1.1
        Host: 127.0.0.1

        "##};

    #[test]
    fn keep_alive_cycle_resets() {
        let mut f = fixture(make_application(hello));
        f.connection.receive_data(GET.as_bytes());

        let (written, _, close) = drain(&mut f.connection);
        let written = String::from_utf8(written).unwrap();
        assert!(written.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(written.contains("content-length: 8\r\n"));
        assert!(written.contains("connection: keep-alive\r\n"));
        assert!(written.ends_with("hello /a"));
        assert_eq!(close, None);
        assert!(f.connection.is_reading());
        assert_eq!(f.connection.cycle(), 1);

        f.connection.receive_data(b"GET /b HTTP/1.1\r\nHost: x\r\n\r\n");
        let (written, _, _) = drain(&mut f.connection);
        assert!(String::from_utf8(written).unwrap().ends_with("hello /b"));
        assert_eq!(f.connection.cycle(), 2);
    }

    #[test]
    fn pipelined_requests_answer_in_order() {
        let mut f = fixture(make_application(hello));
        f.connection.receive_data(b"GET /1 HTTP/1.1\r\n\r\nGET /2 HTTP/1.1\r\n\r\nGET /3 HTTP/1.1\r\nConnection: close\r\n\r\n");

        let (written, _, close) = drain(&mut f.connection);
        let written = String::from_utf8(written).unwrap();
        let first = written.find("hello /1").unwrap();
        let second = written.find("hello /2").unwrap();
        let third = written.find("hello /3").unwrap();
        assert!(first < second && second < third);
        assert_eq!(close, Some(CloseMode::AfterWriting));
    }

    #[test]
    fn malformed_request_closes_without_response() {
        let mut f = fixture(make_application(hello));
        f.connection.receive_data(b"GET / HTTP/1.1\r\nBad Header\r\n\r\n");

        let (written, _, close) = drain(&mut f.connection);
        assert!(written.is_empty());
        assert_eq!(close, Some(CloseMode::Immediately));
        assert_eq!(f.connection.state(), State::Closing);
    }

    #[test]
    fn handler_error_closes_without_bytes() {
        let mut f = fixture(make_application(|_ctx: &mut RequestContext| Err::<Reply, HandlerError>("boom".into())));
        f.connection.receive_data(GET.as_bytes());

        let (written, _, close) = drain(&mut f.connection);
        assert!(written.is_empty());
        assert_eq!(close, Some(CloseMode::AfterWriting));
    }

    #[test]
    fn handler_connection_close_ends_keep_alive() {
        let mut f = fixture(make_application(|_ctx: &mut RequestContext| {
            Ok::<_, HandlerError>(Reply::ok().header(header::CONNECTION, HeaderValue::from_static("close")).body("ok"))
        }));
        f.connection.receive_data(GET.as_bytes());

        let (written, _, close) = drain(&mut f.connection);
        let written = String::from_utf8(written).unwrap();
        assert!(written.contains("connection: close\r\n"));
        assert!(!written.contains("keep-alive"));
        assert!(written.ends_with("ok"));
        assert_eq!(close, Some(CloseMode::AfterWriting));
        assert_eq!(f.connection.state(), State::Closing);
    }

    #[test]
    fn chunked_anywhere_in_transfer_encoding_is_framed() {
        let mut f = fixture(make_application(|_ctx: &mut RequestContext| {
            Ok::<_, HandlerError>(
                Reply::ok()
                    .header(header::TRANSFER_ENCODING, HeaderValue::from_static("gzip"))
                    .header(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"))
                    .body(ResponseBody::chunks(["ab", "cde"])),
            )
        }));
        f.connection.receive_data(GET.as_bytes());

        let (written, _, close) = drain(&mut f.connection);
        let written = String::from_utf8(written).unwrap();
        assert!(!written.contains("content-length"));
        assert!(written.ends_with("\r\n\r\n2\r\nab\r\n3\r\ncde\r\n0\r\n\r\n"));
        assert_eq!(close, None);
        assert!(f.connection.is_reading());
    }

    #[test]
    fn handler_panic_is_contained() {
        let mut f = fixture(make_application(|_ctx: &mut RequestContext| -> Result<Reply, HandlerError> { panic!("handler bug") }));
        f.connection.receive_data(GET.as_bytes());

        let (written, _, close) = drain(&mut f.connection);
        assert!(written.is_empty());
        assert_eq!(close, Some(CloseMode::AfterWriting));
    }

    #[test]
    fn suspended_request_writes_nothing_until_completed() {
        let slot: Arc<Mutex<Option<AsyncCallback>>> = Arc::default();
        let stash = Arc::clone(&slot);
        let mut f = fixture(make_application(move |ctx: &mut RequestContext| {
            *stash.lock().unwrap() = ctx.take_async_callback();
            Ok::<_, HandlerError>(Reply::new(StatusCode::CONTINUE))
        }));

        f.connection.receive_data(GET.as_bytes());
        let (written, _, close) = drain(&mut f.connection);
        assert!(written.is_empty());
        assert_eq!(close, None);
        assert_eq!(f.connection.state(), State::Suspended);
        assert_eq!(f.connection.cycle(), 0);

        let callback = slot.lock().unwrap().take().unwrap();
        callback.complete(Reply::ok().body("late")).unwrap();
        let completion = f.completions.try_recv().unwrap();
        f.connection.post_process(completion);

        let (written, _, _) = drain(&mut f.connection);
        assert!(String::from_utf8(written).unwrap().ends_with("late"));
        assert!(f.connection.is_reading());
        assert_eq!(f.connection.cycle(), 1);
    }

    #[test]
    fn stale_completion_is_ignored() {
        let mut f = fixture(make_application(hello));
        f.connection.receive_data(GET.as_bytes());
        drain(&mut f.connection);

        f.connection.post_process(Completion::new(0, Some(Outcome::Immediate(Reply::ok().body("stale")))));
        let (written, _, close) = drain(&mut f.connection);
        assert!(written.is_empty());
        assert_eq!(close, None);
        assert!(f.connection.is_reading());
    }

    #[test]
    fn threaded_override_without_capability() {
        let mut f = fixture(make_application(hello));
        f.connection = f.connection.with_threaded(true);
        f.connection.receive_data(GET.as_bytes());

        assert_eq!(f.connection.state(), State::Dispatching);
        let (written, jobs, _) = drain(&mut f.connection);
        assert!(written.is_empty());
        assert_eq!(jobs.len(), 1);

        for job in jobs {
            job();
        }
        let completion = f.completions.try_recv().unwrap();
        f.connection.post_process(completion);

        let (written, _, _) = drain(&mut f.connection);
        assert!(String::from_utf8(written).unwrap().ends_with("hello /a"));
    }

    #[test]
    fn application_can_ask_for_the_worker_pool() {
        struct Heavy;

        impl Application for Heavy {
            fn call(&self, ctx: &mut RequestContext) -> Result<Outcome, HandlerError> {
                assert!(ctx.is_threaded());
                Ok(Reply::ok().into())
            }

            fn wants_deferred(&self, ctx: &RequestContext) -> bool {
                ctx.uri().path() == "/heavy"
            }
        }

        let mut f = fixture(Heavy);
        f.connection.receive_data(b"GET /heavy HTTP/1.1\r\n\r\n");
        let (_, jobs, _) = drain(&mut f.connection);
        assert_eq!(jobs.len(), 1);
    }

    #[test]
    fn non_persistent_when_budget_exhausted() {
        let mut f = fixture(make_application(hello));
        f.connection = f.connection.with_can_persist(false);
        f.connection.receive_data(GET.as_bytes());

        let (written, _, close) = drain(&mut f.connection);
        assert!(String::from_utf8(written).unwrap().contains("connection: close\r\n"));
        assert_eq!(close, Some(CloseMode::AfterWriting));
    }

    #[test]
    fn head_response_has_no_body() {
        let mut f = fixture(make_application(hello));
        f.connection.receive_data(b"HEAD /a HTTP/1.1\r\n\r\n");

        let (written, _, close) = drain(&mut f.connection);
        let written = String::from_utf8(written).unwrap();
        assert!(written.contains("content-length: 8\r\n"));
        assert!(written.ends_with("\r\n\r\n"));
        assert_eq!(close, None);
    }

    #[test]
    fn streamed_body_finishes_the_cycle() {
        let (writer, body) = channel();
        let body = Mutex::new(Some(body));
        let mut f = fixture(make_application(move |_ctx: &mut RequestContext| {
            let body = body.lock().unwrap().take().ok_or("body already used")?;
            Ok::<_, HandlerError>(
                Reply::ok().header(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked")).body(ResponseBody::from(body)),
            )
        }));

        f.connection.receive_data(GET.as_bytes());
        assert!(f.connection.is_streaming());
        let mut stream = None;
        while let Some(action) = f.connection.poll_action() {
            if let ConnectionAction::Stream(body) = action {
                stream = Some(body);
            }
        }
        assert!(stream.is_some());

        writer.send("abc").unwrap();
        f.connection.on_body_frame(Some(Ok(Frame::data(Bytes::from_static(b"abc")))));
        f.connection.on_body_frame(None);

        let (written, _, close) = drain(&mut f.connection);
        assert_eq!(written, b"3\r\nabc\r\n0\r\n\r\n");
        assert_eq!(close, None);
        assert!(f.connection.is_reading());
    }

    #[test]
    fn deferred_body_failure_closes_after_flush() {
        let (writer, body) = channel();
        let body = Mutex::new(Some(body));
        let mut f = fixture(make_application(move |_ctx: &mut RequestContext| {
            let body = body.lock().unwrap().take().ok_or("body already used")?;
            Ok::<_, HandlerError>(Reply::ok().body(ResponseBody::from(body)))
        }));

        f.connection.receive_data(GET.as_bytes());
        while f.connection.poll_action().is_some() {}

        f.connection.on_body_frame(Some(Err(BodyError::failed("upstream reset"))));
        let (written, _, close) = drain(&mut f.connection);
        assert!(written.is_empty());
        assert_eq!(close, Some(CloseMode::AfterWriting));
        assert!(writer.is_aborted());

        f.connection.on_body_frame(Some(Ok(Frame::data(Bytes::from_static(b"late")))));
        assert!(drain(&mut f.connection).0.is_empty());
    }

    #[test]
    fn unbind_notifies_backend_once() {
        let mut f = fixture(make_application(hello));
        let close_signal = {
            let seen: Arc<Mutex<Option<CancellationToken>>> = Arc::default();
            let stash = Arc::clone(&seen);
            let mut g = fixture(make_application(move |ctx: &mut RequestContext| {
                *stash.lock().unwrap() = Some(ctx.close_signal());
                Ok::<_, HandlerError>(Reply::ok())
            }));
            g.connection.receive_data(GET.as_bytes());
            g.connection.unbind();
            let token = seen.lock().unwrap().take().unwrap();
            token
        };
        assert!(close_signal.is_cancelled());

        f.connection.unbind();
        f.connection.unbind();
        assert!(f.connection.is_terminated());
        assert_eq!(f.backend.finished.lock().unwrap().as_slice(), &[ConnectionId::new(1)]);

        f.connection.receive_data(GET.as_bytes());
        assert!(f.connection.poll_action().is_none());
    }

    #[test]
    fn close_hook_runs_at_end_of_cycle() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut f = fixture(make_application(move |_ctx: &mut RequestContext| {
            let counter = Arc::clone(&counter);
            Ok::<_, HandlerError>(Reply::ok().body("x").on_close(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Err("release failed".into())
            }))
        }));

        f.connection.receive_data(GET.as_bytes());
        let (_, _, close) = drain(&mut f.connection);
        assert_eq!(close, None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remote_address_reaches_the_application() {
        let mut f = fixture(make_application(|ctx: &mut RequestContext| {
            Ok::<_, HandlerError>(Reply::ok().body(ctx.remote_addr().unwrap_or("none").to_string()))
        }));
        f.connection = f.connection.with_remote_addr(Some("10.1.2.3:4567".parse().unwrap()));
        f.connection.receive_data(GET.as_bytes());

        let (written, _, _) = drain(&mut f.connection);
        assert!(String::from_utf8(written).unwrap().ends_with("10.1.2.3"));
    }
}
