use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use http_body::Frame;
use http_body_util::BodyExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::select;
use tracing::{Instrument, debug, info_span, trace};

use crate::backend::{Backend, ConnectionId};
use crate::connection::message_writer::MessageWriter;
use crate::connection::{CloseMode, CompletionReceiver, Connection, ConnectionAction};
use crate::handler::Application;
use crate::protocol::body::DeferredBody;
use crate::protocol::{BodyError, HttpError, ParseError};
use crate::worker::WorkerPool;

const READ_BUFFER_SIZE: usize = 8 * 1024;
const WRITE_BUFFER_SIZE: usize = 8 * 1024;

/// Default inactivity limit while waiting for request bytes
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-connection settings for [`HttpConnection`].
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Run every request on the worker pool.
    pub threaded: bool,

    /// Whether the connection may serve more than one request.
    pub can_persist: bool,

    /// Close after this long without request bytes while idle.
    pub idle_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self { threaded: false, can_persist: true, idle_timeout: DEFAULT_IDLE_TIMEOUT }
    }
}

/// Drives a [`Connection`] over an async transport.
///
/// Reads request bytes, performs the connection's actions in order (writes, worker
/// submissions, body streaming, close) and routes completions and body frames back to it.
/// Whatever ends the loop, the connection is unbound before `process` returns.
#[derive(Debug)]
pub struct HttpConnection<R, W> {
    reader: R,
    writer: MessageWriter<W>,
    read_buf: BytesMut,
    options: ConnectionOptions,
    remote_addr: Option<SocketAddr>,
}

impl<R, W> HttpConnection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer: MessageWriter::with_capacity(writer, WRITE_BUFFER_SIZE),
            read_buf: BytesMut::with_capacity(READ_BUFFER_SIZE),
            options: ConnectionOptions::default(),
            remote_addr: None,
        }
    }

    pub fn options(mut self, options: ConnectionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn remote_addr(mut self, remote_addr: SocketAddr) -> Self {
        self.remote_addr = Some(remote_addr);
        self
    }

    pub async fn process<A>(
        mut self,
        id: ConnectionId,
        application: Arc<A>,
        backend: Weak<dyn Backend>,
        workers: &WorkerPool,
    ) -> Result<(), HttpError>
    where
        A: Application,
    {
        let span = match self.remote_addr {
            Some(remote) => info_span!("connection", %id, %remote),
            None => info_span!("connection", %id),
        };

        async move {
            let (connection, mut completions) = Connection::new(id, application, backend);
            let mut connection = connection
                .with_threaded(self.options.threaded)
                .with_can_persist(self.options.can_persist)
                .with_remote_addr(self.remote_addr);

            let result = self.drive(&mut connection, &mut completions, workers).await;
            connection.unbind();
            result
        }
        .instrument(span)
        .await
    }

    async fn drive<A: Application>(
        &mut self,
        connection: &mut Connection<A>,
        completions: &mut CompletionReceiver,
        workers: &WorkerPool,
    ) -> Result<(), HttpError> {
        let mut body: Option<DeferredBody> = None;

        loop {
            while let Some(action) = connection.poll_action() {
                match action {
                    ConnectionAction::Send(bytes) => self.writer.write(&bytes),
                    ConnectionAction::Defer(job) => workers.submit(job),
                    ConnectionAction::Stream(deferred) => body = Some(deferred),
                    ConnectionAction::Close(mode) => {
                        if mode == CloseMode::Immediately {
                            self.writer.clear_buf();
                        }
                        self.writer.flush().await?;
                        self.writer.shutdown().await;
                        debug!(?mode, "connection closed");
                        return Ok(());
                    }
                }
            }

            self.writer.flush().await?;

            if body.is_some() && !connection.is_streaming() {
                body = None;
            }

            let idle_timeout = connection.is_reading().then_some(self.options.idle_timeout);

            select! {
                biased;

                Some(completion) = completions.recv() => {
                    connection.post_process(completion);
                }

                frame = next_frame(&mut body) => {
                    connection.on_body_frame(frame);
                }

                read = read_some(&mut self.reader, &mut self.read_buf, idle_timeout) => {
                    match read? {
                        0 => {
                            debug!("peer closed the connection");
                            return Ok(());
                        }
                        n => {
                            trace!(len = n, "received bytes");
                            connection.receive_data(&self.read_buf[..n]);
                        }
                    }
                }
            }
        }
    }
}

async fn next_frame(body: &mut Option<DeferredBody>) -> Option<Result<Frame<Bytes>, BodyError>> {
    match body {
        Some(body) => body.frame().await,
        None => std::future::pending().await,
    }
}

async fn read_some<R>(reader: &mut R, buf: &mut BytesMut, idle_timeout: Option<Duration>) -> Result<usize, HttpError>
where
    R: AsyncRead + Unpin,
{
    buf.clear();
    buf.reserve(READ_BUFFER_SIZE);

    let read = match idle_timeout {
        Some(limit) => match tokio::time::timeout(limit, reader.read_buf(buf)).await {
            Ok(read) => read,
            Err(_elapsed) => return Err(HttpError::IdleTimeout { idle_ms: limit.as_millis() }),
        },
        None => reader.read_buf(buf).await,
    };

    read.map_err(|e| ParseError::io(e).into())
}
