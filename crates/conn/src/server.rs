//! A TCP server running connections on a single reactor thread.
//!
//! [`Server::run`] builds a current-thread tokio runtime: every connection driver is a
//! task on that thread, so the connection state machines never run concurrently. Only
//! application calls routed to the [`WorkerPool`] leave the reactor.
//!
//! ```no_run
//! use micro_conn::handler::{HandlerError, Reply, make_application};
//! use micro_conn::protocol::RequestContext;
//! use micro_conn::server::Server;
//!
//! let application = make_application(|_ctx: &mut RequestContext| Ok::<_, HandlerError>(Reply::ok().body("hello")));
//! let server = Server::builder().address("127.0.0.1:8080").application(application).build().unwrap();
//! server.run().unwrap();
//! ```

use std::collections::HashMap;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

use crate::backend::{Backend, ConnectionId};
use crate::connection::{ConnectionOptions, DEFAULT_IDLE_TIMEOUT, HttpConnection};
use crate::handler::Application;
use crate::protocol::HttpError;
use crate::worker::{DEFAULT_WORKERS, WorkerPool};

/// Default cap on simultaneously persistent connections
pub const DEFAULT_MAX_PERSISTENT_CONNECTIONS: usize = 100;

/// Installs a `FmtSubscriber` at `level` as the global default. Returns false if another
/// subscriber was installed first.
pub fn init_tracing(level: Level) -> bool {
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).is_ok()
}

#[derive(Error, Debug)]
pub enum ServerBuildError {
    #[error("address must be set")]
    MissingAddress,

    #[error("invalid address: {reason}")]
    InvalidAddress { reason: String },

    #[error("application must be set")]
    MissingApplication,
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("failed to bind {address:?}: {source}")]
    Bind { address: Vec<SocketAddr>, source: std::io::Error },

    #[error("failed to build runtime: {source}")]
    Runtime { source: std::io::Error },
}

#[derive(Debug)]
pub struct ServerBuilder<A> {
    address: Option<Result<Vec<SocketAddr>, String>>,
    application: Option<Arc<A>>,
    threaded: bool,
    workers: usize,
    max_persistent_connections: usize,
    idle_timeout: Duration,
}

impl<A: Application> ServerBuilder<A> {
    fn new() -> Self {
        Self {
            address: None,
            application: None,
            threaded: false,
            workers: DEFAULT_WORKERS,
            max_persistent_connections: DEFAULT_MAX_PERSISTENT_CONNECTIONS,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    pub fn address<T: ToSocketAddrs>(mut self, address: T) -> Self {
        self.address = Some(address.to_socket_addrs().map(Iterator::collect).map_err(|e| e.to_string()));
        self
    }

    pub fn application(mut self, application: A) -> Self {
        self.application = Some(Arc::new(application));
        self
    }

    /// Runs every request on the worker pool, whatever the application asks for.
    pub fn threaded(mut self, threaded: bool) -> Self {
        self.threaded = threaded;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Connections accepted beyond this many persistent ones close after one request.
    pub fn max_persistent_connections(mut self, max: usize) -> Self {
        self.max_persistent_connections = max;
        self
    }

    pub fn idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn build(self) -> Result<Server<A>, ServerBuildError> {
        let address = self
            .address
            .ok_or(ServerBuildError::MissingAddress)?
            .map_err(|reason| ServerBuildError::InvalidAddress { reason })?;
        if address.is_empty() {
            return Err(ServerBuildError::InvalidAddress { reason: "address resolved to nothing".into() });
        }
        let application = self.application.ok_or(ServerBuildError::MissingApplication)?;

        Ok(Server {
            address,
            application,
            threaded: self.threaded,
            idle_timeout: self.idle_timeout,
            workers: WorkerPool::new(self.workers),
            backend: Arc::new(TcpBackend::new(self.max_persistent_connections)),
            shutdown: CancellationToken::new(),
        })
    }
}

#[derive(Debug)]
pub struct Server<A> {
    address: Vec<SocketAddr>,
    application: Arc<A>,
    threaded: bool,
    idle_timeout: Duration,
    workers: WorkerPool,
    backend: Arc<TcpBackend>,
    shutdown: CancellationToken,
}

impl<A: Application> Server<A> {
    pub fn builder() -> ServerBuilder<A> {
        ServerBuilder::new()
    }

    /// Stops accepting new connections once cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn backend(&self) -> Arc<TcpBackend> {
        Arc::clone(&self.backend)
    }

    /// Serves on a new current-thread runtime until shut down.
    pub fn run(self) -> Result<(), ServerError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|source| ServerError::Runtime { source })?;
        runtime.block_on(self.serve())
    }

    pub async fn serve(self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.address.as_slice())
            .await
            .map_err(|source| ServerError::Bind { address: self.address.clone(), source })?;
        self.serve_listener(listener).await
    }

    /// Accepts connections from an already bound listener until shut down.
    pub async fn serve_listener(self, listener: TcpListener) -> Result<(), ServerError> {
        info!(address = ?listener.local_addr().ok(), "start listening");

        loop {
            let (tcp_stream, remote_addr) = tokio::select! {
                () = self.shutdown.cancelled() => {
                    info!(live = self.backend.live_connections(), "shutting down, no longer accepting");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok(stream_and_addr) => stream_and_addr,
                    Err(e) => {
                        warn!(cause = %e, "failed to accept");
                        continue;
                    }
                },
            };

            let (id, can_persist) = self.backend.register();
            let options = ConnectionOptions { threaded: self.threaded, can_persist, idle_timeout: self.idle_timeout };
            let application = Arc::clone(&self.application);
            let backend = Arc::downgrade(&self.backend) as Weak<dyn Backend>;
            let workers = self.workers.clone();

            tokio::spawn(async move {
                let (reader, writer) = tcp_stream.into_split();
                let connection = HttpConnection::new(reader, writer).options(options).remote_addr(remote_addr);
                match connection.process(id, application, backend, &workers).await {
                    Ok(()) => debug!(%id, "connection finished"),
                    Err(HttpError::IdleTimeout { idle_ms }) => debug!(%id, idle_ms, "connection idle, closed"),
                    Err(e) => error!(%id, cause = %e, "connection failed"),
                }
            });
        }
    }
}

#[derive(Debug, Default)]
struct Tracked {
    /// live connections and whether each one counts against the persistent budget
    connections: HashMap<ConnectionId, bool>,
    persistent: usize,
}

/// Tracks the live connections of a [`Server`] and hands out the keep-alive budget.
#[derive(Debug)]
pub struct TcpBackend {
    tracked: Mutex<Tracked>,
    next_id: AtomicU64,
    max_persistent: usize,
}

impl TcpBackend {
    pub fn new(max_persistent: usize) -> Self {
        Self { tracked: Mutex::default(), next_id: AtomicU64::new(1), max_persistent }
    }

    /// Registers a new connection. The flag tells whether it may persist.
    pub fn register(&self) -> (ConnectionId, bool) {
        let id = ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut tracked = self.tracked.lock().unwrap_or_else(PoisonError::into_inner);

        let can_persist = tracked.persistent < self.max_persistent;
        if can_persist {
            tracked.persistent += 1;
        }
        tracked.connections.insert(id, can_persist);
        debug!(%id, can_persist, live = tracked.connections.len(), "connection registered");
        (id, can_persist)
    }

    pub fn live_connections(&self) -> usize {
        self.tracked.lock().unwrap_or_else(PoisonError::into_inner).connections.len()
    }

    pub fn persistent_connections(&self) -> usize {
        self.tracked.lock().unwrap_or_else(PoisonError::into_inner).persistent
    }
}

impl Backend for TcpBackend {
    fn connection_finished(&self, id: ConnectionId) {
        let mut tracked = self.tracked.lock().unwrap_or_else(PoisonError::into_inner);
        match tracked.connections.remove(&id) {
            Some(true) => tracked.persistent -= 1,
            Some(false) => {}
            None => warn!(%id, "finished connection was not registered"),
        }
    }
}
