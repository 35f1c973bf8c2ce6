//! Multi-client TCP server.
//!
//! The server owns one accept thread. Each accepted socket becomes a
//! [`TcpConnection`] with its own reader thread and a fresh [`UserId`].
//! [`ServerListener`]s hear about every connect and every disconnect; the
//! disconnect event fires exactly once per connection no matter whether
//! the peer hung up, an I/O error occurred, or someone called `close`.

use std::collections::HashMap;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::listeners::ListenerSet;
use crate::{Connection, MessageListener, TcpConnection, TransportConfig, TransportError, UserId};

/// How long `close` waits for the wake-up connection to the accept loop.
const WAKE_TIMEOUT: Duration = Duration::from_millis(500);

/// Pause after a failed accept (e.g. out of file descriptors).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Receives connect/disconnect events from a [`TcpServer`].
pub trait ServerListener: Send + Sync + 'static {
    /// A client connected. The connection's reader starts right after
    /// this returns, so listeners attached here see every message.
    fn on_client_connected(&self, user: UserId, connection: Arc<TcpConnection>);

    /// A client's connection closed.
    fn on_client_disconnected(&self, _user: UserId) {}
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for configuring a [`TcpServer`].
///
/// # Example
///
/// ```no_run
/// use tessera_transport::TcpServerBuilder;
///
/// let server = TcpServerBuilder::new().bind("0.0.0.0:7000").build()?;
/// server.start()?;
/// # Ok::<(), tessera_transport::TransportError>(())
/// ```
pub struct TcpServerBuilder {
    bind_addr: String,
    config: TransportConfig,
    listeners: Vec<Arc<dyn ServerListener>>,
}

impl TcpServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:0".to_string(),
            config: TransportConfig::default(),
            listeners: Vec::new(),
        }
    }

    /// Sets the address to bind the server to. Port 0 picks a free port;
    /// read it back with [`TcpServer::local_addr`].
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Sets the configuration applied to every accepted connection.
    pub fn config(mut self, config: TransportConfig) -> Self {
        self.config = config;
        self
    }

    /// Registers a listener before the server starts.
    pub fn listener(mut self, listener: impl ServerListener) -> Self {
        self.listeners.push(Arc::new(listener));
        self
    }

    /// Binds the socket. Nothing is accepted until [`TcpServer::start`].
    pub fn build(self) -> Result<TcpServer, TransportError> {
        let socket =
            TcpListener::bind(&self.bind_addr).map_err(|source| TransportError::BindFailed {
                addr: self.bind_addr.clone(),
                source,
            })?;
        let local_addr = socket.local_addr().map_err(TransportError::SocketSetup)?;

        let listeners = ListenerSet::new();
        for listener in self.listeners {
            listeners.add(listener);
        }

        tracing::info!(addr = %local_addr, "server listening");
        Ok(TcpServer {
            inner: Arc::new(Inner {
                local_addr,
                config: self.config,
                socket: Mutex::new(Some(socket)),
                listeners,
                connections: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
                accept_thread: Mutex::new(None),
            }),
        })
    }
}

impl Default for TcpServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

struct Inner {
    local_addr: SocketAddr,
    config: TransportConfig,
    /// The bound socket, moved into the accept thread by `start`.
    socket: Mutex<Option<TcpListener>>,
    listeners: ListenerSet<dyn ServerListener>,
    connections: Mutex<HashMap<UserId, Arc<TcpConnection>>>,
    closed: AtomicBool,
    accept_thread: Mutex<Option<JoinHandle<()>>>,
}

/// A TCP server accepting any number of clients.
///
/// Dropping the server closes it.
pub struct TcpServer {
    inner: Arc<Inner>,
}

impl TcpServer {
    /// Creates a new builder.
    pub fn builder() -> TcpServerBuilder {
        TcpServerBuilder::new()
    }

    /// Starts the accept thread. Calling it again is a no-op.
    pub fn start(&self) -> Result<(), TransportError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(TransportError::Shutdown);
        }
        let Some(socket) = self
            .inner
            .socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return Ok(());
        };

        let inner = Arc::clone(&self.inner);
        let handle = thread::Builder::new()
            .name("tessera-accept".to_string())
            .spawn(move || inner.accept_loop(socket))
            .map_err(TransportError::SocketSetup)?;
        *self
            .inner
            .accept_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    /// Registers a listener. Only events after registration are seen.
    pub fn add_listener(&self, listener: impl ServerListener) {
        self.inner.listeners.add(Arc::new(listener));
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// Live connections, keyed by user.
    pub fn connections(&self) -> Vec<(UserId, Arc<TcpConnection>)> {
        self.inner
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(user, conn)| (*user, Arc::clone(conn)))
            .collect()
    }

    pub fn connection(&self, user: UserId) -> Option<Arc<TcpConnection>> {
        self.inner
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&user)
            .cloned()
    }

    pub fn connection_count(&self) -> usize {
        self.inner
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Stops accepting, closes every live connection, and releases the
    /// port. Safe to call more than once.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!(addr = %self.inner.local_addr, "server closing");

        // Never started: the socket is still here and just needs dropping.
        drop(
            self.inner
                .socket
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );

        let handle = self
            .inner
            .accept_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        // The accept loop only notices `closed` after accept returns.
        let _ = TcpStream::connect_timeout(&wake_addr(self.inner.local_addr), WAKE_TIMEOUT);
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                tracing::warn!("accept thread panicked");
            }
        }

        // Snapshot first: closing triggers disconnect hooks that take the lock.
        let live: Vec<Arc<TcpConnection>> = self
            .inner
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for conn in live {
            conn.close();
        }
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        self.close();
    }
}

impl Inner {
    fn accept_loop(self: Arc<Self>, socket: TcpListener) {
        tracing::debug!(addr = %self.local_addr, "accept loop started");
        for stream in socket.incoming() {
            if self.closed.load(Ordering::Acquire) {
                break;
            }
            match stream {
                Ok(stream) => self.register(stream),
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    thread::sleep(ACCEPT_BACKOFF);
                }
            }
        }
        tracing::debug!(addr = %self.local_addr, "accept loop stopped");
    }

    fn register(self: &Arc<Self>, stream: TcpStream) {
        let conn = match TcpConnection::from_stream(stream, self.config.clone()) {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(error = %e, "dropping accepted socket");
                return;
            }
        };
        if self.closed.load(Ordering::Acquire) {
            conn.close();
            return;
        }
        let user = UserId::generate();

        conn.add_listener(Arc::new(DisconnectHook {
            server: Arc::downgrade(self),
            user,
        }));
        {
            let mut connections = self.connections.lock().unwrap_or_else(PoisonError::into_inner);
            connections.insert(user, Arc::clone(&conn));
            // `close` flips the flag before it snapshots this table, so a
            // flag seen clear here means the snapshot will include `conn`.
            if self.closed.load(Ordering::Acquire) {
                connections.remove(&user);
                drop(connections);
                conn.close();
                return;
            }
        }

        tracing::info!(%user, conn = %conn.id(), peer = %conn.peer_addr(), "client connected");
        for listener in self.listeners.snapshot().iter() {
            listener.on_client_connected(user, Arc::clone(&conn));
        }

        if let Err(e) = conn.start() {
            tracing::debug!(%user, error = %e, "connection closed before it started");
        }
    }

    fn client_gone(&self, user: UserId) {
        let removed = self
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&user);
        if removed.is_none() {
            return;
        }

        tracing::info!(%user, "client disconnected");
        for listener in self.listeners.snapshot().iter() {
            listener.on_client_disconnected(user);
        }
    }
}

/// Per-connection listener that reports the close back to the server.
struct DisconnectHook {
    server: Weak<Inner>,
    user: UserId,
}

impl MessageListener for DisconnectHook {
    fn on_message(&self, _message: &str) {}

    fn on_close(&self) {
        if let Some(server) = self.server.upgrade() {
            server.client_gone(self.user);
        }
    }
}

/// Where to connect to poke our own accept loop.
fn wake_addr(local: SocketAddr) -> SocketAddr {
    let mut addr = local;
    if addr.ip().is_unspecified() {
        match addr {
            SocketAddr::V4(_) => addr.set_ip(Ipv4Addr::LOCALHOST.into()),
            SocketAddr::V6(_) => addr.set_ip(Ipv6Addr::LOCALHOST.into()),
        }
    }
    addr
}

impl fmt::Debug for TcpServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpServer")
            .field("local_addr", &self.local_addr())
            .field("closed", &self.is_closed())
            .finish()
    }
}
