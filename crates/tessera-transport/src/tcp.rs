//! TCP connection with one reader thread and newline framing.

use std::fmt;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use crate::listeners::Listeners;
use crate::{Connection, ConnectionId, MessageListener, TransportConfig, TransportError};

/// One TCP socket carrying newline-delimited messages.
///
/// Created either by [`TcpConnection::connect`] (client side) or by a
/// [`TcpServer`](crate::TcpServer) for each accepted client. Always handled
/// through an `Arc` because the reader thread shares it.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use tessera_transport::{Connection, TcpConnection, TransportConfig};
///
/// let conn = TcpConnection::connect("127.0.0.1:7000", TransportConfig::default())?;
/// conn.add_listener(Arc::new(|msg: &str| println!("got {msg}")));
/// conn.send("str(\"hello\")")?;
/// conn.close();
/// # Ok::<(), tessera_transport::TransportError>(())
/// ```
pub struct TcpConnection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    config: TransportConfig,
    /// Serializes writers so concurrent sends never interleave.
    writer: Mutex<TcpStream>,
    /// Handle used only to shut the socket down from any thread.
    control: TcpStream,
    /// Read half, moved into the reader thread by `start`.
    reader: Mutex<Option<TcpStream>>,
    listeners: Listeners,
}

impl TcpConnection {
    /// Connects to `addr` and starts reading immediately.
    ///
    /// Messages that arrive before the first listener is registered are
    /// dropped. Use [`open`](Self::open) + [`start`](Self::start) when the
    /// peer may speak first.
    pub fn connect(
        addr: impl ToSocketAddrs + fmt::Display,
        config: TransportConfig,
    ) -> Result<Arc<Self>, TransportError> {
        let conn = Self::open(addr, config)?;
        conn.start()?;
        Ok(conn)
    }

    /// Connects to `addr` without starting the reader thread.
    pub fn open(
        addr: impl ToSocketAddrs + fmt::Display,
        config: TransportConfig,
    ) -> Result<Arc<Self>, TransportError> {
        let stream = TcpStream::connect(&addr).map_err(|source| TransportError::ConnectFailed {
            addr: addr.to_string(),
            source,
        })?;
        let conn = Self::from_stream(stream, config)?;
        tracing::info!(conn = %conn.id, peer = %conn.peer_addr, "connected");
        Ok(conn)
    }

    /// Wraps an already connected socket. The reader is not started.
    pub(crate) fn from_stream(
        stream: TcpStream,
        config: TransportConfig,
    ) -> Result<Arc<Self>, TransportError> {
        stream
            .set_nodelay(config.nodelay)
            .map_err(TransportError::SocketSetup)?;
        let peer_addr = stream.peer_addr().map_err(TransportError::SocketSetup)?;
        let writer = stream.try_clone().map_err(TransportError::SocketSetup)?;
        let control = stream.try_clone().map_err(TransportError::SocketSetup)?;

        Ok(Arc::new(Self {
            id: ConnectionId::next(),
            peer_addr,
            config,
            writer: Mutex::new(writer),
            control,
            reader: Mutex::new(Some(stream)),
            listeners: Listeners::new(),
        }))
    }

    /// Spawns the reader thread. Calling it again is a no-op.
    pub fn start(self: &Arc<Self>) -> Result<(), TransportError> {
        let Some(stream) = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return Ok(());
        };
        if self.is_closed() {
            return Err(TransportError::ConnectionClosed(self.id));
        }

        let conn = Arc::clone(self);
        thread::Builder::new()
            .name(format!("tessera-reader-{}", self.id.into_inner()))
            .spawn(move || conn.read_loop(stream))
            .map_err(TransportError::SocketSetup)?;
        Ok(())
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn read_loop(self: Arc<Self>, stream: TcpStream) {
        tracing::debug!(conn = %self.id, "reader started");
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        // Room for the message, "\r\n", and one byte to detect overflow.
        let limit = self.config.max_message_len as u64 + 3;

        loop {
            line.clear();
            match (&mut reader).take(limit).read_line(&mut line) {
                Ok(0) => {
                    tracing::debug!(conn = %self.id, "peer closed the connection");
                    break;
                }
                Ok(_) => {
                    let terminated = line.ends_with('\n');
                    let message = line.trim_end_matches(['\n', '\r']);
                    if message.len() > self.config.max_message_len {
                        tracing::warn!(
                            conn = %self.id,
                            len = message.len(),
                            max = self.config.max_message_len,
                            "incoming message too large, disconnecting"
                        );
                        break;
                    }
                    if !message.is_empty() {
                        tracing::trace!(conn = %self.id, payload = message, "received");
                        self.listeners.deliver(message);
                    }
                    if !terminated {
                        // EOF in the middle of a line; that was the last one.
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    tracing::warn!(conn = %self.id, error = %e, "non UTF-8 input, disconnecting");
                    break;
                }
                Err(e) => {
                    if !self.is_closed() {
                        tracing::debug!(conn = %self.id, error = %e, "read failed");
                    }
                    break;
                }
            }
        }

        self.close();
        tracing::debug!(conn = %self.id, "reader stopped");
    }
}

impl Connection for TcpConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn send(&self, message: &str) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::ConnectionClosed(self.id));
        }
        self.config.validate(message)?;

        let mut frame = Vec::with_capacity(message.len() + 1);
        frame.extend_from_slice(message.as_bytes());
        frame.push(b'\n');

        let result = {
            let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
            writer.write_all(&frame).and_then(|()| writer.flush())
        };

        match result {
            Ok(()) => {
                tracing::trace!(conn = %self.id, payload = message, "sent");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(conn = %self.id, error = %e, "send failed, closing");
                self.close();
                Err(TransportError::SendFailed(e))
            }
        }
    }

    fn add_listener(&self, listener: Arc<dyn MessageListener>) {
        self.listeners.add(listener);
    }

    fn close(&self) {
        if !self.listeners.begin_close() {
            return;
        }
        // Unblocks the reader thread; errors just mean the socket is
        // already gone.
        let _ = self.control.shutdown(Shutdown::Both);
        tracing::info!(conn = %self.id, peer = %self.peer_addr, "connection closed");
        self.listeners.notify_closed();
    }

    fn is_closed(&self) -> bool {
        self.listeners.is_closed()
    }
}

impl fmt::Debug for TcpConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpConnection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}
