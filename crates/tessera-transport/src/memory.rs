//! Two connected ends inside one process.
//!
//! Behaves like a TCP pair: each end has its own reader thread, messages
//! arrive in order, and closing either end closes both.

use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use crate::listeners::Listeners;
use crate::{Connection, ConnectionId, MessageListener, TransportConfig, TransportError};

enum Frame {
    Message(String),
    Close,
}

/// One end of an in-process connection pair.
pub struct MemoryConnection {
    id: ConnectionId,
    config: TransportConfig,
    /// Into the peer's inbox.
    outbound: Mutex<Sender<Frame>>,
    /// Into our own inbox, used to stop our reader on close.
    inbox: Mutex<Sender<Frame>>,
    listeners: Listeners,
}

impl MemoryConnection {
    /// Creates a connected pair with default settings.
    pub fn pair() -> Result<(Arc<Self>, Arc<Self>), TransportError> {
        Self::pair_with(TransportConfig::default())
    }

    pub fn pair_with(
        config: TransportConfig,
    ) -> Result<(Arc<Self>, Arc<Self>), TransportError> {
        let (a_tx, a_rx) = mpsc::channel();
        let (b_tx, b_rx) = mpsc::channel();

        let a = Arc::new(Self {
            id: ConnectionId::next(),
            config: config.clone(),
            outbound: Mutex::new(b_tx.clone()),
            inbox: Mutex::new(a_tx.clone()),
            listeners: Listeners::new(),
        });
        let b = Arc::new(Self {
            id: ConnectionId::next(),
            config,
            outbound: Mutex::new(a_tx),
            inbox: Mutex::new(b_tx),
            listeners: Listeners::new(),
        });

        Self::spawn_reader(&a, a_rx)?;
        Self::spawn_reader(&b, b_rx)?;
        tracing::debug!(a = %a.id, b = %b.id, "memory pair created");
        Ok((a, b))
    }

    fn spawn_reader(conn: &Arc<Self>, inbox: Receiver<Frame>) -> Result<(), TransportError> {
        let reader = Arc::clone(conn);
        thread::Builder::new()
            .name(format!("tessera-reader-{}", conn.id.into_inner()))
            .spawn(move || reader.read_loop(inbox))
            .map_err(TransportError::SocketSetup)?;
        Ok(())
    }

    fn read_loop(self: Arc<Self>, inbox: Receiver<Frame>) {
        for frame in inbox.iter() {
            match frame {
                Frame::Message(message) if !self.is_closed() => {
                    self.listeners.deliver(&message);
                }
                Frame::Message(_) => {}
                Frame::Close => break,
            }
        }
        self.close();
    }
}

impl Connection for MemoryConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn send(&self, message: &str) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::ConnectionClosed(self.id));
        }
        self.config.validate(message)?;
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .send(Frame::Message(message.to_string()))
            .map_err(|_| TransportError::ConnectionClosed(self.id))
    }

    fn add_listener(&self, listener: Arc<dyn MessageListener>) {
        self.listeners.add(listener);
    }

    fn close(&self) {
        if !self.listeners.begin_close() {
            return;
        }
        // Either reader may already be gone; a failed send is fine.
        let _ = self
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .send(Frame::Close);
        let _ = self
            .inbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .send(Frame::Close);
        tracing::debug!(conn = %self.id, "memory connection closed");
        self.listeners.notify_closed();
    }

    fn is_closed(&self) -> bool {
        self.listeners.is_closed()
    }
}

impl fmt::Debug for MemoryConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryConnection")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}
