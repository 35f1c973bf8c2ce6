//! Transport layer for Tessera.
//!
//! A transport moves whole text messages between two peers. Everything
//! above it (encoding, calls, dispatch) sees only the [`Connection`] trait:
//!
//! - [`Connection::send`] writes one message.
//! - [`Connection::add_listener`] registers a [`MessageListener`] that is
//!   called for every message that arrives, and once when the connection
//!   closes.
//! - [`Connection::close`] tears the connection down. It is idempotent.
//!
//! # Implementations
//!
//! - [`TcpConnection`]: an outbound (or accepted) TCP socket. Messages are
//!   framed one per line.
//! - [`TcpServer`]: accepts any number of clients and reports
//!   connect/disconnect events to [`ServerListener`]s.
//! - [`MemoryConnection`]: two connected ends inside one process.
//!
//! # Threading
//!
//! Every connection owns one reader thread. Listener callbacks run on that
//! thread, in the order messages arrived. A callback that blocks stalls
//! delivery for that connection only.

mod config;
mod error;
mod listeners;
mod memory;
mod server;
mod tcp;

pub use config::TransportConfig;
pub use error::TransportError;
pub use memory::MemoryConnection;
pub use server::{ServerListener, TcpServer, TcpServerBuilder};
pub use tcp::TcpConnection;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier for a connection, used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocates the next unused id.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Opaque identifier the server hands out for each accepted client.
///
/// 128 random bits, so ids from different server runs do not collide and
/// cannot be guessed from one another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserId(u128);

impl UserId {
    pub fn generate() -> Self {
        Self(rand::rng().random())
    }

    pub fn from_u128(raw: u128) -> Self {
        Self(raw)
    }

    pub fn as_u128(self) -> u128 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Receives messages from a [`Connection`].
///
/// Any `Fn(&str) + Send + Sync` closure is a listener too.
pub trait MessageListener: Send + Sync + 'static {
    /// Called on the connection's reader thread for each message.
    fn on_message(&self, message: &str);

    /// Called once when the connection closes, for whatever reason.
    fn on_close(&self) {}
}

impl<F> MessageListener for F
where
    F: Fn(&str) + Send + Sync + 'static,
{
    fn on_message(&self, message: &str) {
        self(message)
    }
}

/// One end of a bidirectional message stream.
pub trait Connection: Send + Sync + 'static {
    fn id(&self) -> ConnectionId;

    /// Sends one message. Messages must not contain line breaks.
    fn send(&self, message: &str) -> Result<(), TransportError>;

    /// Registers a listener for incoming messages. Listeners added after
    /// the connection closed get `on_close` immediately.
    fn add_listener(&self, listener: Arc<dyn MessageListener>);

    /// Closes the connection. Safe to call any number of times.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId::new(7);
        assert_eq!(id.to_string(), "conn-7");
        assert_eq!(id.into_inner(), 7);
    }

    #[test]
    fn test_connection_id_next_is_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn test_user_id_display_is_32_hex_chars() {
        let id = UserId::from_u128(0xabc);
        assert_eq!(id.to_string(), "00000000000000000000000000000abc");
        assert_eq!(UserId::generate().to_string().len(), 32);
    }

    #[test]
    fn test_user_id_generate_is_random() {
        // 128 random bits: a collision here means the generator is broken.
        assert_ne!(UserId::generate(), UserId::generate());
    }

    #[test]
    fn test_closure_is_a_message_listener() {
        use std::sync::Mutex;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let listener: Arc<dyn MessageListener> = Arc::new(move |m: &str| {
            sink.lock().unwrap().push(m.to_string());
        });

        listener.on_message("hello");
        listener.on_close();
        assert_eq!(*seen.lock().unwrap(), vec!["hello".to_string()]);
    }
}
