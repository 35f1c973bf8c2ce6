use crate::ConnectionId;

/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Opening an outbound connection failed (refused, unreachable, ...).
    #[error("connect to {addr} failed: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Binding the server socket failed.
    #[error("bind to {addr} failed: {source}")]
    BindFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Preparing a freshly opened socket (cloning handles, setting
    /// options) failed.
    #[error("socket setup failed: {0}")]
    SocketSetup(#[source] std::io::Error),

    /// The connection was already closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(ConnectionId),

    /// Writing to the socket failed. The connection has been closed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// The message exceeds the configured maximum length.
    #[error("message of {len} bytes exceeds the {max} byte limit")]
    MessageTooLarge { len: usize, max: usize },

    /// Messages are framed by line breaks and may not contain one.
    #[error("message contains a line break")]
    EmbeddedNewline,

    /// The server was shut down.
    #[error("transport shut down")]
    Shutdown,
}
