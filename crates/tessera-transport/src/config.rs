/// Settings shared by every connection a transport opens or accepts.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Disable Nagle's algorithm on TCP sockets. Calls are small and
    /// latency-bound, so this is on by default.
    pub nodelay: bool,

    /// Largest message, in bytes, that may be sent or received (line
    /// terminator excluded). A peer that sends a longer line is
    /// disconnected.
    ///
    /// Default: 16 MiB.
    pub max_message_len: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            nodelay: true,
            max_message_len: 16 * 1024 * 1024,
        }
    }
}

impl TransportConfig {
    /// Checks an outgoing message against the framing rules.
    pub(crate) fn validate(&self, message: &str) -> Result<(), crate::TransportError> {
        if message.len() > self.max_message_len {
            return Err(crate::TransportError::MessageTooLarge {
                len: message.len(),
                max: self.max_message_len,
            });
        }
        if message.contains(['\n', '\r']) {
            return Err(crate::TransportError::EmbeddedNewline);
        }
        Ok(())
    }
}
