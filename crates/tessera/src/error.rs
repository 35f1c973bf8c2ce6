//! Error types for the RPC layer.

use tessera_protocol::{ConversionError, GrammarError, MethodDescriptor};
use tessera_transport::TransportError;

/// Failure of an outgoing call, reported to the caller.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// The request could not be sent.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// An argument or the response could not be converted.
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    /// The interface declares no such method.
    #[error("{interface} has no method `{method}` taking {arity} argument(s)")]
    UnknownMethod {
        interface: &'static str,
        method: String,
        arity: usize,
    },

    /// The connection closed while the call was waiting for its response.
    #[error("connection closed before the response arrived")]
    ConnectionClosed,

    /// A typed call was made on a method that does not answer.
    #[error("`{method}` does not return a value")]
    NoReturnValue { method: String },

    /// The response carried a different type than the caller asked for.
    #[error("`{method}` returned a {actual}, expected a {expected}")]
    ReturnType {
        method: String,
        expected: &'static str,
        actual: &'static str,
    },
}

/// Failure while serving an incoming request.
///
/// These never reach the caller: the dispatcher logs them and drops the
/// request.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The service's interface has no method matching the descriptor.
    #[error("no method matches {0}")]
    UnknownMethod(MethodDescriptor),

    /// The request carried fewer arguments than the service read.
    #[error("`{method}` has no argument #{index}")]
    MissingArgument { method: &'static str, index: usize },

    /// An argument has a different type than the service expected.
    #[error("`{method}` argument #{index} is a {actual}, expected a {expected}")]
    ArgumentType {
        method: &'static str,
        index: usize,
        expected: &'static str,
        actual: &'static str,
    },

    /// The service itself reported a failure.
    #[error("service failed: {0}")]
    Failed(String),

    /// The service panicked.
    #[error("service panicked in `{method}`")]
    Panicked { method: &'static str },

    /// The response could not be encoded.
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    /// The response could not be sent.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl DispatchError {
    /// Shorthand for a service-level failure.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}

/// Top-level error that wraps all crate-specific errors.
///
/// Hosts that drive several layers at once can use this single type; the
/// `#[from]` conversions let `?` lift any layer's error into it.
#[derive(Debug, thiserror::Error)]
pub enum TesseraError {
    #[error(transparent)]
    Grammar(#[from] GrammarError),

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::Shutdown;
        let tessera_err: TesseraError = err.into();
        assert!(matches!(tessera_err, TesseraError::Transport(_)));
    }

    #[test]
    fn test_from_rpc_error() {
        let err = RpcError::ConnectionClosed;
        let tessera_err: TesseraError = err.into();
        assert!(matches!(tessera_err, TesseraError::Rpc(_)));
        assert!(tessera_err.to_string().contains("connection closed"));
    }

    #[test]
    fn test_from_grammar_error() {
        let err = GrammarError::NotATerm("oops".into());
        let tessera_err: TesseraError = err.into();
        assert!(matches!(tessera_err, TesseraError::Grammar(_)));
        assert!(tessera_err.to_string().contains("oops"));
    }

    #[test]
    fn test_unknown_method_display_names_interface() {
        let err = RpcError::UnknownMethod {
            interface: "lobby.Room",
            method: "dance".into(),
            arity: 2,
        };
        assert_eq!(
            err.to_string(),
            "lobby.Room has no method `dance` taking 2 argument(s)"
        );
    }

    #[test]
    fn test_dispatch_failed_shorthand() {
        let err = DispatchError::failed("room is full");
        assert_eq!(err.to_string(), "service failed: room is full");
    }
}
