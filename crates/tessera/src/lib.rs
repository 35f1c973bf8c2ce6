//! # Tessera
//!
//! Remote procedure calls over a line-delimited, human-readable text
//! protocol.
//!
//! One connection carries calls in both directions. Each side may bind a
//! [`CallProxy`] to call the peer and attach a [`Dispatcher`] to serve the
//! peer's calls:
//!
//! ```text
//!   caller thread                                   peer reader thread
//!   CallProxy::invoke ──request(long(7),...)──▶ Dispatcher ──▶ Service::call
//!        ▲ (waits on slot 7)                                     │
//!        └──────────────────response(long(7),...)◀───────────────┘
//! ```
//!
//! The building blocks live in two lower crates, re-exported here:
//! [`protocol`] (grammar, values, conversion rules, registry, envelopes)
//! and [`transport`] (TCP client, TCP server, in-process pair).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tessera::prelude::*;
//!
//! const ADD: MethodDef = MethodDef::returning("add", &["int", "int"]);
//! static CALCULATOR: InterfaceDef = InterfaceDef::new("demo.Calculator", &[ADD]);
//!
//! let registry = Arc::new(Registry::with_defaults());
//! let conn = TcpConnection::connect("127.0.0.1:7000", TransportConfig::default())?;
//! let calc = CallProxy::new(&CALCULATOR, conn, registry);
//! let sum: i32 = calc.call("add", vec![2i32.into(), 3i32.into()])?;
//! # Ok::<(), TesseraError>(())
//! ```

mod dispatcher;
mod error;
mod interface;
mod proxy;

pub use dispatcher::{Arguments, Dispatcher, Service};
pub use error::{DispatchError, RpcError, TesseraError};
pub use interface::{InterfaceDef, MethodDef, Returns};
pub use proxy::CallProxy;

pub use tessera_protocol as protocol;
pub use tessera_transport as transport;

pub use tessera_protocol::{Registry, Value, ValueList, ValueMap, WireEnum};

/// Everything a host needs to define, serve and call an interface.
pub mod prelude {
    pub use crate::{
        Arguments, CallProxy, DispatchError, Dispatcher, InterfaceDef, MethodDef, Returns,
        RpcError, Service, TesseraError,
    };
    pub use tessera_protocol::{
        ConversionError, Registry, TypeKey, Value, ValueList, ValueMap, WireEnum,
    };
    pub use tessera_transport::{
        Connection, MemoryConnection, MessageListener, ServerListener, TcpConnection, TcpServer,
        TcpServerBuilder, TransportConfig, TransportError, UserId,
    };
}
