//! Server side of a remote interface.
//!
//! A [`Dispatcher`] listens on a connection, decodes each incoming
//! [`Request`], resolves it against a [`Service`]'s interface, runs it, and
//! sends a [`Response`] back for value-returning methods.
//!
//! Failures while serving a request (unknown method, bad arguments, a
//! service error or panic, a response that cannot be sent) are logged and
//! the request is dropped. No error response exists on the wire, so the
//! caller keeps waiting until its connection closes.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tessera_protocol::{grammar, Registry, Request, Response, Value, ValueList};
use tessera_transport::{Connection, ConnectionId, MessageListener};

use crate::{DispatchError, InterfaceDef, MethodDef};

/// A local object that serves one remote interface.
///
/// ```
/// use tessera::{Arguments, DispatchError, InterfaceDef, MethodDef, Service, Value};
///
/// const SHOUT: MethodDef = MethodDef::returning("shout", &["str"]);
/// static SHOUTER: InterfaceDef = InterfaceDef::new("demo.Shouter", &[SHOUT]);
///
/// struct Shouter;
///
/// impl Service for Shouter {
///     fn interface(&self) -> &'static InterfaceDef {
///         &SHOUTER
///     }
///
///     fn call(&self, method: &MethodDef, mut args: Arguments) -> Result<Value, DispatchError> {
///         match method.name {
///             "shout" => Ok(Value::new(args.take::<String>(0)?.to_uppercase())),
///             other => Err(DispatchError::failed(format!("{other} is not served"))),
///         }
///     }
/// }
/// ```
pub trait Service: Send + Sync + 'static {
    fn interface(&self) -> &'static InterfaceDef;

    /// Runs one resolved method. The return value of a void method is
    /// ignored; return [`Value::unit`].
    fn call(&self, method: &MethodDef, arguments: Arguments) -> Result<Value, DispatchError>;
}

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

/// Decoded arguments of one request, with typed positional access.
#[derive(Debug)]
pub struct Arguments {
    method: &'static str,
    values: ValueList,
}

impl Arguments {
    pub fn new(method: &'static str, values: ValueList) -> Self {
        Self { method, values }
    }

    /// Moves argument `index` out as a `T`. The slot is left holding unit.
    pub fn take<T: Any>(&mut self, index: usize) -> Result<T, DispatchError> {
        let method = self.method;
        let slot = self
            .values
            .get_mut(index)
            .ok_or(DispatchError::MissingArgument { method, index })?;
        std::mem::take(slot)
            .downcast::<T>()
            .map_err(|other| DispatchError::ArgumentType {
                method,
                index,
                expected: std::any::type_name::<T>(),
                actual: other.type_name(),
            })
    }

    /// Borrows argument `index` as a `T`.
    pub fn get<T: Any>(&self, index: usize) -> Result<&T, DispatchError> {
        let method = self.method;
        let value = self
            .values
            .get(index)
            .ok_or(DispatchError::MissingArgument { method, index })?;
        value
            .downcast_ref::<T>()
            .ok_or(DispatchError::ArgumentType {
                method,
                index,
                expected: std::any::type_name::<T>(),
                actual: value.type_name(),
            })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_values(self) -> ValueList {
        self.values
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Serves a [`Service`] over one connection.
///
/// The connection is held weakly; dropping every other handle to it lets
/// it go away even while the dispatcher is still registered.
pub struct Dispatcher {
    service: Arc<dyn Service>,
    connection: Weak<dyn Connection>,
    connection_id: ConnectionId,
    registry: Arc<Registry>,
    served: AtomicU64,
}

impl Dispatcher {
    /// Starts serving `service` on `connection`.
    pub fn attach(
        service: Arc<dyn Service>,
        connection: Arc<dyn Connection>,
        registry: Arc<Registry>,
    ) -> Arc<Self> {
        let dispatcher = Arc::new(Self {
            service,
            connection: Arc::downgrade(&connection),
            connection_id: connection.id(),
            registry,
            served: AtomicU64::new(0),
        });
        connection.add_listener(dispatcher.clone());
        tracing::debug!(
            conn = %dispatcher.connection_id,
            interface = dispatcher.service.interface().name,
            "dispatcher attached"
        );
        dispatcher
    }

    /// Requests that ran to completion (void or answered).
    pub fn served(&self) -> u64 {
        self.served.load(Ordering::Relaxed)
    }

    fn handle(&self, request: Request) -> Result<(), DispatchError> {
        let interface = self.service.interface();
        let method = interface
            .resolve(&request.method)
            .ok_or_else(|| DispatchError::UnknownMethod(request.method.clone()))?;

        let arguments = Arguments::new(method.name, request.arguments);
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.service.call(method, arguments)
        }))
        .map_err(|_| DispatchError::Panicked {
            method: method.name,
        })??;

        if method.is_void() {
            self.served.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        let text = self.registry.to_wire(Response {
            id: request.id,
            value: result,
        })?;
        let Some(connection) = self.connection.upgrade() else {
            tracing::debug!(conn = %self.connection_id, call = request.id, "connection gone, response dropped");
            return Ok(());
        };
        connection.send(&text)?;
        self.served.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl MessageListener for Dispatcher {
    fn on_message(&self, message: &str) {
        if grammar::tag(message) != Some("request") {
            return;
        }
        let request = match self.registry.decode_as::<Request>(message) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(conn = %self.connection_id, error = %e, "dropping undecodable request");
                return;
            }
        };

        let call = request.id;
        let method = request.method.to_string();
        tracing::debug!(conn = %self.connection_id, call, %method, "dispatching");
        if let Err(e) = self.handle(request) {
            tracing::warn!(conn = %self.connection_id, call, %method, error = %e, "dispatch failed");
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("interface", &self.service.interface().name)
            .field("connection", &self.connection_id)
            .field("served", &self.served())
            .finish()
    }
}
