//! Client side of a remote interface.
//!
//! A [`CallProxy`] turns method calls into [`Request`]s and waits for the
//! matching [`Response`]. Every request carries a fresh id; the peer copies
//! it into the response, and the proxy hands each response to the call that
//! is waiting for that id. Several threads can therefore call through the
//! same proxy at once without getting each other's answers.
//!
//! # Blocking
//!
//! [`invoke`](CallProxy::invoke) blocks the calling thread until the
//! response arrives or the connection closes. There is no timeout. Do not
//! call a value-returning method from inside a listener or service running
//! on the same connection: the response would be delivered by the very
//! thread that is waiting for it. Use [`invoke_async`](CallProxy::invoke_async)
//! from async code.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tessera_protocol::{grammar, ConversionError, Registry, Request, Response, Value, ValueList};
use tessera_transport::{Connection, MessageListener};
use tokio::sync::oneshot;

use crate::{InterfaceDef, MethodDef, RpcError};

/// Request ids are unique per process, so several proxies can share one
/// connection without mistaking each other's responses.
static NEXT_CALL_ID: AtomicU64 = AtomicU64::new(1);

fn next_call_id() -> u64 {
    NEXT_CALL_ID.fetch_add(1, Ordering::Relaxed)
}

// ---------------------------------------------------------------------------
// Pending calls
// ---------------------------------------------------------------------------

/// What a waiting call receives: the value, or why its response could
/// not be read.
type Answer = Result<Value, ConversionError>;

#[derive(Default)]
struct PendingState {
    closed: bool,
    calls: HashMap<u64, oneshot::Sender<Answer>>,
}

/// Listener that routes responses to waiting calls by id.
struct PendingCalls {
    registry: Arc<Registry>,
    state: Mutex<PendingState>,
}

impl PendingCalls {
    fn state(&self) -> std::sync::MutexGuard<'_, PendingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserves a slot for `id`. `None` once the connection has closed.
    fn register(&self, id: u64) -> Option<oneshot::Receiver<Answer>> {
        let mut state = self.state();
        if state.closed {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        state.calls.insert(id, tx);
        Some(rx)
    }

    fn forget(&self, id: u64) {
        self.state().calls.remove(&id);
    }

    fn len(&self) -> usize {
        self.state().calls.len()
    }

    fn answer(&self, id: u64, answer: Answer) {
        let Some(slot) = self.state().calls.remove(&id) else {
            // Another proxy on this connection may own the id.
            tracing::debug!(call = id, "response for unknown call");
            return;
        };
        if slot.send(answer).is_err() {
            tracing::debug!(call = id, "caller gave up before the response");
        }
    }
}

/// Reads just the correlation id of a response whose value did not decode.
fn response_id(message: &str, registry: &Registry) -> Option<u64> {
    let elems = grammar::expect(message, "response", 2).ok()?;
    let id = registry.decode_as::<i64>(elems[0]).ok()?;
    u64::try_from(id).ok()
}

impl MessageListener for PendingCalls {
    fn on_message(&self, message: &str) {
        if grammar::tag(message) != Some("response") {
            return;
        }
        match self.registry.decode_as::<Response>(message) {
            Ok(response) => self.answer(response.id, Ok(response.value)),
            Err(e) => match response_id(message, &self.registry) {
                Some(id) => {
                    tracing::warn!(call = id, error = %e, "response did not decode, failing the call");
                    self.answer(id, Err(e));
                }
                None => tracing::warn!(error = %e, "dropping response without a readable id"),
            },
        }
    }

    fn on_close(&self) {
        let mut state = self.state();
        state.closed = true;
        // Dropping the senders wakes every waiting call with an error.
        let abandoned = std::mem::take(&mut state.calls);
        drop(state);
        if !abandoned.is_empty() {
            tracing::debug!(calls = abandoned.len(), "failing pending calls on close");
        }
    }
}

// ---------------------------------------------------------------------------
// Proxy
// ---------------------------------------------------------------------------

/// Local stand-in for an interface implemented by the peer.
///
/// Hosts usually wrap it in a struct that implements their own Rust trait
/// for the interface, one forwarding method per [`MethodDef`]:
///
/// ```no_run
/// use std::sync::Arc;
/// use tessera::{CallProxy, InterfaceDef, MethodDef, Registry, RpcError};
/// use tessera::transport::{Connection, TcpConnection, TransportConfig};
///
/// const ADD: MethodDef = MethodDef::returning("add", &["int", "int"]);
/// static CALCULATOR: InterfaceDef = InterfaceDef::new("demo.Calculator", &[ADD]);
///
/// struct Calculator(CallProxy);
///
/// impl Calculator {
///     fn add(&self, a: i32, b: i32) -> Result<i32, RpcError> {
///         self.0.call("add", vec![a.into(), b.into()])
///     }
/// }
///
/// let conn = TcpConnection::connect("127.0.0.1:7000", TransportConfig::default())?;
/// let calc = Calculator(CallProxy::new(
///     &CALCULATOR,
///     conn,
///     Arc::new(Registry::with_defaults()),
/// ));
/// assert_eq!(calc.add(2, 3)?, 5);
/// # Ok::<(), tessera::TesseraError>(())
/// ```
pub struct CallProxy {
    interface: &'static InterfaceDef,
    connection: Arc<dyn Connection>,
    registry: Arc<Registry>,
    pending: Arc<PendingCalls>,
}

impl CallProxy {
    /// Binds to `connection` and starts listening for responses on it.
    pub fn new(
        interface: &'static InterfaceDef,
        connection: Arc<dyn Connection>,
        registry: Arc<Registry>,
    ) -> Self {
        let pending = Arc::new(PendingCalls {
            registry: Arc::clone(&registry),
            state: Mutex::new(PendingState::default()),
        });
        connection.add_listener(pending.clone());
        tracing::debug!(conn = %connection.id(), interface = interface.name, "call proxy bound");

        Self {
            interface,
            connection,
            registry,
            pending,
        }
    }

    pub fn interface(&self) -> &'static InterfaceDef {
        self.interface
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    /// Number of calls waiting for a response.
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    /// Calls `method` on the peer.
    ///
    /// Void methods return `Ok(None)` as soon as the request is written.
    /// Others block until the response arrives and return `Ok(Some(value))`,
    /// or fail with [`RpcError::ConnectionClosed`] if the connection goes
    /// away first. A response whose value this side cannot decode fails
    /// the call with [`RpcError::Conversion`].
    ///
    /// # Panics
    ///
    /// Panics when called from inside an async runtime on a value-returning
    /// method; use [`invoke_async`](Self::invoke_async) there.
    pub fn invoke(&self, method: &str, arguments: ValueList) -> Result<Option<Value>, RpcError> {
        let (def, request) = self.prepare(method, arguments)?;
        if def.is_void() {
            self.send(&request)?;
            return Ok(None);
        }

        let slot = self.dispatch(&request)?;
        let value = slot
            .blocking_recv()
            .map_err(|_| RpcError::ConnectionClosed)??;
        tracing::debug!(call = request.id, method = def.name, "call answered");
        Ok(Some(value))
    }

    /// Async flavor of [`invoke`](Self::invoke): the wait is a future
    /// instead of a blocked thread.
    pub async fn invoke_async(
        &self,
        method: &str,
        arguments: ValueList,
    ) -> Result<Option<Value>, RpcError> {
        let (def, request) = self.prepare(method, arguments)?;
        if def.is_void() {
            self.send(&request)?;
            return Ok(None);
        }

        let slot = self.dispatch(&request)?;
        let value = slot.await.map_err(|_| RpcError::ConnectionClosed)??;
        tracing::debug!(call = request.id, method = def.name, "call answered");
        Ok(Some(value))
    }

    /// Calls a value-returning method and downcasts the result.
    pub fn call<R: Any>(&self, method: &str, arguments: ValueList) -> Result<R, RpcError> {
        let value = self
            .invoke(method, arguments)?
            .ok_or_else(|| RpcError::NoReturnValue {
                method: method.to_string(),
            })?;
        value.downcast::<R>().map_err(|other| RpcError::ReturnType {
            method: method.to_string(),
            expected: std::any::type_name::<R>(),
            actual: other.type_name(),
        })
    }

    /// Calls a void method. On a value-returning method this still waits
    /// for the response and discards it.
    pub fn notify(&self, method: &str, arguments: ValueList) -> Result<(), RpcError> {
        self.invoke(method, arguments).map(drop)
    }

    fn prepare(
        &self,
        method: &str,
        arguments: ValueList,
    ) -> Result<(&'static MethodDef, Request), RpcError> {
        let def = self
            .interface
            .find(method, arguments.len())
            .ok_or_else(|| RpcError::UnknownMethod {
                interface: self.interface.name,
                method: method.to_string(),
                arity: arguments.len(),
            })?;

        let request = Request {
            id: next_call_id(),
            method: def.descriptor(self.interface.name),
            arguments,
        };
        Ok((def, request))
    }

    /// Registers the response slot, then sends. The slot must exist before
    /// the request leaves, or a fast answer would find nobody waiting.
    fn dispatch(&self, request: &Request) -> Result<oneshot::Receiver<Answer>, RpcError> {
        let slot = self
            .pending
            .register(request.id)
            .ok_or(RpcError::ConnectionClosed)?;
        if let Err(e) = self.send(request) {
            self.pending.forget(request.id);
            return Err(e);
        }
        Ok(slot)
    }

    fn send(&self, request: &Request) -> Result<(), RpcError> {
        let text = self.registry.to_wire(request.clone())?;
        tracing::debug!(
            conn = %self.connection.id(),
            call = request.id,
            method = %request.method,
            "sending request"
        );
        self.connection.send(&text)?;
        Ok(())
    }
}

impl fmt::Debug for CallProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallProxy")
            .field("interface", &self.interface.name)
            .field("connection", &self.connection.id())
            .field("pending_calls", &self.pending.len())
            .finish()
    }
}
