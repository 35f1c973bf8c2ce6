//! End-to-end tests: a proxy on one end, a dispatcher on the other.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tessera::prelude::*;
use tessera::protocol::{Request, Response};

const TIMEOUT: Duration = Duration::from_secs(5);

// -- Interface --------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Note {
    author: String,
    text: String,
}

const ADD: MethodDef = MethodDef::returning("add", &["int", "int"]);
const ECHO: MethodDef = MethodDef::returning("echo", &["str"]);
const NOTES: MethodDef = MethodDef::returning("notes", &[]);
const POST: MethodDef = MethodDef::void("post", &["test.Note"]);
const FAIL: MethodDef = MethodDef::returning("fail", &[]);

static BOARD: InterfaceDef = InterfaceDef::new("test.Board", &[ADD, ECHO, NOTES, POST, FAIL]);

/// Typed client the way hosts write them: one forwarding method each.
struct BoardProxy(CallProxy);

impl BoardProxy {
    fn add(&self, a: i32, b: i32) -> Result<i32, RpcError> {
        self.0.call("add", vec![a.into(), b.into()])
    }

    fn echo(&self, text: &str) -> Result<String, RpcError> {
        self.0.call("echo", vec![text.into()])
    }

    fn notes(&self) -> Result<ValueList, RpcError> {
        self.0.call("notes", vec![])
    }

    fn post(&self, note: Note) -> Result<(), RpcError> {
        self.0.notify("post", vec![Value::new(note)])
    }
}

struct Board {
    notes: Mutex<Vec<Note>>,
    posted: Mutex<Sender<Note>>,
}

impl Board {
    fn new() -> (Arc<Self>, Receiver<Note>) {
        let (tx, rx) = mpsc::channel();
        let board = Arc::new(Self {
            notes: Mutex::new(Vec::new()),
            posted: Mutex::new(tx),
        });
        (board, rx)
    }
}

impl Service for Board {
    fn interface(&self) -> &'static InterfaceDef {
        &BOARD
    }

    fn call(&self, method: &MethodDef, mut args: Arguments) -> Result<Value, DispatchError> {
        match method.name {
            "add" => {
                let a: i32 = args.take(0)?;
                let b: i32 = args.take(1)?;
                Ok(Value::new(a + b))
            }
            "echo" => Ok(Value::new(args.take::<String>(0)?)),
            "notes" => {
                let notes = self.notes.lock().unwrap();
                Ok(Value::new(
                    notes.iter().cloned().map(Value::new).collect::<ValueList>(),
                ))
            }
            "post" => {
                let note: Note = args.take(0)?;
                self.notes.lock().unwrap().push(note.clone());
                let _ = self.posted.lock().unwrap().send(note);
                Ok(Value::unit())
            }
            "fail" => Err(DispatchError::failed("this method always fails")),
            other => Err(DispatchError::failed(format!("{other} is not served"))),
        }
    }
}

fn registry() -> Arc<Registry> {
    let mut registry = Registry::with_defaults();
    registry.add_struct::<Note>("test.Note");
    Arc::new(registry)
}

/// Board served on `b`, typed proxy on `a`.
fn memory_setup() -> (
    Arc<MemoryConnection>,
    BoardProxy,
    Arc<Dispatcher>,
    Receiver<Note>,
) {
    let (a, b) = MemoryConnection::pair().unwrap();
    let (board, posted) = Board::new();
    let dispatcher = Dispatcher::attach(board, b, registry());
    let proxy = BoardProxy(CallProxy::new(&BOARD, a.clone(), registry()));
    (a, proxy, dispatcher, posted)
}

// -- Happy path -------------------------------------------------------------

#[test]
fn test_call_returns_service_result_exactly_once() {
    let (conn, board, dispatcher, _posted) = memory_setup();

    assert_eq!(board.add(2, 3).unwrap(), 5);
    assert_eq!(board.echo("a \"quoted\", (tricky) string").unwrap(), "a \"quoted\", (tricky) string");
    assert_eq!(dispatcher.served(), 2);
    assert_eq!(board.0.pending_calls(), 0);
    conn.close();
}

#[test]
fn test_void_call_then_struct_round_trip() {
    let (conn, board, _dispatcher, posted) = memory_setup();
    let note = Note {
        author: "ana".into(),
        text: "line one\nline two".into(),
    };

    assert!(board.post(note.clone()).is_ok());
    assert_eq!(posted.recv_timeout(TIMEOUT).unwrap(), note);

    let notes = board.notes().unwrap();
    assert_eq!(notes, vec![Value::new(note)]);
    conn.close();
}

#[test]
fn test_void_call_returns_without_waiting_for_peer() {
    // Nobody serves the other end; a void call still returns at once.
    let (a, _b) = MemoryConnection::pair().unwrap();
    let proxy = CallProxy::new(&BOARD, a.clone(), registry());
    let note = Note::default();

    assert!(proxy.invoke("post", vec![Value::new(note)]).unwrap().is_none());
    assert_eq!(proxy.pending_calls(), 0);
    a.close();
}

// -- Correlation ------------------------------------------------------------

#[test]
fn test_concurrent_calls_each_get_their_own_answer() {
    let (conn, board, dispatcher, _posted) = memory_setup();
    let board = Arc::new(board);

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let board = Arc::clone(&board);
            thread::spawn(move || {
                for j in 0..25 {
                    assert_eq!(board.add(i * 1000, j).unwrap(), i * 1000 + j);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(dispatcher.served(), 200);
    conn.close();
}

#[test]
fn test_out_of_order_responses_reach_the_right_caller() {
    let (a, b) = MemoryConnection::pair().unwrap();
    let registry = registry();
    let proxy = Arc::new(CallProxy::new(&BOARD, a.clone(), Arc::clone(&registry)));

    // A hand-rolled peer that collects two requests and answers them in
    // reverse order.
    let (tx, requests) = mpsc::channel();
    let tx = Mutex::new(tx);
    let decoder = Arc::clone(&registry);
    b.add_listener(Arc::new(move |m: &str| {
        let request = decoder.decode_as::<Request>(m).unwrap();
        let _ = tx.lock().unwrap().send(request);
    }));

    let first = {
        let proxy = Arc::clone(&proxy);
        thread::spawn(move || proxy.call::<String>("echo", vec!["first".into()]))
    };
    let r1 = requests.recv_timeout(TIMEOUT).unwrap();
    let second = {
        let proxy = Arc::clone(&proxy);
        thread::spawn(move || proxy.call::<String>("echo", vec!["second".into()]))
    };
    let r2 = requests.recv_timeout(TIMEOUT).unwrap();
    assert_ne!(r1.id, r2.id);

    for request in [r2, r1] {
        let echoed = request.arguments[0].clone();
        let response = Response {
            id: request.id,
            value: echoed,
        };
        b.send(&registry.to_wire(response).unwrap()).unwrap();
    }

    assert_eq!(first.join().unwrap().unwrap(), "first");
    assert_eq!(second.join().unwrap().unwrap(), "second");
    a.close();
}

// -- Failure paths ----------------------------------------------------------

#[test]
fn test_unknown_method_fails_before_sending() {
    let (conn, board, dispatcher, _posted) = memory_setup();

    let err = board.0.invoke("subtract", vec![1i32.into(), 2i32.into()]).unwrap_err();
    assert!(matches!(err, RpcError::UnknownMethod { arity: 2, .. }));
    let err = board.0.invoke("add", vec![1i32.into()]).unwrap_err();
    assert!(matches!(err, RpcError::UnknownMethod { arity: 1, .. }));
    assert_eq!(dispatcher.served(), 0);
    conn.close();
}

#[test]
fn test_method_missing_on_server_is_swallowed() {
    // The client's idea of the interface has a method the server lacks.
    const SHRUG: MethodDef = MethodDef::void("shrug", &[]);
    static NEWER_BOARD: InterfaceDef = InterfaceDef::new("test.Board", &[SHRUG, ECHO]);

    let (a, b) = MemoryConnection::pair().unwrap();
    let (board, _posted) = Board::new();
    let dispatcher = Dispatcher::attach(board, b, registry());
    let proxy = CallProxy::new(&NEWER_BOARD, a.clone(), registry());

    proxy.notify("shrug", vec![]).unwrap();
    // The dispatcher survived and still answers.
    assert_eq!(proxy.call::<String>("echo", vec!["still here".into()]).unwrap(), "still here");
    assert_eq!(dispatcher.served(), 1);
    a.close();
}

#[test]
fn test_failed_dispatch_leaves_caller_waiting_until_close() {
    let (conn, board, _dispatcher, _posted) = memory_setup();
    let board = Arc::new(board);

    let (done_tx, done) = mpsc::channel();
    let caller = Arc::clone(&board);
    thread::spawn(move || {
        let _ = done_tx.send(caller.0.invoke("fail", vec![]));
    });

    // No error response exists, so nothing comes back.
    assert!(done.recv_timeout(Duration::from_millis(300)).is_err());
    assert_eq!(board.0.pending_calls(), 1);

    conn.close();
    let result = done.recv_timeout(TIMEOUT).unwrap();
    assert!(matches!(result, Err(RpcError::ConnectionClosed)));
}

#[test]
fn test_response_caller_cannot_decode_fails_the_call() {
    let (a, b) = MemoryConnection::pair().unwrap();
    let (board, _posted) = Board::new();
    board.notes.lock().unwrap().push(Note {
        author: "ana".into(),
        text: "hi".into(),
    });
    let _dispatcher = Dispatcher::attach(board, b, registry());
    // The caller never registered test.Note, so the answer is unreadable.
    let proxy = BoardProxy(CallProxy::new(
        &BOARD,
        a.clone(),
        Arc::new(Registry::with_defaults()),
    ));

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let result = proxy.notes();
        let _ = tx.send((result, proxy.0.pending_calls()));
    });

    let (result, pending) = rx.recv_timeout(TIMEOUT).unwrap();
    assert!(matches!(result, Err(RpcError::Conversion(_))));
    assert_eq!(pending, 0);
    assert!(!a.is_closed());
    a.close();
}

#[test]
fn test_peer_close_fails_pending_call() {
    let (a, b) = MemoryConnection::pair().unwrap();
    let proxy = Arc::new(CallProxy::new(&BOARD, a.clone(), registry()));

    let (tx, arrived) = mpsc::channel();
    let tx = Mutex::new(tx);
    b.add_listener(Arc::new(move |_: &str| {
        let _ = tx.lock().unwrap().send(());
    }));

    let caller = Arc::clone(&proxy);
    let call = thread::spawn(move || caller.invoke("echo", vec!["hello?".into()]));
    arrived.recv_timeout(TIMEOUT).unwrap();

    b.close();
    assert!(matches!(call.join().unwrap(), Err(RpcError::ConnectionClosed)));
    assert!(matches!(
        proxy.invoke("echo", vec!["again".into()]),
        Err(RpcError::ConnectionClosed)
    ));
}

// -- Both directions on one connection --------------------------------------

const NOTIFIED: MethodDef = MethodDef::void("notified", &["str"]);
const NAME: MethodDef = MethodDef::returning("name", &[]);
static WATCHER: InterfaceDef = InterfaceDef::new("test.Watcher", &[NOTIFIED, NAME]);

struct Watcher {
    seen: Mutex<Sender<String>>,
}

impl Service for Watcher {
    fn interface(&self) -> &'static InterfaceDef {
        &WATCHER
    }

    fn call(&self, method: &MethodDef, mut args: Arguments) -> Result<Value, DispatchError> {
        match method.name {
            "notified" => {
                let _ = self.seen.lock().unwrap().send(args.take::<String>(0)?);
                Ok(Value::unit())
            }
            "name" => Ok(Value::from("watcher-1")),
            other => Err(DispatchError::failed(other)),
        }
    }
}

/// Serves `Board` and tells the watcher about every echo.
struct ChattyBoard {
    watcher: CallProxy,
}

impl Service for ChattyBoard {
    fn interface(&self) -> &'static InterfaceDef {
        &BOARD
    }

    fn call(&self, method: &MethodDef, mut args: Arguments) -> Result<Value, DispatchError> {
        match method.name {
            "echo" => {
                let text = args.take::<String>(0)?;
                // Void, so this does not wait on our own reader thread.
                self.watcher
                    .notify("notified", vec![Value::from(format!("echoed {text}"))])
                    .map_err(|e| DispatchError::failed(e.to_string()))?;
                Ok(Value::new(text))
            }
            other => Err(DispatchError::failed(other)),
        }
    }
}

#[test]
fn test_calls_flow_both_ways_over_one_connection() {
    let (client, server) = MemoryConnection::pair().unwrap();
    let registry = registry();

    // Client side: serves Watcher, calls Board.
    let (seen_tx, seen) = mpsc::channel();
    Dispatcher::attach(
        Arc::new(Watcher {
            seen: Mutex::new(seen_tx),
        }),
        client.clone(),
        Arc::clone(&registry),
    );
    let board = CallProxy::new(&BOARD, client.clone(), Arc::clone(&registry));

    // Server side: serves Board, calls Watcher.
    let watcher = CallProxy::new(&WATCHER, server.clone(), Arc::clone(&registry));
    Dispatcher::attach(
        Arc::new(ChattyBoard { watcher }),
        server.clone(),
        Arc::clone(&registry),
    );
    let name_proxy = CallProxy::new(&WATCHER, server.clone(), Arc::clone(&registry));

    assert_eq!(board.call::<String>("echo", vec!["hi".into()]).unwrap(), "hi");
    assert_eq!(seen.recv_timeout(TIMEOUT).unwrap(), "echoed hi");
    assert_eq!(name_proxy.call::<String>("name", vec![]).unwrap(), "watcher-1");
    client.close();
}

// -- Over TCP ---------------------------------------------------------------

struct ServeBoard {
    registry: Arc<Registry>,
    board: Arc<Board>,
}

impl ServerListener for ServeBoard {
    fn on_client_connected(&self, _user: UserId, connection: Arc<TcpConnection>) {
        Dispatcher::attach(self.board.clone(), connection, Arc::clone(&self.registry));
    }
}

#[test]
fn test_call_over_tcp() {
    let registry = registry();
    let (board, posted) = Board::new();
    let server = TcpServerBuilder::new()
        .listener(ServeBoard {
            registry: Arc::clone(&registry),
            board,
        })
        .build()
        .unwrap();
    server.start().unwrap();

    let conn = TcpConnection::open(server.local_addr(), TransportConfig::default()).unwrap();
    let client = BoardProxy(CallProxy::new(&BOARD, conn.clone(), Arc::clone(&registry)));
    conn.start().unwrap();

    assert_eq!(client.add(-7, 3).unwrap(), -4);
    client
        .post(Note {
            author: "bo".into(),
            text: "over the wire".into(),
        })
        .unwrap();
    assert_eq!(posted.recv_timeout(TIMEOUT).unwrap().text, "over the wire");
    assert_eq!(client.notes().unwrap().len(), 1);

    server.close();
    assert!(matches!(client.add(1, 1), Err(RpcError::Transport(_)) | Err(RpcError::ConnectionClosed)));
}

// -- Async ------------------------------------------------------------------

#[tokio::test]
async fn test_invoke_async_returns_value() {
    let (conn, board, _dispatcher, _posted) = memory_setup();

    let value = board
        .0
        .invoke_async("add", vec![20i32.into(), 22i32.into()])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(value, Value::from(42i32));

    let none = board
        .0
        .invoke_async("post", vec![Value::new(Note::default())])
        .await
        .unwrap();
    assert!(none.is_none());
    conn.close();
}
