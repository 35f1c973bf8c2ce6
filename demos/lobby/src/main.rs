//! Lobby demo: a four-seat game room served over TCP.
//!
//! Clients call the `Room` interface on the server; the server calls each
//! client's `RoomObserver` back over the same connection.
//!
//! ```text
//! lobby server [--addr 127.0.0.1:7878]
//! lobby client <name> [--addr 127.0.0.1:7878]
//! lobby demo
//! ```
//!
//! Set `RUST_LOG=tessera=trace` to see every message on the wire.

use std::collections::HashMap;
use std::io::BufRead;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tessera::prelude::*;
use tracing_subscriber::EnvFilter;

const DEFAULT_ADDR: &str = "127.0.0.1:7878";

// ---------------------------------------------------------------------------
// Game types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wind {
    East,
    South,
    West,
    North,
}

impl Wind {
    const SEATING: [Wind; 4] = [Wind::East, Wind::South, Wind::West, Wind::North];
}

impl WireEnum for Wind {
    const TYPE_NAME: &'static str = "lobby.Wind";

    fn variant_name(&self) -> &'static str {
        match self {
            Wind::East => "EAST",
            Wind::South => "SOUTH",
            Wind::West => "WEST",
            Wind::North => "NORTH",
        }
    }

    fn from_variant_name(name: &str) -> Option<Self> {
        Wind::SEATING.into_iter().find(|w| w.variant_name() == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Tile {
    suit: String,
    rank: i32,
}

impl Tile {
    fn new(suit: &str, rank: i32) -> Self {
        Self {
            suit: suit.to_string(),
            rank,
        }
    }
}

fn registry() -> Arc<Registry> {
    let mut registry = Registry::with_defaults();
    registry.add_enum::<Wind>().add_struct::<Tile>("lobby.Tile");
    Arc::new(registry)
}

// ---------------------------------------------------------------------------
// Remote interfaces
// ---------------------------------------------------------------------------

const JOIN: MethodDef = MethodDef::returning("join", &["str"]);
const DISCARD: MethodDef = MethodDef::void("discard", &["lobby.Tile"]);
const PLAYERS: MethodDef = MethodDef::returning("players", &[]);

static ROOM: InterfaceDef = InterfaceDef::new("lobby.Room", &[JOIN, DISCARD, PLAYERS]);

const PLAYER_JOINED: MethodDef = MethodDef::void("player_joined", &["str", "lobby.Wind"]);
const TILE_DISCARDED: MethodDef = MethodDef::void("tile_discarded", &["str", "lobby.Tile"]);

static ROOM_OBSERVER: InterfaceDef =
    InterfaceDef::new("lobby.RoomObserver", &[PLAYER_JOINED, TILE_DISCARDED]);

trait Room {
    fn join(&self, name: &str) -> Result<Wind, RpcError>;
    fn discard(&self, tile: Tile) -> Result<(), RpcError>;
    fn players(&self) -> Result<Vec<String>, RpcError>;
}

trait RoomObserver {
    fn player_joined(&self, name: &str, seat: Wind) -> Result<(), RpcError>;
    fn tile_discarded(&self, name: &str, tile: Tile) -> Result<(), RpcError>;
}

struct RoomProxy(CallProxy);

impl Room for RoomProxy {
    fn join(&self, name: &str) -> Result<Wind, RpcError> {
        self.0.call("join", vec![name.into()])
    }

    fn discard(&self, tile: Tile) -> Result<(), RpcError> {
        self.0.notify("discard", vec![Value::new(tile)])
    }

    fn players(&self) -> Result<Vec<String>, RpcError> {
        self.0
            .call::<ValueList>("players", vec![])?
            .into_iter()
            .map(|v| {
                v.downcast::<String>().map_err(|other| RpcError::ReturnType {
                    method: "players".to_string(),
                    expected: "String",
                    actual: other.type_name(),
                })
            })
            .collect()
    }
}

struct RoomObserverProxy(CallProxy);

impl RoomObserver for RoomObserverProxy {
    fn player_joined(&self, name: &str, seat: Wind) -> Result<(), RpcError> {
        self.0
            .notify("player_joined", vec![name.into(), Value::new(seat)])
    }

    fn tile_discarded(&self, name: &str, tile: Tile) -> Result<(), RpcError> {
        self.0
            .notify("tile_discarded", vec![name.into(), Value::new(tile)])
    }
}

// ---------------------------------------------------------------------------
// Server side
// ---------------------------------------------------------------------------

struct Seat {
    user: UserId,
    name: String,
    wind: Wind,
}

#[derive(Default)]
struct Table {
    seats: Vec<Seat>,
    observers: HashMap<UserId, Arc<RoomObserverProxy>>,
}

/// Shared room state behind every client's session.
struct Lobby {
    registry: Arc<Registry>,
    table: Mutex<Table>,
}

impl Lobby {
    fn new(registry: Arc<Registry>) -> Arc<Self> {
        Arc::new(Self {
            registry,
            table: Mutex::new(Table::default()),
        })
    }

    fn table(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn observers(table: &Table) -> Vec<Arc<RoomObserverProxy>> {
        table.observers.values().cloned().collect()
    }

    fn join(&self, user: UserId, name: String) -> Result<Wind, DispatchError> {
        let (wind, observers) = {
            let mut table = self.table();
            if let Some(seat) = table.seats.iter().find(|s| s.user == user) {
                return Ok(seat.wind);
            }
            let wind = Wind::SEATING
                .into_iter()
                .find(|w| table.seats.iter().all(|s| s.wind != *w))
                .ok_or_else(|| DispatchError::failed("room is full"))?;
            table.seats.push(Seat {
                user,
                name: name.clone(),
                wind,
            });
            (wind, Self::observers(&table))
        };

        tracing::info!(%user, %name, seat = wind.variant_name(), "player seated");
        // Observer calls are void, so none of them waits on a reader thread.
        for observer in observers {
            if let Err(e) = observer.player_joined(&name, wind) {
                tracing::warn!(error = %e, "could not notify observer");
            }
        }
        Ok(wind)
    }

    fn discard(&self, user: UserId, tile: Tile) -> Result<(), DispatchError> {
        let (name, observers) = {
            let table = self.table();
            let name = table
                .seats
                .iter()
                .find(|s| s.user == user)
                .map(|s| s.name.clone())
                .ok_or_else(|| DispatchError::failed("discard before join"))?;
            (name, Self::observers(&table))
        };

        tracing::debug!(%user, %name, ?tile, "tile discarded");
        for observer in observers {
            if let Err(e) = observer.tile_discarded(&name, tile.clone()) {
                tracing::warn!(error = %e, "could not notify observer");
            }
        }
        Ok(())
    }

    fn players(&self) -> Vec<String> {
        self.table().seats.iter().map(|s| s.name.clone()).collect()
    }

    fn leave(&self, user: UserId) {
        let mut table = self.table();
        table.observers.remove(&user);
        if let Some(pos) = table.seats.iter().position(|s| s.user == user) {
            let seat = table.seats.remove(pos);
            tracing::info!(%user, name = %seat.name, "player left");
        }
    }
}

/// One client's handle on the room; knows who is calling.
struct RoomSession {
    lobby: Arc<Lobby>,
    user: UserId,
}

impl Service for RoomSession {
    fn interface(&self) -> &'static InterfaceDef {
        &ROOM
    }

    fn call(&self, method: &MethodDef, mut args: Arguments) -> Result<Value, DispatchError> {
        match method.name {
            "join" => {
                let name = args.take::<String>(0)?;
                Ok(Value::new(self.lobby.join(self.user, name)?))
            }
            "discard" => {
                self.lobby.discard(self.user, args.take::<Tile>(0)?)?;
                Ok(Value::unit())
            }
            "players" => Ok(Value::new(
                self.lobby
                    .players()
                    .into_iter()
                    .map(Value::from)
                    .collect::<ValueList>(),
            )),
            other => Err(DispatchError::failed(format!("{other} is not served"))),
        }
    }
}

/// Wires every new client into the lobby.
struct Doorman(Arc<Lobby>);

impl ServerListener for Doorman {
    fn on_client_connected(&self, user: UserId, connection: Arc<TcpConnection>) {
        let lobby = &self.0;
        let observer = RoomObserverProxy(CallProxy::new(
            &ROOM_OBSERVER,
            connection.clone(),
            Arc::clone(&lobby.registry),
        ));
        lobby.table().observers.insert(user, Arc::new(observer));

        let session = RoomSession {
            lobby: Arc::clone(lobby),
            user,
        };
        Dispatcher::attach(Arc::new(session), connection, Arc::clone(&lobby.registry));
    }

    fn on_client_disconnected(&self, user: UserId) {
        self.0.leave(user);
    }
}

fn start_server(addr: &str) -> Result<TcpServer, TesseraError> {
    let lobby = Lobby::new(registry());
    let server = TcpServerBuilder::new()
        .bind(addr)
        .listener(Doorman(lobby))
        .build()?;
    server.start()?;
    Ok(server)
}

// ---------------------------------------------------------------------------
// Client side
// ---------------------------------------------------------------------------

/// Logs what the room tells this client.
struct Printer {
    me: String,
}

impl Service for Printer {
    fn interface(&self) -> &'static InterfaceDef {
        &ROOM_OBSERVER
    }

    fn call(&self, method: &MethodDef, mut args: Arguments) -> Result<Value, DispatchError> {
        let player = args.take::<String>(0)?;
        match method.name {
            "player_joined" => {
                let seat = args.take::<Wind>(1)?;
                tracing::info!(me = %self.me, %player, seat = seat.variant_name(), "player joined");
            }
            "tile_discarded" => {
                let tile = args.take::<Tile>(1)?;
                tracing::info!(me = %self.me, %player, suit = %tile.suit, rank = tile.rank, "tile discarded");
            }
            other => return Err(DispatchError::failed(format!("{other} is not observed"))),
        }
        Ok(Value::unit())
    }
}

/// Joins, discards `tiles`, and returns the seat and the table listing.
fn play(
    addr: &str,
    name: &str,
    tiles: &[Tile],
    linger: Duration,
) -> Result<(Wind, Vec<String>), TesseraError> {
    let registry = registry();
    // Listeners go in before the reader starts so no callback is missed.
    let conn = TcpConnection::open(addr, TransportConfig::default())?;
    Dispatcher::attach(
        Arc::new(Printer {
            me: name.to_string(),
        }),
        conn.clone(),
        Arc::clone(&registry),
    );
    let room = RoomProxy(CallProxy::new(&ROOM, conn.clone(), registry));
    conn.start()?;

    let seat = room.join(name)?;
    tracing::info!(%name, seat = seat.variant_name(), "seated");
    for tile in tiles {
        room.discard(tile.clone())?;
    }
    let players = room.players()?;
    tracing::info!(%name, ?players, "at the table");

    thread::sleep(linger);
    conn.close();
    Ok((seat, players))
}

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq)]
enum Mode {
    Server,
    Client { name: String },
    Demo,
}

#[derive(Debug, PartialEq)]
struct Options {
    mode: Mode,
    addr: String,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Options, String> {
    let mut mode = None;
    let mut name = None;
    let mut addr = DEFAULT_ADDR.to_string();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--addr" => addr = args.next().ok_or("--addr needs a value")?,
            "server" | "client" | "demo" if mode.is_none() => mode = Some(arg.clone()),
            _ if mode.as_deref() == Some("client") && name.is_none() => name = Some(arg.clone()),
            other => return Err(format!("unexpected argument {other:?}")),
        }
    }

    let mode = match mode.as_deref() {
        Some("server") => Mode::Server,
        Some("client") => Mode::Client {
            name: name.ok_or("client needs a player name")?,
        },
        Some("demo") | None => Mode::Demo,
        Some(other) => return Err(format!("unknown mode {other:?}")),
    };
    Ok(Options { mode, addr })
}

fn run(options: Options) -> Result<(), TesseraError> {
    match options.mode {
        Mode::Server => {
            let server = start_server(&options.addr)?;
            tracing::info!(addr = %server.local_addr(), "lobby open, press Enter to close");
            let mut line = String::new();
            let _ = std::io::stdin().lock().read_line(&mut line);
            server.close();
        }
        Mode::Client { name } => {
            let tiles = [Tile::new("bamboo", 3), Tile::new("dragon", 1)];
            play(&options.addr, &name, &tiles, Duration::from_secs(1))?;
        }
        Mode::Demo => {
            let server = start_server("127.0.0.1:0")?;
            let addr = server.local_addr().to_string();

            let players: Vec<_> = ["alice", "bob"]
                .into_iter()
                .enumerate()
                .map(|(i, name)| {
                    let addr = addr.clone();
                    thread::spawn(move || {
                        thread::sleep(Duration::from_millis(100 * i as u64));
                        let tiles = [Tile::new("circle", i as i32 + 1)];
                        play(&addr, name, &tiles, Duration::from_millis(300))
                    })
                })
                .collect();
            for player in players {
                match player.join() {
                    Ok(result) => {
                        result?;
                    }
                    Err(_) => tracing::error!("player thread panicked"),
                }
            }
            server.close();
        }
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "tessera=debug,info".into()),
        )
        .init();

    let options = parse_args(std::env::args().skip(1))?;
    run(options)?;
    Ok(())
}
