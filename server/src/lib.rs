//! # Castle Server Library
//!
//! This library provides the authoritative server for the Castle multiplayer
//! strategy game. It owns every player's resources, upgrades, technologies
//! and chat, validates each request against that state, and replies over a
//! length-prefixed binary protocol on TCP.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative State
//! All decisions are made here. Clients send requests (move, build, harvest,
//! buy an upgrade) and receive the outcome; they never hold state the server
//! has to trust.
//!
//! ### Session Management
//! Handles the complete lifecycle of client connections including:
//! - Player id assignment and capacity limits
//! - The `Connect` handshake that unlocks gameplay messages
//! - Disconnect reporting and cleanup of the routing table
//!
//! ### Persistence
//! Player records, statistics, match history and harvest transactions are
//! written to an embedded sled store by a background worker. The server keeps
//! running, unsaved, if the store cannot be opened.
//!
//! ## Architecture Design
//!
//! ### Single-Owner Event Loop
//! One task owns the game state. Connection tasks only decode frames and
//! forward them through an unbounded queue, so every mutation happens in
//! arrival order without locks.
//!
//! ### Per-Connection Tasks
//! Each TCP connection runs a read task and a write task. The read task
//! reports exactly one disconnect; the write task flushes queued replies
//! before honouring a stop.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! The accept loop, the event loop and the [`network::ServerHandle`] used to
//! issue admin commands and shut down.
//!
//! ### Connection Module (`connection`)
//! Framed reads and writes for a single socket, with the connection state
//! machine and idempotent stop.
//!
//! ### Client Manager Module (`client_manager`)
//! The `PlayerId → connection` routing table with unicast and broadcast.
//!
//! ### Dispatcher Module (`dispatcher`)
//! Maps each decoded message onto one game operation and returns the replies
//! and store jobs it produced.
//!
//! ### Game Module (`game`)
//! The state aggregate: players, resource ledgers and nodes, upgrades, chat,
//! terrain, scores and the match lifecycle, plus the scheduler that
//! regenerates resources.
//!
//! ### Supporting Modules
//! - `upgrades`: upgrade catalog, technology gates and modifier maths
//! - `resources`: ledgers and harvestable nodes
//! - `chat`: bounded history and mutes
//! - `players`: the player arena
//! - `map`: terrain queries
//! - `timer`: cooperative scheduler with pause and resume
//! - `persistence`: the `PlayerStore` trait and its sled implementation
//! - `config` and `error`
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use castle_server::config::ServerConfig;
//! use castle_server::network::Server;
//! use castle_server::persistence::Persistence;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig {
//!         port: 12345,
//!         ..ServerConfig::default()
//!     };
//!
//!     // Run without a store; every persistence job is dropped.
//!     let server = Server::bind(config, Persistence::disabled()).await?;
//!     let handle = server.handle();
//!
//!     tokio::spawn(async move {
//!         tokio::signal::ctrl_c().await.ok();
//!         handle.shutdown();
//!     });
//!
//!     server.run().await;
//!     Ok(())
//! }
//! ```

pub mod chat;
pub mod client_manager;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod game;
pub mod map;
pub mod network;
pub mod persistence;
pub mod players;
pub mod resources;
pub mod timer;
pub mod upgrades;
pub mod utils;
