//! # Citadel Authority Server Library
//!
//! This library provides the authoritative server for a multiplayer city
//! building game. Clients predict construction and movement locally; the
//! server decides what actually happens and broadcasts the outcome so every
//! client converges on the same world.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Construction
//! Every placement request is checked in a fixed order: faction, leadership,
//! funds, collision, chain distance, research and unlock status. Accepted
//! placements debit the faction, update its unlock state and attach the new
//! structure to a house. Demolition runs the reverse cascade.
//!
//! ### Research and Production
//! Staffed research buildings run timed research that unlocks further
//! construction types. Staffed factories accrue items up to a per-faction
//! limit, and the server keeps the pickable items lying in the world in step
//! with each factory's stock.
//!
//! ### Movement Anti-Cheat
//! Unit positions and facings claimed by clients are sanitized and checked
//! against the last trusted state. Rejected fields fall back to their trusted
//! value and the client is told what was corrected.
//!
//! ## Architecture Design
//!
//! ### Single-Threaded Event Loop
//! All requests and ticks are processed sequentially by one loop. Each
//! request is handled to completion before the next, which keeps the world
//! free of partially applied changes.
//!
//! ### UDP-Based Communication
//! Packets are `bincode`-encoded `shared::Packet` values sent over UDP.
//! Malformed datagrams are logged and dropped.
//!
//! ## Module Organization
//!
//! - `client_manager`: sessions, faction membership and leader promotion
//! - `config`: gameplay rules, anti-cheat thresholds and the JSON world seed
//! - `construction`: the engine deciding and applying placements and demolitions
//! - `dependency`: the build tree as a parent/child graph
//! - `economy`: per-faction cash with rollback of optimistic debits
//! - `error`: infrastructure errors
//! - `game`: the world that owns everything above and runs the tick
//! - `network`: the UDP server loop
//! - `production`: factory output and its world items
//! - `registry`: the arena of placed structures
//! - `research`: research buckets and their completion timers
//! - `terrain`: blocking tile codes
//! - `unlocks`: per-faction unlock state
//! - `validator`: movement checks
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::{Rules, ValidatorOptions};
//! use server::game::GameState;
//! use server::network::Server;
//! use server::terrain::TerrainMap;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let world = GameState::new(Rules::default(), ValidatorOptions::default(), TerrainMap::empty());
//!
//!     // 60Hz tick rate and at most 32 clients
//!     let mut server = Server::new(
//!         "127.0.0.1:8080",
//!         Duration::from_millis(16),
//!         32,
//!         world,
//!     ).await?;
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! The server runs internal async tasks that handle:
//! - **Network Receiver**: Continuously listens for incoming packets
//! - **Network Sender**: Processes outgoing packet queue and broadcasts
//! - **Timeout Checker**: Reports silent clients so they can be disconnected
//! - **Main Loop**: Handles requests and advances the world every tick

pub mod client_manager;
pub mod config;
pub mod construction;
pub mod dependency;
pub mod economy;
pub mod error;
pub mod game;
pub mod network;
pub mod production;
pub mod registry;
pub mod research;
pub mod terrain;
pub mod unlocks;
pub mod validator;
