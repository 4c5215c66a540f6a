//! # Snake Shard Server Library
//!
//! This library provides the authoritative server for a grid snake game. A
//! shard owns one world, advances it at a fixed tick rate, and reconciles
//! what clients predicted with what actually happened.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! The shard owns the grid and every player. Clients move their own snake
//! locally, but only the shard decides deaths, food and final positions.
//!
//! ### Reconciliation
//! A client reports direction changes together with the position it
//! predicted. Claims within the configured leniency are adopted as they are.
//! Anything further off is refused, and the client gets a forced snapshot to
//! snap back to.
//!
//! ### State Broadcasting
//! After every tick each living player receives a snapshot centred on its
//! own head: its state, the other living players, and a window of the grid.
//!
//! ## Module Organization
//!
//! ### Shard Module (`shard`)
//! The simulation itself: tick loop, movement, food, spawning, and the
//! handlers for every inbound packet.
//!
//! ### Connection Module (`connection`)
//! The capability a transport hands the shard for each client, plus the
//! events a transport feeds in. An in-memory connection is provided for
//! tests and embedding.
//!
//! ### Observer Module (`observer`)
//! Optional hooks for tick statistics and notable events.
//!
//! ### Client Manager Module (`client_manager`)
//! Address to connection id mapping for the UDP transport, with capacity
//! limits and timeout detection.
//!
//! ### Network Module (`network`)
//! UDP socket handling, packet (de)serialization, and the task layout that
//! feeds the shard loop.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use snake_server::network::Server;
//! use snake_server::shard::Shard;
//! use snake_shared::ShardConfig;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut shard = Shard::new(ShardConfig::default());
//!     shard.setup()?;
//!
//!     let mut server = Server::new("127.0.0.1:8080", shard, 32, Duration::from_secs(5)).await?;
//!
//!     // Runs until a shutdown event arrives:
//!     // - Listens for client connections and packets
//!     // - Ticks the shard and sends each player its snapshot
//!     // - Drops clients that stop talking
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod connection;
pub mod network;
pub mod observer;
pub mod shard;
