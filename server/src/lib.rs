//! # Table Server Library
//!
//! Authoritative server for instanced pong tables. Every table in the world
//! runs its own round, and the server is the only peer that decides what
//! happens on it: who stands on which goal, when a ball is launched, which
//! hit counts as damage and when the round is over.
//!
//! ## Core Responsibilities
//!
//! ### Event-Sourced Tables
//! Table state lives in a [`shared::SessionStore`] that changes only by
//! applying [`shared::TableEvent`]s. The server publishes those events on its
//! bus, applies them locally on the next tick and streams them to every
//! client, so clients rebuild exactly the same state.
//!
//! ### Ball, Goal and Paddle Management
//! Each table binds its goals, plates and ball pool from the world, senses
//! who stands on the plates, spawns and volleys balls, resolves goal hits
//! and floor exits into damage, and hands paddles to the players who own
//! the goals.
//!
//! ### Client Management
//! Clients connect over UDP, receive a snapshot and then a reliable,
//! sequenced stream of envelopes which they acknowledge. Silent clients are
//! dropped after a timeout.
//!
//! ## Module Organization
//!
//! - `world` / `sim_world`: the scene collaborator and a small reference
//!   world used by the binary and the tests
//! - `binder`: goal, plate, anchor and ball discovery per table
//! - `presence`: plate occupancy with a grace window
//! - `balls`: ball pool, spawn, volley, recycle and despawn
//! - `scoring`: goal hits and floor exits
//! - `paddles`: paddle spawning, ownership and authority gating
//! - `session`: the round state machine and per-table runtime
//! - `game`: the tick orchestrating all tables
//! - `client_manager` / `network`: UDP transport and client streams
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::{Server, ServerOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = ServerOptions {
//!         tables: 2,
//!         slots: 4,
//!         ..ServerOptions::default()
//!     };
//!     let mut server = Server::new("127.0.0.1:8080", options).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod balls;
pub mod binder;
pub mod client_manager;
pub mod config;
pub mod game;
pub mod network;
pub mod paddles;
pub mod presence;
pub mod scoring;
pub mod session;
pub mod sim_world;
pub mod world;
