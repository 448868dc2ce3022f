//! # Table Client Library
//!
//! Observer and participant side of the pong tables. The client holds no
//! authority of its own: it mirrors the server's tables by applying the
//! events the server streams to it, and everything it wants to change goes
//! back to the server as a request.
//!
//! ## Module Organization
//!
//! ### Game Module (`game`)
//! The mirrored session store. Rebuilt from a snapshot on connect, then kept
//! current by envelopes released in sequence order. Also decides when to ask
//! for authority over the paddles the local player owns.
//!
//! ### Input Module (`input`)
//! Produces paddle pose commands, but only for paddles whose authority the
//! server has granted to this player.
//!
//! ### Network Module (`network`)
//! UDP connection, acknowledgements, heartbeats and the client loop.
//!
//! ### Rendering Module (`rendering`)
//! A text scoreboard per table, logged whenever it changes.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = Client::new("127.0.0.1:8080", 0, None, Some(0)).await?;
//!     client.run().await?;
//!     Ok(())
//! }
//! ```

pub mod game;
pub mod input;
pub mod network;
pub mod rendering;
