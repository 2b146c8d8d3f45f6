//! # Board Client Library
//!
//! This library provides the participant side of the shared board: joining
//! the server, building a local replica without losing concurrent writes,
//! placing cells and following everyone else's placements.
//!
//! ## Architecture Overview
//!
//! ### Join Before Fetch
//! A participant first joins the live channel and waits for `metadata`. The
//! server only sends it after registering the participant, so every cell
//! committed from then on is guaranteed to reach us.
//!
//! ### Snapshot and Replay
//! The full board is fetched afterwards over a separate connection. While the
//! fetch is in flight, live cells are parked in arrival order. Once the
//! snapshot arrives the replica is built from it and the parked cells are
//! replayed into it, after which cells apply directly. Replaying a cell the
//! snapshot already holds rewrites the same value, so the result is the same
//! whichever side of the fetch a write landed on.
//!
//! ### Optimistic Painting
//! Our own placements are validated against the replica and painted locally
//! right away. The server never echoes them back.
//!
//! ## Module Organization
//!
//! ### Sync Module (`sync`)
//! The buffering/replay state machine, free of any I/O so it can be driven
//! by tests with arbitrary interleavings.
//!
//! ### Network Module (`network`)
//! The connection, the whole-board fetch and the participant counters.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::{Client, Event};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = Client::connect("127.0.0.1:8080").await?;
//!     client.synchronize().await?;
//!
//!     client.place(10, 20, 3).await?;
//!
//!     loop {
//!         if let Event::Incoming(cell) = client.poll_event().await? {
//!             println!("{} {} -> {}", cell.x, cell.y, cell.color);
//!         }
//!     }
//! }
//! ```

pub mod network;
pub mod sync;
