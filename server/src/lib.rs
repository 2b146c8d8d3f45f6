//! # Board Server Library
//!
//! This library provides the authoritative server for a shared square board of
//! 4-bit color cells. It owns the canonical packed grid, validates and commits
//! every placement, and fans committed cells out to all other participants.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Storage
//! The board lives in a [`backend::Backend`] as one packed byte string. Each
//! placement is validated and then written as a single atomic 4-bit field, so
//! concurrent writers never clobber each other's neighbour cell. Conflicting
//! writes to the same cell resolve as last-write-wins.
//!
//! ### Client Management
//! Handles the lifecycle of participant connections:
//! - Connection handshake and id assignment
//! - The per-participant outbound queue
//! - Disconnection cleanup and the connected-user count
//!
//! ### Update Fan-Out
//! Every committed placement is broadcast as an `incoming` event to every
//! participant except its writer. Rejected placements are reported to the
//! writer alone and never broadcast.
//!
//! ## Architecture Design
//!
//! ### Single Actor Loop
//! All joins, leaves and placements pass through one loop in
//! [`network::Server`]. Because the loop registers a participant before it
//! sends `metadata`, a participant that has seen `metadata` is guaranteed to
//! receive every later broadcast. Participants rely on this to fetch their
//! snapshot without missing updates.
//!
//! ### TCP Transport
//! Live traffic is newline-delimited JSON. A participant's whole-board fetch
//! uses a separate short-lived connection answered with one bincode frame.
//!
//! ## Module Organization
//!
//! ### Backend Module (`backend`)
//! Key-value storage with atomic nibble access and optional persistence.
//!
//! ### Board Module (`board`)
//! The [`board::CellStore`] abstraction, its single-key implementation and
//! board creation.
//!
//! ### Client Manager Module (`client_manager`)
//! Participant registry and broadcast routing.
//!
//! ### Network Module (`network`)
//! Connection handling and the actor loop.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::backend::MemoryBackend;
//! use server::board::{create_board, Board};
//! use server::network::Server;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = Arc::new(MemoryBackend::new());
//!     create_board(backend.as_ref(), "board:main", 100).await?;
//!     let board = Board::open(backend, "board:main").await?;
//!
//!     // Accepts up to 64 participants
//!     let mut server = Server::new("127.0.0.1:8080", Arc::new(board), 64).await?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod board;
pub mod client_manager;
pub mod network;
