//! Types shared by the board server and every participant
//!
//! The packed grid layout, the validated [`Cell`], the participant-side
//! [`LocalReplica`] and the wire protocol all live here so that both ends
//! agree on them bit for bit.

pub mod grid;
pub mod protocol;
pub mod replica;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use grid::{CellOffset, Nibble, Points, COLOR_COUNT};
pub use protocol::{BoardReply, Envelope, Metadata, Packet};
pub use replica::LocalReplica;

/// Version sent in the connect handshake; mismatches are refused
pub const PROTOCOL_VERSION: u32 = 1;

/// Prefix of every board key in the storage backend
pub const BOARD_KEY_PREFIX: &str = "board:";

/// Builds the storage key for a board name
pub fn board_key(name: &str) -> String {
    format!("{}{}", BOARD_KEY_PREFIX, name)
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GridError {
    #[error("invalid cell ({x}, {y}) with color {color} on a {columns}x{columns} board")]
    InvalidCell {
        x: i64,
        y: i64,
        color: i64,
        columns: u32,
    },
    #[error("position ({x}, {y}) is outside a {columns}x{columns} board")]
    OutOfBounds { x: i64, y: i64, columns: u32 },
    #[error("buffer of {len} bytes does not describe a square board")]
    MalformedBuffer { len: usize },
}

/// One cell write, in range for the board it was validated against
///
/// Travels on the wire as the tuple `[x, y, color]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(u32, u32, u8)", into = "(u32, u32, u8)")]
pub struct Cell {
    pub x: u32,
    pub y: u32,
    pub color: u8,
}

impl Cell {
    pub fn new(x: u32, y: u32, color: u8) -> Self {
        Self { x, y, color }
    }

    /// Range-checks raw coordinates and color against a board size
    ///
    /// Out-of-range values are rejected, never clamped.
    pub fn validate(x: i64, y: i64, color: i64, columns: u32) -> Result<Self, GridError> {
        let invalid = GridError::InvalidCell {
            x,
            y,
            color,
            columns,
        };
        let in_board = |v: i64| v >= 0 && v < columns as i64;

        if !in_board(x) || !in_board(y) || !(0..COLOR_COUNT as i64).contains(&color) {
            return Err(invalid);
        }

        Ok(Self {
            x: x as u32,
            y: y as u32,
            color: color as u8,
        })
    }

    /// Range-checks a bare position, as used by reads
    pub fn check_position(x: i64, y: i64, columns: u32) -> Result<(u32, u32), GridError> {
        let in_board = |v: i64| v >= 0 && v < columns as i64;
        if !in_board(x) || !in_board(y) {
            return Err(GridError::OutOfBounds { x, y, columns });
        }
        Ok((x as u32, y as u32))
    }

    pub fn offset(&self, columns: u32) -> CellOffset {
        grid::offset_of(self.x, self.y, columns)
    }
}

impl From<(u32, u32, u8)> for Cell {
    fn from((x, y, color): (u32, u32, u8)) -> Self {
        Self { x, y, color }
    }
}

impl From<Cell> for (u32, u32, u8) {
    fn from(cell: Cell) -> Self {
        (cell.x, cell.y, cell.color)
    }
}
