//! Participant-side mirror of the board
//!
//! A [`LocalReplica`] is built once from a full snapshot and then kept current
//! by applying the single-cell updates the server fans out. It is a cache of
//! server truth, never authoritative.

use crate::grid::{self, Points};
use crate::{Cell, GridError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalReplica {
    bitmap: Vec<u8>,
    columns: u32,
}

impl LocalReplica {
    /// Builds a replica from a packed board snapshot
    pub fn from_snapshot(bitmap: Vec<u8>) -> Result<Self, GridError> {
        let columns = grid::checked_column_count(bitmap.len())?;
        Ok(Self { bitmap, columns })
    }

    /// Replaces the whole replica with a new snapshot
    ///
    /// On error the previous contents are kept.
    pub fn load_snapshot(&mut self, bitmap: Vec<u8>) -> Result<(), GridError> {
        let columns = grid::checked_column_count(bitmap.len())?;
        self.bitmap = bitmap;
        self.columns = columns;
        Ok(())
    }

    pub fn columns(&self) -> u32 {
        self.columns
    }

    /// Writes one update into the replica
    ///
    /// Updates arrive pre-validated by the server. A cell outside this board
    /// can only come from a peer on a different board and is dropped;
    /// returns whether the write landed.
    pub fn apply(&mut self, x: u32, y: u32, color: u8) -> bool {
        if x >= self.columns || y >= self.columns || color >= grid::COLOR_COUNT {
            return false;
        }
        grid::encode(&mut self.bitmap, x, y, self.columns, color);
        true
    }

    pub fn apply_cell(&mut self, cell: Cell) -> bool {
        self.apply(cell.x, cell.y, cell.color)
    }

    /// Color of cell `(x, y)`, `None` when off the board
    pub fn read(&self, x: u32, y: u32) -> Option<u8> {
        if x >= self.columns || y >= self.columns {
            return None;
        }
        Some(grid::decode(&self.bitmap, x, y, self.columns))
    }

    /// Raw packed buffer, for re-rendering without asking the server
    pub fn export(&self) -> &[u8] {
        &self.bitmap
    }

    /// Every `(x, y, color)` of the replica, lazily
    pub fn points(&self) -> Points<'_> {
        Points::new(&self.bitmap, self.columns)
    }
}
