//! Snapshot/replay synchronization for a newly joined participant
//!
//! Live `incoming` cells start flowing as soon as the server has registered
//! us, but the full board arrives later over a separate fetch. Until it does,
//! every live cell is parked in arrival order. When the snapshot lands the
//! replica is built from it and the parked cells are replayed into it in one
//! step, after which cells are applied directly.
//!
//! Replaying a cell the snapshot already contains rewrites the same value, so
//! it does not matter whether the snapshot was taken before or after any of
//! the parked writes.

use log::{debug, info, warn};
use shared::{Cell, GridError, LocalReplica};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for the snapshot; live cells are parked
    Buffering,
    /// Replica built and replayed; live cells apply directly
    Live,
    /// Snapshot failed; the session has no usable replica
    Failed,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("snapshot unavailable: {0}")]
    SnapshotUnavailable(String),
    #[error("snapshot rejected: {0}")]
    BadSnapshot(#[from] GridError),
    #[error("cannot take a snapshot while {0:?}")]
    WrongPhase(Phase),
}

/// Per-session coordinator owning the pending buffer and, once live, the
/// replica
#[derive(Debug)]
pub struct SnapshotReplay {
    phase: Phase,
    pending: Vec<Cell>,
    replica: Option<LocalReplica>,
}

impl Default for SnapshotReplay {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotReplay {
    pub fn new() -> Self {
        Self {
            phase: Phase::Buffering,
            pending: Vec::new(),
            replica: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Number of cells waiting for the snapshot
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Routes one live cell according to the current phase
    ///
    /// Returns false if the cell was dropped, either because the session
    /// failed or because it lies outside the replica's board.
    pub fn on_update(&mut self, cell: Cell) -> bool {
        match (self.phase, self.replica.as_mut()) {
            (Phase::Buffering, _) => {
                self.pending.push(cell);
                true
            }
            (Phase::Live, Some(replica)) => {
                let applied = replica.apply_cell(cell);
                if !applied {
                    warn!("Dropping off-board cell {:?}", cell);
                }
                applied
            }
            _ => false,
        }
    }

    /// Builds the replica from `bitmap`, replays every parked cell in arrival
    /// order and goes live
    ///
    /// Returns the number of replayed cells. A malformed snapshot fails the
    /// session; no partial replica is ever exposed.
    pub fn on_snapshot(&mut self, bitmap: Vec<u8>) -> Result<usize, SyncError> {
        if self.phase != Phase::Buffering {
            return Err(SyncError::WrongPhase(self.phase));
        }

        let mut replica = match LocalReplica::from_snapshot(bitmap) {
            Ok(replica) => replica,
            Err(e) => {
                self.fail(e.to_string());
                return Err(e.into());
            }
        };

        let pending = std::mem::take(&mut self.pending);
        let mut replayed = 0;
        for cell in &pending {
            if replica.apply_cell(*cell) {
                replayed += 1;
            } else {
                warn!("Dropping off-board cell {:?} during replay", cell);
            }
        }

        info!(
            "Synchronized {}x{} board, replayed {} buffered update(s)",
            replica.columns(),
            replica.columns(),
            replayed
        );
        self.replica = Some(replica);
        self.phase = Phase::Live;
        Ok(replayed)
    }

    /// Terminates the session; parked cells are discarded
    pub fn fail(&mut self, reason: impl Into<String>) -> SyncError {
        let reason = reason.into();
        debug!("Discarding {} buffered update(s): {}", self.pending.len(), reason);
        self.pending.clear();
        self.replica = None;
        self.phase = Phase::Failed;
        SyncError::SnapshotUnavailable(reason)
    }

    /// The replica, available only once live
    pub fn replica(&self) -> Option<&LocalReplica> {
        self.replica.as_ref()
    }

    pub fn replica_mut(&mut self) -> Option<&mut LocalReplica> {
        self.replica.as_mut()
    }
}
