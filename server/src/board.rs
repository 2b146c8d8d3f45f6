//! Authoritative board storage
//!
//! [`CellStore`] is the server's only view of grid state. [`Board`] implements
//! it for one key over any [`Backend`], validating every cell before a single
//! atomic nibble write. Nothing here retries; failures go straight back to the
//! caller.

use crate::backend::{Backend, BackendError};
use async_trait::async_trait;
use log::{debug, error, info};
use shared::grid;
use shared::{Cell, GridError};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid cell: {0}")]
    InvalidCell(GridError),
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("board {0} doesn't exist")]
    BoardNotFound(String),
    #[error("board {0} already exists")]
    BoardAlreadyExists(String),
    #[error("cannot create a board with {0} columns, the count must be even and positive")]
    InvalidBoardSize(u32),
}

impl From<BackendError> for StoreError {
    fn from(err: BackendError) -> Self {
        StoreError::StorageUnavailable(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Server-side grid storage with atomic single-cell access
#[async_trait]
pub trait CellStore: Send + Sync {
    /// Whether a board is stored under `key`
    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Column count of the board under `key`, derived from its byte length
    async fn column_count(&self, key: &str) -> StoreResult<u32>;

    /// Validates and commits one cell; returns the committed cell
    async fn set_cell(&self, x: i64, y: i64, color: i64) -> StoreResult<Cell>;

    async fn get_cell(&self, x: i64, y: i64) -> StoreResult<u8>;

    /// Full packed buffer of the board
    async fn snapshot(&self) -> StoreResult<Vec<u8>>;
}

/// One board stored under a single backend key
pub struct Board {
    backend: Arc<dyn Backend>,
    key: String,
    columns: u32,
}

impl Board {
    /// Opens an existing board: checks it exists, then caches its size
    pub async fn open(backend: Arc<dyn Backend>, key: impl Into<String>) -> StoreResult<Self> {
        let key = key.into();
        let columns = column_count_of(backend.as_ref(), &key).await?;
        info!("Found board {} ({}x{})", key, columns, columns);

        Ok(Self {
            backend,
            key,
            columns,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn columns(&self) -> u32 {
        self.columns
    }
}

async fn column_count_of(backend: &dyn Backend, key: &str) -> StoreResult<u32> {
    if !backend.exists(key).await? {
        error!("Board doesn't exist: {}", key);
        return Err(StoreError::BoardNotFound(key.to_string()));
    }

    let len = backend.strlen(key).await?;
    grid::column_count(len).ok_or_else(|| {
        StoreError::StorageUnavailable(format!("corrupt board {}: {} bytes", key, len))
    })
}

#[async_trait]
impl CellStore for Board {
    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.backend.exists(key).await?)
    }

    async fn column_count(&self, key: &str) -> StoreResult<u32> {
        column_count_of(self.backend.as_ref(), key).await
    }

    async fn set_cell(&self, x: i64, y: i64, color: i64) -> StoreResult<Cell> {
        let cell = Cell::validate(x, y, color, self.columns).map_err(StoreError::InvalidCell)?;
        let offset = cell.offset(self.columns);

        match self.backend.set_nibble(&self.key, offset, cell.color).await {
            Ok(()) => {
                debug!(
                    "Set block x={} y={} offset={} color={}",
                    cell.x,
                    cell.y,
                    offset.wide(),
                    cell.color
                );
                Ok(cell)
            }
            Err(e) => {
                error!(
                    "Couldn't set block x={} y={} offset={} color={}: {}",
                    cell.x,
                    cell.y,
                    offset.wide(),
                    cell.color,
                    e
                );
                Err(e.into())
            }
        }
    }

    async fn get_cell(&self, x: i64, y: i64) -> StoreResult<u8> {
        let (x, y) = Cell::check_position(x, y, self.columns).map_err(StoreError::InvalidCell)?;
        let offset = grid::offset_of(x, y, self.columns);

        self.backend.get_nibble(&self.key, offset).await.map_err(|e| {
            error!("Couldn't get block x={} y={}: {}", x, y, e);
            StoreError::from(e)
        })
    }

    async fn snapshot(&self) -> StoreResult<Vec<u8>> {
        match self.backend.get(&self.key).await {
            Ok(Some(bitmap)) => {
                debug!("Got board {} ({} bytes)", self.key, bitmap.len());
                Ok(bitmap)
            }
            Ok(None) => {
                error!("Board {} vanished from the backend", self.key);
                Err(StoreError::BoardNotFound(self.key.clone()))
            }
            Err(e) => {
                error!("Couldn't fetch board {}: {}", self.key, e);
                Err(e.into())
            }
        }
    }
}

/// Creates a new board with every cell set to color 15
pub async fn create_board(backend: &dyn Backend, key: &str, columns: u32) -> StoreResult<()> {
    if columns == 0 || columns % 2 != 0 {
        return Err(StoreError::InvalidBoardSize(columns));
    }

    let bitmap = vec![0xFF; grid::byte_len(columns)];
    if !backend.create(key, bitmap).await? {
        return Err(StoreError::BoardAlreadyExists(key.to_string()));
    }

    info!("Created board {} with {} rows and columns", key, columns);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendResult, MemoryBackend};
    use shared::CellOffset;
    use tokio_test::{assert_err, assert_ok};

    const KEY: &str = "board:test";

    /// Backend whose every call fails as if the network were down
    struct UnreachableBackend;

    #[async_trait]
    impl Backend for UnreachableBackend {
        async fn exists(&self, _key: &str) -> BackendResult<bool> {
            Err(BackendError::Unreachable("connection refused".to_string()))
        }
        async fn strlen(&self, _key: &str) -> BackendResult<usize> {
            Err(BackendError::Unreachable("connection refused".to_string()))
        }
        async fn get(&self, _key: &str) -> BackendResult<Option<Vec<u8>>> {
            Err(BackendError::Unreachable("connection refused".to_string()))
        }
        async fn create(&self, _key: &str, _value: Vec<u8>) -> BackendResult<bool> {
            Err(BackendError::Unreachable("connection refused".to_string()))
        }
        async fn set_nibble(&self, _key: &str, _offset: CellOffset, _value: u8) -> BackendResult<()> {
            Err(BackendError::Unreachable("connection refused".to_string()))
        }
        async fn get_nibble(&self, _key: &str, _offset: CellOffset) -> BackendResult<u8> {
            Err(BackendError::Unreachable("connection refused".to_string()))
        }
    }

    async fn open_board(columns: u32) -> (Arc<MemoryBackend>, Board) {
        let backend = Arc::new(MemoryBackend::new());
        create_board(backend.as_ref(), KEY, columns).await.unwrap();
        let board = Board::open(backend.clone(), KEY).await.unwrap();
        (backend, board)
    }

    #[tokio::test]
    async fn test_open_missing_board() {
        let backend = Arc::new(MemoryBackend::new());
        match Board::open(backend, KEY).await {
            Err(StoreError::BoardNotFound(key)) => assert_eq!(key, KEY),
            other => panic!("expected BoardNotFound, got {:?}", other.map(|b| b.columns())),
        }
    }

    #[tokio::test]
    async fn test_open_derives_columns() {
        let (_, board) = open_board(100).await;
        assert_eq!(board.columns(), 100);
        assert_eq!(board.key(), KEY);
        assert_eq!(board.column_count(KEY).await.unwrap(), 100);
        assert!(board.exists(KEY).await.unwrap());
        assert!(!board.exists("board:other").await.unwrap());
    }

    #[tokio::test]
    async fn test_open_corrupt_board() {
        let backend = Arc::new(MemoryBackend::new());
        backend.create(KEY, vec![0; 7]).await.unwrap();
        assert!(matches!(
            Board::open(backend, KEY).await,
            Err(StoreError::StorageUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_set_cell_scenario() {
        let (backend, board) = open_board(4).await;

        let cell = assert_ok!(board.set_cell(0, 0, 3).await);
        assert_eq!(cell, Cell::new(0, 0, 3));

        let bitmap = backend.get(KEY).await.unwrap().unwrap();
        assert_eq!(bitmap.len(), 8);
        assert_eq!(bitmap[0], 0x3F);
        assert!(bitmap[1..].iter().all(|&b| b == 0xFF));

        assert_eq!(board.get_cell(0, 0).await.unwrap(), 3);
        assert_eq!(board.get_cell(1, 0).await.unwrap(), 15);
    }

    #[tokio::test]
    async fn test_set_cell_rejects_invalid() {
        let (_, board) = open_board(4).await;
        let before = board.snapshot().await.unwrap();

        for (x, y, color) in [(-1, 0, 5), (0, 0, 16), (4, 0, 0), (0, 4, 0), (0, 0, -1)] {
            match board.set_cell(x, y, color).await {
                Err(StoreError::InvalidCell(_)) => {}
                other => panic!("({}, {}, {}) should be invalid, got {:?}", x, y, color, other),
            }
        }

        assert_eq!(board.snapshot().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_get_cell_rejects_invalid() {
        let (_, board) = open_board(4).await;
        assert!(matches!(
            board.get_cell(4, 0).await,
            Err(StoreError::InvalidCell(GridError::OutOfBounds { .. }))
        ));
        assert_err!(board.get_cell(0, -1).await);
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let (_, board) = open_board(4).await;
        board.set_cell(2, 2, 7).await.unwrap();
        board.set_cell(2, 2, 1).await.unwrap();
        assert_eq!(board.get_cell(2, 2).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_backend() {
        let backend: Arc<dyn Backend> = Arc::new(UnreachableBackend);
        assert!(matches!(
            Board::open(backend.clone(), KEY).await,
            Err(StoreError::StorageUnavailable(_))
        ));

        let board = Board {
            backend,
            key: KEY.to_string(),
            columns: 4,
        };
        assert!(matches!(
            board.set_cell(0, 0, 1).await,
            Err(StoreError::StorageUnavailable(_))
        ));
        assert!(matches!(
            board.get_cell(0, 0).await,
            Err(StoreError::StorageUnavailable(_))
        ));
        assert!(matches!(
            board.snapshot().await,
            Err(StoreError::StorageUnavailable(_))
        ));
        assert!(matches!(
            board.column_count(KEY).await,
            Err(StoreError::StorageUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_cell_skips_backend() {
        // validation happens before the backend is touched at all
        let board = Board {
            backend: Arc::new(UnreachableBackend),
            key: KEY.to_string(),
            columns: 4,
        };
        assert!(matches!(
            board.set_cell(0, 0, 16).await,
            Err(StoreError::InvalidCell(_))
        ));
    }

    #[tokio::test]
    async fn test_create_board_twice() {
        let backend = MemoryBackend::new();
        assert_ok!(create_board(&backend, KEY, 10).await);
        assert_eq!(backend.strlen(KEY).await.unwrap(), 50);

        assert!(matches!(
            create_board(&backend, KEY, 10).await,
            Err(StoreError::BoardAlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_create_board_size_checks() {
        let backend = MemoryBackend::new();
        assert!(matches!(
            create_board(&backend, KEY, 0).await,
            Err(StoreError::InvalidBoardSize(0))
        ));
        assert!(matches!(
            create_board(&backend, KEY, 5).await,
            Err(StoreError::InvalidBoardSize(5))
        ));
        assert!(!backend.exists(KEY).await.unwrap());
    }
}
