//! Key-value storage backend holding packed boards
//!
//! The backend is deliberately small: whole-value get/create plus an atomic
//! 4-bit field read and write. The field write is the only way a stored board
//! is ever mutated, so two writers touching the two cells of one byte can
//! never lose each other's update.

use async_trait::async_trait;
use log::{debug, info};
use parking_lot::Mutex;
use shared::grid::{self, CellOffset};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("key {0} not found")]
    MissingKey(String),
    #[error("offset {offset} out of range for key {key} ({len} bytes)")]
    OutOfRange {
        key: String,
        offset: usize,
        len: usize,
    },
    #[error("backend unreachable: {0}")]
    Unreachable(String),
    #[error("backend i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("backend data corrupt: {0}")]
    Corrupt(#[from] bincode::Error),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Atomic-field-capable key-value store
#[async_trait]
pub trait Backend: Send + Sync {
    async fn exists(&self, key: &str) -> BackendResult<bool>;

    /// Byte length of the value, 0 when the key is absent
    async fn strlen(&self, key: &str) -> BackendResult<usize>;

    async fn get(&self, key: &str) -> BackendResult<Option<Vec<u8>>>;

    /// Stores `value` only if `key` is absent; returns whether it was stored
    async fn create(&self, key: &str, value: Vec<u8>) -> BackendResult<bool>;

    /// Atomically writes the low 4 bits of `value` into one nibble
    async fn set_nibble(&self, key: &str, offset: CellOffset, value: u8) -> BackendResult<()>;

    async fn get_nibble(&self, key: &str, offset: CellOffset) -> BackendResult<u8>;
}

#[derive(Debug, Default)]
struct Inner {
    values: HashMap<String, Vec<u8>>,
    unsaved: HashSet<String>,
}

/// In-process backend with optional on-disk persistence
///
/// Every operation takes the single lock for its whole duration, which is
/// what makes `set_nibble` atomic. When a data file is configured the boards
/// are loaded from it on construction and written back by [`persist`].
///
/// [`persist`]: MemoryBackend::persist
#[derive(Debug, Default)]
pub struct MemoryBackend {
    inner: Mutex<Inner>,
    data_file: Option<PathBuf>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a backend persisted at `path`, loading it when the file exists
    pub fn with_data_file(path: impl Into<PathBuf>) -> BackendResult<Self> {
        let path = path.into();
        let values = if path.exists() {
            let bytes = fs::read(&path)?;
            let values: HashMap<String, Vec<u8>> = bincode::deserialize(&bytes)?;
            info!("Loaded {} board(s) from {}", values.len(), path.display());
            values
        } else {
            HashMap::new()
        };

        Ok(Self {
            inner: Mutex::new(Inner {
                values,
                unsaved: HashSet::new(),
            }),
            data_file: Some(path),
        })
    }

    pub fn data_file(&self) -> Option<&Path> {
        self.data_file.as_deref()
    }

    pub fn has_unsaved_changes(&self) -> bool {
        !self.inner.lock().unsaved.is_empty()
    }

    /// Writes all boards to the data file if anything changed since the last
    /// save. Returns whether a write happened.
    ///
    /// The file is replaced through a rename so a crash mid-write leaves the
    /// previous save intact.
    pub fn persist(&self) -> BackendResult<bool> {
        let Some(path) = &self.data_file else {
            return Ok(false);
        };

        let (encoded, saved_keys) = {
            let mut inner = self.inner.lock();
            if inner.unsaved.is_empty() {
                return Ok(false);
            }
            let encoded = bincode::serialize(&inner.values)?;
            (encoded, std::mem::take(&mut inner.unsaved))
        };

        let tmp = path.with_extension("tmp");
        let written = fs::write(&tmp, &encoded).and_then(|_| fs::rename(&tmp, path));
        if let Err(e) = written {
            // keep the keys dirty so the next flush retries them
            self.inner.lock().unsaved.extend(saved_keys);
            return Err(e.into());
        }

        debug!("Saved boards to {} ({} bytes)", path.display(), encoded.len());
        Ok(true)
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn exists(&self, key: &str) -> BackendResult<bool> {
        Ok(self.inner.lock().values.contains_key(key))
    }

    async fn strlen(&self, key: &str) -> BackendResult<usize> {
        Ok(self.inner.lock().values.get(key).map_or(0, Vec::len))
    }

    async fn get(&self, key: &str) -> BackendResult<Option<Vec<u8>>> {
        Ok(self.inner.lock().values.get(key).cloned())
    }

    async fn create(&self, key: &str, value: Vec<u8>) -> BackendResult<bool> {
        let mut inner = self.inner.lock();
        if inner.values.contains_key(key) {
            return Ok(false);
        }
        inner.values.insert(key.to_string(), value);
        inner.unsaved.insert(key.to_string());
        Ok(true)
    }

    async fn set_nibble(&self, key: &str, offset: CellOffset, value: u8) -> BackendResult<()> {
        let mut inner = self.inner.lock();
        let buffer = inner
            .values
            .get_mut(key)
            .ok_or_else(|| BackendError::MissingKey(key.to_string()))?;

        if offset.byte >= buffer.len() {
            return Err(BackendError::OutOfRange {
                key: key.to_string(),
                offset: offset.byte,
                len: buffer.len(),
            });
        }

        grid::write_nibble(buffer, offset, value);
        inner.unsaved.insert(key.to_string());
        Ok(())
    }

    async fn get_nibble(&self, key: &str, offset: CellOffset) -> BackendResult<u8> {
        let inner = self.inner.lock();
        let buffer = inner
            .values
            .get(key)
            .ok_or_else(|| BackendError::MissingKey(key.to_string()))?;

        if offset.byte >= buffer.len() {
            return Err(BackendError::OutOfRange {
                key: key.to_string(),
                offset: offset.byte,
                len: buffer.len(),
            });
        }

        Ok(grid::read_nibble(buffer, offset))
    }
}
