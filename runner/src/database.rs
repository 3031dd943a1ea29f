pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use crate::{config::StorageConfig, fingerprint::Fingerprint};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[cfg(feature = "sqlite")]
    #[error("SQLite error: {0}")]
    SQLite(#[from] rusqlite::Error),
    #[cfg(feature = "sqlite")]
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode or decode a stored entry: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("storage backend `{0}` is not available in this build")]
    Unsupported(&'static str),
}

/// Logical tables, cache and checkpoints never share keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Cache,
    Checkpoint,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Checkpoint => "checkpoints",
        }
    }
}

/// All storage variants, entries are opaque blobs addressed by `(job, fingerprint)`.
/// Access to one key never blocks on an unrelated key.
/// (this is deliberately not made with dynamic dispatch, same as the executors)
#[derive(Debug)]
pub enum StorageAdapters {
    #[cfg(feature = "sqlite")]
    SQLite(sqlite::SQLiteStore),
    Memory(memory::MemoryStore),
}

impl StorageAdapters {
    pub fn load(config: &StorageConfig, table: Table) -> Result<Self, StoreError> {
        match config {
            #[cfg(feature = "sqlite")]
            StorageConfig::SQLite { path } => {
                Ok(Self::SQLite(sqlite::SQLiteStore::open(path, table)?))
            }
            #[cfg(not(feature = "sqlite"))]
            StorageConfig::SQLite { .. } => {
                let _ = table;
                Err(StoreError::Unsupported("sqlite"))
            }
            StorageConfig::Memory => Ok(Self::Memory(memory::MemoryStore::new())),
        }
    }

    pub fn get(&self, job: &str, key: &Fingerprint) -> Result<Option<Vec<u8>>, StoreError> {
        match self {
            #[cfg(feature = "sqlite")]
            Self::SQLite(store) => store.get(job, key),
            Self::Memory(store) => Ok(store.get(job, key)),
        }
    }

    /// insert or overwrite the entry for `key`
    pub fn put(&self, job: &str, key: &Fingerprint, payload: &[u8]) -> Result<(), StoreError> {
        match self {
            #[cfg(feature = "sqlite")]
            Self::SQLite(store) => store.put(job, key, payload),
            Self::Memory(store) => {
                store.put(job, key, payload);
                Ok(())
            }
        }
    }

    /// returns whether an entry was removed
    pub fn remove(&self, job: &str, key: &Fingerprint) -> Result<bool, StoreError> {
        match self {
            #[cfg(feature = "sqlite")]
            Self::SQLite(store) => store.remove(job, key),
            Self::Memory(store) => Ok(store.remove(job, key)),
        }
    }

    pub fn contains(&self, job: &str, key: &Fingerprint) -> Result<bool, StoreError> {
        match self {
            #[cfg(feature = "sqlite")]
            Self::SQLite(store) => store.contains(job, key),
            Self::Memory(store) => Ok(store.contains(job, key)),
        }
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        match self {
            #[cfg(feature = "sqlite")]
            Self::SQLite(store) => store.len(),
            Self::Memory(store) => Ok(store.len()),
        }
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        self.len().map(|len| len == 0)
    }

    /// drop every entry, returns how many were removed
    pub fn clear(&self) -> Result<usize, StoreError> {
        match self {
            #[cfg(feature = "sqlite")]
            Self::SQLite(store) => store.clear(),
            Self::Memory(store) => Ok(store.clear()),
        }
    }
}
