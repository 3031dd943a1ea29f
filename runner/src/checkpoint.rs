use crate::{
    config::StorageConfig,
    database::{StorageAdapters, StoreError, Table},
    fingerprint::Fingerprint,
};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("no checkpoint stored for {0}")]
    NotFound(Fingerprint),
    #[error("checkpoint storage failed: {0}")]
    Store(#[from] StoreError),
    #[error("failed to encode or decode checkpoint: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Durable partial progress of a job, one opaque blob per `(job, fingerprint)`
#[derive(Debug)]
pub struct CheckpointStore {
    store: StorageAdapters,
}

impl CheckpointStore {
    pub fn open(config: &StorageConfig) -> Result<Self, StoreError> {
        Ok(Self {
            store: StorageAdapters::load(config, Table::Checkpoint)?,
        })
    }

    /// read failures count as "no checkpoint", the job then starts from scratch
    pub fn exists(&self, job: &str, key: &Fingerprint) -> bool {
        match self.store.contains(job, key) {
            Ok(exists) => exists,
            Err(e) => {
                warn!("Failed to look up checkpoint {}: {e}", key.short());
                false
            }
        }
    }

    pub fn restore(&self, job: &str, key: &Fingerprint) -> Result<Vec<u8>, CheckpointError> {
        match self.store.get(job, key) {
            Ok(Some(payload)) => {
                debug!("Restored checkpoint {} ({} bytes)", key.short(), payload.len());
                Ok(payload)
            }
            Ok(None) => Err(CheckpointError::NotFound(key.clone())),
            Err(e) => {
                warn!("Failed to read checkpoint {}, treating it as missing: {e}", key.short());
                Err(CheckpointError::NotFound(key.clone()))
            }
        }
    }

    /// overwrites any earlier checkpoint of the same task
    pub fn save(&self, job: &str, key: &Fingerprint, payload: &[u8]) -> Result<(), CheckpointError> {
        self.store.put(job, key, payload)?;
        debug!("Saved checkpoint {} ({} bytes)", key.short(), payload.len());

        Ok(())
    }

    pub fn remove(&self, job: &str, key: &Fingerprint) -> Result<bool, StoreError> {
        self.store.remove(job, key)
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        self.store.len()
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        self.store.is_empty()
    }

    pub fn clear(&self) -> Result<usize, StoreError> {
        self.store.clear()
    }
}
