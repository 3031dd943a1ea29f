use crate::{
    config::StorageConfig,
    context::Metrics,
    database::{StorageAdapters, StoreError, Table},
    fingerprint::Fingerprint,
    matrix::Value,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Payload stored for every successful task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedEntry {
    pub value: Value,
    #[serde(default)]
    pub metrics: Metrics,
    pub runtime: Duration,
    pub started_at: DateTime<Utc>,
}

/// Final results by `(job, fingerprint)`, failures are never stored
#[derive(Debug)]
pub struct CacheStore {
    store: StorageAdapters,
}

impl CacheStore {
    pub fn open(config: &StorageConfig) -> Result<Self, StoreError> {
        Ok(Self {
            store: StorageAdapters::load(config, Table::Cache)?,
        })
    }

    /// Unreadable or undecodable entries are logged and reported as a miss, so the task is
    /// executed again instead of fabricating a result
    pub fn get(&self, job: &str, key: &Fingerprint) -> Option<CachedEntry> {
        let payload = match self.store.get(job, key) {
            Ok(payload) => payload?,
            Err(e) => {
                warn!("Failed to read cache entry {}, treating it as a miss: {e}", key.short());
                return None;
            }
        };

        match serde_json::from_slice(&payload) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Cache entry {} is corrupt, treating it as a miss: {e}", key.short());
                None
            }
        }
    }

    pub fn put(&self, job: &str, key: &Fingerprint, entry: &CachedEntry) -> Result<(), StoreError> {
        self.store.put(job, key, &serde_json::to_vec(entry)?)
    }

    pub fn contains(&self, job: &str, key: &Fingerprint) -> bool {
        self.get(job, key).is_some()
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{context::Metric, matrix::Matrix};

    fn entry(value: impl Into<Value>) -> CachedEntry {
        CachedEntry {
            value: value.into(),
            metrics: Metrics::from([("loss".to_owned(), vec![Metric { x: 0.0, y: 1.5 }])]),
            runtime: Duration::from_millis(12),
            started_at: Utc::now(),
        }
    }

    #[test]
    fn put_then_get() {
        let cache = CacheStore::open(&StorageConfig::Memory).unwrap();
        let key = Matrix::new().parameter("x", [1]).expand().unwrap()[0].fingerprint();

        assert!(cache.get("square", &key).is_none());

        let stored = entry(1);
        cache.put("square", &key, &stored).unwrap();
        // idempotent overwrite
        cache.put("square", &key, &stored).unwrap();

        assert_eq!(cache.get("square", &key), Some(stored));
        assert!(!cache.contains("echo", &key));
        assert_eq!(cache.len().unwrap(), 1);
        assert_eq!(cache.clear().unwrap(), 1);
        assert!(cache.is_empty().unwrap());
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn corrupt_entries_are_misses() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig::SQLite {
            path: dir.path().join("cache.sqlite"),
        };
        let key = Matrix::new().parameter("x", [1]).expand().unwrap()[0].fingerprint();

        StorageAdapters::load(&config, Table::Cache)
            .unwrap()
            .put("square", &key, b"not json")
            .unwrap();

        let cache = CacheStore::open(&config).unwrap();

        assert!(cache.get("square", &key).is_none());
    }
}
