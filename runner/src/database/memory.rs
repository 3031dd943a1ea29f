use crate::fingerprint::Fingerprint;
use parking_lot::{Mutex, RwLock};
use std::{collections::HashMap, sync::Arc};

type Slot = Arc<Mutex<Option<Vec<u8>>>>;

/// Process local store.
///
/// Readers and writers of existing keys share the index lock, the payload itself is guarded by
/// a per-key mutex. Inserting or removing a key takes the index exclusively.
#[derive(Debug, Default)]
pub struct MemoryStore {
    slots: RwLock<HashMap<(String, Fingerprint), Slot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, job: &str, key: &Fingerprint) -> Option<Slot> {
        self.slots
            .read()
            .get(&(job.to_owned(), key.clone()))
            .cloned()
    }

    pub fn get(&self, job: &str, key: &Fingerprint) -> Option<Vec<u8>> {
        let slot = self.slot(job, key)?;
        let payload = slot.lock().clone();
        payload
    }

    /// Writes happen under the shared index lock so a concurrent `remove` cannot unlink the
    /// slot between lookup and write.
    pub fn put(&self, job: &str, key: &Fingerprint, payload: &[u8]) {
        {
            let slots = self.slots.read();
            if let Some(slot) = slots.get(&(job.to_owned(), key.clone())) {
                *slot.lock() = Some(payload.to_vec());
                return;
            }
        }

        let mut slots = self.slots.write();
        *slots
            .entry((job.to_owned(), key.clone()))
            .or_default()
            .lock() = Some(payload.to_vec());
    }

    pub fn remove(&self, job: &str, key: &Fingerprint) -> bool {
        let removed = self.slots.write().remove(&(job.to_owned(), key.clone()));
        match removed {
            Some(slot) => {
                let present = slot.lock().take().is_some();
                present
            }
            None => false,
        }
    }

    pub fn contains(&self, job: &str, key: &Fingerprint) -> bool {
        match self.slot(job, key) {
            Some(slot) => {
                let present = slot.lock().is_some();
                present
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.slots
            .read()
            .values()
            .filter(|slot| slot.lock().is_some())
            .count()
    }

    /// Keys held in the index, including slots that are currently empty.
    pub(crate) fn indexed(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) -> usize {
        let mut slots = self.slots.write();
        let removed = slots
            .values()
            .filter(|slot| slot.lock().is_some())
            .count();
        slots.clear();

        removed
    }
}
