use parking_lot::Mutex;

use super::db::MetaStore;
use super::error::StoreError;
use super::tables::SEQUENCE_ID;

pub const CONTAINER_ID: &str = "container_id";

/// Persisted monotonic counters.
///
/// Callers pass an already pinned store; the generator only serialises the
/// read-increment-write on its own lock.
pub struct SequenceIdGenerator {
    lock: Mutex<()>,
}

impl SequenceIdGenerator {
    pub fn new() -> Self {
        Self {
            lock: Mutex::new(()),
        }
    }

    pub fn next(&self, store: &MetaStore, key: &str) -> Result<u64, StoreError> {
        let _guard = self.lock.lock();
        let key = key.to_string();
        let next = SEQUENCE_ID.get(store.db(), &key)?.unwrap_or(0) + 1;
        SEQUENCE_ID.put(store.db(), &key, &next)?;
        Ok(next)
    }

    pub fn current(&self, store: &MetaStore, key: &str) -> Result<u64, StoreError> {
        Ok(SEQUENCE_ID.get(store.db(), &key.to_string())?.unwrap_or(0))
    }

    /// Raises the counter to `value` if it is behind, so ids handed out later never
    /// collide with ids learned from the authoritative source.
    pub fn observe(&self, store: &MetaStore, key: &str, value: u64) -> Result<(), StoreError> {
        let _guard = self.lock.lock();
        let key = key.to_string();
        if SEQUENCE_ID.get(store.db(), &key)?.unwrap_or(0) < value {
            SEQUENCE_ID.put(store.db(), &key, &value)?;
        }
        Ok(())
    }
}

impl Default for SequenceIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
