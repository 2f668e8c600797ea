use dashmap::{DashMap, DashSet};

use super::types::{ContainerId, ContainerReplica, ReplicaHistory, now_ms};
use crate::node::types::NodeId;
use crate::store::tables::REPLICA_HISTORY;
use crate::store::{MetaStore, StoreError};

type HistoryKey = (ContainerId, NodeId);

/// In-memory replica history, written back to the store in batches.
///
/// Every report touches history, so writes only mark the entry dirty; the flush
/// loop (and shutdown) persist dirty entries in a single transaction.
pub struct ReplicaHistoryBuffer {
    entries: DashMap<HistoryKey, ReplicaHistory>,
    dirty: DashSet<HistoryKey>,
}

impl ReplicaHistoryBuffer {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            dirty: DashSet::new(),
        }
    }

    pub fn record(&self, replica: &ContainerReplica) {
        let key = (replica.container_id, replica.node_id);
        let now = now_ms();

        self.entries
            .entry(key)
            .and_modify(|h| {
                h.last_seen_ms = now;
                h.sequence_id = replica.sequence_id;
                h.state = replica.state;
            })
            .or_insert_with(|| ReplicaHistory {
                container_id: replica.container_id,
                node_id: replica.node_id,
                first_seen_ms: now,
                last_seen_ms: now,
                sequence_id: replica.sequence_id,
                state: replica.state,
            });

        self.dirty.insert(key);
    }

    pub fn get(&self, container_id: ContainerId, node_id: NodeId) -> Option<ReplicaHistory> {
        self.entries.get(&(container_id, node_id)).map(|e| e.value().clone())
    }

    pub fn for_container(&self, container_id: ContainerId) -> Vec<ReplicaHistory> {
        let mut rows: Vec<ReplicaHistory> = self
            .entries
            .iter()
            .filter(|e| e.key().0 == container_id)
            .map(|e| e.value().clone())
            .collect();
        rows.sort_by_key(|h| h.first_seen_ms);
        rows
    }

    pub fn pending(&self) -> usize {
        self.dirty.len()
    }

    /// Persists dirty entries. On failure they stay dirty for the next attempt.
    pub fn flush(&self, store: &MetaStore) -> Result<usize, StoreError> {
        let keys: Vec<HistoryKey> = self.dirty.iter().map(|k| *k).collect();
        if keys.is_empty() {
            return Ok(0);
        }

        // Clear the mark before reading so a concurrent record re-dirties the entry.
        for key in &keys {
            self.dirty.remove(key);
        }

        let rows: Vec<(HistoryKey, ReplicaHistory)> = keys
            .iter()
            .filter_map(|key| self.entries.get(key).map(|e| (*key, e.value().clone())))
            .collect();

        match REPLICA_HISTORY.put_all(store.db(), rows.iter().map(|(k, v)| (k, v))) {
            Ok(written) => {
                tracing::debug!("Flushed {} replica history entries", written);
                Ok(written)
            }
            Err(e) => {
                for key in keys {
                    self.dirty.insert(key);
                }
                Err(e)
            }
        }
    }

    /// Replaces the buffer with rows read from a store. Entries recorded since the
    /// last flush win over the loaded rows and stay dirty, so the next flush writes
    /// them into the new store.
    pub fn load(&self, rows: Vec<ReplicaHistory>) {
        self.entries.retain(|key, _| self.dirty.contains(key));
        for row in rows {
            let key = (row.container_id, row.node_id);
            if !self.dirty.contains(&key) {
                self.entries.insert(key, row);
            }
        }
    }
}

impl Default for ReplicaHistoryBuffer {
    fn default() -> Self {
        Self::new()
    }
}
