//! Container Directory
//!
//! Maps container identity to lifecycle state, metadata and replica set.
//!
//! Each container sits behind its own mutex (its monitor). Every mutation locks
//! that monitor for its whole read-modify-write, so a live report and a
//! reconciliation update for the same container never interleave, while
//! different containers are mutated in parallel. Writes go through to the store
//! before the in-memory record changes; a failed write leaves the record as it was.
//!
//! Lock order is always: store barrier (`StoreHandle::pin`), then the container monitor.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use super::error::ContainerError;
use super::history::ReplicaHistoryBuffer;
use super::state_machine::{Decision, apply_event, decide};
use super::types::*;
use crate::node::types::NodeId;
use crate::pipeline::types::PipelineId;
use crate::store::sequence::CONTAINER_ID;
use crate::store::tables::{CONTAINERS, REPLICA_HISTORY};
use crate::store::{MetaStore, SequenceIdGenerator, StoreError, StoreHandle};

struct ContainerRecord {
    info: ContainerInfo,
    replicas: HashMap<NodeId, ContainerReplica>,
}

impl ContainerRecord {
    fn view(&self) -> Container {
        let mut replicas: Vec<ContainerReplica> = self.replicas.values().cloned().collect();
        replicas.sort_by_key(|r| r.node_id);
        Container {
            info: self.info.clone(),
            replicas,
        }
    }
}

type Slot = Arc<Mutex<ContainerRecord>>;

/// Result of feeding one replica through the state machine.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicaOutcome {
    pub decision: Decision,
    /// Set when the decision fired and the transition was applied.
    pub new_state: Option<LifecycleState>,
}

/// Exclusive access to one container for the lifetime of a `with_container` call.
pub struct ContainerGuard<'a> {
    record: &'a mut ContainerRecord,
    store: &'a MetaStore,
    history: &'a ReplicaHistoryBuffer,
}

impl ContainerGuard<'_> {
    pub fn info(&self) -> &ContainerInfo {
        &self.record.info
    }

    pub fn replica(&self, node_id: &NodeId) -> Option<&ContainerReplica> {
        self.record.replicas.get(node_id)
    }

    pub fn replica_nodes(&self) -> Vec<NodeId> {
        self.record.replicas.keys().copied().collect()
    }

    fn persist(&mut self, info: ContainerInfo) -> Result<(), ContainerError> {
        CONTAINERS.put(self.store.db(), &info.id, &info)?;
        self.record.info = info;
        Ok(())
    }

    pub fn transition(&mut self, event: LifecycleEvent) -> Result<LifecycleState, ContainerError> {
        let current = self.record.info.state;
        let id = self.record.info.id;

        let next = apply_event(current, event).ok_or(ContainerError::InvalidTransition {
            id,
            state: current,
            event,
        })?;

        let mut info = self.record.info.clone();
        info.state = next;
        info.state_entered_ms = now_ms();
        self.persist(info)?;

        tracing::info!(
            "Container {} moved {:?} -> {:?} on {:?}",
            id,
            current,
            next,
            event
        );
        Ok(next)
    }

    /// Replaces the (container, node) replica row. The origin node of an already
    /// known replica is never overwritten.
    pub fn update_replica(&mut self, mut replica: ContainerReplica) -> Result<(), ContainerError> {
        if let Some(existing) = self.record.replicas.get(&replica.node_id) {
            replica.origin_node_id = existing.origin_node_id;
        }

        self.raise_stats(&replica)?;
        self.history.record(&replica);

        tracing::trace!(
            "Container {} replica on node {} now {:?} seq={}",
            replica.container_id,
            replica.node_id,
            replica.state,
            replica.sequence_id
        );
        self.record.replicas.insert(replica.node_id, replica);
        Ok(())
    }

    /// Closed containers report their final size through their replicas.
    fn raise_stats(&mut self, replica: &ContainerReplica) -> Result<(), ContainerError> {
        let matches_state = matches!(
            (self.record.info.state, replica.state),
            (LifecycleState::QuasiClosed, ReplicaState::QuasiClosed)
                | (LifecycleState::Closed, ReplicaState::Closed)
        );
        if !matches_state {
            return Ok(());
        }

        let info = &self.record.info;
        if replica.bytes_used <= info.used_bytes && replica.key_count <= info.key_count {
            return Ok(());
        }

        let mut info = info.clone();
        info.used_bytes = info.used_bytes.max(replica.bytes_used);
        info.key_count = info.key_count.max(replica.key_count);
        self.persist(info)
    }

    pub fn remove_replica(&mut self, node_id: &NodeId) -> Option<ContainerReplica> {
        let removed = self.record.replicas.remove(node_id);
        if removed.is_some() {
            tracing::debug!(
                "Removed replica of container {} on node {}",
                self.record.info.id,
                node_id
            );
        }
        removed
    }

    /// Runs `replica` through [`decide`], applies any fired event, then records the replica.
    ///
    /// An invalid transition is logged and the replica is still recorded. A sequence
    /// mismatch is logged at error level and never transitions. Replicas of a
    /// DELETED container are dropped.
    pub fn apply_replica(
        &mut self,
        replica: ContainerReplica,
    ) -> Result<ReplicaOutcome, ContainerError> {
        let (id, state, sequence_id) = {
            let info = &self.record.info;
            (info.id, info.state, info.sequence_id)
        };
        let decision = decide(state, replica.state, replica.sequence_id, sequence_id);

        let mut new_state = None;
        match decision {
            Decision::Ignored => {
                tracing::warn!(
                    "Ignoring {:?} replica from node {} for deleted container {}",
                    replica.state,
                    replica.node_id,
                    id
                );
                return Ok(ReplicaOutcome {
                    decision,
                    new_state,
                });
            }
            Decision::SequenceMismatch {
                replica_sequence_id,
                container_sequence_id,
            } => {
                tracing::error!(
                    "Container {} in {:?}: CLOSED replica from node {} has seq={} but container is at seq={}, not advancing",
                    id,
                    state,
                    replica.node_id,
                    replica_sequence_id,
                    container_sequence_id
                );
            }
            Decision::Fire(event) => match self.transition(event) {
                Ok(state) => new_state = Some(state),
                Err(e @ ContainerError::InvalidTransition { .. }) => {
                    tracing::warn!("Dropping {:?} from node {}: {}", event, replica.node_id, e);
                }
                Err(e) => return Err(e),
            },
            Decision::NoOp => {}
        }

        self.update_replica(replica)?;
        Ok(ReplicaOutcome {
            decision,
            new_state,
        })
    }
}

pub struct ContainerDirectory {
    containers: DashMap<ContainerId, Slot>,
    store: Arc<StoreHandle>,
    sequence: SequenceIdGenerator,
    history: ReplicaHistoryBuffer,
}

impl ContainerDirectory {
    pub fn new(store: Arc<StoreHandle>) -> Arc<Self> {
        Arc::new(Self {
            containers: DashMap::new(),
            store,
            sequence: SequenceIdGenerator::new(),
            history: ReplicaHistoryBuffer::new(),
        })
    }

    fn slot(&self, id: ContainerId) -> Result<Slot, ContainerError> {
        self.containers
            .get(&id)
            .map(|s| s.value().clone())
            .ok_or(ContainerError::NotFound(id))
    }

    /// Runs `f` while holding the container's monitor.
    pub fn with_container<R>(
        &self,
        id: ContainerId,
        f: impl FnOnce(&mut ContainerGuard<'_>) -> Result<R, ContainerError>,
    ) -> Result<R, ContainerError> {
        let store = self.store.pin();
        let slot = self.slot(id)?;
        let mut record = slot.lock();
        let mut guard = ContainerGuard {
            record: &mut *record,
            store: &*store,
            history: &self.history,
        };
        f(&mut guard)
    }

    fn insert_pinned(&self, store: &MetaStore, info: ContainerInfo) -> Result<(), ContainerError> {
        match self.containers.entry(info.id) {
            Entry::Occupied(_) => Err(ContainerError::AlreadyExists(info.id)),
            Entry::Vacant(vacant) => {
                CONTAINERS.put(store.db(), &info.id, &info)?;
                self.sequence.observe(store, CONTAINER_ID, info.id.0)?;
                tracing::info!(
                    "Added container {} in {:?} (seq={}, pipeline={:?})",
                    info.id,
                    info.state,
                    info.sequence_id,
                    info.pipeline_id
                );
                vacant.insert(Arc::new(Mutex::new(ContainerRecord {
                    info,
                    replicas: HashMap::new(),
                })));
                Ok(())
            }
        }
    }

    pub fn create(
        &self,
        id: ContainerId,
        initial_state: LifecycleState,
        pipeline: Option<PipelineId>,
    ) -> Result<ContainerInfo, ContainerError> {
        let info = ContainerInfo::new(id, initial_state, pipeline);
        self.add_container(info.clone())?;
        Ok(info)
    }

    /// Adds a container with metadata learned elsewhere (e.g. the authoritative source).
    pub fn add_container(&self, info: ContainerInfo) -> Result<(), ContainerError> {
        let store = self.store.pin();
        self.insert_pinned(&store, info)
    }

    /// Opens a new write container with a freshly allocated id.
    pub fn allocate(&self, pipeline: Option<PipelineId>) -> Result<ContainerInfo, ContainerError> {
        let store = self.store.pin();
        let id = ContainerId(self.sequence.next(&store, CONTAINER_ID)?);
        let info = ContainerInfo::new(id, LifecycleState::Open, pipeline);
        self.insert_pinned(&store, info.clone())?;
        Ok(info)
    }

    pub fn get(&self, id: ContainerId) -> Result<Container, ContainerError> {
        let slot = self.slot(id)?;
        let record = slot.lock();
        Ok(record.view())
    }

    pub fn contains(&self, id: ContainerId) -> bool {
        self.containers.contains_key(&id)
    }

    pub fn transition(
        &self,
        id: ContainerId,
        event: LifecycleEvent,
    ) -> Result<LifecycleState, ContainerError> {
        self.with_container(id, |c| c.transition(event))
    }

    /// Replaces the replica row. Fails with `NotFound` if the container is unknown.
    pub fn update_replica(&self, replica: ContainerReplica) -> Result<(), ContainerError> {
        self.with_container(replica.container_id, |c| c.update_replica(replica))
    }

    pub fn apply_replica(&self, replica: ContainerReplica) -> Result<ReplicaOutcome, ContainerError> {
        self.with_container(replica.container_id, |c| c.apply_replica(replica))
    }

    pub fn remove_replica(
        &self,
        id: ContainerId,
        node_id: &NodeId,
    ) -> Result<Option<ContainerReplica>, ContainerError> {
        self.with_container(id, |c| Ok(c.remove_replica(node_id)))
    }

    pub fn replicas(&self, id: ContainerId) -> Result<Vec<ContainerReplica>, ContainerError> {
        self.get(id).map(|c| c.replicas)
    }

    fn slots(&self) -> Vec<Slot> {
        self.containers.iter().map(|e| e.value().clone()).collect()
    }

    /// All containers, ordered by id.
    pub fn list(&self) -> Vec<Container> {
        let mut all: Vec<Container> = self.slots().iter().map(|s| s.lock().view()).collect();
        all.sort_by_key(|c| c.info.id);
        all
    }

    pub fn list_by_state(&self, state: LifecycleState) -> Vec<ContainerInfo> {
        let mut infos: Vec<ContainerInfo> = self
            .slots()
            .iter()
            .filter_map(|s| {
                let record = s.lock();
                (record.info.state == state).then(|| record.info.clone())
            })
            .collect();
        infos.sort_by_key(|i| i.id);
        infos
    }

    pub fn count(&self) -> usize {
        self.containers.len()
    }

    pub fn containers_on_node(&self, node_id: &NodeId) -> Vec<ContainerId> {
        let mut ids: Vec<ContainerId> = self
            .slots()
            .iter()
            .filter_map(|s| {
                let record = s.lock();
                record
                    .replicas
                    .contains_key(node_id)
                    .then_some(record.info.id)
            })
            .collect();
        ids.sort();
        ids
    }

    /// Drops every replica hosted on `node_id`. Returns how many were removed.
    pub fn remove_replicas_for_node(&self, node_id: &NodeId) -> usize {
        let mut removed = 0;
        for id in self.containers_on_node(node_id) {
            match self.remove_replica(id, node_id) {
                Ok(Some(_)) => removed += 1,
                Ok(None) => {}
                Err(e) => tracing::debug!("Skipping replica cleanup for {}: {}", id, e),
            }
        }
        removed
    }

    pub fn history(&self, id: ContainerId) -> Vec<ReplicaHistory> {
        self.history.for_container(id)
    }

    pub fn pending_history(&self) -> usize {
        self.history.pending()
    }

    pub fn flush_history(&self) -> Result<usize, StoreError> {
        let store = self.store.pin();
        self.history.flush(&store)
    }

    /// Rebuilds the directory from rows of a (new) store.
    ///
    /// Containers that survive keep their live replica sets; containers absent from
    /// `infos` are dropped. Runs under the exclusive store barrier during a swap, so
    /// it must not touch the handle.
    pub fn reinitialize(&self, infos: Vec<ContainerInfo>, history: Vec<ReplicaHistory>) {
        let keep: std::collections::HashSet<ContainerId> = infos.iter().map(|i| i.id).collect();
        self.containers.retain(|id, _| keep.contains(id));

        let total = infos.len();
        for info in infos {
            match self.containers.entry(info.id) {
                Entry::Occupied(slot) => {
                    slot.get().lock().info = info;
                }
                Entry::Vacant(vacant) => {
                    vacant.insert(Arc::new(Mutex::new(ContainerRecord {
                        info,
                        replicas: HashMap::new(),
                    })));
                }
            }
        }
        self.history.load(history);

        tracing::info!("Container directory reinitialised with {} containers", total);
    }

    /// Loads containers and history from `store`. Used at startup.
    pub fn load(&self, store: &MetaStore) -> Result<usize, StoreError> {
        let infos: Vec<ContainerInfo> = CONTAINERS
            .list(store.db())?
            .into_iter()
            .map(|(_, info)| info)
            .collect();
        let history: Vec<ReplicaHistory> = REPLICA_HISTORY
            .list(store.db())?
            .into_iter()
            .map(|(_, h)| h)
            .collect();
        let count = infos.len();
        self.reinitialize(infos, history);
        Ok(count)
    }
}
