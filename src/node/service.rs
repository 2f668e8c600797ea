use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use super::types::{
    HeartbeatInfo, Node, NodeDetails, NodeHealth, NodeId, NodeOperationalState, NodeRow,
};
use crate::store::tables::NODES;
use crate::store::{MetaStore, StoreError, StoreHandle};

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("node {0} not found")]
    NotFound(NodeId),

    #[error("node store error: {0}")]
    Store(#[from] StoreError),
}

/// Known nodes, their admin state and heartbeat-derived health.
///
/// Health only moves forward (HEALTHY -> STALE -> DEAD) on timers; the only way
/// back to HEALTHY is a fresh heartbeat.
pub struct NodeRegistry {
    nodes: DashMap<NodeId, Node>,
    store: Arc<StoreHandle>,
    stale_after: Duration,
    dead_after: Duration,
}

impl NodeRegistry {
    pub fn new(store: Arc<StoreHandle>, stale_after: Duration, dead_after: Duration) -> Arc<Self> {
        Arc::new(Self {
            nodes: DashMap::new(),
            store,
            stale_after,
            dead_after,
        })
    }

    /// Records a heartbeat. Creates the node on first sight; resets health otherwise.
    /// Returns the health the node had before, if it was known.
    pub fn upsert(&self, heartbeat: HeartbeatInfo) -> Result<Option<NodeHealth>, NodeError> {
        let store = self.store.pin();
        let id = heartbeat.details.id;
        let health = if heartbeat.readonly {
            NodeHealth::HealthyReadonly
        } else {
            NodeHealth::Healthy
        };

        let (mut node, previous) = match self.nodes.get(&id) {
            Some(existing) => {
                let node = existing.value().clone();
                let health = node.health;
                (node, Some(health))
            }
            None => (
                Node {
                    details: heartbeat.details.clone(),
                    op_state: NodeOperationalState::InService,
                    health,
                    last_heartbeat: None,
                },
                None,
            ),
        };

        if previous.is_none() || node.details != heartbeat.details {
            node.details = heartbeat.details;
            NODES.put(store.db(), &id, &NodeRow::from(&node))?;
        }
        node.health = health;
        node.last_heartbeat = Some(Instant::now());

        match previous {
            None => tracing::info!("Registered node {} ({})", id, node.details.hostname),
            Some(before) if !before.is_healthy() => {
                tracing::info!("Node {} is back: {:?} -> {:?}", id, before, health)
            }
            Some(_) => tracing::trace!("Heartbeat from node {}", id),
        }

        self.nodes.insert(id, node);
        Ok(previous)
    }

    /// Registers a node first referenced by a report rather than a heartbeat.
    /// Returns whether the node was new.
    pub fn register_if_absent(&self, id: NodeId) -> Result<bool, NodeError> {
        if self.nodes.contains_key(&id) {
            return Ok(false);
        }

        let store = self.store.pin();
        let node = Node {
            details: NodeDetails::unresolved(id),
            op_state: NodeOperationalState::InService,
            health: NodeHealth::Healthy,
            last_heartbeat: None,
        };
        NODES.put(store.db(), &id, &NodeRow::from(&node))?;
        let inserted = self.nodes.insert(id, node).is_none();
        if inserted {
            tracing::info!("Registered node {} from report", id);
        }
        Ok(inserted)
    }

    pub fn set_operational_state(
        &self,
        id: NodeId,
        state: NodeOperationalState,
    ) -> Result<(), NodeError> {
        let store = self.store.pin();
        let mut node = self.nodes.get_mut(&id).ok_or(NodeError::NotFound(id))?;
        if node.op_state == state {
            return Ok(());
        }

        let before = node.op_state;
        node.op_state = state;
        if let Err(e) = NODES.put(store.db(), &id, &NodeRow::from(&*node)) {
            node.op_state = before;
            return Err(e.into());
        }

        tracing::info!("Node {} operational state {:?} -> {:?}", id, before, state);
        Ok(())
    }

    pub fn get(&self, id: &NodeId) -> Option<Node> {
        self.nodes.get(id).map(|n| n.value().clone())
    }

    /// Nodes matching both filters; `None` matches every value of that dimension.
    pub fn get_nodes_by_state(
        &self,
        op_state: Option<NodeOperationalState>,
        health: Option<NodeHealth>,
    ) -> Vec<Node> {
        let mut nodes: Vec<Node> = self
            .nodes
            .iter()
            .filter(|n| op_state.is_none_or(|s| n.op_state == s))
            .filter(|n| health.is_none_or(|h| n.health == h))
            .map(|n| n.value().clone())
            .collect();
        nodes.sort_by_key(|n| n.id());
        nodes
    }

    pub fn count(&self) -> usize {
        self.nodes.len()
    }

    /// HEALTHY -> STALE. Returns whether the health changed.
    pub fn mark_stale(&self, id: NodeId) -> Result<bool, NodeError> {
        let mut node = self.nodes.get_mut(&id).ok_or(NodeError::NotFound(id))?;
        if !node.health.is_healthy() {
            return Ok(false);
        }
        node.health = NodeHealth::Stale;
        tracing::warn!("Node {} is stale", id);
        Ok(true)
    }

    /// Anything -> DEAD. Returns whether the health changed.
    pub fn mark_dead(&self, id: NodeId) -> Result<bool, NodeError> {
        let mut node = self.nodes.get_mut(&id).ok_or(NodeError::NotFound(id))?;
        if node.health == NodeHealth::Dead {
            return Ok(false);
        }
        node.health = NodeHealth::Dead;
        tracing::warn!("Node {} is dead", id);
        Ok(true)
    }

    /// One round of the failure detector. Returns the nodes whose health changed.
    pub fn check_health(&self) -> Vec<(NodeId, NodeHealth)> {
        self.check_health_at(Instant::now())
    }

    pub fn check_health_at(&self, now: Instant) -> Vec<(NodeId, NodeHealth)> {
        let mut changed = Vec::new();

        for mut entry in self.nodes.iter_mut() {
            let node = entry.value_mut();

            // Nodes loaded from the store or seen only in reports start the clock now.
            let Some(last) = node.last_heartbeat else {
                node.last_heartbeat = Some(now);
                continue;
            };

            let elapsed = now.saturating_duration_since(last);
            let next = if elapsed > self.dead_after {
                NodeHealth::Dead
            } else if elapsed > self.stale_after && node.health.is_healthy() {
                NodeHealth::Stale
            } else {
                continue;
            };

            if node.health != next {
                tracing::warn!(
                    "Node {} {:?} -> {:?} after {:?} without heartbeat",
                    node.id(),
                    node.health,
                    next,
                    elapsed
                );
                node.health = next;
                changed.push((node.id(), next));
            }
        }

        changed
    }

    /// Rebuilds from node rows. Health of surviving nodes is kept.
    pub fn reinitialize(&self, rows: Vec<NodeRow>) {
        let total = rows.len();
        for row in rows {
            let id = row.details.id;
            match self.nodes.get_mut(&id) {
                Some(mut node) => {
                    node.details = row.details;
                    node.op_state = row.op_state;
                }
                None => {
                    self.nodes.insert(
                        id,
                        Node {
                            details: row.details,
                            op_state: row.op_state,
                            health: NodeHealth::Healthy,
                            last_heartbeat: None,
                        },
                    );
                }
            }
        }
        tracing::info!("Node registry reinitialised with {} rows", total);
    }

    pub fn load(&self, store: &MetaStore) -> Result<usize, StoreError> {
        let rows: Vec<NodeRow> = NODES.list(store.db())?.into_iter().map(|(_, r)| r).collect();
        let count = rows.len();
        self.reinitialize(rows);
        Ok(count)
    }
}
