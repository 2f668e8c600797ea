use crate::node::types::NodeId;
use crate::pipeline::types::PipelineId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identity of a container. Assigned monotonically by whoever creates the container.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerId(pub u64);

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl FromStr for ContainerId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim_start_matches('#').parse().map(ContainerId)
    }
}

/// Lifecycle of a container as tracked centrally.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    Open,
    Closing,
    QuasiClosed,
    Closed,
    Deleting,
    Deleted,
}

impl LifecycleState {
    pub const ALL: [LifecycleState; 6] = [
        LifecycleState::Open,
        LifecycleState::Closing,
        LifecycleState::QuasiClosed,
        LifecycleState::Closed,
        LifecycleState::Deleting,
        LifecycleState::Deleted,
    ];

    /// Replica-driven transitions never move a container out of these states.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Closed | LifecycleState::Deleted)
    }
}

/// Events accepted by the lifecycle state machine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleEvent {
    /// OPEN -> CLOSING; issued by a close request outside this engine.
    Finalize,
    QuasiClose,
    Close,
    ForceClose,
    Delete,
    Cleanup,
}

impl LifecycleEvent {
    pub const ALL: [LifecycleEvent; 6] = [
        LifecycleEvent::Finalize,
        LifecycleEvent::QuasiClose,
        LifecycleEvent::Close,
        LifecycleEvent::ForceClose,
        LifecycleEvent::Delete,
        LifecycleEvent::Cleanup,
    ];
}

/// State of one node's copy of a container, as observed by that node.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplicaState {
    Open,
    Closing,
    QuasiClosed,
    Closed,
    Deleted,
    Unhealthy,
}

impl ReplicaState {
    pub const ALL: [ReplicaState; 6] = [
        ReplicaState::Open,
        ReplicaState::Closing,
        ReplicaState::QuasiClosed,
        ReplicaState::Closed,
        ReplicaState::Deleted,
        ReplicaState::Unhealthy,
    ];
}

/// Container metadata. This is the persisted row; replicas are tracked separately.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContainerInfo {
    pub id: ContainerId,
    pub state: LifecycleState,
    /// Write generation the container believes it is on.
    pub sequence_id: u64,
    pub pipeline_id: Option<PipelineId>,
    pub used_bytes: u64,
    pub key_count: u64,
    pub state_entered_ms: u64,
}

impl ContainerInfo {
    pub fn new(id: ContainerId, state: LifecycleState, pipeline_id: Option<PipelineId>) -> Self {
        Self {
            id,
            state,
            sequence_id: 0,
            pipeline_id,
            used_bytes: 0,
            key_count: 0,
            state_entered_ms: now_ms(),
        }
    }
}

/// One replica row per (container, node). Replaced wholesale on each report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContainerReplica {
    pub container_id: ContainerId,
    pub node_id: NodeId,
    pub state: ReplicaState,
    pub sequence_id: u64,
    pub key_count: u64,
    pub bytes_used: u64,
    /// Node that originally created the replica. Kept from the first row ever stored.
    pub origin_node_id: NodeId,
}

/// Read view of a container with its current replica set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Container {
    pub info: ContainerInfo,
    pub replicas: Vec<ContainerReplica>,
}

/// A replica as it appears inside a node's container report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplicaReport {
    pub container_id: ContainerId,
    pub state: ReplicaState,
    pub sequence_id: u64,
    #[serde(default)]
    pub key_count: u64,
    #[serde(default)]
    pub bytes_used: u64,
    #[serde(default)]
    pub origin_node_id: Option<NodeId>,
}

impl ReplicaReport {
    pub fn into_replica(self, node_id: NodeId) -> ContainerReplica {
        ContainerReplica {
            container_id: self.container_id,
            node_id,
            state: self.state,
            sequence_id: self.sequence_id,
            key_count: self.key_count,
            bytes_used: self.bytes_used,
            origin_node_id: self.origin_node_id.unwrap_or(node_id),
        }
    }
}

/// When a (container, node) pair was first and last reported.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplicaHistory {
    pub container_id: ContainerId,
    pub node_id: NodeId,
    pub first_seen_ms: u64,
    pub last_seen_ms: u64,
    pub sequence_id: u64,
    pub state: ReplicaState,
}

/// Helper to get the current system time in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
