use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::container::types::{
    ContainerId, ContainerInfo, ContainerReplica, LifecycleState, ReplicaState, now_ms,
};
use crate::node::types::NodeId;
use crate::pipeline::types::{Pipeline, PipelineId};

/// A container as listed by the authoritative source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContainerSummary {
    pub id: ContainerId,
    pub state: LifecycleState,
    pub sequence_id: u64,
    #[serde(default)]
    pub pipeline_id: Option<PipelineId>,
    #[serde(default)]
    pub used_bytes: u64,
    #[serde(default)]
    pub key_count: u64,
}

impl ContainerSummary {
    pub fn into_info(self) -> ContainerInfo {
        ContainerInfo {
            id: self.id,
            state: self.state,
            sequence_id: self.sequence_id,
            pipeline_id: self.pipeline_id,
            used_bytes: self.used_bytes,
            key_count: self.key_count,
            state_entered_ms: now_ms(),
        }
    }
}

/// A replica as the authoritative source last saw it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplicaSummary {
    pub container_id: ContainerId,
    pub node_id: NodeId,
    pub state: ReplicaState,
    pub sequence_id: u64,
    #[serde(default)]
    pub key_count: u64,
    #[serde(default)]
    pub bytes_used: u64,
    #[serde(default)]
    pub origin_node_id: Option<NodeId>,
}

impl ReplicaSummary {
    pub fn into_replica(self) -> ContainerReplica {
        ContainerReplica {
            container_id: self.container_id,
            node_id: self.node_id,
            state: self.state,
            sequence_id: self.sequence_id,
            key_count: self.key_count,
            bytes_used: self.bytes_used,
            origin_node_id: self.origin_node_id.unwrap_or(self.node_id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContainerWithPipeline {
    pub container: ContainerSummary,
    #[serde(default)]
    pub pipeline: Option<Pipeline>,
}

/// A point-in-time copy of the authoritative store, as a local directory.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotHandle {
    pub location: PathBuf,
}
