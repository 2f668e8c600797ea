use serde::{Deserialize, Serialize};

use crate::container::types::ReplicaReport;
use crate::node::types::{HeartbeatInfo, NodeHealth, NodeId};
use crate::pipeline::types::PipelineReportEntry;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    NodeHeartbeat,
    ContainerReport,
    IncrementalContainerReport,
    PipelineReport,
    NodeStateChange,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::NodeHeartbeat,
        EventKind::ContainerReport,
        EventKind::IncrementalContainerReport,
        EventKind::PipelineReport,
        EventKind::NodeStateChange,
    ];
}

/// Everything a node (or the health detector) can report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReportEvent {
    NodeHeartbeat(HeartbeatInfo),

    /// The node's complete replica set.
    ContainerReport {
        node_id: NodeId,
        replicas: Vec<ReplicaReport>,
    },

    /// Replica changes since the node's last report.
    IncrementalContainerReport {
        node_id: NodeId,
        replicas: Vec<ReplicaReport>,
    },

    PipelineReport {
        node_id: NodeId,
        pipelines: Vec<PipelineReportEntry>,
    },

    /// Emitted locally by the health detector.
    NodeStateChange { node_id: NodeId, health: NodeHealth },
}

impl ReportEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ReportEvent::NodeHeartbeat(_) => EventKind::NodeHeartbeat,
            ReportEvent::ContainerReport { .. } => EventKind::ContainerReport,
            ReportEvent::IncrementalContainerReport { .. } => EventKind::IncrementalContainerReport,
            ReportEvent::PipelineReport { .. } => EventKind::PipelineReport,
            ReportEvent::NodeStateChange { .. } => EventKind::NodeStateChange,
        }
    }

    /// The node the event is about; used as the lane routing key.
    pub fn origin(&self) -> NodeId {
        match self {
            ReportEvent::NodeHeartbeat(heartbeat) => heartbeat.details.id,
            ReportEvent::ContainerReport { node_id, .. }
            | ReportEvent::IncrementalContainerReport { node_id, .. }
            | ReportEvent::PipelineReport { node_id, .. }
            | ReportEvent::NodeStateChange { node_id, .. } => *node_id,
        }
    }
}
