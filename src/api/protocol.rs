//! Recon HTTP Protocol
//!
//! Endpoints exposed by the mirror and the DTOs they exchange. Reports arrive on
//! [`ENDPOINT_REPORT`] as a tagged [`ReportEvent`](crate::events::ReportEvent);
//! everything else is read-only.

use serde::{Deserialize, Serialize};

use crate::container::types::{Container, ContainerInfo, LifecycleState, ReplicaHistory};
use crate::executor::PoolStats;
use crate::node::types::{Node, NodeHealth, NodeOperationalState};
use crate::pipeline::types::Pipeline;
use crate::recon::SyncStatus;

// --- API Endpoints ---

/// Intake for node heartbeats and reports.
pub const ENDPOINT_REPORT: &str = "/internal/report";
pub const ENDPOINT_CONTAINERS: &str = "/containers";
/// Single container; followed by `/:id`.
pub const ENDPOINT_CONTAINER: &str = "/containers";
pub const ENDPOINT_NODES: &str = "/nodes";
pub const ENDPOINT_PIPELINES: &str = "/pipelines";
pub const ENDPOINT_SYNC_STATUS: &str = "/sync/status";
/// Triggers a reconciliation pass outside the timer.
pub const ENDPOINT_SYNC_TRIGGER: &str = "/sync/trigger";
pub const ENDPOINT_STATS: &str = "/stats";

// --- Data Transfer Objects ---

/// Result of handing a report to the event bus.
#[derive(Debug, Serialize, Deserialize)]
pub struct PublishResponse {
    pub accepted: bool,
    /// Number of handlers the report was queued for.
    pub handlers: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ContainerQuery {
    pub state: Option<LifecycleState>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ContainerListResponse {
    pub count: usize,
    pub containers: Vec<ContainerInfo>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ContainerResponse {
    pub container: Option<Container>,
    #[serde(default)]
    pub history: Vec<ReplicaHistory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Filters for the node listing; an absent filter matches every value.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct NodeQuery {
    pub op_state: Option<NodeOperationalState>,
    pub health: Option<NodeHealth>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NodeListResponse {
    pub count: usize,
    pub nodes: Vec<Node>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PipelineListResponse {
    pub count: usize,
    pub pipelines: Vec<Pipeline>,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub containers: usize,
    pub nodes: usize,
    pub pipelines: usize,
    pub pending_history: usize,
    pub events_published: u64,
    pub report_pool: PoolStats,
    pub control_pool: PoolStats,
    pub sync: SyncStatus,
}
