use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Instant;
use uuid::Uuid;

/// Identity of a storage node. Stable across restarts of the node.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub Uuid);

impl NodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(NodeId)
    }
}

/// Health derived from heartbeat recency.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeHealth {
    Healthy,
    /// Heartbeating, but not allowed to take new writes (e.g. pending layout upgrade).
    HealthyReadonly,
    Stale,
    Dead,
}

impl NodeHealth {
    pub fn is_healthy(&self) -> bool {
        matches!(self, NodeHealth::Healthy | NodeHealth::HealthyReadonly)
    }
}

/// Administrative state, set by operators.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeOperationalState {
    InService,
    Decommissioning,
    Decommissioned,
    EnteringMaintenance,
    InMaintenance,
}

impl NodeOperationalState {
    pub const ALL: [NodeOperationalState; 5] = [
        NodeOperationalState::InService,
        NodeOperationalState::Decommissioning,
        NodeOperationalState::Decommissioned,
        NodeOperationalState::EnteringMaintenance,
        NodeOperationalState::InMaintenance,
    ];
}

/// Addressing information a node announces about itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeDetails {
    pub id: NodeId,
    pub hostname: String,
    pub addr: SocketAddr,
}

impl NodeDetails {
    /// Placeholder details for a node first seen through a report rather than a heartbeat.
    pub fn unresolved(id: NodeId) -> Self {
        Self {
            id,
            hostname: id.to_string(),
            addr: SocketAddr::from(([0, 0, 0, 0], 0)),
        }
    }
}

/// Payload of a node heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeartbeatInfo {
    pub details: NodeDetails,
    #[serde(default)]
    pub readonly: bool,
}

/// A node as tracked by the registry.
///
/// `last_heartbeat` is local bookkeeping for the health detector and is never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub details: NodeDetails,
    pub op_state: NodeOperationalState,
    pub health: NodeHealth,

    #[serde(skip)]
    pub last_heartbeat: Option<Instant>,
}

impl Node {
    pub fn id(&self) -> NodeId {
        self.details.id
    }
}

/// The persisted part of a node: health is re-derived after a restart.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeRow {
    pub details: NodeDetails,
    pub op_state: NodeOperationalState,
}

impl From<&Node> for NodeRow {
    fn from(node: &Node) -> Self {
        Self {
            details: node.details.clone(),
            op_state: node.op_state,
        }
    }
}
