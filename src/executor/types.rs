use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// A unit of work queued on a lane.
pub type LaneJob = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

pub(crate) struct Envelope {
    pub label: String,
    pub job: LaneJob,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("executor {0} is closed")]
    Closed(String),

    /// The lane's bounded queue is full; the event was dropped.
    #[error("lane {lane} of executor {pool} is full")]
    LaneFull { pool: String, lane: usize },
}

/// Counters of one pool since it was created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub lanes: usize,
    pub pinned_nodes: usize,
    pub queued: usize,
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub dropped: u64,
    /// Jobs that outlived the soft timeout (they still ran to completion).
    pub slow: u64,
}
