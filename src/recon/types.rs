use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::ReconConfig;

/// Knobs of the reconciliation service, taken from `ReconConfig`.
#[derive(Debug, Clone)]
pub struct ReconSettings {
    pub snapshot_sync_enabled: bool,
    pub container_threshold: u64,
    pub interval: Duration,
    pub initial_delay: Duration,
    pub pipeline_sync_interval: Duration,
    /// Parent of all store directories; snapshots are staged here.
    pub db_dir: PathBuf,
}

impl From<&ReconConfig> for ReconSettings {
    fn from(config: &ReconConfig) -> Self {
        Self {
            snapshot_sync_enabled: config.snapshot_sync_enabled,
            container_threshold: config.container_threshold,
            interval: config.sync_interval(),
            initial_delay: config.sync_initial_delay(),
            pipeline_sync_interval: config.pipeline_sync_interval(),
            db_dir: config.db_dir.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResyncReport {
    pub location: String,
    pub containers: usize,
    pub pipelines: usize,
    pub nodes_copied: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiffReport {
    pub containers_seen: usize,
    pub added: usize,
    pub replicas_applied: usize,
    pub transitions: usize,
    /// Containers (or single replicas) that could not be reconciled this pass.
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Another pass held the guard.
    Skipped,
    /// The source had nothing to offer; wait for the next tick.
    NothingFromSource,
    FullResync(ResyncReport),
    Incremental(DiffReport),
    Failed { reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub in_progress: bool,
    pub passes: u64,
    pub last_started_ms: Option<u64>,
    pub last_finished_ms: Option<u64>,
    pub last_outcome: Option<SyncOutcome>,
}
