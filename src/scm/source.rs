use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

use super::types::{ContainerSummary, ContainerWithPipeline, ReplicaSummary, SnapshotHandle};
use crate::container::types::ContainerId;
use crate::pipeline::types::Pipeline;

/// Read contract of the authoritative source (the SCM).
///
/// Every call may go over the network; callers run them off the report lanes.
#[async_trait]
pub trait ContainerSource: Send + Sync {
    async fn container_count(&self) -> Result<u64>;

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>>;

    async fn container_replicas(&self, id: ContainerId) -> Result<Vec<ReplicaSummary>>;

    async fn container_with_pipeline(&self, id: ContainerId) -> Result<ContainerWithPipeline>;

    async fn list_pipelines(&self) -> Result<Vec<Pipeline>>;

    /// Materialises a snapshot as a directory under `staging_dir`.
    /// `Ok(None)` means the source has no snapshot to offer right now.
    async fn snapshot(&self, staging_dir: &Path) -> Result<Option<SnapshotHandle>>;
}
