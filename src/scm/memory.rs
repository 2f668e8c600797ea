//! In-process `ContainerSource`.
//!
//! Backs tests and local runs without an SCM. Besides plain data it can be told
//! to misreport its container count, to stall listings, to fail replica lookups
//! for chosen containers and to hand out a prepared snapshot directory.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::source::ContainerSource;
use super::types::{ContainerSummary, ContainerWithPipeline, ReplicaSummary, SnapshotHandle};
use crate::container::types::ContainerId;
use crate::pipeline::types::{Pipeline, PipelineId};

#[derive(Default)]
pub struct InMemorySource {
    containers: RwLock<BTreeMap<ContainerId, ContainerSummary>>,
    replicas: RwLock<HashMap<ContainerId, Vec<ReplicaSummary>>>,
    pipelines: RwLock<BTreeMap<PipelineId, Pipeline>>,
    reported_count: RwLock<Option<u64>>,
    list_delay: RwLock<Duration>,
    failing: RwLock<HashSet<ContainerId>>,
    snapshot_dir: Mutex<Option<PathBuf>>,
    list_calls: AtomicUsize,
}

impl InMemorySource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put_container(&self, summary: ContainerSummary, replicas: Vec<ReplicaSummary>) {
        self.replicas.write().insert(summary.id, replicas);
        self.containers.write().insert(summary.id, summary);
    }

    pub fn put_pipeline(&self, pipeline: Pipeline) {
        self.pipelines.write().insert(pipeline.id, pipeline);
    }

    pub fn remove_pipeline(&self, id: &PipelineId) {
        self.pipelines.write().remove(id);
    }

    /// Makes `container_count` return `count` regardless of the real listing.
    pub fn set_reported_count(&self, count: Option<u64>) {
        *self.reported_count.write() = count;
    }

    pub fn set_list_delay(&self, delay: Duration) {
        *self.list_delay.write() = delay;
    }

    /// Replica lookups for `id` fail until cleared.
    pub fn fail_replicas_for(&self, id: ContainerId, fail: bool) {
        if fail {
            self.failing.write().insert(id);
        } else {
            self.failing.write().remove(&id);
        }
    }

    /// The next `snapshot` call hands out `dir` (it is moved away by the caller).
    pub fn set_snapshot(&self, dir: PathBuf) {
        *self.snapshot_dir.lock() = Some(dir);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContainerSource for InMemorySource {
    async fn container_count(&self) -> Result<u64> {
        let reported = *self.reported_count.read();
        Ok(reported.unwrap_or(self.containers.read().len() as u64))
    }

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.list_delay.read();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(self.containers.read().values().cloned().collect())
    }

    async fn container_replicas(&self, id: ContainerId) -> Result<Vec<ReplicaSummary>> {
        if self.failing.read().contains(&id) {
            return Err(anyhow::anyhow!("replica lookup for container {} timed out", id));
        }
        Ok(self.replicas.read().get(&id).cloned().unwrap_or_default())
    }

    async fn container_with_pipeline(&self, id: ContainerId) -> Result<ContainerWithPipeline> {
        let container = self
            .containers
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("container {} not found in source", id))?;
        let pipeline = container
            .pipeline_id
            .and_then(|pid| self.pipelines.read().get(&pid).cloned());
        Ok(ContainerWithPipeline {
            container,
            pipeline,
        })
    }

    async fn list_pipelines(&self) -> Result<Vec<Pipeline>> {
        Ok(self.pipelines.read().values().cloned().collect())
    }

    async fn snapshot(&self, _staging_dir: &Path) -> Result<Option<SnapshotHandle>> {
        Ok(self
            .snapshot_dir
            .lock()
            .take()
            .map(|location| SnapshotHandle { location }))
    }
}
