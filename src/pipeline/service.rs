use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

use super::types::{Pipeline, PipelineId, PipelineReportEntry, PipelineState};
use crate::node::types::NodeId;
use crate::store::tables::PIPELINES;
use crate::store::{MetaStore, StoreError, StoreHandle};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineSyncSummary {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
}

/// Pipelines known to the mirror, with write-through to the store.
pub struct PipelineRegistry {
    pipelines: DashMap<PipelineId, Pipeline>,
    store: Arc<StoreHandle>,
}

impl PipelineRegistry {
    pub fn new(store: Arc<StoreHandle>) -> Arc<Self> {
        Arc::new(Self {
            pipelines: DashMap::new(),
            store,
        })
    }

    /// Makes the registry match the authoritative pipeline list.
    pub fn initialize_pipelines(
        &self,
        pipelines: Vec<Pipeline>,
    ) -> Result<PipelineSyncSummary, StoreError> {
        let store = self.store.pin();
        let mut summary = PipelineSyncSummary::default();
        let keep: HashSet<PipelineId> = pipelines.iter().map(|p| p.id).collect();

        for pipeline in pipelines {
            let existing = self.pipelines.get(&pipeline.id).map(|p| p.value().clone());
            match existing {
                Some(current) if current == pipeline => continue,
                Some(_) => summary.updated += 1,
                None => summary.added += 1,
            }
            PIPELINES.put(store.db(), &pipeline.id, &pipeline)?;
            self.pipelines.insert(pipeline.id, pipeline);
        }

        let stale: Vec<PipelineId> = self
            .pipelines
            .iter()
            .filter(|p| !keep.contains(p.key()))
            .map(|p| *p.key())
            .collect();
        for id in stale {
            PIPELINES.delete(store.db(), &id)?;
            self.pipelines.remove(&id);
            summary.removed += 1;
        }

        tracing::info!(
            "Pipelines initialised: {} added, {} updated, {} removed",
            summary.added,
            summary.updated,
            summary.removed
        );
        Ok(summary)
    }

    /// Returns whether the pipeline was new.
    pub fn add_pipeline(&self, pipeline: Pipeline) -> Result<bool, StoreError> {
        if self.pipelines.contains_key(&pipeline.id) {
            return Ok(false);
        }
        let store = self.store.pin();
        PIPELINES.put(store.db(), &pipeline.id, &pipeline)?;
        tracing::info!("Added pipeline {} with {} nodes", pipeline.id, pipeline.nodes.len());
        Ok(self.pipelines.insert(pipeline.id, pipeline).is_none())
    }

    pub fn get(&self, id: &PipelineId) -> Option<Pipeline> {
        self.pipelines.get(id).map(|p| p.value().clone())
    }

    pub fn list(&self) -> Vec<Pipeline> {
        let mut all: Vec<Pipeline> = self.pipelines.iter().map(|p| p.value().clone()).collect();
        all.sort_by_key(|p| p.id);
        all
    }

    pub fn count(&self) -> usize {
        self.pipelines.len()
    }

    fn set_state(
        &self,
        store: &MetaStore,
        id: PipelineId,
        state: PipelineState,
    ) -> Result<bool, StoreError> {
        let Some(mut pipeline) = self.get(&id) else {
            return Ok(false);
        };
        if pipeline.state == state {
            return Ok(false);
        }
        pipeline.state = state;
        PIPELINES.put(store.db(), &id, &pipeline)?;
        self.pipelines.insert(id, pipeline);
        Ok(true)
    }

    /// Registers pipelines a node reports that are not known yet and opens
    /// allocated ones. Returns how many pipelines changed.
    pub fn on_pipeline_report(
        &self,
        node_id: NodeId,
        entries: Vec<PipelineReportEntry>,
    ) -> Result<usize, StoreError> {
        let store = self.store.pin();
        let mut changed = 0;

        for entry in entries {
            match self.get(&entry.pipeline_id) {
                Some(known) if known.state == PipelineState::Allocated => {
                    if self.set_state(&store, entry.pipeline_id, PipelineState::Open)? {
                        tracing::info!("Pipeline {} opened by report from node {}", entry.pipeline_id, node_id);
                        changed += 1;
                    }
                }
                Some(_) => {}
                None => {
                    let mut members = entry.members;
                    if !members.contains(&node_id) {
                        members.push(node_id);
                    }
                    let pipeline = Pipeline {
                        id: entry.pipeline_id,
                        nodes: members,
                        state: PipelineState::Open,
                    };
                    PIPELINES.put(store.db(), &pipeline.id, &pipeline)?;
                    tracing::info!("Registered pipeline {} reported by node {}", pipeline.id, node_id);
                    self.pipelines.insert(pipeline.id, pipeline);
                    changed += 1;
                }
            }
        }

        Ok(changed)
    }

    /// Closes every non-closed pipeline the node is a member of.
    pub fn close_pipelines_for_node(&self, node_id: &NodeId) -> Result<Vec<PipelineId>, StoreError> {
        let store = self.store.pin();
        let targets: Vec<PipelineId> = self
            .pipelines
            .iter()
            .filter(|p| p.state != PipelineState::Closed && p.contains(node_id))
            .map(|p| p.id)
            .collect();

        let mut closed = Vec::new();
        for id in targets {
            if self.set_state(&store, id, PipelineState::Closed)? {
                tracing::info!("Closed pipeline {} (member node {} unhealthy)", id, node_id);
                closed.push(id);
            }
        }
        Ok(closed)
    }

    /// Replaces the registry content with rows from a (new) store.
    pub fn reinitialize(&self, rows: Vec<Pipeline>) {
        let keep: HashSet<PipelineId> = rows.iter().map(|p| p.id).collect();
        self.pipelines.retain(|id, _| keep.contains(id));
        let total = rows.len();
        for pipeline in rows {
            self.pipelines.insert(pipeline.id, pipeline);
        }
        tracing::info!("Pipeline registry reinitialised with {} pipelines", total);
    }

    pub fn load(&self, store: &MetaStore) -> Result<usize, StoreError> {
        let rows: Vec<Pipeline> = PIPELINES.list(store.db())?.into_iter().map(|(_, p)| p).collect();
        let count = rows.len();
        self.reinitialize(rows);
        Ok(count)
    }
}
