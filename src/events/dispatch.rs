use anyhow::Result;
use std::sync::Arc;

use super::types::ReportEvent;
use crate::container::{ContainerDirectory, ContainerReportHandler};
use crate::node::NodeRegistry;
use crate::node::types::NodeHealth;
use crate::pipeline::PipelineRegistry;

/// Applies one report to the registries.
///
/// Runs on the origin node's lane; never does network I/O.
pub struct ReportDispatcher {
    nodes: Arc<NodeRegistry>,
    containers: Arc<ContainerDirectory>,
    reports: Arc<ContainerReportHandler>,
    pipelines: Arc<PipelineRegistry>,
}

impl ReportDispatcher {
    pub fn new(
        nodes: Arc<NodeRegistry>,
        containers: Arc<ContainerDirectory>,
        pipelines: Arc<PipelineRegistry>,
    ) -> Arc<Self> {
        let reports = ContainerReportHandler::new(containers.clone());
        Arc::new(Self {
            nodes,
            containers,
            reports,
            pipelines,
        })
    }

    pub fn handle(&self, event: ReportEvent) -> Result<()> {
        match event {
            ReportEvent::NodeHeartbeat(heartbeat) => {
                self.nodes.upsert(heartbeat)?;
            }

            ReportEvent::ContainerReport { node_id, replicas } => {
                self.nodes.register_if_absent(node_id)?;
                let summary = self.reports.on_full_report(node_id, replicas);
                if summary.transitions > 0 || summary.removed > 0 {
                    tracing::info!(
                        "Full report from node {}: {} applied, {} transitions, {} removed, {} unknown",
                        node_id,
                        summary.applied,
                        summary.transitions,
                        summary.removed,
                        summary.unknown
                    );
                }
            }

            ReportEvent::IncrementalContainerReport { node_id, replicas } => {
                self.nodes.register_if_absent(node_id)?;
                self.reports.on_incremental_report(node_id, replicas);
            }

            ReportEvent::PipelineReport { node_id, pipelines } => {
                self.nodes.register_if_absent(node_id)?;
                self.pipelines.on_pipeline_report(node_id, pipelines)?;
            }

            ReportEvent::NodeStateChange { node_id, health } => match health {
                NodeHealth::Stale => {
                    let closed = self.pipelines.close_pipelines_for_node(&node_id)?;
                    tracing::info!("Node {} stale: closed {} pipelines", node_id, closed.len());
                }
                NodeHealth::Dead => {
                    let closed = self.pipelines.close_pipelines_for_node(&node_id)?;
                    let removed = self.containers.remove_replicas_for_node(&node_id);
                    tracing::warn!(
                        "Node {} dead: closed {} pipelines, removed {} replicas",
                        node_id,
                        closed.len(),
                        removed
                    );
                }
                NodeHealth::Healthy | NodeHealth::HealthyReadonly => {
                    tracing::debug!("Node {} healthy again, nothing to clean up", node_id);
                }
            },
        }

        Ok(())
    }
}
