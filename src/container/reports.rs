//! Full and incremental container report handling.
//!
//! Both run on the reporting node's affinity lane, so for one node a full report
//! and the incremental reports after it are applied in submission order.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

use super::directory::ContainerDirectory;
use super::error::ContainerError;
use super::types::{ContainerId, ReplicaReport, ReplicaState};
use crate::node::types::NodeId;

/// What a report did to the directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
    pub applied: usize,
    pub transitions: usize,
    pub removed: usize,
    /// Replicas for containers the directory does not know yet.
    pub unknown: usize,
    pub failed: usize,
}

pub struct ContainerReportHandler {
    directory: Arc<ContainerDirectory>,
}

impl ContainerReportHandler {
    pub fn new(directory: Arc<ContainerDirectory>) -> Arc<Self> {
        Arc::new(Self { directory })
    }

    /// A full report is the node's complete replica set: anything the directory
    /// holds for this node that is not in the report is gone.
    pub fn on_full_report(&self, node_id: NodeId, replicas: Vec<ReplicaReport>) -> ReportSummary {
        let mut summary = ReportSummary::default();
        let reported: HashSet<ContainerId> = replicas.iter().map(|r| r.container_id).collect();

        for report in replicas {
            self.apply(node_id, report, &mut summary);
        }

        for id in self.directory.containers_on_node(&node_id) {
            if reported.contains(&id) {
                continue;
            }
            match self.directory.remove_replica(id, &node_id) {
                Ok(Some(_)) => summary.removed += 1,
                Ok(None) => {}
                Err(e) => tracing::debug!("Could not drop missing replica {} on {}: {}", id, node_id, e),
            }
        }

        tracing::debug!("Full report from node {} processed: {:?}", node_id, summary);
        summary
    }

    /// An incremental report carries only changes. A DELETED replica is removed.
    pub fn on_incremental_report(
        &self,
        node_id: NodeId,
        replicas: Vec<ReplicaReport>,
    ) -> ReportSummary {
        let mut summary = ReportSummary::default();

        for report in replicas {
            if report.state == ReplicaState::Deleted {
                match self.directory.remove_replica(report.container_id, &node_id) {
                    Ok(Some(_)) => summary.removed += 1,
                    Ok(None) => {}
                    Err(e) => self.record_failure(node_id, report.container_id, e, &mut summary),
                }
                continue;
            }
            self.apply(node_id, report, &mut summary);
        }

        tracing::trace!("Incremental report from node {} processed: {:?}", node_id, summary);
        summary
    }

    fn apply(&self, node_id: NodeId, report: ReplicaReport, summary: &mut ReportSummary) {
        let container_id = report.container_id;
        match self.directory.apply_replica(report.into_replica(node_id)) {
            Ok(outcome) => {
                summary.applied += 1;
                if outcome.new_state.is_some() {
                    summary.transitions += 1;
                }
            }
            Err(e) => self.record_failure(node_id, container_id, e, summary),
        }
    }

    fn record_failure(
        &self,
        node_id: NodeId,
        container_id: ContainerId,
        error: ContainerError,
        summary: &mut ReportSummary,
    ) {
        if error.is_not_found() {
            // Corrected by the next reconciliation pass.
            tracing::debug!(
                "Dropping replica of unknown container {} from node {}",
                container_id,
                node_id
            );
            summary.unknown += 1;
        } else {
            tracing::warn!(
                "Failed to apply replica of container {} from node {}: {}",
                container_id,
                node_id,
                error
            );
            summary.failed += 1;
        }
    }
}
