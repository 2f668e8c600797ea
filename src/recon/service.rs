//! Reconciliation Service
//!
//! One pass at a time, gated by [`SyncGuard`]:
//! 1. Compare the local container count with the source's.
//! 2. If they differ by more than the threshold (and snapshot sync is enabled),
//!    install a fresh snapshot of the source as the new store.
//! 3. Otherwise walk the source's container list, add containers the mirror is
//!    missing and push every replica through the lifecycle state machine.
//!
//! A pass never lets an error escape: failures are logged, recorded in the sync
//! status and retried on the next tick.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::guard::SyncGuard;
use super::types::*;
use crate::container::types::{ContainerId, ContainerInfo, ReplicaHistory, now_ms};
use crate::container::{ContainerDirectory, ContainerError};
use crate::node::NodeRegistry;
use crate::node::types::NodeRow;
use crate::pipeline::types::Pipeline;
use crate::pipeline::{PipelineRegistry, PipelineSyncSummary};
use crate::scm::{ContainerSource, ContainerSummary};
use crate::store::sequence::CONTAINER_ID;
use crate::store::tables::{CONTAINERS, NODES, PIPELINES, REPLICA_HISTORY};
use crate::store::{MetaStore, SequenceIdGenerator, StoreError, StoreHandle, snapshot};

/// `true` when the counts are too far apart for an incremental diff.
pub fn needs_full_resync(local: u64, authoritative: u64, threshold: u64) -> bool {
    local.abs_diff(authoritative) > threshold
}

pub struct ReconciliationService {
    settings: ReconSettings,
    source: Arc<dyn ContainerSource>,
    store: Arc<StoreHandle>,
    containers: Arc<ContainerDirectory>,
    nodes: Arc<NodeRegistry>,
    pipelines: Arc<PipelineRegistry>,
    guard: SyncGuard,
    /// Held by a snapshot install for as long as it runs on the blocking pool.
    install_lock: Arc<tokio::sync::Mutex<()>>,
    status: Mutex<SyncStatus>,
}

impl ReconciliationService {
    pub fn new(
        settings: ReconSettings,
        source: Arc<dyn ContainerSource>,
        store: Arc<StoreHandle>,
        containers: Arc<ContainerDirectory>,
        nodes: Arc<NodeRegistry>,
        pipelines: Arc<PipelineRegistry>,
    ) -> Arc<Self> {
        Arc::new(Self {
            settings,
            source,
            store,
            containers,
            nodes,
            pipelines,
            guard: SyncGuard::new(),
            install_lock: Arc::new(tokio::sync::Mutex::new(())),
            status: Mutex::new(SyncStatus::default()),
        })
    }

    pub fn status(&self) -> SyncStatus {
        let mut status = self.status.lock().clone();
        status.in_progress = self.guard.is_active();
        status
    }

    pub fn is_syncing(&self) -> bool {
        self.guard.is_active()
    }

    fn begin(&self) -> u64 {
        let started = now_ms();
        self.status.lock().last_started_ms = Some(started);
        started
    }

    fn finish(&self, outcome: &SyncOutcome) {
        let mut status = self.status.lock();
        status.passes += 1;
        status.last_finished_ms = Some(now_ms());
        status.last_outcome = Some(outcome.clone());
    }

    fn failed(&self, stage: &str, error: anyhow::Error) -> SyncOutcome {
        tracing::error!("Reconciliation {} failed: {:#}", stage, error);
        SyncOutcome::Failed {
            reason: format!("{:#}", error),
        }
    }

    /// One scheduled pass: divergence check, then full resync or incremental diff.
    pub async fn run_once(&self) -> SyncOutcome {
        let Some(_permit) = self.guard.try_acquire() else {
            tracing::info!("Reconciliation already in progress, skipping this tick");
            return SyncOutcome::Skipped;
        };
        let started = self.begin();

        let outcome = match self.diverged().await {
            Ok(true) => self.full_resync_locked().await,
            Ok(false) => self.incremental_diff_locked().await,
            Err(e) => self.failed("divergence check", e),
        };

        self.finish(&outcome);
        tracing::info!(
            "Reconciliation pass finished in {} ms: {:?}",
            now_ms().saturating_sub(started),
            outcome
        );
        outcome
    }

    /// Whether this pass should take the full-resync path.
    async fn diverged(&self) -> Result<bool> {
        let local = self.containers.count() as u64;
        let authoritative = self.source.container_count().await?;

        if !needs_full_resync(local, authoritative, self.settings.container_threshold) {
            tracing::debug!(
                "Container counts within threshold (local={}, scm={})",
                local,
                authoritative
            );
            return Ok(false);
        }

        if self.settings.snapshot_sync_enabled {
            tracing::info!(
                "Container counts diverged (local={}, scm={}, threshold={}), taking full resync",
                local,
                authoritative,
                self.settings.container_threshold
            );
            Ok(true)
        } else {
            tracing::warn!(
                "Container counts diverged (local={}, scm={}) but snapshot sync is disabled, running incremental diff",
                local,
                authoritative
            );
            Ok(false)
        }
    }

    /// Startup sync: a diverged mirror installs a snapshot; otherwise pipelines
    /// are initialised from the source.
    pub async fn initialize(&self) -> Result<()> {
        let Some(_permit) = self.guard.try_acquire() else {
            return Ok(());
        };

        if self.diverged().await? {
            self.begin();
            let outcome = self.full_resync_locked().await;
            self.finish(&outcome);
            if let SyncOutcome::Failed { reason } = outcome {
                anyhow::bail!("startup resync failed: {}", reason);
            }
            return Ok(());
        }

        self.sync_pipelines().await?;
        Ok(())
    }

    /// Makes the pipeline registry match the source's pipeline list.
    pub async fn sync_pipelines(&self) -> Result<PipelineSyncSummary> {
        let pipelines = self.source.list_pipelines().await?;
        Ok(self.pipelines.initialize_pipelines(pipelines)?)
    }

    /// Waits until no snapshot install is running.
    pub async fn wait_for_install(&self) {
        let _idle = self.install_lock.lock().await;
    }

    /// Replaces the store with a snapshot of the source.
    pub async fn full_resync(&self) -> SyncOutcome {
        let Some(_permit) = self.guard.try_acquire() else {
            return SyncOutcome::Skipped;
        };
        self.begin();
        let outcome = self.full_resync_locked().await;
        self.finish(&outcome);
        outcome
    }

    async fn full_resync_locked(&self) -> SyncOutcome {
        let handle = match self.source.snapshot(&self.settings.db_dir).await {
            Ok(Some(handle)) => handle,
            Ok(None) => {
                tracing::info!("SCM returned no snapshot, waiting for the next tick");
                return SyncOutcome::NothingFromSource;
            }
            Err(e) => return self.failed("snapshot request", e),
        };

        let install = SnapshotInstall {
            db_dir: self.settings.db_dir.clone(),
            snapshot: handle.location,
            store: self.store.clone(),
            containers: self.containers.clone(),
            nodes: self.nodes.clone(),
            pipelines: self.pipelines.clone(),
        };

        // The lock travels with the blocking task, so it outlives this future if
        // the pass is cancelled while the install is still running.
        let installing = self.install_lock.clone().lock_owned().await;
        let result = tokio::task::spawn_blocking(move || {
            let _installing = installing;
            install.run()
        })
        .await;

        match result {
            Ok(Ok(report)) => SyncOutcome::FullResync(report),
            Ok(Err(e)) => self.failed("snapshot install", e),
            Err(e) => self.failed("snapshot install", anyhow::anyhow!(e)),
        }
    }

    /// Catches the mirror up container by container.
    pub async fn incremental_diff(&self) -> SyncOutcome {
        let Some(_permit) = self.guard.try_acquire() else {
            return SyncOutcome::Skipped;
        };
        self.begin();
        let outcome = self.incremental_diff_locked().await;
        self.finish(&outcome);
        outcome
    }

    async fn incremental_diff_locked(&self) -> SyncOutcome {
        let summaries = match self.source.list_containers().await {
            Ok(summaries) => summaries,
            Err(e) => return self.failed("container listing", e),
        };

        if summaries.is_empty() {
            tracing::info!("SCM returned no containers, waiting for the next tick");
            return SyncOutcome::NothingFromSource;
        }

        let mut report = DiffReport {
            containers_seen: summaries.len(),
            ..DiffReport::default()
        };

        for summary in summaries {
            let id = summary.id;
            if let Err(e) = self.sync_container(summary, &mut report).await {
                report.failed += 1;
                tracing::warn!("Could not reconcile container {}: {:#}", id, e);
            }
        }

        if report.failed > 0 {
            tracing::warn!(
                "Incremental diff left {} of {} containers for the next pass",
                report.failed,
                report.containers_seen
            );
        }
        SyncOutcome::Incremental(report)
    }

    async fn sync_container(&self, summary: ContainerSummary, report: &mut DiffReport) -> Result<()> {
        let id = summary.id;
        let replicas = self.source.container_replicas(id).await?;

        if !self.containers.contains(id) {
            self.add_from_source(id, report).await?;
        }

        for replica in &replicas {
            self.nodes.register_if_absent(replica.node_id)?;
        }

        let (applied, transitions, failed) = self.containers.with_container(id, |container| {
            let mut applied = 0usize;
            let mut transitions = 0usize;
            let mut failed = 0usize;
            for summary in replicas {
                let node_id = summary.node_id;
                match container.apply_replica(summary.into_replica()) {
                    Ok(outcome) => {
                        applied += 1;
                        if outcome.new_state.is_some() {
                            transitions += 1;
                        }
                    }
                    Err(e) => {
                        failed += 1;
                        tracing::warn!("Container {}: replica from node {} not applied: {}", id, node_id, e);
                    }
                }
            }
            Ok::<_, ContainerError>((applied, transitions, failed))
        })?;

        report.replicas_applied += applied;
        report.transitions += transitions;
        report.failed += failed;
        Ok(())
    }

    async fn add_from_source(&self, id: ContainerId, report: &mut DiffReport) -> Result<()> {
        let with_pipeline = self.source.container_with_pipeline(id).await?;

        if let Some(pipeline) = with_pipeline.pipeline {
            self.pipelines.add_pipeline(pipeline)?;
        }

        match self.containers.add_container(with_pipeline.container.into_info()) {
            Ok(()) => {
                report.added += 1;
                Ok(())
            }
            // A report created it while we were fetching.
            Err(ContainerError::AlreadyExists(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Fixed-delay loop: a pass, then `interval` of sleep. Ticks never queue up.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        tracing::info!(
            "Reconciliation scheduled: first pass in {:?}, then every {:?}",
            self.settings.initial_delay,
            self.settings.interval
        );

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(self.settings.initial_delay) => {}
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Reconciliation pass interrupted by shutdown");
                    break;
                }
                _ = self.run_once() => {}
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.settings.interval) => {}
            }
        }

        tracing::info!("Reconciliation loop stopped");
    }

    /// Fixed-delay pipeline refresh. Startup already loaded the list, so the
    /// first refresh waits one interval.
    pub async fn run_pipeline_sync(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.settings.pipeline_sync_interval) => {}
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.sync_pipelines() => {
                    if let Err(e) = result {
                        tracing::warn!("Pipeline sync with SCM failed: {:#}", e);
                    }
                }
            }
        }

        tracing::info!("Pipeline sync loop stopped");
    }
}

/// The disk side of a full resync, detached from the service so it can run on
/// the blocking pool.
struct SnapshotInstall {
    db_dir: PathBuf,
    snapshot: PathBuf,
    store: Arc<StoreHandle>,
    containers: Arc<ContainerDirectory>,
    nodes: Arc<NodeRegistry>,
    pipelines: Arc<PipelineRegistry>,
}

impl SnapshotInstall {
    fn run(self) -> Result<ResyncReport> {
        let staged = snapshot::stage_snapshot(&self.db_dir, &self.snapshot)
            .with_context(|| format!("staging snapshot {}", self.snapshot.display()))?;

        self.install(&staged).inspect_err(|_| {
            if let Err(cleanup) = snapshot::remove_store_dir(&staged) {
                tracing::warn!("Could not remove staged snapshot {}: {}", staged.display(), cleanup);
            }
        })
    }

    /// Opens the staged store, swaps it in and deletes the old store. The new
    /// store's own tables are read before the barrier; node rows are carried
    /// over under it, so a node written up to the swap is not lost.
    fn install(&self, staged: &Path) -> Result<ResyncReport> {
        let next = MetaStore::open(staged)?;

        let infos: Vec<ContainerInfo> = CONTAINERS.list(next.db())?.into_iter().map(|(_, v)| v).collect();
        let history: Vec<ReplicaHistory> =
            REPLICA_HISTORY.list(next.db())?.into_iter().map(|(_, v)| v).collect();
        let pipelines: Vec<Pipeline> = PIPELINES.list(next.db())?.into_iter().map(|(_, v)| v).collect();

        if let Some(max_id) = infos.iter().map(|i| i.id.0).max() {
            SequenceIdGenerator::new().observe(&next, CONTAINER_ID, max_id)?;
        }

        let containers = infos.len();
        let pipeline_count = pipelines.len();

        let (previous, nodes_copied) = self.store.swap_with(next, |outgoing, next| {
            let nodes_copied = NODES.copy_into(outgoing.db(), next.db())?;
            let node_rows: Vec<NodeRow> = NODES.list(next.db())?.into_iter().map(|(_, v)| v).collect();

            self.containers.reinitialize(infos, history);
            self.pipelines.reinitialize(pipelines);
            self.nodes.reinitialize(node_rows);
            Ok::<_, StoreError>(nodes_copied)
        })?;

        let report = ResyncReport {
            location: staged.display().to_string(),
            containers,
            pipelines: pipeline_count,
            nodes_copied,
        };

        let old_location = previous.location().to_path_buf();
        drop(previous);
        if let Err(e) = snapshot::remove_store_dir(&old_location) {
            tracing::warn!("Could not delete old store {}: {}", old_location.display(), e);
        }

        tracing::info!(
            "Full resync installed {} ({} containers, {} pipelines, {} node rows kept)",
            report.location,
            report.containers,
            report.pipelines,
            report.nodes_copied
        );
        Ok(report)
    }
}
