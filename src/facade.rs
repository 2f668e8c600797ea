//! Composition root of the mirror.
//!
//! Owns the store handle, the registries, the executors and the background
//! loops, and is the only place where they are wired together.

use anyhow::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ReconConfig;
use crate::container::ContainerDirectory;
use crate::events::{EventBus, EventKind, ReportDispatcher, ReportEvent};
use crate::executor::{AffinityPool, DispatchError, PoolStats};
use crate::node::NodeRegistry;
use crate::pipeline::PipelineRegistry;
use crate::recon::{ReconSettings, ReconciliationService};
use crate::scm::ContainerSource;
use crate::store::{self, StoreHandle};

pub struct ReconFacade {
    config: ReconConfig,
    store: Arc<StoreHandle>,
    bus: Arc<EventBus>,
    /// Full and incremental container reports; one lane per node group.
    report_pool: Arc<AffinityPool>,
    /// Heartbeats, pipeline reports and node state changes, in arrival order.
    control_pool: Arc<AffinityPool>,
    nodes: Arc<NodeRegistry>,
    containers: Arc<ContainerDirectory>,
    pipelines: Arc<PipelineRegistry>,
    recon: Arc<ReconciliationService>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ReconFacade {
    /// Opens the last known store, loads the registries from it and wires the
    /// event subscriptions. Nothing runs until [`start`](Self::start).
    pub fn build(config: ReconConfig, source: Arc<dyn ContainerSource>) -> Result<Arc<Self>> {
        config.validate()?;

        let store = StoreHandle::new(store::open_last_known(&config.db_dir)?);
        let nodes = NodeRegistry::new(
            store.clone(),
            config.stale_node_interval(),
            config.dead_node_interval(),
        );
        let containers = ContainerDirectory::new(store.clone());
        let pipelines = PipelineRegistry::new(store.clone());

        {
            let current = store.current();
            let node_count = nodes.load(&current)?;
            let container_count = containers.load(&current)?;
            let pipeline_count = pipelines.load(&current)?;
            tracing::info!(
                "Loaded {} nodes, {} containers, {} pipelines from {}",
                node_count,
                container_count,
                pipeline_count,
                current.location().display()
            );
        }

        let report_pool = AffinityPool::new(
            "container-reports",
            config.report_lanes,
            config.report_queue_depth,
            config.task_soft_timeout(),
        );
        let control_pool = AffinityPool::serial(
            "node-events",
            config.report_queue_depth,
            config.task_soft_timeout(),
        );

        let bus = EventBus::new();
        let dispatcher = ReportDispatcher::new(nodes.clone(), containers.clone(), pipelines.clone());
        let bindings = [
            (EventKind::NodeHeartbeat, "node-heartbeat", &control_pool),
            (EventKind::ContainerReport, "container-report", &report_pool),
            (
                EventKind::IncrementalContainerReport,
                "incremental-container-report",
                &report_pool,
            ),
            (EventKind::PipelineReport, "pipeline-report", &control_pool),
            (EventKind::NodeStateChange, "node-state-change", &control_pool),
        ];
        for (kind, name, pool) in bindings {
            let dispatcher = dispatcher.clone();
            bus.subscribe(kind, name, pool.clone(), move |event| {
                let dispatcher = dispatcher.clone();
                async move { dispatcher.handle(event) }
            });
        }
        bus.set_silent(EventKind::NodeHeartbeat, true);
        bus.set_silent(EventKind::IncrementalContainerReport, true);

        let recon = ReconciliationService::new(
            ReconSettings::from(&config),
            source,
            store.clone(),
            containers.clone(),
            nodes.clone(),
            pipelines.clone(),
        );

        Ok(Arc::new(Self {
            config,
            store,
            bus,
            report_pool,
            control_pool,
            nodes,
            containers,
            pipelines,
            recon,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }))
    }

    /// Starts the executors, runs the startup sync, then spawns the
    /// reconciliation, pipeline sync, health and history-flush loops.
    pub async fn start(self: &Arc<Self>) {
        self.report_pool.start();
        self.control_pool.start();

        if let Err(e) = self.recon.initialize().await {
            tracing::warn!("Startup sync with SCM failed, continuing with local state: {:#}", e);
        }

        let recon_task = tokio::spawn(self.recon.clone().run(self.cancel.clone()));
        let pipeline_task = tokio::spawn(self.recon.clone().run_pipeline_sync(self.cancel.clone()));

        let health_task = {
            let facade = self.clone();
            tokio::spawn(async move { facade.health_loop().await })
        };

        let flush_task = {
            let facade = self.clone();
            tokio::spawn(async move { facade.history_flush_loop().await })
        };

        self.tasks
            .lock()
            .extend([recon_task, pipeline_task, health_task, flush_task]);
        tracing::info!("Recon facade started");
    }

    async fn health_loop(&self) {
        let mut interval = tokio::time::interval(self.config.health_check_interval());

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            for (node_id, health) in self.nodes.check_health() {
                if let Err(e) = self.bus.publish(ReportEvent::NodeStateChange { node_id, health }) {
                    tracing::warn!("Could not publish {:?} for node {}: {}", health, node_id, e);
                }
            }
        }
    }

    async fn history_flush_loop(&self) {
        let mut interval = tokio::time::interval(self.config.history_flush_interval());

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            if let Err(e) = self.containers.flush_history() {
                tracing::warn!("Replica history flush failed: {}", e);
            }
        }
    }

    pub fn publish(&self, event: ReportEvent) -> Result<usize, DispatchError> {
        self.bus.publish(event)
    }

    /// Stops intake, drains the lanes within the grace period, stops the loops
    /// (interrupting a running reconciliation pass) and flushes the replica history. The store closes when the last handle drops.
    pub async fn stop(&self) {
        tracing::info!("Stopping recon facade");
        let grace = self.config.shutdown_grace();

        self.cancel.cancel();
        self.bus.close();

        self.report_pool.shutdown(grace).await;
        self.control_pool.shutdown(grace).await;

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for mut task in tasks {
            if tokio::time::timeout(grace, &mut task).await.is_err() {
                tracing::warn!("Background task did not stop within {:?}, aborting", grace);
                task.abort();
            }
        }

        // A cancelled resync may still be installing its snapshot on the blocking pool.
        if tokio::time::timeout(grace, self.recon.wait_for_install()).await.is_err() {
            tracing::warn!("Snapshot install still running after {:?}", grace);
        }

        match self.containers.flush_history() {
            Ok(n) => tracing::info!("Flushed {} replica history entries on shutdown", n),
            Err(e) => tracing::error!("Final replica history flush failed: {}", e),
        }

        tracing::info!(
            "Recon facade stopped (store at {})",
            self.store.current().location().display()
        );
    }

    pub fn container_manager(&self) -> Arc<ContainerDirectory> {
        self.containers.clone()
    }

    pub fn node_manager(&self) -> Arc<NodeRegistry> {
        self.nodes.clone()
    }

    pub fn pipeline_manager(&self) -> Arc<PipelineRegistry> {
        self.pipelines.clone()
    }

    pub fn recon_service(&self) -> Arc<ReconciliationService> {
        self.recon.clone()
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    pub fn store(&self) -> Arc<StoreHandle> {
        self.store.clone()
    }

    pub fn report_stats(&self) -> PoolStats {
        self.report_pool.stats()
    }

    pub fn control_stats(&self) -> PoolStats {
        self.control_pool.stats()
    }

    pub fn shutdown_grace(&self) -> Duration {
        self.config.shutdown_grace()
    }
}
