//! Reconciliation Tests
//!
//! ## Test Scopes
//! - **Divergence**: Threshold arithmetic and path selection.
//! - **Incremental diff**: Convergence, partial failure, empty source.
//! - **Full resync**: Snapshot install, node rows carried over, old store removed.
//! - **Guard**: One pass at a time, released on every exit path.

#[cfg(test)]
mod tests {
    use crate::container::ContainerDirectory;
    use crate::container::types::*;
    use crate::node::NodeRegistry;
    use crate::node::types::NodeId;
    use crate::pipeline::PipelineRegistry;
    use crate::pipeline::types::{Pipeline, PipelineId, PipelineState};
    use crate::recon::*;
    use crate::scm::{ContainerSource, ContainerSummary, InMemorySource, ReplicaSummary};
    use crate::store::tables::{CONTAINERS, NODES, PIPELINES};
    use crate::store::{MetaStore, StoreHandle, open_last_known};
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    struct Fixture {
        dir: TempDir,
        store: Arc<StoreHandle>,
        containers: Arc<ContainerDirectory>,
        nodes: Arc<NodeRegistry>,
        pipelines: Arc<PipelineRegistry>,
        source: Arc<InMemorySource>,
        service: Arc<ReconciliationService>,
    }

    fn fixture(snapshot_sync_enabled: bool, container_threshold: u64) -> Fixture {
        let dir = TempDir::new().unwrap();
        let db_dir = dir.path().join("db");
        let store = StoreHandle::new(open_last_known(&db_dir).unwrap());
        let containers = ContainerDirectory::new(store.clone());
        let nodes = NodeRegistry::new(store.clone(), Duration::from_secs(300), Duration::from_secs(600));
        let pipelines = PipelineRegistry::new(store.clone());
        let source = InMemorySource::new();

        let settings = ReconSettings {
            snapshot_sync_enabled,
            container_threshold,
            interval: Duration::from_secs(3600),
            initial_delay: Duration::ZERO,
            pipeline_sync_interval: Duration::from_millis(20),
            db_dir,
        };
        let service = ReconciliationService::new(
            settings,
            source.clone() as Arc<dyn ContainerSource>,
            store.clone(),
            containers.clone(),
            nodes.clone(),
            pipelines.clone(),
        );

        Fixture {
            dir,
            store,
            containers,
            nodes,
            pipelines,
            source,
            service,
        }
    }

    fn summary(id: u64, state: LifecycleState, sequence_id: u64) -> ContainerSummary {
        ContainerSummary {
            id: ContainerId(id),
            state,
            sequence_id,
            pipeline_id: None,
            used_bytes: 0,
            key_count: 0,
        }
    }

    fn replica(id: u64, node_id: NodeId, state: ReplicaState, sequence_id: u64) -> ReplicaSummary {
        ReplicaSummary {
            container_id: ContainerId(id),
            node_id,
            state,
            sequence_id,
            key_count: 0,
            bytes_used: 0,
            origin_node_id: None,
        }
    }

    fn add_local(containers: &ContainerDirectory, id: u64, state: LifecycleState, sequence_id: u64) {
        let mut info = ContainerInfo::new(ContainerId(id), state, None);
        info.sequence_id = sequence_id;
        containers.add_container(info).unwrap();
    }

    /// Writes a store with `count` CLOSED containers and one pipeline, as the SCM would ship it.
    fn build_snapshot(root: &TempDir, count: u64) -> PipelineId {
        let location = root.path().join("incoming-snapshot");
        let store = MetaStore::open(&location).unwrap();
        let infos: Vec<ContainerInfo> = (1..=count)
            .map(|id| {
                let mut info = ContainerInfo::new(ContainerId(id), LifecycleState::Closed, None);
                info.sequence_id = 1;
                info
            })
            .collect();
        CONTAINERS
            .put_all(store.db(), infos.iter().map(|i| (&i.id, i)))
            .unwrap();
        let pipeline = Pipeline {
            id: PipelineId::new(),
            nodes: vec![NodeId::new()],
            state: PipelineState::Open,
        };
        PIPELINES.put(store.db(), &pipeline.id, &pipeline).unwrap();
        pipeline.id
    }

    fn snapshot_location(root: &TempDir) -> PathBuf {
        root.path().join("incoming-snapshot")
    }

    // ============================================================
    // TEST 1: DIVERGENCE
    // ============================================================

    #[test]
    fn test_needs_full_resync_is_strictly_greater() {
        assert!(!needs_full_resync(10, 60, 50));
        assert!(needs_full_resync(10, 61, 50));
        assert!(needs_full_resync(1000, 10, 50));
        assert!(!needs_full_resync(7, 7, 0));
        assert!(needs_full_resync(7, 8, 0));
    }

    // ============================================================
    // TEST 2: INCREMENTAL DIFF
    // ============================================================

    #[tokio::test]
    async fn test_incremental_diff_converges() {
        let f = fixture(true, 100);
        let nodes = [NodeId::new(), NodeId::new(), NodeId::new()];

        // ARRANGE: container 1 is CLOSING locally; 2 and 3 are missing
        add_local(&f.containers, 1, LifecycleState::Closing, 5);
        for id in 1..=3 {
            f.source.put_container(
                summary(id, LifecycleState::Closed, 5),
                nodes
                    .iter()
                    .map(|n| replica(id, *n, ReplicaState::Closed, 5))
                    .collect(),
            );
        }

        // ACT
        let outcome = f.service.run_once().await;

        // ASSERT
        let SyncOutcome::Incremental(report) = outcome else {
            panic!("expected incremental diff, got {:?}", outcome);
        };
        assert_eq!(report.containers_seen, 3);
        assert_eq!(report.added, 2);
        assert_eq!(report.replicas_applied, 9);
        assert_eq!(report.transitions, 1);
        assert_eq!(report.failed, 0);

        for id in 1..=3 {
            let container = f.containers.get(ContainerId(id)).unwrap();
            assert_eq!(container.info.state, LifecycleState::Closed);
            assert_eq!(container.replicas.len(), 3);
        }
        assert_eq!(f.nodes.count(), 3);
    }

    #[tokio::test]
    async fn test_incremental_diff_is_idempotent() {
        let f = fixture(true, 100);
        let node = NodeId::new();
        f.source.put_container(
            summary(1, LifecycleState::Closed, 2),
            vec![replica(1, node, ReplicaState::Closed, 2)],
        );

        f.service.run_once().await;
        let second = f.service.run_once().await;

        let SyncOutcome::Incremental(report) = second else {
            panic!("expected incremental diff, got {:?}", second);
        };
        assert_eq!(report.added, 0);
        assert_eq!(report.transitions, 0);
        assert_eq!(f.containers.count(), 1);
        assert_eq!(f.service.status().passes, 2);
    }

    #[tokio::test]
    async fn test_stale_sequence_from_source_does_not_close() {
        let f = fixture(true, 100);
        add_local(&f.containers, 1, LifecycleState::Closing, 5);
        f.source.put_container(
            summary(1, LifecycleState::Closing, 5),
            vec![replica(1, NodeId::new(), ReplicaState::Closed, 7)],
        );

        f.service.run_once().await;

        assert_eq!(
            f.containers.get(ContainerId(1)).unwrap().info.state,
            LifecycleState::Closing
        );
    }

    #[tokio::test]
    async fn test_partial_failure_continues_batch() {
        let f = fixture(true, 100);
        for id in 1..=3 {
            f.source.put_container(
                summary(id, LifecycleState::Open, 0),
                vec![replica(id, NodeId::new(), ReplicaState::Open, 0)],
            );
        }
        f.source.fail_replicas_for(ContainerId(2), true);

        // ACT
        let outcome = f.service.run_once().await;

        // ASSERT
        let SyncOutcome::Incremental(report) = outcome else {
            panic!("expected incremental diff, got {:?}", outcome);
        };
        assert_eq!(report.failed, 1);
        assert_eq!(report.added, 2);
        assert!(f.containers.contains(ContainerId(1)));
        assert!(!f.containers.contains(ContainerId(2)));
        assert!(f.containers.contains(ContainerId(3)));

        // next pass picks up the rest
        f.source.fail_replicas_for(ContainerId(2), false);
        f.service.run_once().await;
        assert!(f.containers.contains(ContainerId(2)));
    }

    #[tokio::test]
    async fn test_empty_source_is_nothing_to_do() {
        let f = fixture(true, 100);

        let outcome = f.service.run_once().await;

        assert_eq!(outcome, SyncOutcome::NothingFromSource);
        assert_eq!(f.service.status().last_outcome, Some(SyncOutcome::NothingFromSource));
    }

    #[tokio::test]
    async fn test_snapshot_disabled_falls_back_to_incremental() {
        let f = fixture(false, 50);
        f.source.put_container(summary(1, LifecycleState::Open, 0), Vec::new());
        f.source.set_reported_count(Some(1000));

        let outcome = f.service.run_once().await;

        assert!(matches!(outcome, SyncOutcome::Incremental(_)));
        assert!(f.containers.contains(ContainerId(1)));
    }

    #[tokio::test]
    async fn test_added_container_brings_its_pipeline() {
        let f = fixture(true, 100);
        let pipeline = Pipeline {
            id: PipelineId::new(),
            nodes: vec![NodeId::new()],
            state: PipelineState::Open,
        };
        f.source.put_pipeline(pipeline.clone());
        let mut with_pipeline = summary(1, LifecycleState::Open, 0);
        with_pipeline.pipeline_id = Some(pipeline.id);
        f.source.put_container(with_pipeline, Vec::new());

        f.service.run_once().await;

        assert_eq!(f.pipelines.get(&pipeline.id), Some(pipeline.clone()));
        assert_eq!(
            f.containers.get(ContainerId(1)).unwrap().info.pipeline_id,
            Some(pipeline.id)
        );
    }

    // ============================================================
    // TEST 3: FULL RESYNC
    // ============================================================

    #[tokio::test]
    async fn test_divergence_installs_snapshot() {
        let f = fixture(true, 50);

        // ARRANGE: 10 local containers and one known node, SCM has 1000
        for id in 1..=10 {
            add_local(&f.containers, id, LifecycleState::Open, 0);
        }
        let node = NodeId::new();
        f.nodes.register_if_absent(node).unwrap();
        let old_location = f.store.current().location().to_path_buf();
        let pipeline_id = build_snapshot(&f.dir, 1000);
        f.source.set_reported_count(Some(1000));
        f.source.set_snapshot(snapshot_location(&f.dir));

        // ACT
        let outcome = f.service.run_once().await;

        // ASSERT
        let SyncOutcome::FullResync(report) = outcome else {
            panic!("expected full resync, got {:?}", outcome);
        };
        assert_eq!(report.containers, 1000);
        assert_eq!(report.pipelines, 1);
        assert_eq!(report.nodes_copied, 1);

        assert_eq!(f.containers.count(), 1000);
        assert_eq!(
            f.containers.get(ContainerId(5)).unwrap().info.state,
            LifecycleState::Closed
        );
        assert!(f.pipelines.get(&pipeline_id).is_some());
        assert!(f.nodes.get(&node).is_some());

        let current = f.store.current();
        assert_ne!(current.location(), old_location.as_path());
        assert!(!old_location.exists());
        assert!(!snapshot_location(&f.dir).exists());
        assert!(NODES.get(current.db(), &node).unwrap().is_some());
        assert_eq!(f.containers.allocate(None).unwrap().id, ContainerId(1001));
        tokio::time::timeout(Duration::from_secs(1), f.service.wait_for_install())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_divergence_without_snapshot_waits() {
        let f = fixture(true, 50);
        f.source.set_reported_count(Some(1000));

        let outcome = f.service.run_once().await;

        assert_eq!(outcome, SyncOutcome::NothingFromSource);
        assert_eq!(f.containers.count(), 0);
    }

    #[tokio::test]
    async fn test_failed_install_keeps_store_and_releases_guard() {
        let f = fixture(true, 50);
        let old_location = f.store.current().location().to_path_buf();
        f.source.set_reported_count(Some(1000));
        f.source.set_snapshot(f.dir.path().join("does-not-exist"));

        // ACT
        let outcome = f.service.run_once().await;

        // ASSERT
        assert!(matches!(outcome, SyncOutcome::Failed { .. }));
        assert!(!f.service.is_syncing());
        assert_eq!(f.store.current().location(), old_location.as_path());
        let again = f.service.run_once().await;
        assert_ne!(again, SyncOutcome::Skipped);
    }

    // ============================================================
    // TEST 4: GUARD, STARTUP AND SCHEDULING
    // ============================================================

    #[tokio::test]
    async fn test_concurrent_passes_are_exclusive() {
        let f = fixture(true, 100);
        f.source
            .put_container(summary(1, LifecycleState::Open, 0), Vec::new());
        f.source.set_list_delay(Duration::from_millis(200));

        // ACT
        let (a, b) = tokio::join!(f.service.run_once(), f.service.run_once());

        // ASSERT
        let skipped = [&a, &b]
            .iter()
            .filter(|o| ***o == SyncOutcome::Skipped)
            .count();
        assert_eq!(skipped, 1, "outcomes: {:?} / {:?}", a, b);
        assert_eq!(f.source.list_calls(), 1);
        assert!(!f.service.is_syncing());
    }

    #[test]
    fn test_guard_permit_releases_on_drop() {
        let guard = SyncGuard::new();

        let permit = guard.try_acquire();
        assert!(permit.is_some());
        assert!(guard.is_active());
        assert!(guard.try_acquire().is_none());

        drop(permit);
        assert!(!guard.is_active());
        assert!(guard.try_acquire().is_some());
    }

    #[tokio::test]
    async fn test_initialize_loads_pipelines() {
        let f = fixture(true, 100);
        let pipeline = Pipeline {
            id: PipelineId::new(),
            nodes: vec![NodeId::new()],
            state: PipelineState::Allocated,
        };
        f.source.put_pipeline(pipeline.clone());

        f.service.initialize().await.unwrap();

        assert_eq!(f.pipelines.list(), vec![pipeline]);
    }

    #[tokio::test]
    async fn test_run_loop_stops_on_cancel() {
        let f = fixture(true, 100);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(f.service.clone().run(cancel.clone()));

        for _ in 0..200 {
            if f.service.status().passes >= 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(f.service.status().passes, 1);
    }

    // ============================================================
    // TEST 5: PIPELINE SYNC
    // ============================================================

    fn open_pipeline() -> Pipeline {
        Pipeline {
            id: PipelineId::new(),
            nodes: vec![NodeId::new()],
            state: PipelineState::Open,
        }
    }

    #[tokio::test]
    async fn test_sync_pipelines_follows_source_changes() {
        // ARRANGE: startup saw one pipeline
        let f = fixture(true, 100);
        let retired = open_pipeline();
        f.source.put_pipeline(retired.clone());
        f.service.initialize().await.unwrap();

        // ACT: the SCM closes it and creates another
        let created = open_pipeline();
        f.source.remove_pipeline(&retired.id);
        f.source.put_pipeline(created.clone());
        let summary = f.service.sync_pipelines().await.unwrap();

        // ASSERT
        assert_eq!(summary.added, 1);
        assert_eq!(summary.removed, 1);
        assert_eq!(f.pipelines.list(), vec![created.clone()]);
        assert!(PIPELINES.get(f.store.current().db(), &created.id).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_pipeline_sync_loop_picks_up_new_pipelines() {
        let f = fixture(true, 100);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(f.service.clone().run_pipeline_sync(cancel.clone()));

        // ACT: a pipeline appears on the SCM after startup
        let created = open_pipeline();
        f.source.put_pipeline(created.clone());

        // ASSERT
        for _ in 0..200 {
            if f.pipelines.get(&created.id).is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(f.pipelines.get(&created.id).is_some());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancel_interrupts_running_pass() {
        // ARRANGE: the listing stalls far longer than the test
        let f = fixture(true, 100);
        f.source
            .put_container(summary(1, LifecycleState::Open, 0), Vec::new());
        f.source.set_list_delay(Duration::from_secs(30));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(f.service.clone().run(cancel.clone()));
        for _ in 0..200 {
            if f.service.is_syncing() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(f.service.is_syncing());

        // ACT
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();

        // ASSERT: the pass is gone and nothing it would have written appears
        assert!(!f.service.is_syncing());
        assert_eq!(f.service.status().passes, 0);
        assert!(!f.containers.contains(ContainerId(1)));
    }
}
