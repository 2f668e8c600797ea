//! Event Module Tests
//!
//! ## Test Scopes
//! - **Wire format**: Tagged JSON of the report envelope.
//! - **Bus**: Subscription, replacement, fan-out and closing.
//! - **Dispatcher**: Each report kind reaches the right registry.

#[cfg(test)]
mod tests {
    use crate::container::ContainerDirectory;
    use crate::container::types::*;
    use crate::events::{EventBus, EventKind, ReportDispatcher, ReportEvent};
    use crate::executor::{AffinityPool, DispatchError};
    use crate::node::NodeRegistry;
    use crate::node::types::*;
    use crate::pipeline::PipelineRegistry;
    use crate::pipeline::types::*;
    use crate::store::{MetaStore, StoreHandle};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    const SOFT: Duration = Duration::from_secs(5);

    fn heartbeat_event(id: NodeId) -> ReportEvent {
        ReportEvent::NodeHeartbeat(HeartbeatInfo {
            details: NodeDetails::unresolved(id),
            readonly: false,
        })
    }

    async fn wait_for(counter: &AtomicUsize, expected: usize) {
        for _ in 0..500 {
            if counter.load(Ordering::SeqCst) >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("counter stuck at {}", counter.load(Ordering::SeqCst));
    }

    struct Registries {
        _dir: TempDir,
        nodes: Arc<NodeRegistry>,
        containers: Arc<ContainerDirectory>,
        pipelines: Arc<PipelineRegistry>,
        dispatcher: Arc<ReportDispatcher>,
    }

    fn registries() -> Registries {
        let dir = TempDir::new().unwrap();
        let store = StoreHandle::new(MetaStore::open(&dir.path().join("scm-1")).unwrap());
        let nodes = NodeRegistry::new(store.clone(), Duration::from_secs(300), Duration::from_secs(600));
        let containers = ContainerDirectory::new(store.clone());
        let pipelines = PipelineRegistry::new(store);
        let dispatcher = ReportDispatcher::new(nodes.clone(), containers.clone(), pipelines.clone());
        Registries {
            _dir: dir,
            nodes,
            containers,
            pipelines,
            dispatcher,
        }
    }

    // ============================================================
    // TEST 1: WIRE FORMAT
    // ============================================================

    #[test]
    fn test_container_report_json_shape() {
        let node = "6f1c2d3e-0000-4000-8000-000000000001";
        let json = format!(
            r#"{{
                "type": "container_report",
                "node_id": "{}",
                "replicas": [
                    {{"container_id": 7, "state": "QUASI_CLOSED", "sequence_id": 3}}
                ]
            }}"#,
            node
        );

        let event: ReportEvent = serde_json::from_str(&json).unwrap();

        assert_eq!(event.kind(), EventKind::ContainerReport);
        assert_eq!(event.origin(), node.parse::<NodeId>().unwrap());
        match event {
            ReportEvent::ContainerReport { replicas, .. } => {
                assert_eq!(replicas.len(), 1);
                assert_eq!(replicas[0].container_id, ContainerId(7));
                assert_eq!(replicas[0].state, ReplicaState::QuasiClosed);
                assert_eq!(replicas[0].origin_node_id, None);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_heartbeat_json_round_trip() {
        let event = heartbeat_event(NodeId::new());

        let json = serde_json::to_string(&event).unwrap();
        let back: ReportEvent = serde_json::from_str(&json).unwrap();

        assert!(json.contains(r#""type":"node_heartbeat""#));
        assert_eq!(back, event);
    }

    // ============================================================
    // TEST 2: EVENT BUS
    // ============================================================

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let bus = EventBus::new();
        let pool = AffinityPool::new("test", 2, 16, SOFT);
        pool.start();
        let calls = Arc::new(AtomicUsize::new(0));

        for name in ["first", "second"] {
            let calls = calls.clone();
            bus.subscribe(EventKind::NodeHeartbeat, name, pool.clone(), move |_event| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            });
        }

        let accepted = bus.publish(heartbeat_event(NodeId::new())).unwrap();

        assert_eq!(accepted, 2);
        wait_for(&calls, 2).await;
        assert_eq!(bus.published(), 1);
    }

    #[tokio::test]
    async fn test_resubscribe_replaces_binding() {
        let bus = EventBus::new();
        let old_pool = AffinityPool::serial("old", 16, SOFT);
        let new_pool = AffinityPool::serial("new", 16, SOFT);

        bus.subscribe(EventKind::PipelineReport, "pipelines", old_pool.clone(), |_e| async { Ok(()) });
        bus.subscribe(EventKind::PipelineReport, "pipelines", new_pool.clone(), |_e| async { Ok(()) });

        assert_eq!(bus.handler_count(EventKind::PipelineReport), 1);
        assert_eq!(bus.handlers(EventKind::PipelineReport), vec!["pipelines".to_string()]);

        bus.publish(ReportEvent::PipelineReport {
            node_id: NodeId::new(),
            pipelines: Vec::new(),
        })
        .unwrap();
        assert_eq!(old_pool.stats().submitted, 0);
        assert_eq!(new_pool.stats().submitted, 1);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::new();

        let accepted = bus.publish(heartbeat_event(NodeId::new())).unwrap();

        assert_eq!(accepted, 0);
    }

    #[tokio::test]
    async fn test_closed_bus_rejects() {
        let bus = EventBus::new();
        let pool = AffinityPool::serial("test", 16, SOFT);
        bus.subscribe(EventKind::NodeHeartbeat, "hb", pool.clone(), |_e| async { Ok(()) });

        bus.close();
        let err = bus.publish(heartbeat_event(NodeId::new())).unwrap_err();

        assert!(bus.is_closed());
        assert!(matches!(err, DispatchError::Closed(_)));
        assert_eq!(pool.stats().submitted, 0);
    }

    #[tokio::test]
    async fn test_full_lane_surfaces_to_publisher() {
        let bus = EventBus::new();
        let pool = AffinityPool::serial("tiny", 1, SOFT);
        bus.subscribe(EventKind::NodeHeartbeat, "hb", pool.clone(), |_e| async { Ok(()) });
        let node = NodeId::new();

        bus.publish(heartbeat_event(node)).unwrap();
        let err = bus.publish(heartbeat_event(node)).unwrap_err();

        assert!(matches!(err, DispatchError::LaneFull { .. }));
    }

    #[test]
    fn test_silent_kinds() {
        let bus = EventBus::new();

        bus.set_silent(EventKind::IncrementalContainerReport, true);
        assert!(bus.is_silent(EventKind::IncrementalContainerReport));
        assert!(!bus.is_silent(EventKind::ContainerReport));

        bus.set_silent(EventKind::IncrementalContainerReport, false);
        assert!(!bus.is_silent(EventKind::IncrementalContainerReport));
    }

    // ============================================================
    // TEST 3: DISPATCHER ROUTING
    // ============================================================

    #[test]
    fn test_dispatch_heartbeat_registers_node() {
        let r = registries();
        let node = NodeId::new();

        r.dispatcher.handle(heartbeat_event(node)).unwrap();

        assert_eq!(r.nodes.get(&node).unwrap().health, NodeHealth::Healthy);
    }

    #[test]
    fn test_dispatch_container_report_applies_replicas() {
        let r = registries();
        let mut info = ContainerInfo::new(ContainerId(1), LifecycleState::Closing, None);
        info.sequence_id = 4;
        r.containers.add_container(info).unwrap();
        let node = NodeId::new();

        r.dispatcher
            .handle(ReportEvent::ContainerReport {
                node_id: node,
                replicas: vec![ReplicaReport {
                    container_id: ContainerId(1),
                    state: ReplicaState::Closed,
                    sequence_id: 4,
                    key_count: 0,
                    bytes_used: 0,
                    origin_node_id: None,
                }],
            })
            .unwrap();

        assert!(r.nodes.get(&node).is_some());
        assert_eq!(
            r.containers.get(ContainerId(1)).unwrap().info.state,
            LifecycleState::Closed
        );
    }

    #[test]
    fn test_dispatch_pipeline_report() {
        let r = registries();
        let node = NodeId::new();
        let pipeline_id = PipelineId::new();

        r.dispatcher
            .handle(ReportEvent::PipelineReport {
                node_id: node,
                pipelines: vec![PipelineReportEntry {
                    pipeline_id,
                    members: vec![node],
                }],
            })
            .unwrap();

        assert_eq!(r.pipelines.get(&pipeline_id).unwrap().state, PipelineState::Open);
    }

    #[test]
    fn test_dispatch_dead_node_cleans_up() {
        let r = registries();
        let node = NodeId::new();
        let pipeline = Pipeline {
            id: PipelineId::new(),
            nodes: vec![node],
            state: PipelineState::Open,
        };
        r.pipelines.add_pipeline(pipeline.clone()).unwrap();
        r.containers
            .create(ContainerId(1), LifecycleState::Open, Some(pipeline.id))
            .unwrap();
        r.containers
            .update_replica(ContainerReplica {
                container_id: ContainerId(1),
                node_id: node,
                state: ReplicaState::Open,
                sequence_id: 0,
                key_count: 0,
                bytes_used: 0,
                origin_node_id: node,
            })
            .unwrap();

        // ACT
        r.dispatcher
            .handle(ReportEvent::NodeStateChange {
                node_id: node,
                health: NodeHealth::Dead,
            })
            .unwrap();

        // ASSERT
        assert_eq!(r.pipelines.get(&pipeline.id).unwrap().state, PipelineState::Closed);
        assert!(r.containers.replicas(ContainerId(1)).unwrap().is_empty());
    }

    #[test]
    fn test_dispatch_stale_node_keeps_replicas() {
        let r = registries();
        let node = NodeId::new();
        let pipeline = Pipeline {
            id: PipelineId::new(),
            nodes: vec![node],
            state: PipelineState::Open,
        };
        r.pipelines.add_pipeline(pipeline.clone()).unwrap();
        r.containers.create(ContainerId(1), LifecycleState::Open, None).unwrap();
        r.containers
            .update_replica(ContainerReplica {
                container_id: ContainerId(1),
                node_id: node,
                state: ReplicaState::Open,
                sequence_id: 0,
                key_count: 0,
                bytes_used: 0,
                origin_node_id: node,
            })
            .unwrap();

        r.dispatcher
            .handle(ReportEvent::NodeStateChange {
                node_id: node,
                health: NodeHealth::Stale,
            })
            .unwrap();

        assert_eq!(r.pipelines.get(&pipeline.id).unwrap().state, PipelineState::Closed);
        assert_eq!(r.containers.replicas(ContainerId(1)).unwrap().len(), 1);
    }
}
