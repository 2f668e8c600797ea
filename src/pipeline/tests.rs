#[cfg(test)]
mod tests {
    use crate::node::types::NodeId;
    use crate::pipeline::PipelineRegistry;
    use crate::pipeline::types::*;
    use crate::store::tables::PIPELINES;
    use crate::store::{MetaStore, StoreHandle};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<StoreHandle>, Arc<PipelineRegistry>) {
        let dir = TempDir::new().unwrap();
        let store = StoreHandle::new(MetaStore::open(&dir.path().join("scm-1")).unwrap());
        let registry = PipelineRegistry::new(store.clone());
        (dir, store, registry)
    }

    fn pipeline(nodes: Vec<NodeId>, state: PipelineState) -> Pipeline {
        Pipeline {
            id: PipelineId::new(),
            nodes,
            state,
        }
    }

    // ============================================================
    // TEST 1: INITIALISATION FROM THE SOURCE
    // ============================================================

    #[test]
    fn test_initialize_adds_updates_and_removes() {
        let (_dir, store, registry) = setup();
        let kept = pipeline(vec![NodeId::new()], PipelineState::Open);
        let changed = pipeline(vec![NodeId::new()], PipelineState::Allocated);
        let dropped = pipeline(vec![NodeId::new()], PipelineState::Open);
        registry
            .initialize_pipelines(vec![kept.clone(), changed.clone(), dropped.clone()])
            .unwrap();

        // ACT
        let mut changed_now = changed.clone();
        changed_now.state = PipelineState::Open;
        let fresh = pipeline(vec![NodeId::new()], PipelineState::Open);
        let summary = registry
            .initialize_pipelines(vec![kept.clone(), changed_now.clone(), fresh.clone()])
            .unwrap();

        // ASSERT
        assert_eq!(summary.added, 1);
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.removed, 1);
        assert_eq!(registry.count(), 3);
        assert!(registry.get(&dropped.id).is_none());
        assert_eq!(registry.get(&changed.id).unwrap().state, PipelineState::Open);
        assert!(PIPELINES.get(store.current().db(), &dropped.id).unwrap().is_none());
        assert_eq!(PIPELINES.count(store.current().db()).unwrap(), 3);
    }

    #[test]
    fn test_add_pipeline_is_idempotent() {
        let (_dir, _store, registry) = setup();
        let p = pipeline(vec![NodeId::new()], PipelineState::Open);

        assert!(registry.add_pipeline(p.clone()).unwrap());
        assert!(!registry.add_pipeline(p).unwrap());
        assert_eq!(registry.count(), 1);
    }

    // ============================================================
    // TEST 2: PIPELINE REPORTS
    // ============================================================

    #[test]
    fn test_report_registers_unknown_pipeline_with_reporter() {
        let (_dir, _store, registry) = setup();
        let reporter = NodeId::new();
        let peer = NodeId::new();
        let id = PipelineId::new();

        let changed = registry
            .on_pipeline_report(
                reporter,
                vec![PipelineReportEntry {
                    pipeline_id: id,
                    members: vec![peer],
                }],
            )
            .unwrap();

        assert_eq!(changed, 1);
        let registered = registry.get(&id).unwrap();
        assert_eq!(registered.state, PipelineState::Open);
        assert!(registered.contains(&reporter));
        assert!(registered.contains(&peer));
    }

    #[test]
    fn test_report_opens_allocated_pipeline() {
        let (_dir, _store, registry) = setup();
        let node = NodeId::new();
        let p = pipeline(vec![node], PipelineState::Allocated);
        registry.add_pipeline(p.clone()).unwrap();
        let entry = PipelineReportEntry {
            pipeline_id: p.id,
            members: vec![node],
        };

        assert_eq!(registry.on_pipeline_report(node, vec![entry.clone()]).unwrap(), 1);
        assert_eq!(registry.on_pipeline_report(node, vec![entry]).unwrap(), 0);
        assert_eq!(registry.get(&p.id).unwrap().state, PipelineState::Open);
    }

    // ============================================================
    // TEST 3: NODE FAILURE
    // ============================================================

    #[test]
    fn test_close_pipelines_for_node() {
        let (_dir, store, registry) = setup();
        let failing = NodeId::new();
        let other = NodeId::new();
        let with_failing = pipeline(vec![failing, other], PipelineState::Open);
        let without = pipeline(vec![other], PipelineState::Open);
        registry.add_pipeline(with_failing.clone()).unwrap();
        registry.add_pipeline(without.clone()).unwrap();

        // ACT
        let closed = registry.close_pipelines_for_node(&failing).unwrap();

        // ASSERT
        assert_eq!(closed, vec![with_failing.id]);
        assert_eq!(registry.get(&without.id).unwrap().state, PipelineState::Open);
        let persisted = PIPELINES
            .get(store.current().db(), &with_failing.id)
            .unwrap()
            .unwrap();
        assert_eq!(persisted.state, PipelineState::Closed);
        assert!(registry.close_pipelines_for_node(&failing).unwrap().is_empty());
    }

    #[test]
    fn test_reload_from_store() {
        let (_dir, store, registry) = setup();
        for _ in 0..4 {
            registry
                .add_pipeline(pipeline(vec![NodeId::new()], PipelineState::Open))
                .unwrap();
        }

        let reloaded = PipelineRegistry::new(store.clone());

        assert_eq!(reloaded.load(&store.current()).unwrap(), 4);
        assert_eq!(reloaded.list(), registry.list());
    }
}
