use axum::{
    Extension, Json,
    extract::{Path, Query},
    http::StatusCode,
};
use std::sync::Arc;

use super::protocol::*;
use crate::container::ContainerError;
use crate::container::types::ContainerId;
use crate::events::ReportEvent;
use crate::executor::DispatchError;
use crate::facade::ReconFacade;
use crate::recon::{SyncOutcome, SyncStatus};

pub async fn handle_report(
    Extension(facade): Extension<Arc<ReconFacade>>,
    Json(event): Json<ReportEvent>,
) -> (StatusCode, Json<PublishResponse>) {
    let kind = event.kind();
    let origin = event.origin();

    match facade.publish(event) {
        Ok(handlers) => (
            StatusCode::ACCEPTED,
            Json(PublishResponse {
                accepted: true,
                handlers,
                error: None,
            }),
        ),
        Err(e) => {
            let status = match e {
                DispatchError::LaneFull { .. } | DispatchError::Closed(_) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
            };
            tracing::warn!("Rejected {:?} from node {}: {}", kind, origin, e);
            (
                status,
                Json(PublishResponse {
                    accepted: false,
                    handlers: 0,
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

pub async fn handle_list_containers(
    Extension(facade): Extension<Arc<ReconFacade>>,
    Query(query): Query<ContainerQuery>,
) -> (StatusCode, Json<ContainerListResponse>) {
    let directory = facade.container_manager();
    let containers = match query.state {
        Some(state) => directory.list_by_state(state),
        None => directory.list().into_iter().map(|c| c.info).collect(),
    };

    (
        StatusCode::OK,
        Json(ContainerListResponse {
            count: containers.len(),
            containers,
        }),
    )
}

pub async fn handle_get_container(
    Extension(facade): Extension<Arc<ReconFacade>>,
    Path(id_str): Path<String>,
) -> (StatusCode, Json<ContainerResponse>) {
    let id: ContainerId = match id_str.parse() {
        Ok(id) => id,
        Err(e) => {
            tracing::debug!("Bad container id {:?}: {}", id_str, e);
            return (
                StatusCode::BAD_REQUEST,
                Json(ContainerResponse {
                    container: None,
                    history: Vec::new(),
                    error: Some(format!("invalid container id: {}", id_str)),
                }),
            );
        }
    };

    let directory = facade.container_manager();
    match directory.get(id) {
        Ok(container) => (
            StatusCode::OK,
            Json(ContainerResponse {
                container: Some(container),
                history: directory.history(id),
                error: None,
            }),
        ),
        Err(e @ ContainerError::NotFound(_)) => (
            StatusCode::NOT_FOUND,
            Json(ContainerResponse {
                container: None,
                history: Vec::new(),
                error: Some(e.to_string()),
            }),
        ),
        Err(e) => {
            tracing::error!("Failed to read container {}: {}", id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ContainerResponse {
                    container: None,
                    history: Vec::new(),
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

pub async fn handle_list_nodes(
    Extension(facade): Extension<Arc<ReconFacade>>,
    Query(query): Query<NodeQuery>,
) -> (StatusCode, Json<NodeListResponse>) {
    let nodes = facade
        .node_manager()
        .get_nodes_by_state(query.op_state, query.health);

    (
        StatusCode::OK,
        Json(NodeListResponse {
            count: nodes.len(),
            nodes,
        }),
    )
}

pub async fn handle_list_pipelines(
    Extension(facade): Extension<Arc<ReconFacade>>,
) -> (StatusCode, Json<PipelineListResponse>) {
    let pipelines = facade.pipeline_manager().list();

    (
        StatusCode::OK,
        Json(PipelineListResponse {
            count: pipelines.len(),
            pipelines,
        }),
    )
}

pub async fn handle_sync_status(
    Extension(facade): Extension<Arc<ReconFacade>>,
) -> (StatusCode, Json<SyncStatus>) {
    (StatusCode::OK, Json(facade.recon_service().status()))
}

pub async fn handle_sync_trigger(
    Extension(facade): Extension<Arc<ReconFacade>>,
) -> (StatusCode, Json<SyncOutcome>) {
    let outcome = facade.recon_service().run_once().await;
    let status = match outcome {
        SyncOutcome::Skipped => StatusCode::CONFLICT,
        SyncOutcome::Failed { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::OK,
    };
    (status, Json(outcome))
}

pub async fn handle_stats(
    Extension(facade): Extension<Arc<ReconFacade>>,
) -> (StatusCode, Json<StatsResponse>) {
    let containers = facade.container_manager();

    (
        StatusCode::OK,
        Json(StatsResponse {
            containers: containers.count(),
            nodes: facade.node_manager().count(),
            pipelines: facade.pipeline_manager().count(),
            pending_history: containers.pending_history(),
            events_published: facade.event_bus().published(),
            report_pool: facade.report_stats(),
            control_pool: facade.control_stats(),
            sync: facade.recon_service().status(),
        }),
    )
}
