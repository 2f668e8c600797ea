//! Recon HTTP API
//!
//! - **`protocol`**: Endpoint paths and DTOs.
//! - **`handlers`**: axum handlers over a shared [`ReconFacade`].

pub mod handlers;
pub mod protocol;

use axum::{
    Extension, Router,
    routing::{get, post},
};
use std::sync::Arc;

use crate::facade::ReconFacade;
use handlers::*;
use protocol::*;

pub fn router(facade: Arc<ReconFacade>) -> Router {
    Router::new()
        .route(ENDPOINT_REPORT, post(handle_report))
        .route(ENDPOINT_CONTAINERS, get(handle_list_containers))
        .route(&format!("{}/:id", ENDPOINT_CONTAINER), get(handle_get_container))
        .route(ENDPOINT_NODES, get(handle_list_nodes))
        .route(ENDPOINT_PIPELINES, get(handle_list_pipelines))
        .route(ENDPOINT_SYNC_STATUS, get(handle_sync_status))
        .route(ENDPOINT_SYNC_TRIGGER, post(handle_sync_trigger))
        .route(ENDPOINT_STATS, get(handle_stats))
        .layer(Extension(facade))
}
