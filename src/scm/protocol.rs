//! SCM Read Protocol
//!
//! Endpoints served by the authoritative source and the DTOs that are not
//! shared with the rest of the crate.

use serde::{Deserialize, Serialize};

// --- API Endpoints ---

pub const ENDPOINT_CONTAINER_COUNT: &str = "/scm/containers/count";
pub const ENDPOINT_CONTAINERS: &str = "/scm/containers";
/// Followed by `/{id}/replicas` or `/{id}/pipeline`.
pub const ENDPOINT_CONTAINER: &str = "/scm/containers";
pub const ENDPOINT_PIPELINES: &str = "/scm/pipelines";
/// Returns the raw database file; `204 No Content` when no snapshot is available.
pub const ENDPOINT_SNAPSHOT: &str = "/scm/snapshot";

// --- Data Transfer Objects ---

#[derive(Debug, Serialize, Deserialize)]
pub struct ContainerCountResponse {
    pub count: u64,
}
