//! Authoritative Source Client
//!
//! ## Submodules
//! - **`source`**: The `ContainerSource` trait the reconciliation service consumes.
//! - **`types`**: Summaries returned by the source.
//! - **`protocol`**: HTTP endpoints of the source.
//! - **`http`**: reqwest-based client; one attempt per call.
//! - **`memory`**: In-process source for tests and local runs.

pub mod http;
pub mod memory;
pub mod protocol;
pub mod source;
pub mod types;

pub use http::HttpContainerSource;
pub use memory::InMemorySource;
pub use source::ContainerSource;
pub use types::{ContainerSummary, ContainerWithPipeline, ReplicaSummary, SnapshotHandle};

#[cfg(test)]
mod tests;
