//! Pipeline Registry
//!
//! Pipelines are created by the placement subsystem; the mirror only learns
//! them from the authoritative source and from node pipeline reports, and
//! closes them when a member node goes stale or dead.

pub mod service;
pub mod types;

pub use service::{PipelineRegistry, PipelineSyncSummary};

#[cfg(test)]
mod tests;
