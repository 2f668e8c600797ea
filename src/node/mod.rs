//! Node Registry
//!
//! Nodes appear on their first heartbeat (or the first report that names them)
//! and are never removed, only marked DEAD or DECOMMISSIONED.
//!
//! - **`types`**: Identity, health and operational state.
//! - **`service`**: `NodeRegistry` and the stale/dead detector.

pub mod service;
pub mod types;

pub use service::{NodeError, NodeRegistry};
