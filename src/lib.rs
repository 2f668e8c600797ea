//! Container Reconciliation Library
//!
//! This library crate implements a secondary, read-mostly mirror of a storage cluster's
//! control plane. It tracks storage nodes, pipelines and replicated containers, ingests
//! the reports nodes stream in, and periodically reconciles itself against the
//! authoritative SCM.
//!
//! ## Architecture Modules
//!
//! - **`events`**: Typed report envelope and the event bus that binds each handler to an executor.
//! - **`executor`**: Affinity lane pool. All reports from one node land on the same lane, in order.
//! - **`node`**: Node registry fed by heartbeats, with a stale/dead health detector.
//! - **`container`**: Container directory, the lifecycle state machine and the report handlers.
//! - **`pipeline`**: Pipeline registry (membership of nodes in write pipelines).
//! - **`store`**: Embedded key-value store (redb) behind a swappable handle.
//! - **`scm`**: Contract of the authoritative source plus an HTTP client for it.
//! - **`recon`**: Periodic reconciliation: divergence check, full resync and incremental diff.
//! - **`facade`**: Composition root that wires everything together and owns the lifecycle.
//! - **`api`**: HTTP surface for report intake and read-only views.
//! - **`config`**: Runtime configuration.

pub mod api;
pub mod config;
pub mod container;
pub mod events;
pub mod executor;
pub mod facade;
pub mod node;
pub mod pipeline;
pub mod recon;
pub mod scm;
pub mod store;
