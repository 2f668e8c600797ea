//! Container Module
//!
//! Tracks every container, its lifecycle state and the replicas nodes report for it.
//!
//! ## Submodules
//! - **`types`**: Container, replica and lifecycle enums.
//! - **`state_machine`**: Pure replica-driven decision logic and the legal transition table.
//! - **`directory`**: `ContainerDirectory`, per-container atomic mutation with write-through.
//! - **`history`**: Buffered first/last-seen bookkeeping per replica.
//! - **`reports`**: Full and incremental container report handlers.

pub mod directory;
pub mod error;
pub mod history;
pub mod reports;
pub mod state_machine;
pub mod types;

pub use directory::{ContainerDirectory, ContainerGuard, ReplicaOutcome};
pub use error::ContainerError;
pub use reports::{ContainerReportHandler, ReportSummary};
