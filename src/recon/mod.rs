//! Reconciliation against the authoritative source.
//!
//! - **`guard`**: `SyncGuard`, at most one pass at a time.
//! - **`service`**: Divergence check, full resync, incremental diff and the timer loop.
//! - **`types`**: Settings, outcomes and the sync status.

pub mod guard;
pub mod service;
pub mod types;

pub use guard::{SyncGuard, SyncPermit};
pub use service::{ReconciliationService, needs_full_resync};
pub use types::{DiffReport, ReconSettings, ResyncReport, SyncOutcome, SyncStatus};

#[cfg(test)]
mod tests;
