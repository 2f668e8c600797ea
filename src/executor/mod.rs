//! Report Executor Module
//!
//! Runs report handlers off the caller's task with per-node ordering.
//!
//! ## Architecture Overview
//! 1. **Routing**: The first job from a node pins it to a lane (round robin);
//!    the pin holds for the lifetime of the pool.
//! 2. **Queueing**: Each lane owns a bounded queue. A full lane drops the job
//!    and reports `DispatchError::LaneFull`.
//! 3. **Execution**: One worker per lane runs jobs one at a time with a soft
//!    timeout that only warns.
//!
//! ## Submodules
//! - **`affinity`**: `AffinityPool`, lanes, routing table and the worker loop.
//! - **`types`**: Job type, dispatch errors and pool counters.

pub mod affinity;
pub mod types;

pub use affinity::AffinityPool;
pub use types::{DispatchError, LaneJob, PoolStats};
