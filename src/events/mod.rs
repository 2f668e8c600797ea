//! Report Envelope & Event Bus
//!
//! ## Submodules
//! - **`types`**: `ReportEvent`, the closed set of reports, and `EventKind`.
//! - **`bus`**: `EventBus`, subscriptions bound to executors, silent kinds.
//! - **`dispatch`**: `ReportDispatcher`, the exhaustive match from event to registry call.

pub mod bus;
pub mod dispatch;
pub mod types;

pub use bus::EventBus;
pub use dispatch::ReportDispatcher;
pub use types::{EventKind, ReportEvent};

#[cfg(test)]
mod tests;
