//! Container Lifecycle State Machine
//!
//! Two pure functions:
//! - [`decide`] looks at one incoming replica and says whether it justifies a
//!   lifecycle event for its container.
//! - [`apply_event`] is the table of legal (state, event) pairs. The directory
//!   re-checks every fired event against it, so a decision computed on a state
//!   that changed in the meantime is rejected rather than applied.
//!
//! A CLOSED replica only advances a container when it reports the same sequence
//! id the container is on. Anything else is surfaced as
//! [`Decision::SequenceMismatch`] and never turns into a transition.

use super::types::{LifecycleEvent, LifecycleState, ReplicaState};

/// Outcome of evaluating one replica against its container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Fire(LifecycleEvent),
    /// Nothing to do; the replica is still recorded.
    NoOp,
    /// Container is DELETED; the replica is flagged and not recorded.
    Ignored,
    /// A CLOSED replica from another write generation.
    SequenceMismatch {
        replica_sequence_id: u64,
        container_sequence_id: u64,
    },
}

impl Decision {
    pub fn event(&self) -> Option<LifecycleEvent> {
        match self {
            Decision::Fire(event) => Some(*event),
            _ => None,
        }
    }
}

pub fn decide(
    current: LifecycleState,
    replica_state: ReplicaState,
    replica_sequence_id: u64,
    container_sequence_id: u64,
) -> Decision {
    let closed_with_matching_sequence = |event| {
        if replica_sequence_id == container_sequence_id {
            Decision::Fire(event)
        } else {
            Decision::SequenceMismatch {
                replica_sequence_id,
                container_sequence_id,
            }
        }
    };

    match (current, replica_state) {
        (LifecycleState::Closing, ReplicaState::QuasiClosed) => {
            Decision::Fire(LifecycleEvent::QuasiClose)
        }
        (LifecycleState::Closing, ReplicaState::Closed) => {
            closed_with_matching_sequence(LifecycleEvent::Close)
        }
        (LifecycleState::QuasiClosed, ReplicaState::Closed) => {
            closed_with_matching_sequence(LifecycleEvent::ForceClose)
        }
        (LifecycleState::Deleted, _) => Decision::Ignored,
        // OPEN waits for an external close request; CLOSED and DELETING are not
        // advanced by replica evidence.
        _ => Decision::NoOp,
    }
}

/// Target state for `event` in `state`, or `None` if the pair is not legal.
pub fn apply_event(state: LifecycleState, event: LifecycleEvent) -> Option<LifecycleState> {
    use LifecycleEvent as E;
    use LifecycleState as S;

    match (state, event) {
        (S::Open, E::Finalize) => Some(S::Closing),
        (S::Closing, E::QuasiClose) => Some(S::QuasiClosed),
        (S::Closing, E::Close) => Some(S::Closed),
        (S::QuasiClosed, E::ForceClose) => Some(S::Closed),
        (S::Closed, E::Delete) => Some(S::Deleting),
        (S::Deleting, E::Cleanup) => Some(S::Deleted),
        _ => None,
    }
}
