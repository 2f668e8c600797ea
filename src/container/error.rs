use thiserror::Error;

use super::types::{ContainerId, LifecycleEvent, LifecycleState};
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("container {0} not found")]
    NotFound(ContainerId),

    #[error("container {0} already exists")]
    AlreadyExists(ContainerId),

    #[error("container {id}: event {event:?} is not valid in state {state:?}")]
    InvalidTransition {
        id: ContainerId,
        state: LifecycleState,
        event: LifecycleEvent,
    },

    #[error("container store error: {0}")]
    Store(#[from] StoreError),
}

impl ContainerError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ContainerError::NotFound(_))
    }
}
