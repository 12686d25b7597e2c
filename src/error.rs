//! Crate-level error types.
//!
//! The core surfaces only categorized errors; infrastructure failures are
//! logged and reported as `Store`. HTTP handlers map each variant onto a
//! status code (validation and illegal transitions become 400, missing rows
//! 404, lost leases and write races 409, store outages 503).

use thiserror::Error;

use crate::store::StoreError;
use crate::task::state::InvalidTransition;
use crate::task::types::TaskId;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("task {0} not found")]
    NotFound(TaskId),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    /// The worker no longer holds a live claim on the task: the lease
    /// expired, the task was cancelled, or another worker took over.
    #[error("worker {worker} holds no live lease on task {task}")]
    LostLease { worker: String, task: TaskId },

    /// A CAS write lost to a concurrent mutation even after internal
    /// retries.
    #[error("conflicting update on task {0}")]
    Conflict(TaskId),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for DispatchError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => DispatchError::NotFound(id),
            StoreError::Conflict(id) => DispatchError::Conflict(id),
            other => DispatchError::Store(other),
        }
    }
}
