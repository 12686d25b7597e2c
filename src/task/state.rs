//! Task status state machine.
//!
//! Every status change in the system funnels through [`apply`]: a pure
//! function from the current status and a lifecycle event to the next
//! status. Any pair not produced by it is illegal.
//!
//! ```text
//! PENDING ---> QUEUED ---> RUNNING ---> COMPLETED
//!    |            ^          |  \
//!    v            |          |   +--> PAUSED --> QUEUED
//! SCHEDULED ------+          v
//!                        RETRYING --> QUEUED        (backoff elapsed)
//!                            |
//!                            v
//!                         FAILED  --> RETRYING      (explicit retry)
//!
//! CANCELLED is reachable from PENDING, SCHEDULED, QUEUED, RUNNING,
//! RETRYING and PAUSED. COMPLETED, CANCELLED and FAILED-with-no-retries
//! are terminal.
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::TaskStatus;

/// Lifecycle event applied to a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskEvent {
    /// Admission of an immediately runnable task.
    Enqueue,
    /// Admission with a future scheduled time.
    Schedule,
    /// Scheduler promotion once the scheduled time has arrived.
    PromoteScheduled,
    /// Dispatcher claim on behalf of a worker.
    Claim,
    /// Worker reported success.
    Complete,
    /// Worker reported failure, or the recovery loop expired a lease.
    /// `retries_remain` decides between RETRYING and permanent FAILED.
    Fail { retries_remain: bool },
    /// Scheduler promotion of a retrying task whose backoff has elapsed.
    BackoffElapsed,
    /// External cancellation.
    Cancel,
    /// External pause of a running task.
    Pause,
    /// External resume of a paused task.
    Resume,
    /// Explicit retry request on a failed task.
    RequestRetry,
}

impl std::fmt::Display for TaskEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaskEvent::Enqueue => "enqueue",
            TaskEvent::Schedule => "schedule",
            TaskEvent::PromoteScheduled => "promote_scheduled",
            TaskEvent::Claim => "claim",
            TaskEvent::Complete => "complete",
            TaskEvent::Fail { .. } => "fail",
            TaskEvent::BackoffElapsed => "backoff_elapsed",
            TaskEvent::Cancel => "cancel",
            TaskEvent::Pause => "pause",
            TaskEvent::Resume => "resume",
            TaskEvent::RequestRetry => "request_retry",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid transition: {event} is not legal in status {from}")]
pub struct InvalidTransition {
    pub from: TaskStatus,
    pub event: TaskEvent,
}

/// Pure transition function. Returns the next status, or an error when the
/// event is not legal in the current status.
pub fn apply(current: TaskStatus, event: TaskEvent) -> Result<TaskStatus, InvalidTransition> {
    use TaskEvent::*;
    use TaskStatus::*;

    let next = match (current, event) {
        (Pending, Enqueue) => Queued,
        (Pending, Schedule) => Scheduled,
        (Pending, Cancel) => Cancelled,

        (Scheduled, PromoteScheduled) => Queued,
        (Scheduled, Cancel) => Cancelled,

        (Queued, Claim) => Running,
        (Queued, Cancel) => Cancelled,

        (Running, Complete) => Completed,
        (Running, Fail { retries_remain: true }) => Retrying,
        (Running, Fail { retries_remain: false }) => Failed,
        (Running, Cancel) => Cancelled,
        (Running, Pause) => Paused,

        (Retrying, BackoffElapsed) => Queued,
        (Retrying, Cancel) => Cancelled,

        (Paused, Resume) => Queued,
        (Paused, Cancel) => Cancelled,

        (Failed, RequestRetry) => Retrying,

        (from, event) => return Err(InvalidTransition { from, event }),
    };

    Ok(next)
}

/// Edge check for externally requested status changes (the
/// `PUT /tasks/{id}/status` surface). Mirrors the edges of [`apply`].
pub fn is_legal(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;

    match from {
        Pending => matches!(to, Queued | Scheduled | Cancelled),
        Scheduled => matches!(to, Queued | Cancelled),
        Queued => matches!(to, Running | Cancelled),
        Running => matches!(to, Completed | Failed | Retrying | Cancelled | Paused),
        Retrying => matches!(to, Queued | Cancelled),
        Paused => matches!(to, Queued | Cancelled),
        Failed => matches!(to, Retrying),
        Completed | Cancelled => false,
    }
}
