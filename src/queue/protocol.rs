//! Worker-facing HTTP contracts.
//!
//! Workers are separate processes; this is the wire surface they poll,
//! heartbeat and report outcomes through. Timestamps on this surface are
//! epoch milliseconds; the client-facing surface in `service::protocol`
//! uses ISO-8601.

use serde::{Deserialize, Serialize};

use crate::task::types::{Task, TaskId, TaskStatus};

// Endpoints (under /api/v1/workers)
pub const ENDPOINT_WORKER_POLL: &str = "/poll";
pub const ENDPOINT_WORKER_HEARTBEAT: &str = "/heartbeat";
pub const ENDPOINT_WORKER_COMPLETE: &str = "/complete";
pub const ENDPOINT_WORKER_FAIL: &str = "/fail";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollRequest {
    pub worker_id: String,
    /// Lease duration; the task's own timeout when absent.
    pub lease_seconds: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollResponse {
    /// The claimed task, now RUNNING and leased to the caller; `null` when
    /// nothing is eligible.
    pub task: Option<Task>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    pub worker_id: String,
    pub task_id: TaskId,
    pub extend_seconds: u64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    pub task_id: TaskId,
    pub lease_until: u64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRequest {
    pub worker_id: String,
    pub task_id: TaskId,
    pub duration_ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailRequest {
    pub worker_id: String,
    pub task_id: TaskId,
    pub error_message: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeResponse {
    pub task_id: TaskId,
    pub status: TaskStatus,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerErrorResponse {
    pub error: String,
}
