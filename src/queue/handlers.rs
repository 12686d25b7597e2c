//! HTTP handlers for the worker surface.
//!
//! Thin axum adapters over `DispatchCore`. A lost lease surfaces as 409 so
//! a worker knows to discard its result and stop; the task has been
//! cancelled, recovered or handed to someone else.

use super::core::DispatchCore;
use super::protocol::*;
use crate::error::DispatchError;

use axum::{http::StatusCode, Extension, Json};
use std::sync::Arc;

pub async fn handle_worker_poll(
    Extension(core): Extension<Arc<DispatchCore>>,
    Json(req): Json<PollRequest>,
) -> (StatusCode, Json<PollResponse>) {
    let task = core.poll(&req.worker_id, req.lease_seconds).await;

    match task {
        Some(task) => {
            tracing::debug!("Worker {} polled task {}", req.worker_id, task.id);
            (StatusCode::OK, Json(PollResponse { task: Some(task) }))
        }
        None => (StatusCode::OK, Json(PollResponse { task: None })),
    }
}

pub async fn handle_worker_heartbeat(
    Extension(core): Extension<Arc<DispatchCore>>,
    Json(req): Json<HeartbeatRequest>,
) -> Result<Json<HeartbeatResponse>, (StatusCode, Json<WorkerErrorResponse>)> {
    match core
        .heartbeat(&req.worker_id, req.task_id, req.extend_seconds)
        .await
    {
        Ok(task) => Ok(Json(HeartbeatResponse {
            task_id: task.id,
            lease_until: task.lease_until.unwrap_or_default(),
        })),
        Err(e) => Err(worker_error(e)),
    }
}

pub async fn handle_worker_complete(
    Extension(core): Extension<Arc<DispatchCore>>,
    Json(req): Json<CompleteRequest>,
) -> Result<Json<OutcomeResponse>, (StatusCode, Json<WorkerErrorResponse>)> {
    match core
        .complete(&req.worker_id, req.task_id, req.duration_ms)
        .await
    {
        Ok(task) => Ok(Json(OutcomeResponse {
            task_id: task.id,
            status: task.status,
        })),
        Err(e) => Err(worker_error(e)),
    }
}

pub async fn handle_worker_fail(
    Extension(core): Extension<Arc<DispatchCore>>,
    Json(req): Json<FailRequest>,
) -> Result<Json<OutcomeResponse>, (StatusCode, Json<WorkerErrorResponse>)> {
    match core
        .fail(&req.worker_id, req.task_id, &req.error_message)
        .await
    {
        Ok(task) => Ok(Json(OutcomeResponse {
            task_id: task.id,
            status: task.status,
        })),
        Err(e) => Err(worker_error(e)),
    }
}

fn worker_error(e: DispatchError) -> (StatusCode, Json<WorkerErrorResponse>) {
    let status = match &e {
        DispatchError::NotFound(_) => StatusCode::NOT_FOUND,
        DispatchError::LostLease { .. } | DispatchError::Conflict(_) => StatusCode::CONFLICT,
        DispatchError::Validation(_) | DispatchError::InvalidTransition(_) => {
            StatusCode::BAD_REQUEST
        }
        DispatchError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
    };

    if status == StatusCode::SERVICE_UNAVAILABLE {
        tracing::error!("Worker request failed: {}", e);
    } else {
        tracing::debug!("Worker request rejected: {}", e);
    }

    (
        status,
        Json(WorkerErrorResponse {
            error: e.to_string(),
        }),
    )
}
