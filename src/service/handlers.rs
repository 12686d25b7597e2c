//! HTTP Request Handlers
//!
//! Axum route handlers for the client-facing `/api/v1/tasks` surface:
//! submission (single and batch), retrieval with filtering and pagination,
//! lifecycle actions, statistics, performance metrics, cleanup and health.

use super::protocol::*;
use super::tasks::TaskService;
use crate::error::DispatchError;
use crate::store::{PageRequest, SortOrder, TaskFilter};
use crate::task::types::{now_ms, TaskId};

use axum::extract::{Path, Query};
use axum::{http::StatusCode, Extension, Json};
use std::sync::Arc;
use sysinfo::System;

const MAX_PAGE_SIZE: usize = 100;
const SERVICE_NAME: &str = "dispatchq";

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_response(e: DispatchError) -> ApiError {
    let status = match &e {
        DispatchError::Validation(_) | DispatchError::InvalidTransition(_) => {
            StatusCode::BAD_REQUEST
        }
        DispatchError::NotFound(_) => StatusCode::NOT_FOUND,
        DispatchError::LostLease { .. } | DispatchError::Conflict(_) => StatusCode::CONFLICT,
        DispatchError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
    };

    if status == StatusCode::SERVICE_UNAVAILABLE {
        tracing::error!("Request failed: {}", e);
    } else {
        tracing::debug!("Request rejected: {}", e);
    }

    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
}

/// Submits a single task for execution.
pub async fn handle_create_task(
    Extension(service): Extension<Arc<TaskService>>,
    Json(request): Json<TaskRequest>,
) -> Result<(StatusCode, Json<TaskResponse>), ApiError> {
    tracing::info!(
        "Creating task: {} with priority: {:?}",
        request.task_name,
        request.priority
    );

    let task = service.create_task(request).await.map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(TaskResponse::from(&task))))
}

/// Submits multiple tasks in one durable batch.
pub async fn handle_create_batch(
    Extension(service): Extension<Arc<TaskService>>,
    Json(requests): Json<Vec<TaskRequest>>,
) -> Result<(StatusCode, Json<Vec<TaskResponse>>), ApiError> {
    tracing::info!("Creating {} tasks in batch", requests.len());

    let tasks = service
        .create_batch(requests)
        .await
        .map_err(error_response)?;
    let responses = tasks.iter().map(TaskResponse::from).collect();
    Ok((StatusCode::CREATED, Json(responses)))
}

pub async fn handle_get_task(
    Extension(service): Extension<Arc<TaskService>>,
    Path(task_id): Path<u64>,
) -> Result<Json<TaskResponse>, ApiError> {
    match service.get_task(TaskId(task_id)).await {
        Ok(Some(task)) => Ok(Json(TaskResponse::from(&task))),
        Ok(None) => Err(error_response(DispatchError::NotFound(TaskId(task_id)))),
        Err(e) => Err(error_response(e)),
    }
}

/// Lists tasks with filtering, sorting and pagination.
pub async fn handle_list_tasks(
    Extension(service): Extension<Arc<TaskService>>,
    Query(query): Query<ListTasksQuery>,
) -> Result<Json<PageResponse<TaskResponse>>, ApiError> {
    let filter = TaskFilter {
        status: query.status,
        priority: query.priority,
        task_type: query.task_type.clone(),
    };
    let size = query.size.clamp(1, MAX_PAGE_SIZE);
    let page = PageRequest::new(query.page, size, SortOrder::parse(&query.sort));

    let result = service
        .list_tasks(&filter, page)
        .await
        .map_err(error_response)?;

    Ok(Json(PageResponse::new(
        result.tasks.iter().map(TaskResponse::from).collect(),
        query.page,
        size,
        result.total,
    )))
}

/// Updates a task's status after validating the transition.
pub async fn handle_update_status(
    Extension(service): Extension<Arc<TaskService>>,
    Path(task_id): Path<u64>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<TaskResponse>, ApiError> {
    tracing::info!("Updating task {} status to {}", task_id, query.status);

    let task = service
        .update_status(TaskId(task_id), query.status)
        .await
        .map_err(error_response)?;
    Ok(Json(TaskResponse::from(&task)))
}

pub async fn handle_cancel_task(
    Extension(service): Extension<Arc<TaskService>>,
    Path(task_id): Path<u64>,
) -> Result<Json<ActionResponse>, (StatusCode, Json<ActionResponse>)> {
    tracing::info!("Cancelling task: {}", task_id);

    match service.cancel(TaskId(task_id)).await {
        Ok(_) => Ok(Json(ActionResponse {
            message: Some("Task cancelled successfully".to_string()),
            error: None,
            task_id: task_id.to_string(),
        })),
        Err(e) => {
            tracing::warn!("Failed to cancel task {}: {}", task_id, e);
            let (status, _) = error_response(e);
            Err((
                status,
                Json(ActionResponse {
                    message: None,
                    error: Some("Failed to cancel task".to_string()),
                    task_id: task_id.to_string(),
                }),
            ))
        }
    }
}

pub async fn handle_retry_task(
    Extension(service): Extension<Arc<TaskService>>,
    Path(task_id): Path<u64>,
) -> Result<Json<ActionResponse>, (StatusCode, Json<ActionResponse>)> {
    tracing::info!("Retrying task: {}", task_id);

    match service.retry(TaskId(task_id)).await {
        Ok(_) => Ok(Json(ActionResponse {
            message: Some("Task queued for retry".to_string()),
            error: None,
            task_id: task_id.to_string(),
        })),
        Err(e) => {
            tracing::warn!("Failed to retry task {}: {}", task_id, e);
            let (status, _) = error_response(e);
            Err((
                status,
                Json(ActionResponse {
                    message: None,
                    error: Some("Failed to retry task".to_string()),
                    task_id: task_id.to_string(),
                }),
            ))
        }
    }
}

/// Task counts by status plus runtime queue figures.
pub async fn handle_statistics(
    Extension(service): Extension<Arc<TaskService>>,
) -> Result<Json<StatisticsResponse>, ApiError> {
    let (counts, queue) = service.statistics().await.map_err(error_response)?;

    Ok(Json(StatisticsResponse {
        total_tasks: counts.total(),
        pending_tasks: counts.pending,
        scheduled_tasks: counts.scheduled,
        queued_tasks: counts.queued,
        running_tasks: counts.running,
        completed_tasks: counts.completed,
        failed_tasks: counts.failed,
        cancelled_tasks: counts.cancelled,
        retrying_tasks: counts.retrying,
        paused_tasks: counts.paused,
        in_memory_queue_size: queue.in_memory_queue_size,
        total_queued_tasks: queue.total_queued_tasks,
        total_processed_tasks: queue.total_processed_tasks,
        is_running: queue.is_running,
        priority_breakdown: queue.priority_breakdown,
    }))
}

/// Execution-duration aggregates; `fromTime` defaults to the last 24h.
pub async fn handle_metrics(
    Extension(service): Extension<Arc<TaskService>>,
    Query(query): Query<MetricsQuery>,
) -> Result<Json<MetricsResponse>, ApiError> {
    let from = query
        .from_time
        .map(time::naive_to_ms)
        .unwrap_or_else(|| now_ms().saturating_sub(24 * 3_600_000));

    let metrics = service
        .performance_metrics(from)
        .await
        .map_err(error_response)?;

    let response = match metrics {
        Some(m) => MetricsResponse {
            average_execution_time_ms: Some(m.average_ms),
            min_execution_time_ms: Some(m.min_ms),
            max_execution_time_ms: Some(m.max_ms),
            completed_count: m.completed,
            message: None,
        },
        None => MetricsResponse {
            average_execution_time_ms: None,
            min_execution_time_ms: None,
            max_execution_time_ms: None,
            completed_count: 0,
            message: Some("No completed tasks found in the time range.".to_string()),
        },
    };
    Ok(Json(response))
}

/// Tasks waiting on a future execution time, soonest-eligible first;
/// `beforeTime` defaults to now + 24h.
pub async fn handle_scheduled_tasks(
    Extension(service): Extension<Arc<TaskService>>,
    Query(query): Query<ScheduledQuery>,
) -> Result<Json<PageResponse<TaskResponse>>, ApiError> {
    let before = query
        .before_time
        .map(time::naive_to_ms)
        .unwrap_or_else(|| now_ms() + 24 * 3_600_000);
    let size = query.size.clamp(1, MAX_PAGE_SIZE);
    let page = PageRequest::new(query.page, size, SortOrder::PriorityDesc);

    let result = service
        .scheduled_tasks(before, page)
        .await
        .map_err(error_response)?;

    Ok(Json(PageResponse::new(
        result.tasks.iter().map(TaskResponse::from).collect(),
        query.page,
        size,
        result.total,
    )))
}

/// Administrative purge of completed tasks older than a threshold.
pub async fn handle_cleanup(
    Extension(service): Extension<Arc<TaskService>>,
    Query(query): Query<CleanupQuery>,
) -> Result<Json<CleanupResponse>, ApiError> {
    tracing::info!("Cleaning up tasks older than: {}", query.older_than);

    let deleted = service
        .cleanup_completed(time::naive_to_ms(query.older_than))
        .await
        .map_err(error_response)?;

    Ok(Json(CleanupResponse {
        message: "Cleanup completed".to_string(),
        deleted_count: deleted,
        older_than: query.older_than,
    }))
}

/// Liveness probe with host figures.
pub async fn handle_health() -> Json<HealthResponse> {
    let mut sys = System::new_all();
    sys.refresh_cpu();
    sys.refresh_memory();
    // sysinfo reports memory in bytes.
    let mem_total_mb = sys.total_memory() / (1024 * 1024);
    let mem_used_mb = sys.used_memory() / (1024 * 1024);

    Json(HealthResponse {
        status: "UP".to_string(),
        timestamp: time::ms_to_naive(now_ms()),
        service: SERVICE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        cpu_usage: sys.global_cpu_info().cpu_usage(),
        mem_used_mb,
        mem_total_mb,
    })
}
