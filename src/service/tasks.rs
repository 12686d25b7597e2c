//! Admission and lifecycle service.
//!
//! Validates submissions, persists them (durability precedes indexing),
//! promotes immediately runnable tasks into the dispatch queue, and applies
//! externally requested lifecycle changes through the state machine.

use std::sync::Arc;

use super::protocol::{time, TaskRequest};
use crate::config::SchedulerConfig;
use crate::error::DispatchError;
use crate::queue::core::{DispatchCore, QueueStats};
use crate::store::{
    ExecutionMetrics, PageRequest, StatusCounts, StoreError, TaskFilter, TaskPage, TaskStore,
};
use crate::task::state::{self, TaskEvent};
use crate::task::types::{now_ms, NewTask, Task, TaskId, TaskStatus};

const MAX_NAME_LEN: usize = 255;
const MAX_TYPE_LEN: usize = 100;
const MAX_DESCRIPTION_LEN: usize = 500;
const TIMEOUT_RANGE_SECONDS: std::ops::RangeInclusive<u32> = 1..=3_600;
const MAX_RETRY_LIMIT: u32 = 10;

const DEFAULT_TIMEOUT_SECONDS: u32 = 300;
const DEFAULT_MAX_RETRIES: u32 = 3;

const ADMISSION_RETRY_LIMIT: usize = 3;

pub struct TaskService {
    store: Arc<dyn TaskStore>,
    core: Arc<DispatchCore>,
    allow_exhausted_retry: bool,
}

impl TaskService {
    pub fn new(
        store: Arc<dyn TaskStore>,
        core: Arc<DispatchCore>,
        config: &SchedulerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            core,
            allow_exhausted_retry: config.retry_allow_exhausted,
        })
    }

    // ------------------------------------------------------------------
    // Admission
    // ------------------------------------------------------------------

    /// Validates and persists a task, then promotes it into the dispatch
    /// queue (immediately runnable) or leaves it SCHEDULED for the
    /// scheduler loop.
    pub async fn create_task(&self, request: TaskRequest) -> Result<Task, DispatchError> {
        let new = self.build_task(&request)?;
        let task = self.store.insert(new).await?;
        tracing::info!(
            "Task {} admitted ({}, priority {}, status {})",
            task.id,
            task.task_name,
            task.priority,
            task.status
        );
        self.activate(task).await
    }

    /// Batch admission with no partial success: every request is validated
    /// before anything is written, and the batch persists atomically.
    pub async fn create_batch(
        &self,
        requests: Vec<TaskRequest>,
    ) -> Result<Vec<Task>, DispatchError> {
        if requests.is_empty() {
            return Err(DispatchError::Validation("batch is empty".to_string()));
        }

        let mut rows = Vec::with_capacity(requests.len());
        for request in &requests {
            rows.push(self.build_task(request)?);
        }

        let inserted = self.store.insert_batch(rows).await?;
        tracing::info!("Batch admitted {} tasks", inserted.len());

        let mut activated = Vec::with_capacity(inserted.len());
        for task in inserted {
            activated.push(self.activate(task).await?);
        }
        Ok(activated)
    }

    fn build_task(&self, request: &TaskRequest) -> Result<NewTask, DispatchError> {
        let name = request.task_name.trim();
        if name.is_empty() {
            return Err(DispatchError::Validation("task name is required".to_string()));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(DispatchError::Validation(format!(
                "task name must not exceed {MAX_NAME_LEN} characters"
            )));
        }

        let task_type = request.task_type.trim();
        if task_type.is_empty() {
            return Err(DispatchError::Validation("task type is required".to_string()));
        }
        if task_type.len() > MAX_TYPE_LEN {
            return Err(DispatchError::Validation(format!(
                "task type must not exceed {MAX_TYPE_LEN} characters"
            )));
        }

        if let Some(description) = &request.description {
            if description.len() > MAX_DESCRIPTION_LEN {
                return Err(DispatchError::Validation(format!(
                    "description must not exceed {MAX_DESCRIPTION_LEN} characters"
                )));
            }
        }

        let timeout = request
            .execution_timeout_seconds
            .unwrap_or(DEFAULT_TIMEOUT_SECONDS);
        if !TIMEOUT_RANGE_SECONDS.contains(&timeout) {
            return Err(DispatchError::Validation(format!(
                "execution timeout must be between {} and {} seconds",
                TIMEOUT_RANGE_SECONDS.start(),
                TIMEOUT_RANGE_SECONDS.end()
            )));
        }

        let max_retries = request.max_retry_attempts.unwrap_or(DEFAULT_MAX_RETRIES);
        if max_retries > MAX_RETRY_LIMIT {
            return Err(DispatchError::Validation(format!(
                "max retry attempts must not exceed {MAX_RETRY_LIMIT}"
            )));
        }

        let now = now_ms();
        let scheduled_time = request.scheduled_time.map(time::naive_to_ms);
        let in_future = scheduled_time.map(|at| at > now).unwrap_or(false);

        Ok(NewTask {
            task_name: name.to_string(),
            task_type: task_type.to_string(),
            priority: request.priority.unwrap_or_default(),
            status: if in_future {
                TaskStatus::Scheduled
            } else {
                TaskStatus::Pending
            },
            payload: request.payload.clone(),
            description: request.description.clone(),
            scheduled_time,
            next_execution_time: if in_future {
                scheduled_time.unwrap_or(now)
            } else {
                now
            },
            timeout_seconds: timeout,
            max_retries,
        })
    }

    /// Moves a freshly persisted PENDING task to QUEUED and mirrors it into
    /// the priority index. SCHEDULED tasks are left to the scheduler loop.
    async fn activate(&self, task: Task) -> Result<Task, DispatchError> {
        if task.status != TaskStatus::Pending {
            return Ok(task);
        }

        let mut current = task;
        for _ in 0..ADMISSION_RETRY_LIMIT {
            let next = state::apply(current.status, TaskEvent::Enqueue)?;
            let result = self
                .store
                .cas_update(
                    current.id,
                    current.version,
                    Box::new(move |t| {
                        t.status = next;
                        t.next_execution_time = t.next_execution_time.max(now_ms());
                    }),
                )
                .await;

            match result {
                Ok(updated) => {
                    self.core.enqueue(&updated);
                    return Ok(updated);
                }
                Err(StoreError::Conflict(_)) => {
                    let Some(reloaded) = self.store.get(current.id).await? else {
                        return Err(DispatchError::NotFound(current.id));
                    };
                    if reloaded.status != TaskStatus::Pending {
                        // Someone else (a scheduler sweep, a cancel) already
                        // moved it on.
                        return Ok(reloaded);
                    }
                    current = reloaded;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(DispatchError::Conflict(current.id))
    }

    // ------------------------------------------------------------------
    // Lifecycle actions
    // ------------------------------------------------------------------

    pub async fn cancel(&self, id: TaskId) -> Result<Task, DispatchError> {
        let task = self.lifecycle_update(id, TaskEvent::Cancel).await?;
        self.core.remove_from_index(id);
        tracing::info!("Task {} cancelled", id);
        Ok(task)
    }

    /// Explicit retry of a FAILED task. Reviving a task whose retries are
    /// exhausted is config-gated and rejected by default.
    pub async fn retry(&self, id: TaskId) -> Result<Task, DispatchError> {
        let Some(task) = self.store.get(id).await? else {
            return Err(DispatchError::NotFound(id));
        };

        if !task.can_retry() && !self.allow_exhausted_retry {
            return Err(DispatchError::Validation(format!(
                "task {} has exhausted its {} retries",
                id, task.max_retries
            )));
        }

        let updated = self.lifecycle_update(id, TaskEvent::RequestRetry).await?;
        tracing::info!("Task {} queued for retry (attempt {})", id, updated.retry_count + 1);
        Ok(updated)
    }

    /// Externally requested status change (the admin `PUT /status`
    /// surface). RUNNING cannot be forced from outside: claims belong to
    /// the dispatcher.
    pub async fn update_status(
        &self,
        id: TaskId,
        target: TaskStatus,
    ) -> Result<Task, DispatchError> {
        if target == TaskStatus::Running {
            return Err(DispatchError::Validation(
                "tasks enter RUNNING only through a worker claim".to_string(),
            ));
        }

        let Some(task) = self.store.get(id).await? else {
            return Err(DispatchError::NotFound(id));
        };

        let event = Self::event_for_target(task.status, target);
        let updated = self.lifecycle_update(id, event).await?;

        if updated.status == TaskStatus::Cancelled {
            self.core.remove_from_index(id);
        }
        tracing::info!("Task {} status updated to {}", id, updated.status);
        Ok(updated)
    }

    /// Maps a requested target status onto the lifecycle event that would
    /// produce it, so the state machine stays the single authority on
    /// legality.
    fn event_for_target(current: TaskStatus, target: TaskStatus) -> TaskEvent {
        match target {
            TaskStatus::Cancelled => TaskEvent::Cancel,
            TaskStatus::Scheduled => TaskEvent::Schedule,
            TaskStatus::Paused => TaskEvent::Pause,
            TaskStatus::Completed => TaskEvent::Complete,
            TaskStatus::Failed => TaskEvent::Fail { retries_remain: false },
            TaskStatus::Retrying => match current {
                TaskStatus::Failed => TaskEvent::RequestRetry,
                _ => TaskEvent::Fail { retries_remain: true },
            },
            TaskStatus::Queued => match current {
                TaskStatus::Scheduled => TaskEvent::PromoteScheduled,
                TaskStatus::Retrying => TaskEvent::BackoffElapsed,
                TaskStatus::Paused => TaskEvent::Resume,
                _ => TaskEvent::Enqueue,
            },
            TaskStatus::Running | TaskStatus::Pending => TaskEvent::Claim,
        }
    }

    /// Applies a lifecycle event under the CAS guard with a bounded
    /// internal retry, handling the event-specific bookkeeping.
    async fn lifecycle_update(
        &self,
        id: TaskId,
        event: TaskEvent,
    ) -> Result<Task, DispatchError> {
        for _ in 0..ADMISSION_RETRY_LIMIT {
            let Some(task) = self.store.get(id).await? else {
                return Err(DispatchError::NotFound(id));
            };

            let next = state::apply(task.status, event)?;
            let result = self
                .store
                .cas_update(
                    id,
                    task.version,
                    Box::new(move |t| {
                        t.status = next;
                        match next {
                            TaskStatus::Queued | TaskStatus::Retrying => {
                                t.next_execution_time = t.next_execution_time.max(now_ms());
                                t.worker_id = None;
                                t.lease_until = None;
                            }
                            TaskStatus::Cancelled | TaskStatus::Paused => {
                                t.worker_id = None;
                                t.lease_until = None;
                            }
                            _ => {}
                        }
                    }),
                )
                .await;

            match result {
                Ok(updated) => {
                    if updated.is_ready(now_ms()) {
                        self.core.enqueue(&updated);
                    }
                    return Ok(updated);
                }
                Err(StoreError::Conflict(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(DispatchError::Conflict(id))
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub async fn get_task(&self, id: TaskId) -> Result<Option<Task>, DispatchError> {
        Ok(self.store.get(id).await?)
    }

    pub async fn list_tasks(
        &self,
        filter: &TaskFilter,
        page: PageRequest,
    ) -> Result<TaskPage, DispatchError> {
        Ok(self.store.list(filter, page).await?)
    }

    pub async fn scheduled_tasks(
        &self,
        before: u64,
        page: PageRequest,
    ) -> Result<TaskPage, DispatchError> {
        Ok(self.store.scheduled_before(before, page).await?)
    }

    pub async fn statistics(&self) -> Result<(StatusCounts, QueueStats), DispatchError> {
        let counts = self.store.counts_by_status().await?;
        Ok((counts, self.core.queue_stats()))
    }

    pub async fn performance_metrics(
        &self,
        from: u64,
    ) -> Result<Option<ExecutionMetrics>, DispatchError> {
        Ok(self.store.execution_metrics(from).await?)
    }

    pub async fn cleanup_completed(&self, older_than: u64) -> Result<u64, DispatchError> {
        let deleted = self.store.delete_completed_before(older_than).await?;
        tracing::info!("Cleanup deleted {} completed tasks", deleted);
        Ok(deleted)
    }
}
