//! In-memory Task Store.
//!
//! Process-local implementation over a concurrent map. Row-level atomicity
//! comes from `DashMap`'s per-entry locking: a `get_mut` holds the shard
//! lock for the duration of the check-and-mutate, so two concurrent claims
//! on the same id cannot both succeed.
//!
//! Used by the test suite and by deployments that accept losing state on
//! restart (`DATABASE_PATH` unset).

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use super::{
    ExecutionMetrics, Mutation, PageRequest, SortOrder, StatusCounts, StoreError, TaskFilter,
    TaskPage, TaskStore,
};
use crate::task::types::{now_ms, NewTask, Task, TaskId, TaskStatus};

pub struct InMemoryTaskStore {
    tasks: DashMap<u64, Task>,
    next_id: AtomicU64,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self {
            tasks: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    fn materialize(&self, new: NewTask) -> Task {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let now = now_ms();
        Task {
            id: TaskId(id),
            task_name: new.task_name,
            task_type: new.task_type,
            priority: new.priority,
            status: new.status,
            payload: new.payload,
            description: new.description,
            scheduled_time: new.scheduled_time,
            next_execution_time: new.next_execution_time,
            timeout_seconds: new.timeout_seconds,
            max_retries: new.max_retries,
            retry_count: 0,
            last_error: None,
            last_executed_at: None,
            execution_duration_ms: None,
            worker_id: None,
            lease_until: None,
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    fn snapshot_where<F>(&self, predicate: F) -> Vec<Task>
    where
        F: Fn(&Task) -> bool,
    {
        self.tasks
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.value().clone())
            .collect()
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Dispatch order: higher priority weight first, then older `created_at`,
/// then lower id as the final tiebreak.
fn dispatch_order(a: &Task, b: &Task) -> std::cmp::Ordering {
    b.priority
        .weight()
        .cmp(&a.priority.weight())
        .then(a.created_at.cmp(&b.created_at))
        .then(a.id.cmp(&b.id))
}

fn listing_order(sort: SortOrder) -> impl Fn(&Task, &Task) -> std::cmp::Ordering {
    move |a, b| match sort {
        SortOrder::CreatedAtDesc => b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)),
        SortOrder::CreatedAtAsc => a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)),
        SortOrder::UpdatedAtDesc => b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)),
        SortOrder::UpdatedAtAsc => a.updated_at.cmp(&b.updated_at).then(a.id.cmp(&b.id)),
        SortOrder::PriorityDesc => dispatch_order(a, b),
        SortOrder::PriorityAsc => dispatch_order(b, a),
    }
}

fn page_of(mut tasks: Vec<Task>, page: PageRequest) -> TaskPage {
    let total = tasks.len() as u64;
    let start = page.offset().min(tasks.len());
    let end = start.saturating_add(page.size).min(tasks.len());
    tasks = tasks[start..end].to_vec();
    TaskPage { tasks, total }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, task: NewTask) -> Result<Task, StoreError> {
        let task = self.materialize(task);
        self.tasks.insert(task.id.0, task.clone());
        Ok(task)
    }

    async fn insert_batch(&self, tasks: Vec<NewTask>) -> Result<Vec<Task>, StoreError> {
        let mut inserted = Vec::with_capacity(tasks.len());
        for new in tasks {
            let task = self.materialize(new);
            self.tasks.insert(task.id.0, task.clone());
            inserted.push(task);
        }
        Ok(inserted)
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        Ok(self.tasks.get(&id.0).map(|entry| entry.value().clone()))
    }

    async fn cas_update(
        &self,
        id: TaskId,
        expected_version: u64,
        mutation: Mutation,
    ) -> Result<Task, StoreError> {
        let Some(mut entry) = self.tasks.get_mut(&id.0) else {
            return Err(StoreError::NotFound(id));
        };

        if entry.version != expected_version {
            return Err(StoreError::Conflict(id));
        }

        let floor = entry.next_execution_time;
        mutation(&mut entry);
        // next_execution_time never moves backwards for a given task.
        entry.next_execution_time = entry.next_execution_time.max(floor);
        entry.version += 1;
        entry.updated_at = now_ms();

        Ok(entry.clone())
    }

    async fn claim(
        &self,
        id: TaskId,
        worker_id: &str,
        lease_ms: Option<u64>,
        now: u64,
    ) -> Result<Task, StoreError> {
        let Some(mut entry) = self.tasks.get_mut(&id.0) else {
            return Err(StoreError::NotFound(id));
        };

        if entry.status != TaskStatus::Queued {
            return Err(StoreError::Conflict(id));
        }

        let lease = lease_ms.unwrap_or(entry.timeout_seconds as u64 * 1_000);
        entry.status = TaskStatus::Running;
        entry.worker_id = Some(worker_id.to_string());
        entry.lease_until = Some(now + lease);
        entry.last_executed_at = Some(now);
        entry.version += 1;
        entry.updated_at = now;

        Ok(entry.clone())
    }

    async fn scan_ready(&self, limit: usize, now: u64) -> Result<Vec<Task>, StoreError> {
        let mut ready = self.snapshot_where(|t| {
            matches!(t.status, TaskStatus::Queued | TaskStatus::Pending)
                && t.next_execution_time <= now
        });
        ready.sort_by(dispatch_order);
        ready.truncate(limit);
        Ok(ready)
    }

    async fn scan_scheduled(&self, now: u64) -> Result<Vec<Task>, StoreError> {
        let mut due = self.snapshot_where(|t| {
            t.status == TaskStatus::Scheduled
                && t.scheduled_time.map(|at| at <= now).unwrap_or(true)
        });
        due.sort_by(dispatch_order);
        Ok(due)
    }

    async fn scan_retrying(&self, now: u64) -> Result<Vec<Task>, StoreError> {
        let mut due = self
            .snapshot_where(|t| t.status == TaskStatus::Retrying && t.next_execution_time <= now);
        due.sort_by(dispatch_order);
        Ok(due)
    }

    async fn scan_stuck(&self, cutoff: u64) -> Result<Vec<Task>, StoreError> {
        Ok(self.snapshot_where(|t| t.lease_expired(cutoff)))
    }

    async fn list(&self, filter: &TaskFilter, page: PageRequest) -> Result<TaskPage, StoreError> {
        let mut matching = self.snapshot_where(|t| {
            filter.status.map(|s| t.status == s).unwrap_or(true)
                && filter.priority.map(|p| t.priority == p).unwrap_or(true)
                && filter
                    .task_type
                    .as_deref()
                    .map(|ty| t.task_type == ty)
                    .unwrap_or(true)
        });
        matching.sort_by(listing_order(page.sort));
        Ok(page_of(matching, page))
    }

    async fn scheduled_before(
        &self,
        before: u64,
        page: PageRequest,
    ) -> Result<TaskPage, StoreError> {
        let mut upcoming = self.snapshot_where(|t| {
            matches!(t.status, TaskStatus::Scheduled | TaskStatus::Pending)
                && t.next_execution_time <= before
        });
        upcoming.sort_by(|a, b| {
            b.priority
                .weight()
                .cmp(&a.priority.weight())
                .then(a.next_execution_time.cmp(&b.next_execution_time))
                .then(a.id.cmp(&b.id))
        });
        Ok(page_of(upcoming, page))
    }

    async fn counts_by_status(&self) -> Result<StatusCounts, StoreError> {
        let mut counts = StatusCounts::default();
        for entry in self.tasks.iter() {
            counts.record(entry.value().status, 1);
        }
        Ok(counts)
    }

    async fn execution_metrics(&self, from: u64) -> Result<Option<ExecutionMetrics>, StoreError> {
        let durations: Vec<u64> = self
            .tasks
            .iter()
            .filter(|entry| {
                let t = entry.value();
                t.status == TaskStatus::Completed
                    && t.last_executed_at.map(|at| at >= from).unwrap_or(false)
            })
            .filter_map(|entry| entry.value().execution_duration_ms)
            .collect();

        if durations.is_empty() {
            return Ok(None);
        }

        let sum: u64 = durations.iter().sum();
        Ok(Some(ExecutionMetrics {
            average_ms: sum as f64 / durations.len() as f64,
            min_ms: durations.iter().copied().min().unwrap_or(0),
            max_ms: durations.iter().copied().max().unwrap_or(0),
            completed: durations.len() as u64,
        }))
    }

    async fn delete_completed_before(&self, cutoff: u64) -> Result<u64, StoreError> {
        let expired: Vec<u64> = self
            .tasks
            .iter()
            .filter(|entry| {
                let t = entry.value();
                t.status == TaskStatus::Completed && t.updated_at < cutoff
            })
            .map(|entry| *entry.key())
            .collect();

        let mut deleted = 0;
        for id in expired {
            if self.tasks.remove(&id).is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}
