//! Task Store
//!
//! Durable record of every task and its current state; the source of truth
//! for the whole system. Everything above it (the priority index, counters,
//! worker leases) is recoverable from this layer.
//!
//! ## Concurrency contract
//! Every mutating operation is atomic at the row level. `cas_update` is the
//! only sanctioned general mutation path: it compares the caller's expected
//! `version` and loses to any intervening write. `claim` is the dedicated
//! QUEUED -> RUNNING compare-and-swap the dispatcher serializes on.
//!
//! ## Implementations
//! - **`sqlite`**: production store on a single SQLite file.
//! - **`memory`**: process-local store used by tests and ephemeral setups.

pub mod memory;
pub mod sqlite;

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use thiserror::Error;

use crate::task::types::{NewTask, Priority, Task, TaskId, TaskStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task {0} not found")]
    NotFound(TaskId),

    /// The row changed under the caller (version or status mismatch).
    #[error("conflicting update on task {0}")]
    Conflict(TaskId),

    /// Transient I/O failure; callers retry with backoff.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Row mutation applied under the store's CAS guard.
pub type Mutation = Box<dyn FnOnce(&mut Task) + Send>;

/// Filter for task listings.
#[derive(Debug, Default, Clone)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub task_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    CreatedAtDesc,
    CreatedAtAsc,
    UpdatedAtDesc,
    UpdatedAtAsc,
    PriorityDesc,
    PriorityAsc,
}

impl SortOrder {
    /// Parses the `field,direction` form used by the HTTP surface, e.g.
    /// `createdAt,desc`. Unknown fields fall back to the default.
    pub fn parse(value: &str) -> SortOrder {
        let mut parts = value.splitn(2, ',');
        let field = parts.next().unwrap_or("").trim();
        let desc = parts
            .next()
            .map(|d| d.trim().eq_ignore_ascii_case("desc"))
            .unwrap_or(false);

        match (field, desc) {
            ("createdAt", false) => SortOrder::CreatedAtAsc,
            ("updatedAt", true) => SortOrder::UpdatedAtDesc,
            ("updatedAt", false) => SortOrder::UpdatedAtAsc,
            ("priority", true) => SortOrder::PriorityDesc,
            ("priority", false) => SortOrder::PriorityAsc,
            _ => SortOrder::CreatedAtDesc,
        }
    }
}

impl Default for SortOrder {
    fn default() -> Self {
        SortOrder::CreatedAtDesc
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PageRequest {
    pub page: usize,
    pub size: usize,
    pub sort: SortOrder,
}

impl PageRequest {
    pub fn new(page: usize, size: usize, sort: SortOrder) -> Self {
        Self { page, size, sort }
    }

    pub fn offset(&self) -> usize {
        self.page.saturating_mul(self.size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 0,
            size: 20,
            sort: SortOrder::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskPage {
    pub tasks: Vec<Task>,
    pub total: u64,
}

/// Task counts grouped by status.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: u64,
    pub scheduled: u64,
    pub queued: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub retrying: u64,
    pub paused: u64,
}

impl StatusCounts {
    pub fn record(&mut self, status: TaskStatus, count: u64) {
        match status {
            TaskStatus::Pending => self.pending += count,
            TaskStatus::Scheduled => self.scheduled += count,
            TaskStatus::Queued => self.queued += count,
            TaskStatus::Running => self.running += count,
            TaskStatus::Completed => self.completed += count,
            TaskStatus::Failed => self.failed += count,
            TaskStatus::Cancelled => self.cancelled += count,
            TaskStatus::Retrying => self.retrying += count,
            TaskStatus::Paused => self.paused += count,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending
            + self.scheduled
            + self.queued
            + self.running
            + self.completed
            + self.failed
            + self.cancelled
            + self.retrying
            + self.paused
    }
}

/// Aggregate execution timings over completed tasks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecutionMetrics {
    pub average_ms: f64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub completed: u64,
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Assigns an id, persists the row and returns it with `version = 1`.
    async fn insert(&self, task: NewTask) -> Result<Task, StoreError>;

    /// Persists all rows in one atomic batch; either every task is durable
    /// or none is.
    async fn insert_batch(&self, tasks: Vec<NewTask>) -> Result<Vec<Task>, StoreError>;

    async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError>;

    /// Optimistic update: applies `mutation` only if the row still carries
    /// `expected_version`, bumping `version` and `updated_at`. The store
    /// additionally guards `next_execution_time` against moving backwards.
    async fn cas_update(
        &self,
        id: TaskId,
        expected_version: u64,
        mutation: Mutation,
    ) -> Result<Task, StoreError>;

    /// Atomic QUEUED -> RUNNING transition: records the worker, sets
    /// `last_executed_at = now` and `lease_until = now + lease_ms`
    /// (defaulting to the row's own `timeout_seconds` when `lease_ms` is
    /// absent). Fails with `Conflict` when the row is not QUEUED.
    async fn claim(
        &self,
        id: TaskId,
        worker_id: &str,
        lease_ms: Option<u64>,
        now: u64,
    ) -> Result<Task, StoreError>;

    /// Up to `limit` tasks with status PENDING or QUEUED and
    /// `next_execution_time <= now`, ordered by priority weight descending,
    /// then `created_at` ascending.
    async fn scan_ready(&self, limit: usize, now: u64) -> Result<Vec<Task>, StoreError>;

    /// SCHEDULED tasks whose `scheduled_time` has arrived.
    async fn scan_scheduled(&self, now: u64) -> Result<Vec<Task>, StoreError>;

    /// RETRYING tasks whose backoff has elapsed.
    async fn scan_retrying(&self, now: u64) -> Result<Vec<Task>, StoreError>;

    /// RUNNING tasks whose lease expired at or before `cutoff`.
    async fn scan_stuck(&self, cutoff: u64) -> Result<Vec<Task>, StoreError>;

    async fn list(&self, filter: &TaskFilter, page: PageRequest) -> Result<TaskPage, StoreError>;

    /// SCHEDULED/PENDING tasks becoming eligible before `before`, soonest
    /// first.
    async fn scheduled_before(&self, before: u64, page: PageRequest)
        -> Result<TaskPage, StoreError>;

    async fn counts_by_status(&self) -> Result<StatusCounts, StoreError>;

    /// Timing aggregates over tasks completed since `from`; `None` when no
    /// completed task falls in the range.
    async fn execution_metrics(&self, from: u64) -> Result<Option<ExecutionMetrics>, StoreError>;

    /// Deletes COMPLETED rows last updated before `cutoff`; returns the
    /// number removed.
    async fn delete_completed_before(&self, cutoff: u64) -> Result<u64, StoreError>;
}
