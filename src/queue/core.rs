//! DispatchCore - engine facade.
//!
//! One value constructed at startup owns the priority index, the claim
//! dispatcher, the retry policy and the runtime counters, and exposes the
//! tick bodies the background loops drive. Shutdown only stops the loops:
//! every queued task is already durable, so there is no state to flush and
//! the index is rebuilt from the store on the next start.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

use super::dispatcher::Dispatcher;
use super::index::PriorityIndex;
use crate::config::SchedulerConfig;
use crate::error::DispatchError;
use crate::store::{Mutation, StoreError, TaskStore};
use crate::task::backoff::BackoffPolicy;
use crate::task::state::{self, TaskEvent};
use crate::task::types::{now_ms, Priority, Task, TaskId, TaskStatus};

/// Bounded internal retry for CAS races.
const CAS_RETRY_LIMIT: usize = 3;

/// Runtime queue figures for the statistics surface.
#[derive(Debug, Clone)]
pub struct QueueStats {
    pub in_memory_queue_size: usize,
    pub total_queued_tasks: u64,
    pub total_processed_tasks: u64,
    pub is_running: bool,
    pub priority_breakdown: HashMap<String, u64>,
}

pub struct DispatchCore {
    store: Arc<dyn TaskStore>,
    index: Arc<PriorityIndex>,
    dispatcher: Dispatcher,
    backoff: BackoffPolicy,
    batch_size: usize,
    cleanup_retention_ms: u64,

    running: AtomicBool,
    queued_count: AtomicU64,
    processed_count: AtomicU64,
    completed_count: AtomicU64,
    failed_count: AtomicU64,
    recovered_count: AtomicU64,
    priority_counters: DashMap<Priority, AtomicU64>,

    loop_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl DispatchCore {
    /// Builds the core and rebuilds the priority index from the store's
    /// ready set, so a restart resumes dispatching where the previous
    /// process stopped.
    pub async fn new(
        store: Arc<dyn TaskStore>,
        config: &SchedulerConfig,
    ) -> Result<Arc<Self>, StoreError> {
        let index = Arc::new(PriorityIndex::new(config.queue_max_size));
        let dispatcher = Dispatcher::new(store.clone(), index.clone(), config.queue_batch_size);

        let core = Arc::new(Self {
            store,
            index,
            dispatcher,
            backoff: BackoffPolicy::new(config.backoff_base_ms, config.backoff_cap_ms),
            batch_size: config.queue_batch_size,
            cleanup_retention_ms: config.cleanup_retention_ms,
            running: AtomicBool::new(true),
            queued_count: AtomicU64::new(0),
            processed_count: AtomicU64::new(0),
            completed_count: AtomicU64::new(0),
            failed_count: AtomicU64::new(0),
            recovered_count: AtomicU64::new(0),
            priority_counters: DashMap::new(),
            loop_handles: Mutex::new(Vec::new()),
        });

        for priority in Priority::ALL {
            core.priority_counters.insert(priority, AtomicU64::new(0));
        }

        let loaded = core.rebuild_index().await?;
        tracing::info!(
            "Dispatch core initialized, {} ready tasks loaded into the index",
            loaded
        );

        Ok(core)
    }

    async fn rebuild_index(&self) -> Result<usize, StoreError> {
        let ready = self
            .store
            .scan_ready(self.index.capacity(), now_ms())
            .await?;
        let mut loaded = 0;
        for task in &ready {
            if task.status == TaskStatus::Queued && self.enqueue(task) {
                loaded += 1;
            }
        }
        Ok(loaded)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn register_loop(&self, handle: JoinHandle<()>) {
        self.loop_handles.lock().push(handle);
    }

    /// Stops the background loops. Deliberately a no-op on task state:
    /// QUEUED rows are durable already and the index is rebuilt on startup.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Shutting down dispatch core");
        for handle in self.loop_handles.lock().drain(..) {
            handle.abort();
        }
        tracing::info!("Dispatch core shutdown completed");
    }

    /// Mirrors a QUEUED task into the priority index. Returns `false` on
    /// overflow or duplicate; overflowed tasks re-enter via the scheduler
    /// sweep.
    pub fn enqueue(&self, task: &Task) -> bool {
        if self.index.insert(task) {
            self.queued_count.fetch_add(1, Ordering::Relaxed);
            if let Some(counter) = self.priority_counters.get(&task.priority) {
                counter.fetch_add(1, Ordering::Relaxed);
            }
            tracing::debug!(
                "Task {} queued with priority {} (index size: {})",
                task.id,
                task.priority,
                self.index.len()
            );
            true
        } else {
            tracing::warn!(
                "Task {} not mirrored to index (full or duplicate); scheduler sweep will pick it up",
                task.id
            );
            false
        }
    }

    pub fn remove_from_index(&self, id: TaskId) {
        if self.index.remove(id) {
            self.dec_queued();
        }
    }

    fn dec_queued(&self) {
        let _ = self
            .queued_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(1))
            });
    }

    pub fn queue_stats(&self) -> QueueStats {
        let mut breakdown = HashMap::new();
        for entry in self.priority_counters.iter() {
            breakdown.insert(
                entry.key().as_str().to_string(),
                entry.value().load(Ordering::Relaxed),
            );
        }
        QueueStats {
            in_memory_queue_size: self.index.len(),
            total_queued_tasks: self.queued_count.load(Ordering::Relaxed),
            total_processed_tasks: self.processed_count.load(Ordering::Relaxed),
            is_running: self.is_running(),
            priority_breakdown: breakdown,
        }
    }

    // ------------------------------------------------------------------
    // Worker surface
    // ------------------------------------------------------------------

    /// Claims the next ready task for `worker_id`, or returns `None` when
    /// nothing is eligible.
    pub async fn poll(&self, worker_id: &str, lease_seconds: Option<u64>) -> Option<Task> {
        let lease_ms = lease_seconds.map(|s| s.saturating_mul(1_000));
        let task = self.dispatcher.next(worker_id, lease_ms).await?;

        self.processed_count.fetch_add(1, Ordering::Relaxed);
        self.dec_queued();
        Some(task)
    }

    /// Extends the lease of a RUNNING task still owned by `worker_id`.
    pub async fn heartbeat(
        &self,
        worker_id: &str,
        task_id: TaskId,
        extend_seconds: u64,
    ) -> Result<Task, DispatchError> {
        let worker = worker_id.to_string();
        self.cas_with_retry(task_id, move |task| {
            let now = now_ms();
            let lease_live = task.lease_until.map(|until| until > now).unwrap_or(false);
            if task.status != TaskStatus::Running
                || task.worker_id.as_deref() != Some(worker.as_str())
                || !lease_live
            {
                return Err(DispatchError::LostLease {
                    worker: worker.clone(),
                    task: task.id,
                });
            }

            let new_lease = now + extend_seconds.saturating_mul(1_000);
            Ok(Box::new(move |t: &mut Task| {
                t.lease_until = Some(new_lease);
            }))
        })
        .await
    }

    /// Worker success report: RUNNING -> COMPLETED.
    pub async fn complete(
        &self,
        worker_id: &str,
        task_id: TaskId,
        duration_ms: u64,
    ) -> Result<Task, DispatchError> {
        let worker = worker_id.to_string();
        let task = self
            .cas_with_retry(task_id, move |task| {
                Self::check_ownership(task, &worker)?;
                let next = state::apply(task.status, TaskEvent::Complete)?;

                Ok(Box::new(move |t: &mut Task| {
                    t.status = next;
                    t.execution_duration_ms = Some(duration_ms);
                    t.worker_id = None;
                    t.lease_until = None;
                }))
            })
            .await?;

        self.completed_count.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            "Task {} completed by {} in {} ms",
            task.id,
            worker_id,
            duration_ms
        );
        Ok(task)
    }

    /// Worker failure report: RUNNING -> RETRYING with backoff while
    /// retries remain, RUNNING -> FAILED once they are exhausted.
    pub async fn fail(
        &self,
        worker_id: &str,
        task_id: TaskId,
        error_msg: &str,
    ) -> Result<Task, DispatchError> {
        let worker = worker_id.to_string();
        let backoff = self.backoff.clone();
        let message = error_msg.to_string();

        let task = self
            .cas_with_retry(task_id, move |task| {
                Self::check_ownership(task, &worker)?;
                Ok(Self::failure_mutation(task, &backoff, message.clone()))
            })
            .await?;

        match task.status {
            TaskStatus::Retrying => {
                tracing::info!(
                    "Task {} failed (attempt {}/{}), retrying after backoff: {}",
                    task.id,
                    task.retry_count,
                    task.max_retries,
                    error_msg
                );
            }
            _ => {
                self.failed_count.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    "Task {} failed permanently after {} retries: {}",
                    task.id,
                    task.retry_count,
                    error_msg
                );
            }
        }
        Ok(task)
    }

    fn check_ownership(task: &Task, worker: &str) -> Result<(), DispatchError> {
        if task.status != TaskStatus::Running || task.worker_id.as_deref() != Some(worker) {
            return Err(DispatchError::LostLease {
                worker: worker.to_string(),
                task: task.id,
            });
        }
        Ok(())
    }

    /// Shared failure bookkeeping for worker reports and lease expiry. The
    /// charged attempt number drives the backoff delay.
    fn failure_mutation(task: &Task, backoff: &BackoffPolicy, message: String) -> Mutation {
        let retries_remain = task.can_retry();
        // The transition out of RUNNING cannot fail once ownership held.
        let next_status = state::apply(task.status, TaskEvent::Fail { retries_remain })
            .unwrap_or(TaskStatus::Failed);
        let eligible_at = now_ms() + backoff.delay_ms(task.retry_count + 1);

        Box::new(move |t: &mut Task| {
            t.status = next_status;
            t.last_error = Some(message);
            t.worker_id = None;
            t.lease_until = None;
            if next_status == TaskStatus::Retrying {
                t.retry_count += 1;
                t.next_execution_time = eligible_at;
            }
        })
    }

    // ------------------------------------------------------------------
    // Loop bodies
    // ------------------------------------------------------------------

    /// Promotes SCHEDULED tasks whose time has arrived and RETRYING tasks
    /// whose backoff has elapsed, then sweeps the ready set to heal index
    /// gaps (overflow, crashed admissions stuck in PENDING). Returns the
    /// number of promotions.
    pub async fn scheduler_tick(&self) -> Result<usize, StoreError> {
        let now = now_ms();
        let mut promoted = 0;

        for task in self.store.scan_scheduled(now).await? {
            if self
                .promote(&task, TaskEvent::PromoteScheduled, now)
                .await?
            {
                promoted += 1;
            }
        }

        for task in self.store.scan_retrying(now).await? {
            if self.promote(&task, TaskEvent::BackoffElapsed, now).await? {
                promoted += 1;
            }
        }

        for task in self.store.scan_ready(self.batch_size, now).await? {
            match task.status {
                TaskStatus::Pending => {
                    if self.promote(&task, TaskEvent::Enqueue, now).await? {
                        promoted += 1;
                    }
                }
                TaskStatus::Queued => {
                    if !self.index.contains(task.id) {
                        self.enqueue(&task);
                    }
                }
                _ => {}
            }
        }

        Ok(promoted)
    }

    async fn promote(
        &self,
        task: &Task,
        event: TaskEvent,
        now: u64,
    ) -> Result<bool, StoreError> {
        let Ok(next_status) = state::apply(task.status, event) else {
            // The row moved on since the scan (cancel races the promotion).
            return Ok(false);
        };

        let result = self
            .store
            .cas_update(
                task.id,
                task.version,
                Box::new(move |t: &mut Task| {
                    t.status = next_status;
                    t.next_execution_time = t.next_execution_time.max(now);
                }),
            )
            .await;

        match result {
            Ok(updated) => {
                tracing::debug!("Task {} promoted to {}", updated.id, updated.status);
                self.enqueue(&updated);
                Ok(true)
            }
            Err(StoreError::Conflict(_)) | Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Returns expired-lease RUNNING tasks to the retry pipeline. Silent
    /// lease expiry counts as a failed attempt: the retry counter is
    /// charged and the task backs off like any other failure, or goes to
    /// FAILED when retries are exhausted.
    pub async fn recovery_tick(&self) -> Result<usize, StoreError> {
        let now = now_ms();
        let mut recovered = 0;

        for task in self.store.scan_stuck(now).await? {
            let mutation =
                Self::failure_mutation(&task, &self.backoff, "lease expired".to_string());
            match self.store.cas_update(task.id, task.version, mutation).await {
                Ok(updated) => {
                    recovered += 1;
                    self.recovered_count.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        "Recovered stuck task {} from worker {:?} ({} -> {})",
                        updated.id,
                        task.worker_id,
                        TaskStatus::Running,
                        updated.status
                    );
                }
                Err(StoreError::Conflict(_)) | Err(StoreError::NotFound(_)) => {
                    // The worker reported, or a cancel landed first.
                }
                Err(e) => return Err(e),
            }
        }

        Ok(recovered)
    }

    /// Purges completed tasks older than the retention window.
    pub async fn cleanup_tick(&self) -> Result<u64, StoreError> {
        let cutoff = now_ms().saturating_sub(self.cleanup_retention_ms);
        let deleted = self.store.delete_completed_before(cutoff).await?;
        if deleted > 0 {
            tracing::info!("Cleanup removed {} completed tasks", deleted);
        }
        Ok(deleted)
    }

    /// Refreshes and logs queue gauges.
    pub async fn metrics_tick(&self) -> Result<(), StoreError> {
        let counts = self.store.counts_by_status().await?;
        tracing::debug!(
            "Queue stats: {} indexed, {} queued, {} running, {} retrying, {} completed, {} failed",
            self.index.len(),
            counts.queued,
            counts.running,
            counts.retrying,
            counts.completed,
            counts.failed
        );
        Ok(())
    }

    // ------------------------------------------------------------------

    async fn cas_with_retry<F>(&self, id: TaskId, mut attempt: F) -> Result<Task, DispatchError>
    where
        F: FnMut(&Task) -> Result<Mutation, DispatchError>,
    {
        for _ in 0..CAS_RETRY_LIMIT {
            let Some(task) = self.store.get(id).await? else {
                return Err(DispatchError::NotFound(id));
            };

            let mutation = attempt(&task)?;
            match self.store.cas_update(id, task.version, mutation).await {
                Ok(updated) => return Ok(updated),
                Err(StoreError::Conflict(_)) => {
                    tracing::trace!("CAS race on task {}, retrying", id);
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(DispatchError::Conflict(id))
    }
}
