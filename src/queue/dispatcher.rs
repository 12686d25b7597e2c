//! The claim protocol.

use std::sync::Arc;

use super::index::PriorityIndex;
use crate::store::{StoreError, TaskStore};
use crate::task::types::{now_ms, Task, TaskStatus};

/// Atomically claims the next ready task for a worker.
///
/// The index cannot be the sole truth: other processes may share the store,
/// and retries and recoveries re-insert items the index has forgotten. The
/// store's `claim` CAS is the serialization point; the index only decides
/// which candidate to try first.
pub struct Dispatcher {
    store: Arc<dyn TaskStore>,
    index: Arc<PriorityIndex>,
    batch_size: usize,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn TaskStore>, index: Arc<PriorityIndex>, batch_size: usize) -> Self {
        Self {
            store,
            index,
            batch_size,
        }
    }

    /// Returns a RUNNING task owned by `worker_id` with
    /// `lease_until = now + lease_ms` (the task's own timeout when
    /// `lease_ms` is absent), or `None` when nothing is eligible.
    ///
    /// 1. **Fast path**: pop candidates off the index and try the store's
    ///    claim CAS. Conflicting candidates (already claimed, cancelled,
    ///    re-enqueued) are discarded and the next one is tried.
    /// 2. **Slow path**: on an empty index, re-scan the store for ready
    ///    tasks, repopulate the index, and retry the fast path once.
    ///
    /// A store outage yields `None` rather than an error so a flapping
    /// store cannot poison the caller; the candidates stay durable.
    pub async fn next(&self, worker_id: &str, lease_ms: Option<u64>) -> Option<Task> {
        if let Some(task) = self.claim_from_index(worker_id, lease_ms).await {
            return Some(task);
        }

        // Index is empty (or only held stale entries); fall back to the
        // store and refill.
        let ready = match self.store.scan_ready(self.batch_size, now_ms()).await {
            Ok(ready) => ready,
            Err(e) => {
                tracing::warn!("Ready scan failed, dispatching nothing: {}", e);
                return None;
            }
        };

        if ready.is_empty() {
            return None;
        }

        for task in &ready {
            // PENDING rows surfaced here belong to the scheduler sweep;
            // only QUEUED rows are index material.
            if task.status == TaskStatus::Queued {
                self.index.insert(task);
            }
        }

        self.claim_from_index(worker_id, lease_ms).await
    }

    async fn claim_from_index(&self, worker_id: &str, lease_ms: Option<u64>) -> Option<Task> {
        while let Some(entry) = self.index.poll_max() {
            match self
                .store
                .claim(entry.task_id, worker_id, lease_ms, now_ms())
                .await
            {
                Ok(task) => {
                    tracing::debug!(
                        "Worker {} claimed task {} (priority {})",
                        worker_id,
                        task.id,
                        task.priority
                    );
                    return Some(task);
                }
                Err(StoreError::Conflict(id)) => {
                    // The row changed since it was indexed; drop the stale
                    // candidate and keep going.
                    tracing::trace!("Task {} no longer claimable, skipping", id);
                }
                Err(StoreError::NotFound(id)) => {
                    tracing::trace!("Task {} deleted since indexing, skipping", id);
                }
                Err(e) => {
                    tracing::warn!("Claim failed for worker {}: {}", worker_id, e);
                    return None;
                }
            }
        }
        None
    }
}
