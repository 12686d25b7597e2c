//! In-memory priority index over ready task ids.

use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};

use crate::task::types::{Task, TaskId};

/// Ready-set tuple: everything dispatch ordering needs, nothing more.
///
/// Ordering is dispatch order: strictly higher priority weight first, ties
/// broken by older `created_at`, then by lower id so the order is total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub task_id: TaskId,
    pub weight: u32,
    pub created_at: u64,
}

impl IndexEntry {
    pub fn of(task: &Task) -> Self {
        Self {
            task_id: task.id,
            weight: task.priority.weight(),
            created_at: task.created_at,
        }
    }
}

impl PartialOrd for IndexEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .weight
            .cmp(&self.weight)
            .then(self.created_at.cmp(&other.created_at))
            .then(self.task_id.cmp(&other.task_id))
    }
}

struct IndexInner {
    ordered: BTreeSet<IndexEntry>,
    by_id: HashMap<TaskId, IndexEntry>,
}

/// Thread-safe ordered set of ready task ids.
///
/// The index is a cache, not authoritative: it is rebuilt from the store on
/// startup, and the dispatcher revalidates every popped entry against the
/// store before handing a task to a worker. Insert, remove and poll are
/// O(log n) under a single short-lived mutex.
pub struct PriorityIndex {
    inner: Mutex<IndexInner>,
    max_size: usize,
}

impl PriorityIndex {
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: Mutex::new(IndexInner {
                ordered: BTreeSet::new(),
                by_id: HashMap::new(),
            }),
            max_size,
        }
    }

    /// Inserts a ready tuple. Returns `false` when the id is already
    /// present or the index is at capacity; overflowed tasks stay durable
    /// in the store and are picked up by the scheduler re-scan.
    pub fn insert(&self, task: &Task) -> bool {
        let entry = IndexEntry::of(task);
        let mut inner = self.inner.lock();

        if inner.by_id.contains_key(&entry.task_id) {
            return false;
        }
        if inner.by_id.len() >= self.max_size {
            return false;
        }

        inner.by_id.insert(entry.task_id, entry);
        inner.ordered.insert(entry);
        true
    }

    pub fn remove(&self, id: TaskId) -> bool {
        let mut inner = self.inner.lock();
        match inner.by_id.remove(&id) {
            Some(entry) => {
                inner.ordered.remove(&entry);
                true
            }
            None => false,
        }
    }

    /// Pops the highest-priority tuple. The entry is removed, so two
    /// concurrent pollers can never race on the same id in the fast path.
    pub fn poll_max(&self) -> Option<IndexEntry> {
        let mut inner = self.inner.lock();
        let entry = inner.ordered.pop_first()?;
        inner.by_id.remove(&entry.task_id);
        Some(entry)
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.inner.lock().by_id.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().by_id.len()
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
