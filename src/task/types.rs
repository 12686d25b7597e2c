use serde::{Deserialize, Serialize};
use std::fmt;

/// Monotonically assigned task identifier.
///
/// Assigned by the Task Store on insert; identifiers are never reused.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Priority class for dispatch ordering.
///
/// The numeric weight defines ordering: strictly higher weight dispatches
/// first. There is no aging, so a continuous stream of CRITICAL work can
/// starve BULK work.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
    Bulk,
}

impl Priority {
    pub const ALL: [Priority; 5] = [
        Priority::Critical,
        Priority::High,
        Priority::Medium,
        Priority::Low,
        Priority::Bulk,
    ];

    pub fn weight(self) -> u32 {
        match self {
            Priority::Critical => 100,
            Priority::High => 75,
            Priority::Medium => 50,
            Priority::Low => 25,
            Priority::Bulk => 1,
        }
    }

    pub fn from_weight(weight: u32) -> Option<Priority> {
        Priority::ALL.iter().copied().find(|p| p.weight() == weight)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Critical => "CRITICAL",
            Priority::High => "HIGH",
            Priority::Medium => "MEDIUM",
            Priority::Low => "LOW",
            Priority::Bulk => "BULK",
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    /// Created, not yet queued or scheduled.
    Pending,
    /// Waiting for its scheduled time to arrive.
    Scheduled,
    /// Ready for dispatch; eligible once `next_execution_time` has passed.
    Queued,
    /// Claimed by a worker holding a lease.
    Running,
    /// Finished successfully. Terminal.
    Completed,
    /// Failed with retries exhausted, or awaiting an explicit retry request.
    Failed,
    /// Cancelled by external request. Terminal.
    Cancelled,
    /// Failed with retries remaining; waiting out the backoff.
    Retrying,
    /// Execution suspended by external request.
    Paused,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 9] = [
        TaskStatus::Pending,
        TaskStatus::Scheduled,
        TaskStatus::Queued,
        TaskStatus::Running,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
        TaskStatus::Retrying,
        TaskStatus::Paused,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Scheduled => "SCHEDULED",
            TaskStatus::Queued => "QUEUED",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Cancelled => "CANCELLED",
            TaskStatus::Retrying => "RETRYING",
            TaskStatus::Paused => "PAUSED",
        }
    }

    pub fn parse(value: &str) -> Option<TaskStatus> {
        let upper = value.to_ascii_uppercase();
        TaskStatus::ALL.iter().copied().find(|s| s.as_str() == upper)
    }

    /// COMPLETED and CANCELLED never transition again. FAILED is terminal
    /// only once retries are exhausted, which depends on the row's counters,
    /// so it is checked at the call sites that know them.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cancelled)
    }

    pub fn is_waiting(self) -> bool {
        matches!(
            self,
            TaskStatus::Pending | TaskStatus::Queued | TaskStatus::Scheduled
        )
    }

    pub fn is_active(self) -> bool {
        matches!(self, TaskStatus::Running | TaskStatus::Retrying)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The durable task row. The Task Store owns the canonical copy; everything
/// else (the priority index, counters) is a cache recoverable from it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub task_name: String,
    pub task_type: String,
    pub priority: Priority,
    pub status: TaskStatus,
    pub payload: Option<String>,
    pub description: Option<String>,
    /// Earliest execution instant; `None` means "now".
    pub scheduled_time: Option<u64>,
    /// When the task becomes eligible for dispatch. Moved forward by retry
    /// backoff; never moves backwards.
    pub next_execution_time: u64,
    pub timeout_seconds: u32,
    pub max_retries: u32,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub last_executed_at: Option<u64>,
    pub execution_duration_ms: Option<u64>,
    /// Worker currently holding the claim, while RUNNING.
    pub worker_id: Option<String>,
    /// Lease expiry instant, while RUNNING. Expiry makes the task eligible
    /// for recovery.
    pub lease_until: Option<u64>,
    pub created_at: u64,
    pub updated_at: u64,
    /// Monotonic counter for optimistic concurrency; strictly increases on
    /// every mutation of the row.
    pub version: u64,
}

impl Task {
    pub fn is_ready(&self, now: u64) -> bool {
        self.status == TaskStatus::Queued && self.next_execution_time <= now
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    pub fn lease_expired(&self, now: u64) -> bool {
        self.status == TaskStatus::Running
            && self.lease_until.map(|until| until <= now).unwrap_or(true)
    }
}

/// Attributes of a task prior to insertion; the store assigns `id`,
/// `created_at`, `updated_at` and `version`.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub task_name: String,
    pub task_type: String,
    pub priority: Priority,
    pub status: TaskStatus,
    pub payload: Option<String>,
    pub description: Option<String>,
    pub scheduled_time: Option<u64>,
    pub next_execution_time: u64,
    pub timeout_seconds: u32,
    pub max_retries: u32,
}

pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}
