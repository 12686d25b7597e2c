//! REST API contracts.
//!
//! Request/response DTOs for the `/api/v1/tasks` surface. Timestamps cross
//! this boundary as ISO-8601 local date-times (`yyyy-MM-ddTHH:mm:ss`);
//! internally everything is epoch milliseconds.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::task::types::{Priority, Task, TaskStatus};

/// Conversions between internal epoch milliseconds and the wall-clock
/// date-times exposed over HTTP.
pub mod time {
    use chrono::{DateTime, Local, LocalResult, NaiveDateTime, TimeZone, Utc};

    pub fn ms_to_naive(ms: u64) -> NaiveDateTime {
        match Local.timestamp_millis_opt(ms as i64) {
            LocalResult::Single(dt) => dt.naive_local(),
            LocalResult::Ambiguous(dt, _) => dt.naive_local(),
            LocalResult::None => DateTime::<Utc>::UNIX_EPOCH.naive_utc(),
        }
    }

    /// Resolves a local date-time to epoch milliseconds; DST gaps resolve
    /// to the earlier valid instant.
    pub fn naive_to_ms(naive: NaiveDateTime) -> u64 {
        naive
            .and_local_timezone(Local)
            .earliest()
            .map(|dt| dt.timestamp_millis())
            .unwrap_or_else(|| naive.and_utc().timestamp_millis())
            .max(0) as u64
    }
}

pub const DATE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// serde codec for required ISO-8601 local timestamps.
pub mod iso_local {
    use super::DATE_TIME_FORMAT;
    use chrono::NaiveDateTime;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.format(DATE_TIME_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<NaiveDateTime, D::Error> {
        let text = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&text, DATE_TIME_FORMAT).map_err(serde::de::Error::custom)
    }
}

/// serde codec for optional ISO-8601 local timestamps.
pub mod iso_local_opt {
    use super::DATE_TIME_FORMAT;
    use chrono::NaiveDateTime;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<NaiveDateTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(dt) => serializer.serialize_some(&dt.format(DATE_TIME_FORMAT).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<NaiveDateTime>, D::Error> {
        let text = Option::<String>::deserialize(deserializer)?;
        match text {
            Some(text) if !text.is_empty() => NaiveDateTime::parse_from_str(&text, DATE_TIME_FORMAT)
                .map(Some)
                .map_err(serde::de::Error::custom),
            _ => Ok(None),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequest {
    pub task_name: String,
    pub task_type: String,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub payload: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, with = "iso_local_opt")]
    pub scheduled_time: Option<NaiveDateTime>,
    #[serde(default)]
    pub execution_timeout_seconds: Option<u32>,
    #[serde(default)]
    pub max_retry_attempts: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResponse {
    pub id: u64,
    pub task_name: String,
    pub task_type: String,
    pub priority: Priority,
    pub status: TaskStatus,
    pub payload: Option<String>,
    pub description: Option<String>,
    #[serde(with = "iso_local_opt")]
    pub scheduled_time: Option<NaiveDateTime>,
    #[serde(with = "iso_local")]
    pub next_execution_time: NaiveDateTime,
    pub execution_timeout_seconds: u32,
    pub max_retry_attempts: u32,
    pub current_retry_count: u32,
    pub last_error_message: Option<String>,
    #[serde(with = "iso_local_opt")]
    pub last_executed_at: Option<NaiveDateTime>,
    pub execution_duration_ms: Option<u64>,
    #[serde(with = "iso_local")]
    pub created_at: NaiveDateTime,
    #[serde(with = "iso_local")]
    pub updated_at: NaiveDateTime,
    pub version: u64,
}

impl From<&Task> for TaskResponse {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id.0,
            task_name: task.task_name.clone(),
            task_type: task.task_type.clone(),
            priority: task.priority,
            status: task.status,
            payload: task.payload.clone(),
            description: task.description.clone(),
            scheduled_time: task.scheduled_time.map(time::ms_to_naive),
            next_execution_time: time::ms_to_naive(task.next_execution_time),
            execution_timeout_seconds: task.timeout_seconds,
            max_retry_attempts: task.max_retries,
            current_retry_count: task.retry_count,
            last_error_message: task.last_error.clone(),
            last_executed_at: task.last_executed_at.map(time::ms_to_naive),
            execution_duration_ms: task.execution_duration_ms,
            created_at: time::ms_to_naive(task.created_at),
            updated_at: time::ms_to_naive(task.updated_at),
            version: task.version,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResponse<T> {
    pub content: Vec<T>,
    pub page: usize,
    pub size: usize,
    pub total_elements: u64,
    pub total_pages: u64,
}

impl<T> PageResponse<T> {
    pub fn new(content: Vec<T>, page: usize, size: usize, total_elements: u64) -> Self {
        let total_pages = if size == 0 {
            0
        } else {
            (total_elements + size as u64 - 1) / size as u64
        };
        Self {
            content,
            page,
            size,
            total_elements,
            total_pages,
        }
    }
}

fn default_page_size() -> usize {
    20
}

fn default_sort() -> String {
    "createdAt,desc".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTasksQuery {
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default, rename = "type")]
    pub task_type: Option<String>,
    #[serde(default)]
    pub page: usize,
    #[serde(default = "default_page_size")]
    pub size: usize,
    #[serde(default = "default_sort")]
    pub sort: String,
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub status: TaskStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsQuery {
    #[serde(default, with = "iso_local_opt")]
    pub from_time: Option<NaiveDateTime>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledQuery {
    #[serde(default, with = "iso_local_opt")]
    pub before_time: Option<NaiveDateTime>,
    #[serde(default)]
    pub page: usize,
    #[serde(default = "default_page_size")]
    pub size: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupQuery {
    #[serde(with = "iso_local")]
    pub older_than: NaiveDateTime,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsResponse {
    pub total_tasks: u64,
    pub pending_tasks: u64,
    pub scheduled_tasks: u64,
    pub queued_tasks: u64,
    pub running_tasks: u64,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    pub cancelled_tasks: u64,
    pub retrying_tasks: u64,
    pub paused_tasks: u64,
    pub in_memory_queue_size: usize,
    pub total_queued_tasks: u64,
    pub total_processed_tasks: u64,
    pub is_running: bool,
    pub priority_breakdown: HashMap<String, u64>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_execution_time_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_execution_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_execution_time_ms: Option<u64>,
    pub completed_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub task_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResponse {
    pub message: String,
    pub deleted_count: u64,
    #[serde(with = "iso_local")]
    pub older_than: NaiveDateTime,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    #[serde(with = "iso_local")]
    pub timestamp: NaiveDateTime,
    pub service: String,
    pub version: String,
    pub cpu_usage: f32,
    pub mem_used_mb: u64,
    pub mem_total_mb: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
