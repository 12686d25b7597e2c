//! Runtime configuration.
//!
//! Every knob is an environment variable with a production default, read
//! once at startup.

use std::net::SocketAddr;
use std::str::FromStr;

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<T>().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// HTTP bind address (`BIND_ADDR`).
    pub bind_addr: SocketAddr,
    /// SQLite file path (`DATABASE_PATH`); unset means an in-memory store
    /// that does not survive restarts.
    pub database_path: Option<String>,

    /// Runtime worker threads (`THREAD_POOL_CORE`).
    pub thread_pool_core: usize,
    /// Blocking-thread ceiling (`THREAD_POOL_MAX`).
    pub thread_pool_max: usize,
    /// Concurrent in-flight HTTP request cap (`THREAD_POOL_QUEUE_CAPACITY`).
    pub thread_pool_queue_capacity: usize,

    /// Priority index capacity (`QUEUE_MAX_SIZE`). Admissions beyond it stay
    /// durable and re-enter the index via the scheduler re-scan.
    pub queue_max_size: usize,
    /// Page size for store scans and batch promotion (`QUEUE_BATCH_SIZE`).
    pub queue_batch_size: usize,
    /// Metrics refresh cadence (`QUEUE_POLL_INTERVAL_MS`).
    pub queue_poll_interval_ms: u64,

    /// Retry backoff base delay (`BACKOFF_BASE_MS`).
    pub backoff_base_ms: u64,
    /// Retry backoff ceiling (`BACKOFF_CAP_MS`).
    pub backoff_cap_ms: u64,

    /// Stuck-task sweep cadence (`RECOVERY_INTERVAL_MS`).
    pub recovery_interval_ms: u64,
    /// Promotion sweep cadence (`SCHEDULER_INTERVAL_MS`).
    pub scheduler_interval_ms: u64,
    /// Completed-task purge cadence (`CLEANUP_INTERVAL_MS`).
    pub cleanup_interval_ms: u64,
    /// Age at which completed tasks are purged (`CLEANUP_RETENTION_MS`).
    pub cleanup_retention_ms: u64,

    /// Whether an explicit retry may revive a task whose retries are
    /// exhausted (`RETRY_ALLOW_EXHAUSTED`).
    pub retry_allow_exhausted: bool,
}

impl SchedulerConfig {
    pub fn from_env() -> Self {
        Self {
            bind_addr: env_parse("BIND_ADDR", "127.0.0.1:8080".parse().unwrap()),
            database_path: std::env::var("DATABASE_PATH").ok().filter(|p| !p.is_empty()),
            thread_pool_core: env_parse("THREAD_POOL_CORE", 5),
            thread_pool_max: env_parse("THREAD_POOL_MAX", 10),
            thread_pool_queue_capacity: env_parse("THREAD_POOL_QUEUE_CAPACITY", 1_000),
            queue_max_size: env_parse("QUEUE_MAX_SIZE", 100_000),
            queue_batch_size: env_parse("QUEUE_BATCH_SIZE", 100),
            queue_poll_interval_ms: env_parse("QUEUE_POLL_INTERVAL_MS", 100),
            backoff_base_ms: env_parse("BACKOFF_BASE_MS", 1_000),
            backoff_cap_ms: env_parse("BACKOFF_CAP_MS", 300_000),
            recovery_interval_ms: env_parse("RECOVERY_INTERVAL_MS", 5_000),
            scheduler_interval_ms: env_parse("SCHEDULER_INTERVAL_MS", 1_000),
            cleanup_interval_ms: env_parse("CLEANUP_INTERVAL_MS", 3_600_000),
            cleanup_retention_ms: env_parse("CLEANUP_RETENTION_MS", 7 * 24 * 3_600_000),
            retry_allow_exhausted: env_parse("RETRY_ALLOW_EXHAUSTED", false),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".parse().unwrap(),
            database_path: None,
            thread_pool_core: 5,
            thread_pool_max: 10,
            thread_pool_queue_capacity: 1_000,
            queue_max_size: 100_000,
            queue_batch_size: 100,
            queue_poll_interval_ms: 100,
            backoff_base_ms: 1_000,
            backoff_cap_ms: 300_000,
            recovery_interval_ms: 5_000,
            scheduler_interval_ms: 1_000,
            cleanup_interval_ms: 3_600_000,
            cleanup_retention_ms: 7 * 24 * 3_600_000,
            retry_allow_exhausted: false,
        }
    }
}
