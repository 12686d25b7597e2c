//! Background maintenance loops.
//!
//! Each loop is a spawned tokio task driving one `DispatchCore` tick on a
//! fixed interval. The tick bodies live on the core so tests can drive them
//! directly without timers.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::core::DispatchCore;
use crate::config::SchedulerConfig;

/// Spawns the scheduler, recovery, cleanup and metrics loops and registers
/// their handles with the core so shutdown can stop them.
pub fn start_background_loops(core: &Arc<DispatchCore>, config: &SchedulerConfig) {
    core.register_loop(spawn_scheduler_loop(
        core.clone(),
        config.scheduler_interval_ms,
    ));
    core.register_loop(spawn_recovery_loop(core.clone(), config.recovery_interval_ms));
    core.register_loop(spawn_cleanup_loop(core.clone(), config.cleanup_interval_ms));
    core.register_loop(spawn_metrics_loop(
        core.clone(),
        config.queue_poll_interval_ms,
    ));
    tracing::info!(
        "Background loops started (scheduler {}ms, recovery {}ms, cleanup {}ms, metrics {}ms)",
        config.scheduler_interval_ms,
        config.recovery_interval_ms,
        config.cleanup_interval_ms,
        config.queue_poll_interval_ms
    );
}

pub fn spawn_scheduler_loop(core: Arc<DispatchCore>, interval_ms: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
        loop {
            interval.tick().await;
            if !core.is_running() {
                break;
            }
            match core.scheduler_tick().await {
                Ok(promoted) if promoted > 0 => {
                    tracing::debug!("Scheduler promoted {} tasks", promoted);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("Scheduler tick failed: {}", e);
                }
            }
        }
    })
}

pub fn spawn_recovery_loop(core: Arc<DispatchCore>, interval_ms: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
        loop {
            interval.tick().await;
            if !core.is_running() {
                break;
            }
            match core.recovery_tick().await {
                Ok(recovered) if recovered > 0 => {
                    tracing::info!("Recovery returned {} stuck tasks to the queue", recovered);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("Recovery tick failed: {}", e);
                }
            }
        }
    })
}

pub fn spawn_cleanup_loop(core: Arc<DispatchCore>, interval_ms: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
        loop {
            interval.tick().await;
            if !core.is_running() {
                break;
            }
            if let Err(e) = core.cleanup_tick().await {
                tracing::warn!("Cleanup tick failed: {}", e);
            }
        }
    })
}

pub fn spawn_metrics_loop(core: Arc<DispatchCore>, interval_ms: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
        loop {
            interval.tick().await;
            if !core.is_running() {
                break;
            }
            if let Err(e) = core.metrics_tick().await {
                tracing::warn!("Metrics tick failed: {}", e);
            }
        }
    })
}
