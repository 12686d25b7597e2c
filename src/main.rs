use axum::{
    routing::{delete, get, post, put},
    Extension, Router,
};
use std::sync::Arc;
use tower::limit::GlobalConcurrencyLimitLayer;

use dispatchq::config::SchedulerConfig;
use dispatchq::queue::core::DispatchCore;
use dispatchq::queue::handlers::{
    handle_worker_complete, handle_worker_fail, handle_worker_heartbeat, handle_worker_poll,
};
use dispatchq::queue::loops::start_background_loops;
use dispatchq::queue::protocol::{
    ENDPOINT_WORKER_COMPLETE, ENDPOINT_WORKER_FAIL, ENDPOINT_WORKER_HEARTBEAT,
    ENDPOINT_WORKER_POLL,
};
use dispatchq::service::handlers::{
    handle_cancel_task, handle_cleanup, handle_create_batch, handle_create_task, handle_get_task,
    handle_health, handle_list_tasks, handle_metrics, handle_retry_task, handle_scheduled_tasks,
    handle_statistics, handle_update_status,
};
use dispatchq::service::tasks::TaskService;
use dispatchq::store::memory::InMemoryTaskStore;
use dispatchq::store::sqlite::SqliteTaskStore;
use dispatchq::store::TaskStore;

fn main() -> anyhow::Result<()> {
    let config = SchedulerConfig::from_env();

    // The thread pool knobs size the runtime itself: core worker threads
    // for async work, the max pool bounding blocking tasks.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.thread_pool_core.max(1))
        .max_blocking_threads(config.thread_pool_max.max(1))
        .enable_all()
        .build()?;

    runtime.block_on(run(config))
}

async fn run(config: SchedulerConfig) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    tracing::info!("Starting dispatchq on {}", config.bind_addr);

    // 1. Task store (source of truth):
    let store: Arc<dyn TaskStore> = match &config.database_path {
        Some(path) => {
            tracing::info!("Opening task store at {}", path);
            Arc::new(SqliteTaskStore::open(path)?)
        }
        None => {
            tracing::warn!("DATABASE_PATH not set; tasks will not survive a restart");
            Arc::new(InMemoryTaskStore::new())
        }
    };

    // 2. Dispatch core + background loops:
    let core = DispatchCore::new(store.clone(), &config).await?;
    start_background_loops(&core, &config);

    // 3. Admission / query service:
    let service = TaskService::new(store.clone(), core.clone(), &config);

    // 4. HTTP router:
    let tasks_routes = Router::new()
        .route("/", post(handle_create_task).get(handle_list_tasks))
        .route("/batch", post(handle_create_batch))
        .route("/statistics", get(handle_statistics))
        .route("/metrics", get(handle_metrics))
        .route("/scheduled", get(handle_scheduled_tasks))
        .route("/cleanup", delete(handle_cleanup))
        .route("/health", get(handle_health))
        .route("/:id", get(handle_get_task))
        .route("/:id/status", put(handle_update_status))
        .route("/:id/cancel", post(handle_cancel_task))
        .route("/:id/retry", post(handle_retry_task));

    let worker_routes = Router::new()
        .route(ENDPOINT_WORKER_POLL, post(handle_worker_poll))
        .route(ENDPOINT_WORKER_HEARTBEAT, post(handle_worker_heartbeat))
        .route(ENDPOINT_WORKER_COMPLETE, post(handle_worker_complete))
        .route(ENDPOINT_WORKER_FAIL, post(handle_worker_fail));

    let app = Router::new()
        .nest("/api/v1/tasks", tasks_routes)
        .nest("/api/v1/workers", worker_routes)
        .layer(GlobalConcurrencyLimitLayer::new(
            config.thread_pool_queue_capacity.max(1),
        ))
        .layer(Extension(service))
        .layer(Extension(core.clone()));

    // 5. Serve until Ctrl+C, then stop the loops. Shutdown is a no-op on
    // task state: queued rows are durable and the index rebuilds on start.
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!("HTTP server listening on {}", config.bind_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    let shutdown_core = core.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
            shutdown_core.shutdown();
        })
        .await?;

    core.shutdown();
    Ok(())
}
