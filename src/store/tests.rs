#[cfg(test)]
mod tests {
    use crate::store::memory::InMemoryTaskStore;
    use crate::store::sqlite::SqliteTaskStore;
    use crate::store::{PageRequest, SortOrder, StoreError, TaskFilter, TaskStore};
    use crate::task::types::{now_ms, NewTask, Priority, TaskId, TaskStatus};

    fn queued_task(name: &str, priority: Priority) -> NewTask {
        NewTask {
            task_name: name.to_string(),
            task_type: "test".to_string(),
            priority,
            status: TaskStatus::Queued,
            payload: Some(format!("{{\"name\":\"{name}\"}}")),
            description: None,
            scheduled_time: None,
            next_execution_time: now_ms(),
            timeout_seconds: 300,
            max_retries: 3,
        }
    }

    fn scheduled_task(name: &str, at: u64) -> NewTask {
        NewTask {
            task_name: name.to_string(),
            task_type: "test".to_string(),
            priority: Priority::Medium,
            status: TaskStatus::Scheduled,
            payload: None,
            description: None,
            scheduled_time: Some(at),
            next_execution_time: at,
            timeout_seconds: 300,
            max_retries: 3,
        }
    }

    // ============================================================
    // INSERT / GET
    // ============================================================

    #[tokio::test]
    async fn test_insert_assigns_monotonic_ids() {
        let store = InMemoryTaskStore::new();

        let a = store.insert(queued_task("a", Priority::Medium)).await.unwrap();
        let b = store.insert(queued_task("b", Priority::Medium)).await.unwrap();

        assert!(b.id.0 > a.id.0, "ids must be monotonically assigned");
        assert_eq!(a.version, 1);
        assert_eq!(a.retry_count, 0);
    }

    #[tokio::test]
    async fn test_payload_round_trips() {
        let store = InMemoryTaskStore::new();

        let inserted = store.insert(queued_task("rt", Priority::Low)).await.unwrap();
        let fetched = store.get(inserted.id).await.unwrap().unwrap();

        assert_eq!(fetched.payload, inserted.payload);
        assert_eq!(fetched, inserted);
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let store = InMemoryTaskStore::new();
        assert!(store.get(TaskId(999)).await.unwrap().is_none());
    }

    // ============================================================
    // CAS UPDATE
    // ============================================================

    #[tokio::test]
    async fn test_cas_update_bumps_version() {
        let store = InMemoryTaskStore::new();
        let task = store.insert(queued_task("v", Priority::Medium)).await.unwrap();

        let updated = store
            .cas_update(
                task.id,
                task.version,
                Box::new(|t| t.description = Some("updated".to_string())),
            )
            .await
            .unwrap();

        assert_eq!(updated.version, task.version + 1);
        assert_eq!(updated.description.as_deref(), Some("updated"));
    }

    #[tokio::test]
    async fn test_cas_update_rejects_stale_version() {
        let store = InMemoryTaskStore::new();
        let task = store.insert(queued_task("stale", Priority::Medium)).await.unwrap();

        store
            .cas_update(task.id, task.version, Box::new(|t| t.retry_count = 1))
            .await
            .unwrap();

        // Second writer still holds the old version and must lose.
        let err = store
            .cas_update(task.id, task.version, Box::new(|t| t.retry_count = 2))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(id) if id == task.id));

        let current = store.get(task.id).await.unwrap().unwrap();
        assert_eq!(current.retry_count, 1);
    }

    #[tokio::test]
    async fn test_cas_update_clamps_next_execution_time() {
        let store = InMemoryTaskStore::new();
        let task = store.insert(queued_task("clamp", Priority::Medium)).await.unwrap();
        let original = task.next_execution_time;

        let updated = store
            .cas_update(
                task.id,
                task.version,
                Box::new(move |t| t.next_execution_time = original.saturating_sub(60_000)),
            )
            .await
            .unwrap();

        assert_eq!(updated.next_execution_time, original);
    }

    // ============================================================
    // CLAIM
    // ============================================================

    #[tokio::test]
    async fn test_claim_transitions_queued_to_running() {
        let store = InMemoryTaskStore::new();
        let task = store.insert(queued_task("claim", Priority::High)).await.unwrap();

        let now = now_ms();
        let claimed = store
            .claim(task.id, "worker-1", Some(5_000), now)
            .await
            .unwrap();

        assert_eq!(claimed.status, TaskStatus::Running);
        assert_eq!(claimed.worker_id.as_deref(), Some("worker-1"));
        assert_eq!(claimed.lease_until, Some(now + 5_000));
        assert_eq!(claimed.last_executed_at, Some(now));
        assert_eq!(claimed.version, task.version + 1);
    }

    #[tokio::test]
    async fn test_claim_defaults_lease_to_task_timeout() {
        let store = InMemoryTaskStore::new();
        let mut new = queued_task("lease-default", Priority::Medium);
        new.timeout_seconds = 60;
        let task = store.insert(new).await.unwrap();

        let now = now_ms();
        let claimed = store.claim(task.id, "worker-1", None, now).await.unwrap();

        assert_eq!(claimed.lease_until, Some(now + 60_000));
    }

    #[tokio::test]
    async fn test_second_claim_conflicts() {
        let store = InMemoryTaskStore::new();
        let task = store.insert(queued_task("double", Priority::Medium)).await.unwrap();

        store
            .claim(task.id, "worker-1", Some(5_000), now_ms())
            .await
            .unwrap();
        let err = store
            .claim(task.id, "worker-2", Some(5_000), now_ms())
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_claim_missing_task_is_not_found() {
        let store = InMemoryTaskStore::new();
        let err = store
            .claim(TaskId(404), "worker-1", Some(5_000), now_ms())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    // ============================================================
    // SCANS
    // ============================================================

    #[tokio::test]
    async fn test_scan_ready_orders_by_priority_then_age() {
        let store = InMemoryTaskStore::new();

        let low = store.insert(queued_task("low", Priority::Low)).await.unwrap();
        let critical = store
            .insert(queued_task("critical", Priority::Critical))
            .await
            .unwrap();
        let medium_a = store.insert(queued_task("m-a", Priority::Medium)).await.unwrap();
        let medium_b = store.insert(queued_task("m-b", Priority::Medium)).await.unwrap();

        let ready = store.scan_ready(10, now_ms()).await.unwrap();
        let ids: Vec<_> = ready.iter().map(|t| t.id).collect();

        assert_eq!(ids, vec![critical.id, medium_a.id, medium_b.id, low.id]);
    }

    #[tokio::test]
    async fn test_scan_ready_skips_future_and_claimed_tasks() {
        let store = InMemoryTaskStore::new();
        let now = now_ms();

        let mut future = queued_task("future", Priority::Critical);
        future.next_execution_time = now + 60_000;
        store.insert(future).await.unwrap();

        let running = store.insert(queued_task("running", Priority::High)).await.unwrap();
        store.claim(running.id, "w", Some(5_000), now).await.unwrap();

        let visible = store.insert(queued_task("visible", Priority::Low)).await.unwrap();

        let ready = store.scan_ready(10, now).await.unwrap();
        let ids: Vec<_> = ready.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![visible.id]);
    }

    #[tokio::test]
    async fn test_scan_ready_includes_pending_rows() {
        let store = InMemoryTaskStore::new();

        let mut pending = queued_task("pending", Priority::Medium);
        pending.status = TaskStatus::Pending;
        let inserted = store.insert(pending).await.unwrap();

        let ready = store.scan_ready(10, now_ms()).await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, inserted.id);
    }

    #[tokio::test]
    async fn test_scan_scheduled_respects_time() {
        let store = InMemoryTaskStore::new();
        let now = now_ms();

        let due = store.insert(scheduled_task("due", now - 1_000)).await.unwrap();
        store.insert(scheduled_task("later", now + 60_000)).await.unwrap();

        let found = store.scan_scheduled(now).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, due.id);
    }

    #[tokio::test]
    async fn test_scan_stuck_finds_expired_leases() {
        let store = InMemoryTaskStore::new();
        let now = now_ms();

        let stuck = store.insert(queued_task("stuck", Priority::Medium)).await.unwrap();
        store.claim(stuck.id, "w1", Some(0), now - 10).await.unwrap();

        let healthy = store.insert(queued_task("healthy", Priority::Medium)).await.unwrap();
        store.claim(healthy.id, "w2", Some(60_000), now).await.unwrap();

        let found = store.scan_stuck(now).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, stuck.id);
    }

    #[tokio::test]
    async fn test_scan_retrying_waits_for_backoff() {
        let store = InMemoryTaskStore::new();
        let now = now_ms();

        let task = store.insert(queued_task("retry", Priority::Medium)).await.unwrap();
        store
            .cas_update(
                task.id,
                task.version,
                Box::new(move |t| {
                    t.status = TaskStatus::Retrying;
                    t.next_execution_time = now + 60_000;
                }),
            )
            .await
            .unwrap();

        assert!(store.scan_retrying(now).await.unwrap().is_empty());
        let due = store.scan_retrying(now + 61_000).await.unwrap();
        assert_eq!(due.len(), 1);
    }

    // ============================================================
    // LISTING / AGGREGATES
    // ============================================================

    #[tokio::test]
    async fn test_list_filters_and_pages() {
        let store = InMemoryTaskStore::new();

        for i in 0..5 {
            store
                .insert(queued_task(&format!("bulk-{i}"), Priority::Bulk))
                .await
                .unwrap();
        }
        store.insert(queued_task("solo", Priority::Critical)).await.unwrap();

        let filter = TaskFilter {
            priority: Some(Priority::Bulk),
            ..TaskFilter::default()
        };
        let page = store
            .list(&filter, PageRequest::new(0, 2, SortOrder::CreatedAtAsc))
            .await
            .unwrap();

        assert_eq!(page.total, 5);
        assert_eq!(page.tasks.len(), 2);
        assert_eq!(page.tasks[0].task_name, "bulk-0");

        let last = store
            .list(&filter, PageRequest::new(2, 2, SortOrder::CreatedAtAsc))
            .await
            .unwrap();
        assert_eq!(last.tasks.len(), 1);
        assert_eq!(last.tasks[0].task_name, "bulk-4");
    }

    #[tokio::test]
    async fn test_counts_by_status() {
        let store = InMemoryTaskStore::new();

        store.insert(queued_task("q1", Priority::Medium)).await.unwrap();
        store.insert(queued_task("q2", Priority::Medium)).await.unwrap();
        let claimed = store.insert(queued_task("r1", Priority::Medium)).await.unwrap();
        store
            .claim(claimed.id, "w", Some(5_000), now_ms())
            .await
            .unwrap();

        let counts = store.counts_by_status().await.unwrap();
        assert_eq!(counts.queued, 2);
        assert_eq!(counts.running, 1);
        assert_eq!(counts.total(), 3);
    }

    #[tokio::test]
    async fn test_execution_metrics_aggregates_completed_tasks() {
        let store = InMemoryTaskStore::new();
        let now = now_ms();

        for duration in [100u64, 200, 600] {
            let task = store.insert(queued_task("m", Priority::Medium)).await.unwrap();
            let claimed = store.claim(task.id, "w", Some(5_000), now).await.unwrap();
            store
                .cas_update(
                    claimed.id,
                    claimed.version,
                    Box::new(move |t| {
                        t.status = TaskStatus::Completed;
                        t.execution_duration_ms = Some(duration);
                    }),
                )
                .await
                .unwrap();
        }

        let metrics = store
            .execution_metrics(now - 1_000)
            .await
            .unwrap()
            .expect("metrics should exist");

        assert_eq!(metrics.completed, 3);
        assert_eq!(metrics.min_ms, 100);
        assert_eq!(metrics.max_ms, 600);
        assert!((metrics.average_ms - 300.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_execution_metrics_empty_range() {
        let store = InMemoryTaskStore::new();
        assert!(store.execution_metrics(0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_completed_before() {
        let store = InMemoryTaskStore::new();
        let now = now_ms();

        let done = store.insert(queued_task("done", Priority::Medium)).await.unwrap();
        let claimed = store.claim(done.id, "w", Some(5_000), now).await.unwrap();
        store
            .cas_update(
                claimed.id,
                claimed.version,
                Box::new(|t| t.status = TaskStatus::Completed),
            )
            .await
            .unwrap();
        store.insert(queued_task("live", Priority::Medium)).await.unwrap();

        let deleted = store.delete_completed_before(now + 60_000).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(store.get(done.id).await.unwrap().is_none());

        let counts = store.counts_by_status().await.unwrap();
        assert_eq!(counts.total(), 1);
    }

    // ============================================================
    // SQLITE PARITY
    // ============================================================

    #[tokio::test]
    async fn test_sqlite_insert_claim_round_trip() {
        let store = SqliteTaskStore::open_in_memory().unwrap();

        let task = store.insert(queued_task("sq", Priority::High)).await.unwrap();
        let fetched = store.get(task.id).await.unwrap().unwrap();
        assert_eq!(fetched, task);

        let now = now_ms();
        let claimed = store.claim(task.id, "worker-1", Some(5_000), now).await.unwrap();
        assert_eq!(claimed.status, TaskStatus::Running);
        assert_eq!(claimed.lease_until, Some(now + 5_000));

        let err = store
            .claim(task.id, "worker-2", Some(5_000), now)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_sqlite_cas_version_guard() {
        let store = SqliteTaskStore::open_in_memory().unwrap();
        let task = store.insert(queued_task("cas", Priority::Medium)).await.unwrap();

        store
            .cas_update(task.id, task.version, Box::new(|t| t.retry_count = 1))
            .await
            .unwrap();
        let err = store
            .cas_update(task.id, task.version, Box::new(|t| t.retry_count = 9))
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.get(task.id).await.unwrap().unwrap().retry_count, 1);
    }

    #[tokio::test]
    async fn test_sqlite_scan_ready_ordering() {
        let store = SqliteTaskStore::open_in_memory().unwrap();

        let low = store.insert(queued_task("low", Priority::Low)).await.unwrap();
        let critical = store
            .insert(queued_task("critical", Priority::Critical))
            .await
            .unwrap();

        let ready = store.scan_ready(10, now_ms()).await.unwrap();
        let ids: Vec<_> = ready.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![critical.id, low.id]);
    }

    #[tokio::test]
    async fn test_sqlite_batch_insert_is_atomic_and_ordered() {
        let store = SqliteTaskStore::open_in_memory().unwrap();

        let batch = vec![
            queued_task("b1", Priority::Medium),
            queued_task("b2", Priority::Medium),
            queued_task("b3", Priority::Medium),
        ];
        let inserted = store.insert_batch(batch).await.unwrap();

        assert_eq!(inserted.len(), 3);
        assert!(inserted.windows(2).all(|w| w[0].id < w[1].id));

        let counts = store.counts_by_status().await.unwrap();
        assert_eq!(counts.queued, 3);
    }

    #[tokio::test]
    async fn test_sqlite_statistics_and_cleanup() {
        let store = SqliteTaskStore::open_in_memory().unwrap();
        let now = now_ms();

        let task = store.insert(queued_task("fin", Priority::Medium)).await.unwrap();
        let claimed = store.claim(task.id, "w", Some(5_000), now).await.unwrap();
        store
            .cas_update(
                claimed.id,
                claimed.version,
                Box::new(|t| {
                    t.status = TaskStatus::Completed;
                    t.execution_duration_ms = Some(42);
                }),
            )
            .await
            .unwrap();

        let metrics = store.execution_metrics(now - 1_000).await.unwrap().unwrap();
        assert_eq!(metrics.completed, 1);
        assert_eq!(metrics.min_ms, 42);

        let deleted = store.delete_completed_before(now + 60_000).await.unwrap();
        assert_eq!(deleted, 1);
    }
}
