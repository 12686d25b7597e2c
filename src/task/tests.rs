#[cfg(test)]
mod tests {
    use crate::task::backoff::BackoffPolicy;
    use crate::task::state::{apply, is_legal, TaskEvent, InvalidTransition};
    use crate::task::types::{now_ms, Priority, Task, TaskId, TaskStatus};

    fn sample_task(status: TaskStatus) -> Task {
        let now = now_ms();
        Task {
            id: TaskId(1),
            task_name: "sample".to_string(),
            task_type: "test".to_string(),
            priority: Priority::Medium,
            status,
            payload: None,
            description: None,
            scheduled_time: None,
            next_execution_time: now,
            timeout_seconds: 300,
            max_retries: 3,
            retry_count: 0,
            last_error: None,
            last_executed_at: None,
            execution_duration_ms: None,
            worker_id: None,
            lease_until: None,
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    // ============================================================
    // PRIORITY TESTS
    // ============================================================

    #[test]
    fn test_priority_weights_are_ordered() {
        assert_eq!(Priority::Critical.weight(), 100);
        assert_eq!(Priority::High.weight(), 75);
        assert_eq!(Priority::Medium.weight(), 50);
        assert_eq!(Priority::Low.weight(), 25);
        assert_eq!(Priority::Bulk.weight(), 1);

        assert!(Priority::Critical.weight() > Priority::High.weight());
        assert!(Priority::Low.weight() > Priority::Bulk.weight());
    }

    #[test]
    fn test_priority_default_is_medium() {
        assert_eq!(Priority::default(), Priority::Medium);
    }

    #[test]
    fn test_priority_round_trips_through_weight() {
        for p in Priority::ALL {
            assert_eq!(Priority::from_weight(p.weight()), Some(p));
        }
        assert_eq!(Priority::from_weight(42), None);
    }

    #[test]
    fn test_priority_serializes_uppercase() {
        let json = serde_json::to_string(&Priority::Critical).unwrap();
        assert_eq!(json, "\"CRITICAL\"");

        let parsed: Priority = serde_json::from_str("\"BULK\"").unwrap();
        assert_eq!(parsed, Priority::Bulk);
    }

    // ============================================================
    // STATUS TESTS
    // ============================================================

    #[test]
    fn test_status_parse_is_case_insensitive() {
        assert_eq!(TaskStatus::parse("queued"), Some(TaskStatus::Queued));
        assert_eq!(TaskStatus::parse("RUNNING"), Some(TaskStatus::Running));
        assert_eq!(TaskStatus::parse("bogus"), None);
    }

    #[test]
    fn test_status_terminal_states() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }

    #[test]
    fn test_task_readiness_depends_on_status_and_time() {
        let now = now_ms();

        let mut task = sample_task(TaskStatus::Queued);
        assert!(task.is_ready(now));

        task.next_execution_time = now + 60_000;
        assert!(!task.is_ready(now));

        let running = sample_task(TaskStatus::Running);
        assert!(!running.is_ready(now));
    }

    #[test]
    fn test_lease_expiry() {
        let now = now_ms();
        let mut task = sample_task(TaskStatus::Running);

        task.lease_until = Some(now + 5_000);
        assert!(!task.lease_expired(now));

        task.lease_until = Some(now - 1);
        assert!(task.lease_expired(now));

        // A RUNNING row without a lease is treated as expired.
        task.lease_until = None;
        assert!(task.lease_expired(now));
    }

    // ============================================================
    // STATE MACHINE TESTS
    // ============================================================

    #[test]
    fn test_admission_transitions() {
        assert_eq!(
            apply(TaskStatus::Pending, TaskEvent::Enqueue),
            Ok(TaskStatus::Queued)
        );
        assert_eq!(
            apply(TaskStatus::Pending, TaskEvent::Schedule),
            Ok(TaskStatus::Scheduled)
        );
    }

    #[test]
    fn test_dispatch_and_outcome_transitions() {
        assert_eq!(
            apply(TaskStatus::Queued, TaskEvent::Claim),
            Ok(TaskStatus::Running)
        );
        assert_eq!(
            apply(TaskStatus::Running, TaskEvent::Complete),
            Ok(TaskStatus::Completed)
        );
        assert_eq!(
            apply(TaskStatus::Running, TaskEvent::Fail { retries_remain: true }),
            Ok(TaskStatus::Retrying)
        );
        assert_eq!(
            apply(TaskStatus::Running, TaskEvent::Fail { retries_remain: false }),
            Ok(TaskStatus::Failed)
        );
    }

    #[test]
    fn test_retry_cycle() {
        assert_eq!(
            apply(TaskStatus::Retrying, TaskEvent::BackoffElapsed),
            Ok(TaskStatus::Queued)
        );
        assert_eq!(
            apply(TaskStatus::Failed, TaskEvent::RequestRetry),
            Ok(TaskStatus::Retrying)
        );
    }

    #[test]
    fn test_pause_and_resume() {
        assert_eq!(
            apply(TaskStatus::Running, TaskEvent::Pause),
            Ok(TaskStatus::Paused)
        );
        assert_eq!(
            apply(TaskStatus::Paused, TaskEvent::Resume),
            Ok(TaskStatus::Queued)
        );
    }

    #[test]
    fn test_cancel_is_legal_from_non_terminal_states() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Scheduled,
            TaskStatus::Queued,
            TaskStatus::Running,
            TaskStatus::Retrying,
            TaskStatus::Paused,
        ] {
            assert_eq!(apply(status, TaskEvent::Cancel), Ok(TaskStatus::Cancelled));
        }
    }

    #[test]
    fn test_terminal_states_reject_every_event() {
        let events = [
            TaskEvent::Enqueue,
            TaskEvent::Schedule,
            TaskEvent::PromoteScheduled,
            TaskEvent::Claim,
            TaskEvent::Complete,
            TaskEvent::Fail { retries_remain: true },
            TaskEvent::BackoffElapsed,
            TaskEvent::Cancel,
            TaskEvent::Pause,
            TaskEvent::Resume,
            TaskEvent::RequestRetry,
        ];

        for status in [TaskStatus::Completed, TaskStatus::Cancelled] {
            for event in events {
                assert_eq!(
                    apply(status, event),
                    Err(InvalidTransition { from: status, event }),
                    "{:?} must be terminal but accepted {:?}",
                    status,
                    event
                );
            }
        }
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        assert!(apply(TaskStatus::Pending, TaskEvent::Claim).is_err());
        assert!(apply(TaskStatus::Queued, TaskEvent::Complete).is_err());
        assert!(apply(TaskStatus::Scheduled, TaskEvent::Claim).is_err());
        assert!(apply(TaskStatus::Retrying, TaskEvent::Claim).is_err());
        assert!(apply(TaskStatus::Failed, TaskEvent::Enqueue).is_err());
    }

    #[test]
    fn test_edge_table_matches_transition_function() {
        // Every status pair reachable through apply() must be present in
        // is_legal(), and terminal states must have no outgoing edges.
        let events = [
            TaskEvent::Enqueue,
            TaskEvent::Schedule,
            TaskEvent::PromoteScheduled,
            TaskEvent::Claim,
            TaskEvent::Complete,
            TaskEvent::Fail { retries_remain: true },
            TaskEvent::Fail { retries_remain: false },
            TaskEvent::BackoffElapsed,
            TaskEvent::Cancel,
            TaskEvent::Pause,
            TaskEvent::Resume,
            TaskEvent::RequestRetry,
        ];

        for from in TaskStatus::ALL {
            for event in events {
                if let Ok(to) = apply(from, event) {
                    assert!(
                        is_legal(from, to),
                        "edge {:?} -> {:?} produced by {:?} missing from table",
                        from,
                        to,
                        event
                    );
                }
            }
        }

        for to in TaskStatus::ALL {
            assert!(!is_legal(TaskStatus::Completed, to));
            assert!(!is_legal(TaskStatus::Cancelled, to));
        }
    }

    // ============================================================
    // BACKOFF TESTS
    // ============================================================

    #[test]
    fn test_backoff_doubles_until_cap() {
        let policy = BackoffPolicy {
            base_ms: 1_000,
            cap_ms: 300_000,
            jitter_ms: 0,
        };

        assert_eq!(policy.delay_ms(1), 1_000);
        assert_eq!(policy.delay_ms(2), 2_000);
        assert_eq!(policy.delay_ms(3), 4_000);
        assert_eq!(policy.delay_ms(5), 16_000);
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = BackoffPolicy {
            base_ms: 1_000,
            cap_ms: 5_000,
            jitter_ms: 0,
        };

        assert_eq!(policy.delay_ms(10), 5_000);
        // Large attempt counts must not overflow.
        assert_eq!(policy.delay_ms(u32::MAX), 5_000);
    }

    #[test]
    fn test_backoff_jitter_stays_in_bounds() {
        let policy = BackoffPolicy {
            base_ms: 1_000,
            cap_ms: 300_000,
            jitter_ms: 100,
        };

        for _ in 0..100 {
            let delay = policy.delay_ms(1);
            assert!(delay >= 1_000 && delay < 1_100, "delay {} out of range", delay);
        }
    }
}
