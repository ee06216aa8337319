//! End-to-end behaviour of the sync engine against real persistence.

use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use offsync_sync::{
    ConflictResolutionConfig, ConflictStrategy, CustomResolver, Error, FnExecutor, HttpMethod,
    JsonFilePersistence, NetworkMonitor, NewTask, RetryConfig, SyncConfig, SyncConfigUpdate,
    SyncEngine, SyncEvent, SyncTask, TaskPriority, TaskState, TaskType,
};

fn config() -> SyncConfig {
    SyncConfig::default()
        .with_auto_sync(false)
        .with_retry(RetryConfig::new(3).with_initial_delay(Duration::ZERO))
}

fn drain(events: &mut tokio::sync::broadcast::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

#[tokio::test]
async fn test_fails_twice_then_succeeds() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let engine = SyncEngine::builder()
        .config(config())
        .executor(
            TaskType::Api,
            Arc::new(FnExecutor::new(move |_task: SyncTask| {
                let call = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if call < 2 {
                        Err(Error::Network("503 Service Unavailable".to_string()))
                    } else {
                        Ok(json!({"ok": true}))
                    }
                }
            })),
        )
        .build()
        .await
        .unwrap();

    let id = engine
        .add_task(
            NewTask::api("https://api.example.com/cards/1", HttpMethod::Put)
                .with_payload(json!({"qty": 2}))
                .with_max_retries(2),
        )
        .await
        .unwrap();

    // First attempt plus both retries fit in one cycle with zero backoff.
    let report = engine.start_sync().await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(report.tasks_retried, 2);
    assert_eq!(report.tasks_completed, 1);
    assert!(engine.task(&id).is_none());

    let stats = engine.stats();
    assert_eq!(stats.successful_syncs, 1);
    assert_eq!(stats.failed_syncs, 0);
    assert_eq!(stats.retried_attempts, 2);
}

#[tokio::test]
async fn test_missing_custom_resolver_falls_back_to_default() {
    let engine = SyncEngine::builder()
        .config(config())
        .conflict_config(ConflictResolutionConfig {
            default_strategy: ConflictStrategy::ServerWins,
            ..ConflictResolutionConfig::default()
        })
        .executor(
            TaskType::Data,
            Arc::new(FnExecutor::new(|_task: SyncTask| async {
                Err(Error::conflict("stale", json!({"qty": 9})))
            })),
        )
        .build()
        .await
        .unwrap();
    let mut events = engine.subscribe();

    let id = engine
        .add_task(NewTask::data(json!({"qty": 1})).with_strategy(ConflictStrategy::custom("unknown")))
        .await
        .unwrap();
    let report = engine.start_sync().await.unwrap();

    // server-wins produced the server value, so the task is done.
    assert_eq!(report.conflicts_resolved, 1);
    assert!(engine.task(&id).is_none());

    let events = drain(&mut events);
    assert!(events.iter().any(|e| matches!(
        e,
        SyncEvent::ConfigurationError { id: Some(task), message } if task == &id && message.contains("unknown")
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        SyncEvent::ConflictResolved { strategy: ConflictStrategy::ServerWins, .. }
    )));
}

#[tokio::test]
async fn test_registered_custom_resolver_is_used() {
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let recorder = seen.clone();
    let engine = SyncEngine::builder()
        .config(config())
        .custom_resolver(
            "sum",
            CustomResolver::new(|client: &Value, server: &Value| {
                let total = client["qty"].as_i64().unwrap_or(0) + server["qty"].as_i64().unwrap_or(0);
                json!({ "qty": total })
            }),
        )
        .executor(
            TaskType::Data,
            Arc::new(FnExecutor::new(move |task: SyncTask| {
                recorder.lock().push(task.payload.clone());
                let first = task.retry_count == 0;
                async move {
                    if first {
                        Err(Error::conflict("stale", json!({"qty": 3})))
                    } else {
                        Ok(Value::Null)
                    }
                }
            })),
        )
        .build()
        .await
        .unwrap();

    engine
        .add_task(NewTask::data(json!({"qty": 2})).with_strategy(ConflictStrategy::custom("sum")))
        .await
        .unwrap();
    engine.start_sync().await.unwrap();

    assert_eq!(*seen.lock(), vec![json!({"qty": 2}), json!({"qty": 5})]);
    assert!(engine.tasks().is_empty());
}

#[tokio::test]
async fn test_remove_task_twice_is_noop() {
    let engine = SyncEngine::builder().config(config()).build().await.unwrap();
    let id = engine
        .add_data_task(json!({"a": 1}), TaskPriority::Medium)
        .await
        .unwrap();

    assert!(engine.remove_task(&id).await.unwrap());
    assert!(!engine.remove_task(&id).await.unwrap());
    assert!(engine.tasks().is_empty());
}

#[tokio::test]
async fn test_concurrency_limit_is_respected() {
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (running_in, peak_in) = (running.clone(), peak.clone());

    let engine = SyncEngine::builder()
        .config(config().with_max_concurrent_tasks(2))
        .executor(
            TaskType::Data,
            Arc::new(FnExecutor::new(move |_task: SyncTask| {
                let running = running_in.clone();
                let peak = peak_in.clone();
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(Value::Null)
                }
            })),
        )
        .build()
        .await
        .unwrap();

    for n in 0..6 {
        engine
            .add_data_task(json!({ "n": n }), TaskPriority::Medium)
            .await
            .unwrap();
    }
    let report = engine.start_sync().await.unwrap();

    assert_eq!(report.tasks_completed, 6);
    assert_eq!(peak.load(Ordering::SeqCst), 2);
    assert_eq!(engine.status().completed_tasks, 6);
}

#[tokio::test]
async fn test_priority_order_with_single_slot() {
    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let recorder = order.clone();
    let engine = SyncEngine::builder()
        .config(config().with_max_concurrent_tasks(1))
        .executor(
            TaskType::Data,
            Arc::new(FnExecutor::new(move |task: SyncTask| {
                recorder.lock().push(task.payload["name"].clone());
                async { Ok(Value::Null) }
            })),
        )
        .build()
        .await
        .unwrap();

    engine.add_data_task(json!({"name": "low"}), TaskPriority::Low).await.unwrap();
    engine.add_data_task(json!({"name": "medium"}), TaskPriority::Medium).await.unwrap();
    engine.add_data_task(json!({"name": "high"}), TaskPriority::High).await.unwrap();
    engine.start_sync().await.unwrap();

    assert_eq!(*order.lock(), vec![json!("high"), json!("medium"), json!("low")]);
}

#[tokio::test]
async fn test_queue_survives_restart() {
    let dir = TempDir::new().unwrap();

    let id = {
        let persistence = Arc::new(JsonFilePersistence::new(dir.path()).await.unwrap());
        let engine = SyncEngine::builder()
            .config(config())
            .network(NetworkMonitor::offline())
            .persistence(persistence)
            .build()
            .await
            .unwrap();
        engine
            .add_task(
                NewTask::api("https://api.example.com/orders", HttpMethod::Post)
                    .with_payload(json!({"sku": "A-1"}))
                    .with_priority(TaskPriority::High),
            )
            .await
            .unwrap()
    };

    let persistence = Arc::new(JsonFilePersistence::new(dir.path()).await.unwrap());
    let engine = SyncEngine::builder()
        .config(config())
        .persistence(persistence)
        .build()
        .await
        .unwrap();

    let task = engine.task(&id).unwrap();
    assert_eq!(task.priority, TaskPriority::High);
    assert_eq!(task.payload, json!({"sku": "A-1"}));
    assert_eq!(task.state, TaskState::Pending);
}

#[tokio::test]
async fn test_reconnect_runs_pending_tasks() {
    let network = NetworkMonitor::offline();
    let engine = SyncEngine::builder()
        .config(config())
        .network(network.clone())
        .executor(
            TaskType::Data,
            Arc::new(FnExecutor::new(|_task: SyncTask| async { Ok(Value::Null) })),
        )
        .build()
        .await
        .unwrap();
    engine.start().await.unwrap();

    engine
        .add_data_task(json!({"a": 1}), TaskPriority::Medium)
        .await
        .unwrap();
    assert_eq!(engine.tasks().len(), 1);

    engine.on_network_change(true);

    let mut remaining = engine.tasks().len();
    for _ in 0..50 {
        if remaining == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        remaining = engine.tasks().len();
    }
    assert_eq!(remaining, 0);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_stop_auto_sync_halts_periodic_cycles() {
    let engine = SyncEngine::builder()
        .config(
            config()
                .with_auto_sync(true)
                .with_sync_interval(Duration::from_millis(20)),
        )
        .build()
        .await
        .unwrap();
    engine.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(engine.stats().total_cycles >= 1);

    engine.stop_auto_sync().await.unwrap();
    // Let a cycle already in flight settle.
    tokio::time::sleep(Duration::from_millis(30)).await;
    let cycles = engine.stats().total_cycles;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(engine.stats().total_cycles, cycles);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_interval_change_rearms_running_engine() {
    let engine = SyncEngine::builder()
        .config(
            config()
                .with_auto_sync(true)
                .with_sync_interval(Duration::from_secs(3600)),
        )
        .executor(
            TaskType::Data,
            Arc::new(FnExecutor::new(|_task: SyncTask| async { Ok(Value::Null) })),
        )
        .build()
        .await
        .unwrap();
    engine.start().await.unwrap();
    engine
        .add_data_task(json!({"a": 1}), TaskPriority::Medium)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(engine.stats().total_cycles, 0);
    assert_eq!(engine.tasks().len(), 1);

    engine
        .update_config(SyncConfigUpdate {
            sync_interval: Some(Duration::from_millis(20)),
            ..SyncConfigUpdate::default()
        })
        .await
        .unwrap();

    let mut cycles = 0;
    for _ in 0..50 {
        cycles = engine.stats().total_cycles;
        if cycles >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(cycles >= 2);
    assert!(engine.tasks().is_empty());
    assert_eq!(engine.stats().successful_syncs, 1);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_cleanup_expired_tasks() {
    let engine = SyncEngine::builder().config(config()).build().await.unwrap();
    engine
        .add_data_task(json!({"a": 1}), TaskPriority::Medium)
        .await
        .unwrap();

    assert_eq!(engine.cleanup_expired_tasks(Duration::from_secs(3600)).await.unwrap(), 0);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(engine.cleanup_expired_tasks(Duration::from_millis(5)).await.unwrap(), 1);
    assert!(engine.tasks().is_empty());
}

#[tokio::test]
async fn test_conflict_resolution_dry_run() {
    let engine = SyncEngine::builder().config(config()).build().await.unwrap();

    let result = engine
        .test_conflict_resolution(&json!({"a": 1}), &json!({"b": 2}), Some(ConflictStrategy::Merge))
        .unwrap();
    assert_eq!(result.final_value, json!({"a": 1, "b": 2}));

    let missing = engine.test_conflict_resolution(
        &json!({"a": 1}),
        &json!({"a": 2}),
        Some(ConflictStrategy::custom("nope")),
    );
    assert!(matches!(missing, Err(Error::Configuration(_))));
}
