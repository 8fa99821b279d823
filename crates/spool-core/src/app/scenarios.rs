//! End-to-end behaviour of a running queue.

use std::sync::Arc;
use std::time::Duration;

use crate::app::config::QueueConfig;
use crate::app::dispatcher::DispatcherGroup;
use crate::app::testing::{
    CountingWorker, SleepyWorker, fast_config, fixture, wait_for, wait_for_status,
};
use crate::domain::{QueueError, TaskStatus};
use crate::ports::ListFilter;

use TaskStatus::*;

#[tokio::test]
async fn enqueued_task_reads_back_pending() {
    let fx = fixture(&fast_config());
    let task = fx.queue.enqueue("payload", "email", Some(2)).await.unwrap();

    let got = fx.queue.get(task.id).await.unwrap();
    assert_eq!(got.status, Pending);
    assert_eq!(got.attempts, 0);
    assert_eq!(got.max_retries, 2);
}

#[tokio::test]
async fn three_failures_with_two_retries_end_failed() {
    let config = fast_config();
    let fx = fixture(&config);
    let group = DispatcherGroup::spawn(2, Arc::clone(&fx.queue), Arc::new(CountingWorker::failing()), &config);

    let task = fx.queue.enqueue("", "fail-absolute", Some(2)).await.unwrap();
    let failed = wait_for(&fx.queue, task.id, |t| t.status == Failed && t.attempts == 3).await;
    assert_eq!(failed.last_error(), Some("forced failure"));

    // No further automatic retry.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        fx.events.statuses(task.id),
        vec![Pending, Running, Failed, Pending, Running, Failed, Pending, Running, Failed]
    );
    assert_eq!(fx.queue.get(task.id).await.unwrap().attempts, 3);
    assert_eq!(fx.queue.history(task.id).await.unwrap().len(), 3);

    group.shutdown_and_join(Duration::from_millis(200)).await;
}

#[tokio::test]
async fn deleted_while_running_stays_deleted_after_success() {
    let config = fast_config();
    let fx = fixture(&config);
    // Ignores the cancel signal and reports success later.
    let group = DispatcherGroup::spawn(
        1,
        Arc::clone(&fx.queue),
        Arc::new(SleepyWorker::stubborn(Duration::from_millis(200))),
        &config,
    );

    let task = fx.queue.enqueue("", "email", None).await.unwrap();
    wait_for_status(&fx.queue, task.id, Running).await;

    let flagged = fx.queue.delete(task.id).await.unwrap();
    assert!(flagged.cancel_requested);

    let done = wait_for_status(&fx.queue, task.id, Deleted).await;
    assert!(done.last_outcome.unwrap().is_success());
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(fx.events.statuses(task.id), vec![Pending, Running, Deleted]);

    group.shutdown_and_join(Duration::from_millis(200)).await;
}

#[tokio::test]
async fn concurrent_dispatchers_claim_each_task_once() {
    let config = QueueConfig {
        max_in_flight: 8,
        ..fast_config()
    };
    let fx = fixture(&config);
    let worker = Arc::new(CountingWorker::default());

    let mut ids = Vec::new();
    for i in 0..100 {
        ids.push(fx.queue.enqueue(format!("{i}"), "sms", None).await.unwrap().id);
    }
    let group = DispatcherGroup::spawn(6, Arc::clone(&fx.queue), worker.clone(), &config);

    for id in &ids {
        wait_for_status(&fx.queue, *id, Succeeded).await;
    }
    group.shutdown_and_join(Duration::from_millis(500)).await;

    let runs = worker.runs();
    assert_eq!(runs.len(), ids.len());
    assert!(runs.values().all(|&n| n == 1), "double execution: {runs:?}");
    for id in &ids {
        assert_eq!(fx.events.statuses(*id), vec![Pending, Running, Succeeded]);
    }
}

#[tokio::test]
async fn transitions_follow_the_lifecycle_graph() {
    let config = QueueConfig {
        max_in_flight: 4,
        ..fast_config()
    };
    let fx = fixture(&config);
    let group = DispatcherGroup::spawn(3, Arc::clone(&fx.queue), Arc::new(CountingWorker::failing()), &config);

    let mut ids = Vec::new();
    for max_retries in 0..5 {
        ids.push(fx.queue.enqueue("", "fail", Some(max_retries)).await.unwrap().id);
    }
    for id in &ids {
        wait_for(&fx.queue, *id, |t| t.status == Failed && !t.has_retry_budget()).await;
    }
    group.shutdown_and_join(Duration::from_millis(200)).await;

    for event in fx.events.events() {
        if let Some(from) = event.from {
            assert!(from.can_transition_to(event.to), "{from} -> {}", event.to);
        }
    }
    for task in fx.queue.list(&ListFilter::default()).await.unwrap().tasks {
        assert_eq!(task.attempts, task.max_retries + 1);
    }
}

#[tokio::test]
async fn manual_retry_rules() {
    let config = QueueConfig {
        default_max_retries: 0,
        ..fast_config()
    };
    let fx = fixture(&config);
    let ok = Arc::new(CountingWorker::default());
    let group = DispatcherGroup::spawn(1, Arc::clone(&fx.queue), ok, &config);

    let done = fx.queue.enqueue("", "sms", None).await.unwrap();
    wait_for_status(&fx.queue, done.id, Succeeded).await;
    assert!(matches!(
        fx.queue.retry(done.id).await,
        Err(QueueError::InvalidState { status: Succeeded, .. })
    ));
    group.shutdown_and_join(Duration::from_millis(200)).await;

    let group = DispatcherGroup::spawn(1, Arc::clone(&fx.queue), Arc::new(CountingWorker::failing()), &config);
    let exhausted = fx.queue.enqueue("", "sms", None).await.unwrap();
    wait_for_status(&fx.queue, exhausted.id, Failed).await;
    assert!(matches!(
        fx.queue.retry(exhausted.id).await,
        Err(QueueError::RetryExhausted { attempts: 1, max_retries: 0, .. })
    ));
    group.shutdown_and_join(Duration::from_millis(200)).await;
}

#[tokio::test]
async fn store_outage_surfaces_to_callers() {
    let fx = fixture(&fast_config());
    let task = fx.queue.enqueue("", "sms", None).await.unwrap();
    fx.store.close();

    for err in [
        fx.queue.get(task.id).await.unwrap_err(),
        fx.queue.delete(task.id).await.unwrap_err(),
        fx.queue.retry(task.id).await.unwrap_err(),
        fx.queue.enqueue("", "sms", None).await.unwrap_err(),
    ] {
        assert!(matches!(err, QueueError::StoreUnavailable(_)), "{err:?}");
    }
}
