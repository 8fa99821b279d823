//! Test fixtures shared by the app-layer tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::app::config::{QueueConfig, RetryMode};
use crate::app::queue::QueueService;
use crate::app::retry::RetryPolicy;
use crate::domain::{Outcome, Task, TaskId, TaskStatus};
use crate::impls::{InMemoryTaskStore, RecordingEventSink};
use crate::ports::{ExecutionContext, FixedClock, Worker};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
}

/// Fast timings, immediate retries.
pub fn fast_config() -> QueueConfig {
    let mut config = QueueConfig {
        poll_interval_ms: 10,
        execution_timeout_ms: 1_000,
        lease_grace_ms: 100,
        reaper_interval_ms: 10,
        gc_interval_ms: 10,
        shutdown_grace_ms: 500,
        ..QueueConfig::default()
    };
    config.retry.mode = RetryMode::Immediate;
    config
}

pub struct Fixture {
    pub clock: Arc<FixedClock>,
    pub events: Arc<RecordingEventSink>,
    pub store: Arc<InMemoryTaskStore>,
    pub queue: Arc<QueueService>,
}

pub fn fixture(config: &QueueConfig) -> Fixture {
    let clock = Arc::new(FixedClock::new(t0()));
    let events = Arc::new(RecordingEventSink::default());
    let store = Arc::new(InMemoryTaskStore::new(clock.clone()).with_event_sink(events.clone()));
    let queue = Arc::new(QueueService::new(
        store.clone(),
        clock.clone(),
        RetryPolicy::from_config(&config.retry),
        config.default_max_retries,
    ));
    Fixture {
        clock,
        events,
        store,
        queue,
    }
}

/// Poll until `id` satisfies `done`, or panic after two seconds.
pub async fn wait_for(queue: &QueueService, id: TaskId, done: impl Fn(&Task) -> bool) -> Task {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let task = queue.get(id).await.unwrap();
        if done(&task) {
            return task;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "task never settled: {task:?}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub async fn wait_for_status(queue: &QueueService, id: TaskId, status: TaskStatus) -> Task {
    wait_for(queue, id, |t| t.status == status).await
}

/// Returns a fixed outcome and counts executions per task.
#[derive(Default)]
pub struct CountingWorker {
    pub fail: bool,
    runs: Mutex<HashMap<TaskId, u32>>,
}

impl CountingWorker {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn runs(&self) -> HashMap<TaskId, u32> {
        self.runs.lock().unwrap().clone()
    }
}

#[async_trait]
impl Worker for CountingWorker {
    async fn execute(&self, ctx: &ExecutionContext) -> Outcome {
        *self.runs.lock().unwrap().entry(ctx.task().id).or_default() += 1;
        tokio::task::yield_now().await;
        if self.fail {
            Outcome::failure("forced failure")
        } else {
            Outcome::success()
        }
    }
}

/// Sleeps, then succeeds. Stops early with `Cancelled` when signalled,
/// unless `stubborn`.
pub struct SleepyWorker {
    pub work: Duration,
    pub stubborn: bool,
}

impl SleepyWorker {
    pub fn new(work: Duration) -> Self {
        Self {
            work,
            stubborn: false,
        }
    }

    pub fn stubborn(work: Duration) -> Self {
        Self {
            work,
            stubborn: true,
        }
    }
}

#[async_trait]
impl Worker for SleepyWorker {
    async fn execute(&self, ctx: &ExecutionContext) -> Outcome {
        if self.stubborn {
            tokio::time::sleep(self.work).await;
            return Outcome::success();
        }
        tokio::select! {
            _ = tokio::time::sleep(self.work) => Outcome::success(),
            _ = ctx.cancel_signal().cancelled() => Outcome::cancelled(),
        }
    }
}
