//! Dispatcher - 実行可能な task を claim して worker で実行
//!
//! # フロー
//! 1. 空きスロットの数だけ `TaskStore::eligible()` で取得
//! 2. 1件ずつ claim（`pending -> running`、attempts += 1、lease 設定）
//! 3. execution timeout の下で worker を実行
//! 4. outcome を `QueueService::report_result()` で報告
//!
//! スロットはグループ内の全 dispatcher で共有する semaphore なので、
//! `max_in_flight` はプロセス全体の上限になる。claim の競合に負けたらスキップ。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::app::config::QueueConfig;
use crate::app::queue::QueueService;
use crate::domain::{Outcome, QueueError, Task, TaskStatus};
use crate::ports::clock::after;
use crate::ports::{ExecutionContext, Worker};

pub struct Dispatcher {
    id: usize,
    queue: Arc<QueueService>,
    worker: Arc<dyn Worker>,
    slots: Arc<Semaphore>,
    execution_timeout: Duration,
    lease: Duration,
    poll_interval: Duration,
}

impl Dispatcher {
    pub fn new(
        id: usize,
        queue: Arc<QueueService>,
        worker: Arc<dyn Worker>,
        slots: Arc<Semaphore>,
        config: &QueueConfig,
    ) -> Self {
        Self {
            id,
            queue,
            worker,
            slots,
            execution_timeout: config.execution_timeout(),
            lease: config.lease_duration(),
            poll_interval: config.poll_interval(),
        }
    }

    /// One scan. Claims and starts as many eligible tasks as free slots
    /// allow; returns how many were started.
    pub async fn dispatch_once(&self) -> Result<usize, QueueError> {
        let free = self.slots.available_permits();
        if free == 0 {
            return Ok(0);
        }

        let now = self.queue.clock().now();
        let candidates = self.queue.store().eligible(now, free).await?;

        let mut started = 0;
        for task in candidates {
            let Ok(permit) = Arc::clone(&self.slots).try_acquire_owned() else {
                break;
            };
            match self.claim(&task).await {
                Ok(claimed) => {
                    self.spawn_execution(claimed, permit);
                    started += 1;
                }
                Err(e) if e.is_conflict() => {
                    trace!(dispatcher = self.id, task_id = %task.id, "claim lost");
                }
                Err(e @ QueueError::RetryExhausted { .. }) => {
                    warn!(dispatcher = self.id, task_id = %task.id, error = %e, "pending task has no attempts left");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(started)
    }

    async fn claim(&self, task: &Task) -> Result<Task, QueueError> {
        let now = self.queue.clock().now();
        let lease_expires_at = after(now, self.lease);
        self.queue
            .store()
            .compare_and_transition(
                task.id,
                TaskStatus::Pending,
                TaskStatus::Running,
                Box::new(move |t: &mut Task| {
                    // Rescheduled since the scan.
                    if !t.is_eligible(now) {
                        return Err(QueueError::Conflict {
                            id: t.id,
                            expected: TaskStatus::Pending,
                            actual: t.status,
                        });
                    }
                    t.attempts += 1;
                    t.cancel_requested = false;
                    t.lease_expires_at = Some(lease_expires_at);
                    Ok(())
                }),
            )
            .await
    }

    fn spawn_execution(&self, task: Task, permit: OwnedSemaphorePermit) {
        let queue = Arc::clone(&self.queue);
        let worker = Arc::clone(&self.worker);
        let timeout = self.execution_timeout;
        let dispatcher = self.id;

        tokio::spawn(async move {
            let id = task.id;
            let attempt = task.attempts;
            let signal = queue.in_flight().register(id);

            // claim と登録の間に来た delete はシグナルを送れていない
            if let Ok(current) = queue.get(id).await
                && (current.cancel_requested || current.status == TaskStatus::Deleted)
            {
                queue.in_flight().cancel(id);
            }

            debug!(dispatcher, task_id = %id, task_type = %task.task_type, attempt, "execution started");
            let ctx = ExecutionContext::new(task, signal);
            let outcome = match tokio::time::timeout(timeout, worker.execute(&ctx)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    let reason = QueueError::WorkerTimeout { id, timeout };
                    warn!(dispatcher, task_id = %id, attempt, timeout_ms = timeout.as_millis() as u64, "worker timed out");
                    Outcome::timed_out(reason.to_string())
                }
            };
            queue.in_flight().remove(id);

            match queue.report_result(id, attempt, outcome).await {
                Ok(task) => {
                    debug!(dispatcher, task_id = %id, attempt, status = %task.status, "execution finished");
                }
                // reaper が先に決着させた
                Err(QueueError::InvalidState { status, .. }) => {
                    debug!(dispatcher, task_id = %id, attempt, status = %status, "stale outcome dropped");
                }
                Err(e) => {
                    error!(dispatcher, task_id = %id, attempt, error = %e, "failed to record outcome");
                }
            }

            drop(permit);
            queue.wakeup().notify_waiters();
        });
    }

    /// Scan until shutdown. Wakes on enqueue/retry/completion, on the poll
    /// interval, or on shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let wakeup = Arc::clone(self.queue.wakeup());
        debug!(dispatcher = self.id, "dispatcher started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            // Registered before the scan so a notification during it is not lost.
            let notified = wakeup.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.dispatch_once().await {
                Ok(0) => {}
                Ok(started) => trace!(dispatcher = self.id, started, "dispatched"),
                Err(e) => error!(dispatcher = self.id, error = %e, "dispatch scan failed"),
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = &mut notified => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        debug!(dispatcher = self.id, "dispatcher stopped");
    }
}

/// Dispatcher group handle.
/// - 全 dispatcher が1つの in-flight 上限を共有する
/// - `shutdown_and_join()` で claim を止めて実行中の終了を待つ
pub struct DispatcherGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
    slots: Arc<Semaphore>,
    max_in_flight: usize,
    queue: Arc<QueueService>,
}

impl DispatcherGroup {
    /// Spawn `n` dispatchers.
    pub fn spawn(
        n: usize,
        queue: Arc<QueueService>,
        worker: Arc<dyn Worker>,
        config: &QueueConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let slots = Arc::new(Semaphore::new(config.max_in_flight));

        let mut joins = Vec::with_capacity(n);
        for id in 0..n {
            let dispatcher = Dispatcher::new(
                id,
                Arc::clone(&queue),
                Arc::clone(&worker),
                Arc::clone(&slots),
                config,
            );
            joins.push(tokio::spawn(dispatcher.run(shutdown_rx.clone())));
        }
        info!(dispatchers = n, max_in_flight = config.max_in_flight, "dispatchers started");

        Self {
            shutdown_tx,
            joins,
            slots,
            max_in_flight: config.max_in_flight,
            queue,
        }
    }

    /// Stop claiming new tasks. Running executions continue.
    pub fn request_shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Stop claiming, wait up to `grace` for in-flight executions, then
    /// signal cancellation to whatever is still running.
    ///
    /// Returns true when everything finished within the grace period.
    pub async fn shutdown_and_join(self, grace: Duration) -> bool {
        self.request_shutdown();
        for join in self.joins {
            if let Err(e) = join.await {
                error!(error = %e, "dispatcher task panicked");
            }
        }

        let all = u32::try_from(self.max_in_flight).unwrap_or(u32::MAX);
        let drained = matches!(
            tokio::time::timeout(grace, self.slots.acquire_many(all)).await,
            Ok(Ok(_))
        );
        if !drained {
            let cancelled = self.queue.in_flight().cancel_all();
            warn!(cancelled, grace_ms = grace.as_millis() as u64, "shutdown grace elapsed, cancelling in-flight executions");
        }
        info!(drained, "dispatchers stopped");
        drained
    }
}
