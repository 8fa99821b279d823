//! QueueService - the boundary operations consumed by clients and workers.
//!
//! Every mutation is a read-decide-write cycle over
//! `TaskStore::compare_and_transition`. A `Conflict` means another actor
//! moved the task in between; the cycle is re-run against the fresh state
//! and never surfaced to the caller.

use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::app::in_flight::InFlight;
use crate::app::retry::{RetryDecision, RetryPolicy};
use crate::app::status::QueueCounts;
use crate::domain::{AttemptRecord, NewTask, Outcome, QueueError, Task, TaskId, TaskPage, TaskStatus};
use crate::ports::{Clock, ListFilter, Listing, TaskStore, no_change};

const CLEAR_BATCH: usize = 256;

pub struct QueueService {
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    in_flight: Arc<InFlight>,
    wakeup: Arc<Notify>,
    default_max_retries: u32,
}

impl QueueService {
    pub fn new(
        store: Arc<dyn TaskStore>,
        clock: Arc<dyn Clock>,
        policy: RetryPolicy,
        default_max_retries: u32,
    ) -> Self {
        Self {
            store,
            clock,
            policy,
            in_flight: Arc::new(InFlight::new()),
            wakeup: Arc::new(Notify::new()),
            default_max_retries,
        }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn in_flight(&self) -> &Arc<InFlight> {
        &self.in_flight
    }

    /// Notified whenever a task may have become dispatchable.
    pub fn wakeup(&self) -> &Arc<Notify> {
        &self.wakeup
    }

    /// Create a pending task. `max_retries` falls back to the configured default.
    pub async fn enqueue(
        &self,
        payload: impl Into<String>,
        task_type: impl Into<String>,
        max_retries: Option<u32>,
    ) -> Result<Task, QueueError> {
        let max_retries = max_retries.unwrap_or(self.default_max_retries);
        let task = self
            .store
            .create(NewTask::new(payload, task_type, max_retries))
            .await?;

        info!(task_id = %task.id, task_type = %task.task_type, max_retries, "task enqueued");
        self.wakeup.notify_waiters();
        Ok(task)
    }

    /// Tombstones included.
    pub async fn get(&self, id: TaskId) -> Result<Task, QueueError> {
        self.store.get(id).await
    }

    pub async fn list(&self, filter: &ListFilter) -> Result<Listing, QueueError> {
        self.store.list(filter).await
    }

    /// `list` in wire form.
    pub async fn list_page(&self, filter: &ListFilter) -> Result<TaskPage, QueueError> {
        let listing = self.store.list(filter).await?;
        Ok(TaskPage::new(&listing.tasks, listing.next_cursor))
    }

    /// Delete a task.
    ///
    /// A running task is only flagged: its worker is signalled and the task
    /// becomes `deleted` when the attempt reports. Until then a repeated
    /// delete flags it again and returns the running task. Missing or
    /// already deleted ids fail with `NotFound`.
    pub async fn delete(&self, id: TaskId) -> Result<Task, QueueError> {
        loop {
            let task = self.store.get(id).await?;
            match task.status {
                TaskStatus::Deleted => return Err(QueueError::NotFound(id)),
                TaskStatus::Running => {
                    let flagged = self
                        .store
                        .compare_and_transition(
                            id,
                            TaskStatus::Running,
                            TaskStatus::Running,
                            Box::new(|t: &mut Task| {
                                t.cancel_requested = true;
                                Ok(())
                            }),
                        )
                        .await;
                    match flagged {
                        Ok(task) => {
                            self.in_flight.cancel(id);
                            info!(task_id = %id, attempt = task.attempts, "cancellation requested");
                            return Ok(task);
                        }
                        Err(e) if e.is_conflict() => continue,
                        Err(e) => return Err(e),
                    }
                }
                current => {
                    let deleted = self
                        .store
                        .compare_and_transition(id, current, TaskStatus::Deleted, no_change())
                        .await;
                    match deleted {
                        Ok(task) => {
                            info!(task_id = %id, from = %current, "task deleted");
                            return Ok(task);
                        }
                        // Claimed since the read: take the running path.
                        Err(e) if e.is_conflict() => continue,
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }

    /// Manually re-queue a failed task, eligible now.
    ///
    /// Does not add attempts: a task that used its whole budget fails with
    /// `RetryExhausted`.
    pub async fn retry(&self, id: TaskId) -> Result<Task, QueueError> {
        loop {
            let task = self.store.get(id).await?;
            if task.status != TaskStatus::Failed {
                return Err(QueueError::InvalidState {
                    id,
                    status: task.status,
                    operation: "retry",
                });
            }
            if !task.has_retry_budget() {
                return Err(QueueError::RetryExhausted {
                    id,
                    attempts: task.attempts,
                    max_retries: task.max_retries,
                });
            }

            let now = self.clock.now();
            let requeued = self
                .store
                .compare_and_transition(
                    id,
                    TaskStatus::Failed,
                    TaskStatus::Pending,
                    Box::new(move |t: &mut Task| {
                        if !t.has_retry_budget() {
                            return Err(QueueError::RetryExhausted {
                                id: t.id,
                                attempts: t.attempts,
                                max_retries: t.max_retries,
                            });
                        }
                        t.next_eligible_at = now;
                        Ok(())
                    }),
                )
                .await;
            match requeued {
                Ok(task) => {
                    info!(task_id = %id, attempts = task.attempts, "task retried manually");
                    self.wakeup.notify_waiters();
                    return Ok(task);
                }
                Err(e) if e.is_conflict() => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Record the outcome of attempt `attempt`.
    ///
    /// Reports for anything but the task's current running attempt are
    /// stale and fail with `InvalidState`. A task flagged for deletion ends
    /// `deleted` whatever the outcome. Failures go through the retry policy.
    pub async fn report_result(
        &self,
        id: TaskId,
        attempt: u32,
        outcome: Outcome,
    ) -> Result<Task, QueueError> {
        loop {
            let task = self.store.get(id).await?;
            if task.status != TaskStatus::Running || task.attempts != attempt {
                return Err(QueueError::InvalidState {
                    id,
                    status: task.status,
                    operation: "report a result for",
                });
            }

            let cancel_requested = task.cancel_requested;
            let next = if cancel_requested {
                TaskStatus::Deleted
            } else if outcome.is_success() {
                TaskStatus::Succeeded
            } else {
                TaskStatus::Failed
            };

            let recorded = outcome.clone();
            let settled = self
                .store
                .compare_and_transition(
                    id,
                    TaskStatus::Running,
                    next,
                    Box::new(move |t: &mut Task| {
                        if t.attempts != attempt || t.cancel_requested != cancel_requested {
                            return Err(QueueError::Conflict {
                                id: t.id,
                                expected: TaskStatus::Running,
                                actual: t.status,
                            });
                        }
                        t.last_outcome = Some(recorded);
                        t.lease_expires_at = None;
                        Ok(())
                    }),
                )
                .await;

            let task = match settled {
                Ok(task) => task,
                Err(e) if e.is_conflict() => continue,
                Err(e) => return Err(e),
            };

            match next {
                TaskStatus::Failed => {
                    debug!(
                        task_id = %id,
                        attempt,
                        kind = ?outcome.kind,
                        reason = outcome.reason.as_deref().unwrap_or(""),
                        "attempt failed"
                    );
                    return self.apply_retry_policy(task).await;
                }
                status => {
                    debug!(task_id = %id, attempt, status = %status, "attempt settled");
                    return Ok(task);
                }
            }
        }
    }

    async fn apply_retry_policy(&self, task: Task) -> Result<Task, QueueError> {
        let id = task.id;
        let attempts = task.attempts;
        match self.policy.decide(&task, self.clock.now()) {
            RetryDecision::Reschedule { at } => {
                let rescheduled = self
                    .store
                    .compare_and_transition(
                        id,
                        TaskStatus::Failed,
                        TaskStatus::Pending,
                        Box::new(move |t: &mut Task| {
                            if t.attempts != attempts {
                                return Err(QueueError::Conflict {
                                    id: t.id,
                                    expected: TaskStatus::Failed,
                                    actual: t.status,
                                });
                            }
                            t.next_eligible_at = at;
                            Ok(())
                        }),
                    )
                    .await;
                match rescheduled {
                    Ok(task) => {
                        debug!(task_id = %id, attempts, next_eligible_at = %at, "retry scheduled");
                        self.wakeup.notify_waiters();
                        Ok(task)
                    }
                    // Retried or deleted by someone else first.
                    Err(e) if e.is_conflict() => self.store.get(id).await,
                    Err(e) => Err(e),
                }
            }
            RetryDecision::Exhausted => {
                warn!(
                    task_id = %id,
                    attempts,
                    max_retries = task.max_retries,
                    last_error = task.last_error().unwrap_or(""),
                    "retries exhausted"
                );
                Ok(task)
            }
            RetryDecision::Hold => Ok(task),
        }
    }

    pub async fn history(&self, id: TaskId) -> Result<Vec<AttemptRecord>, QueueError> {
        self.store.history(id).await
    }

    pub async fn counts(&self) -> Result<QueueCounts, QueueError> {
        self.store.counts().await
    }

    /// Delete every live task. Running ones are flagged as in `delete`.
    /// Returns how many tasks were deleted or flagged.
    pub async fn clear(&self) -> Result<usize, QueueError> {
        let mut filter = ListFilter::default().limit(CLEAR_BATCH);
        let mut cleared = 0;
        loop {
            let page = self.store.list(&filter).await?;
            for task in &page.tasks {
                match self.delete(task.id).await {
                    Ok(_) => cleared += 1,
                    Err(QueueError::NotFound(_)) => {}
                    Err(e) => return Err(e),
                }
            }
            match page.next_cursor {
                Some(cursor) => filter.after = Some(cursor),
                None => break,
            }
        }
        info!(cleared, "queue cleared");
        Ok(cleared)
    }
}
