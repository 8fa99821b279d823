//! InMemoryTaskStore - in-process implementation of the TaskStore port.
//!
//! # Locking
//! - `rows`: id -> row map. Held only long enough to look up or insert a row.
//! - each row has its own mutex; a guarded transition locks exactly one row.
//! - `index`: FIFO keys per status. Updated while the row lock is held, so a
//!   row's index entry always follows its commit order.
//!
//! Lock order is row -> rows map -> index. Scans take the index alone,
//! copy out at most one batch of keys and release it before touching any
//! row, then resume after the last key seen.
//!
//! Nothing here awaits, so every lock is a `std::sync` lock. A poisoned lock
//! is reported as `StoreUnavailable`.

use std::collections::{BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use crate::app::status::QueueCounts;
use crate::domain::{
    AttemptRecord, ListCursor, NewTask, Outcome, QueueError, Task, TaskEvent, TaskId, TaskStatus,
};
use crate::ports::{
    Clock, EventSink, IdGenerator, ListFilter, Listing, Mutator, NoopEventSink, TaskStore,
    UlidGenerator,
};

/// Task plus its attempt history.
#[derive(Debug)]
struct Row {
    task: Task,
    history: Vec<AttemptRecord>,
}

impl Row {
    fn close_attempt(&mut self, outcome: Outcome, at: DateTime<Utc>) {
        if let Some(open) = self.history.last_mut().filter(|a| a.is_open()) {
            open.finish(outcome, at);
        }
    }

    /// Keep the attempt history in step with a committed transition.
    fn track_attempt(&mut self, from: TaskStatus, to: TaskStatus, at: DateTime<Utc>) {
        match (from, to) {
            (TaskStatus::Pending, TaskStatus::Running) => {
                self.history
                    .push(AttemptRecord::started(self.task.attempts, at));
            }
            (TaskStatus::Running, next) if next != TaskStatus::Running => {
                let outcome = self
                    .task
                    .last_outcome
                    .clone()
                    .unwrap_or_else(Outcome::cancelled);
                self.close_attempt(outcome, at);
            }
            _ => {}
        }
    }
}

#[derive(Debug, Default)]
struct Index {
    all: BTreeSet<ListCursor>,
    by_status: HashMap<TaskStatus, BTreeSet<ListCursor>>,
}

impl Index {
    fn insert(&mut self, key: ListCursor, status: TaskStatus) {
        self.all.insert(key);
        self.by_status.entry(status).or_default().insert(key);
    }

    fn moved(&mut self, key: ListCursor, from: TaskStatus, to: TaskStatus) {
        if from == to {
            return;
        }
        if let Some(set) = self.by_status.get_mut(&from) {
            set.remove(&key);
        }
        self.by_status.entry(to).or_default().insert(key);
    }

    fn remove(&mut self, key: ListCursor, status: TaskStatus) {
        self.all.remove(&key);
        if let Some(set) = self.by_status.get_mut(&status) {
            set.remove(&key);
        }
    }

    /// Up to `max` keys strictly after `after`, in FIFO order.
    fn keys(
        &self,
        status: Option<TaskStatus>,
        after: Option<ListCursor>,
        max: usize,
    ) -> Vec<ListCursor> {
        let set = match status {
            Some(status) => match self.by_status.get(&status) {
                Some(set) => set,
                None => return Vec::new(),
            },
            None => &self.all,
        };
        let lower = after.map_or(Bound::Unbounded, Bound::Excluded);
        set.range((lower, Bound::Unbounded)).take(max).copied().collect()
    }

    fn count(&self, status: TaskStatus) -> usize {
        self.by_status.get(&status).map_or(0, BTreeSet::len)
    }
}

type RowRef = Arc<Mutex<Row>>;

const SCAN_BATCH: usize = 256;

pub struct InMemoryTaskStore {
    rows: RwLock<HashMap<TaskId, RowRef>>,
    index: Mutex<Index>,
    available: AtomicBool,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    events: Arc<dyn EventSink>,
}

impl InMemoryTaskStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            index: Mutex::new(Index::default()),
            available: AtomicBool::new(true),
            ids: Arc::new(UlidGenerator::new(Arc::clone(&clock))),
            clock,
            events: Arc::new(NoopEventSink),
        }
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Take the store offline. Every later call fails with `StoreUnavailable`.
    pub fn close(&self) {
        self.available.store(false, Ordering::SeqCst);
        debug!("task store closed");
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn ensure_available(&self) -> Result<(), QueueError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(QueueError::StoreUnavailable("store is closed".to_string()))
        }
    }

    fn row(&self, id: TaskId) -> Result<RowRef, QueueError> {
        let rows = self.rows.read().map_err(|_| poisoned("rows"))?;
        rows.get(&id).cloned().ok_or(QueueError::NotFound(id))
    }

    fn index(&self) -> Result<MutexGuard<'_, Index>, QueueError> {
        self.index.lock().map_err(|_| poisoned("index"))
    }

    /// Snapshot a task by key, skipping rows purged since the key was read.
    fn read(&self, id: TaskId) -> Result<Option<Task>, QueueError> {
        let row = match self.row(id) {
            Ok(row) => row,
            Err(QueueError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let row = lock_row(&row)?;
        Ok(Some(row.task.clone()))
    }

    fn emit(&self, task: &Task, from: Option<TaskStatus>) {
        self.events.emit(&TaskEvent {
            id: task.id,
            from,
            to: task.status,
            attempts: task.attempts,
            at: task.updated_at,
        });
    }
}

fn lock_row(row: &Mutex<Row>) -> Result<MutexGuard<'_, Row>, QueueError> {
    row.lock().map_err(|_| poisoned("row"))
}

fn poisoned(what: &str) -> QueueError {
    QueueError::StoreUnavailable(format!("{what} lock poisoned"))
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, new: NewTask) -> Result<Task, QueueError> {
        self.ensure_available()?;
        let now = self.clock.now();
        let task = Task::new(self.ids.generate_task_id(), new, now);
        let row: RowRef = Arc::new(Mutex::new(Row {
            task: task.clone(),
            history: Vec::new(),
        }));

        let _guard = lock_row(&row)?;
        {
            let mut rows = self.rows.write().map_err(|_| poisoned("rows"))?;
            if rows.contains_key(&task.id) {
                return Err(QueueError::StoreUnavailable(format!(
                    "id {} already allocated",
                    task.id
                )));
            }
            rows.insert(task.id, Arc::clone(&row));
        }
        self.index()?.insert(task.cursor(), TaskStatus::Pending);
        self.emit(&task, None);

        debug!(task_id = %task.id, task_type = %task.task_type, max_retries = task.max_retries, "task created");
        Ok(task)
    }

    async fn get(&self, id: TaskId) -> Result<Task, QueueError> {
        self.ensure_available()?;
        self.read(id)?.ok_or(QueueError::NotFound(id))
    }

    async fn list(&self, filter: &ListFilter) -> Result<Listing, QueueError> {
        self.ensure_available()?;
        let limit = filter.limit.unwrap_or(usize::MAX);
        // One key past the page is enough to know whether another follows.
        let batch = limit.saturating_add(1).min(SCAN_BATCH);

        let mut listing = Listing::default();
        let mut after = filter.after;
        loop {
            let keys = self.index()?.keys(filter.status, after, batch);
            let exhausted = keys.len() < batch;
            for key in keys {
                after = Some(key);
                let Some(task) = self.read(key.id)? else {
                    continue;
                };
                if !filter.matches(&task) {
                    continue;
                }
                if listing.tasks.len() == limit {
                    listing.next_cursor = listing.tasks.last().map(Task::cursor);
                    return Ok(listing);
                }
                listing.tasks.push(task);
            }
            if exhausted {
                return Ok(listing);
            }
        }
    }

    async fn compare_and_transition(
        &self,
        id: TaskId,
        expected: TaskStatus,
        next: TaskStatus,
        mutator: Mutator,
    ) -> Result<Task, QueueError> {
        self.ensure_available()?;
        let row = self.row(id)?;
        let mut row = lock_row(&row)?;

        let current = row.task.status;
        if current != expected {
            return Err(QueueError::Conflict {
                id,
                expected,
                actual: current,
            });
        }
        if !current.can_transition_to(next) {
            return Err(QueueError::InvalidTransition {
                id,
                from: current,
                to: next,
            });
        }

        let before = row.task.clone();
        if let Err(err) = mutator(&mut row.task) {
            row.task = before;
            return Err(err);
        }
        if !row.task.same_identity(&before) {
            row.task = before;
            return Err(QueueError::InvalidState {
                id,
                status: current,
                operation: "change immutable fields of",
            });
        }
        if row.task.attempts > row.task.max_attempts() {
            let (attempts, max_retries) = (row.task.attempts, row.task.max_retries);
            row.task = before;
            return Err(QueueError::RetryExhausted {
                id,
                attempts,
                max_retries,
            });
        }

        let now = self.clock.now();
        row.task.status = next;
        row.task.updated_at = now;
        row.track_attempt(current, next, now);

        if current != next {
            self.index()?.moved(row.task.cursor(), current, next);
            self.emit(&row.task, Some(current));
            trace!(task_id = %id, from = %current, to = %next, attempts = row.task.attempts, "transition committed");
        }
        Ok(row.task.clone())
    }

    async fn delete(&self, id: TaskId) -> Result<Task, QueueError> {
        self.ensure_available()?;
        let row = self.row(id)?;
        let mut row = lock_row(&row)?;

        let from = row.task.status;
        match from {
            TaskStatus::Deleted => return Err(QueueError::NotFound(id)),
            TaskStatus::Running => {
                return Err(QueueError::InvalidState {
                    id,
                    status: from,
                    operation: "delete",
                });
            }
            _ => {}
        }

        row.task.status = TaskStatus::Deleted;
        row.task.lease_expires_at = None;
        row.task.updated_at = self.clock.now();

        self.index()?.moved(row.task.cursor(), from, TaskStatus::Deleted);
        self.emit(&row.task, Some(from));
        Ok(row.task.clone())
    }

    async fn eligible(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Task>, QueueError> {
        self.ensure_available()?;
        let mut found = Vec::new();
        let mut after = None;
        while found.len() < limit {
            let keys = self
                .index()?
                .keys(Some(TaskStatus::Pending), after, SCAN_BATCH);
            let exhausted = keys.len() < SCAN_BATCH;
            for key in keys {
                after = Some(key);
                if let Some(task) = self.read(key.id)?
                    && task.is_eligible(now)
                {
                    found.push(task);
                    if found.len() == limit {
                        break;
                    }
                }
            }
            if exhausted {
                break;
            }
        }
        Ok(found)
    }

    async fn expired_leases(&self, now: DateTime<Utc>) -> Result<Vec<Task>, QueueError> {
        self.ensure_available()?;
        let keys = self.index()?.keys(Some(TaskStatus::Running), None, usize::MAX);

        let mut found = Vec::new();
        for key in keys {
            if let Some(task) = self.read(key.id)?
                && task.status == TaskStatus::Running
                && task.lease_expires_at.is_some_and(|at| at <= now)
            {
                found.push(task);
            }
        }
        Ok(found)
    }

    async fn history(&self, id: TaskId) -> Result<Vec<AttemptRecord>, QueueError> {
        self.ensure_available()?;
        let row = self.row(id)?;
        let row = lock_row(&row)?;
        Ok(row.history.clone())
    }

    async fn counts(&self) -> Result<QueueCounts, QueueError> {
        self.ensure_available()?;
        let index = self.index()?;
        Ok(QueueCounts {
            pending: index.count(TaskStatus::Pending),
            running: index.count(TaskStatus::Running),
            succeeded: index.count(TaskStatus::Succeeded),
            failed: index.count(TaskStatus::Failed),
            deleted: index.count(TaskStatus::Deleted),
        })
    }

    async fn purge_deleted(&self, before: DateTime<Utc>) -> Result<usize, QueueError> {
        self.ensure_available()?;
        let keys = self.index()?.keys(Some(TaskStatus::Deleted), None, usize::MAX);

        let mut purged = 0;
        for key in keys {
            let row = match self.row(key.id) {
                Ok(row) => row,
                Err(QueueError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            let row = lock_row(&row)?;
            if row.task.status != TaskStatus::Deleted || row.task.updated_at >= before {
                continue;
            }
            self.rows
                .write()
                .map_err(|_| poisoned("rows"))?
                .remove(&key.id);
            self.index()?.remove(key, TaskStatus::Deleted);
            purged += 1;
        }
        if purged > 0 {
            debug!(purged, "tombstones purged");
        }
        Ok(purged)
    }
}
