//! Task record and its wire view.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::ids::TaskId;
use super::outcome::Outcome;
use super::status::TaskStatus;

/// Version of the external task schema. Renaming or retyping any key in
/// [`TaskView`] or [`TaskPage`] requires a bump.
pub const WIRE_SCHEMA_VERSION: u32 = 1;

/// Input to `enqueue` / `TaskStore::create`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub payload: String,
    pub task_type: String,
    pub max_retries: u32,
}

impl NewTask {
    pub fn new(payload: impl Into<String>, task_type: impl Into<String>, max_retries: u32) -> Self {
        Self {
            payload: payload.into(),
            task_type: task_type.into(),
            max_retries,
        }
    }
}

/// Authoritative task record, owned by the store.
///
/// `id`, `payload`, `task_type`, `max_retries` and `created_at` are fixed at
/// creation; the store rejects any mutation that touches them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: TaskId,
    pub payload: String,
    pub task_type: String,
    pub status: TaskStatus,

    /// Dispatch attempts made so far (including the current one while Running).
    pub attempts: u32,
    pub max_retries: u32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Dispatch gate; set by the retry policy.
    pub next_eligible_at: DateTime<Utc>,

    /// Set by Delete while Running; honoured when the attempt reports.
    pub cancel_requested: bool,

    /// While Running: after this point the reaper may fail the attempt.
    pub lease_expires_at: Option<DateTime<Utc>>,

    pub last_outcome: Option<Outcome>,
}

impl Task {
    pub fn new(id: TaskId, new: NewTask, now: DateTime<Utc>) -> Self {
        Self {
            id,
            payload: new.payload,
            task_type: new.task_type,
            status: TaskStatus::Pending,
            attempts: 0,
            max_retries: new.max_retries,
            created_at: now,
            updated_at: now,
            next_eligible_at: now,
            cancel_requested: false,
            lease_expires_at: None,
            last_outcome: None,
        }
    }

    /// Initial attempt plus `max_retries` retries.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// May this task be dispatched again after a failure?
    pub fn has_retry_budget(&self) -> bool {
        self.attempts <= self.max_retries
    }

    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Pending && self.next_eligible_at <= now
    }

    /// Ordering key: FIFO by creation time, ties broken by id.
    pub fn cursor(&self) -> ListCursor {
        ListCursor {
            created_at: self.created_at,
            id: self.id,
        }
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_outcome
            .as_ref()
            .filter(|o| !o.is_success())
            .and_then(|o| o.reason.as_deref())
    }

    /// Do the creation-time fields match?
    pub fn same_identity(&self, other: &Task) -> bool {
        self.id == other.id
            && self.payload == other.payload
            && self.task_type == other.task_type
            && self.max_retries == other.max_retries
            && self.created_at == other.created_at
    }

    pub fn view(&self) -> TaskView {
        TaskView::from(self)
    }
}

/// Position in FIFO order. Also the list paging cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListCursor {
    pub created_at: DateTime<Utc>,
    pub id: TaskId,
}

/// External task representation.
///
/// Key names are case-sensitive and must match what clients deserialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskView {
    pub id: TaskId,
    pub payload: String,
    #[serde(rename = "type")]
    pub task_type: String,
    pub status: TaskStatus,
    pub attempts: u32,
    pub max_retries: u32,
    pub created_at: String,
}

impl From<&Task> for TaskView {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id,
            payload: task.payload.clone(),
            task_type: task.task_type.clone(),
            status: task.status,
            attempts: task.attempts,
            max_retries: task.max_retries,
            created_at: task.created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// Envelope for `List` responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPage {
    pub schema_version: u32,
    pub tasks: Vec<TaskView>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<ListCursor>,
}

impl TaskPage {
    pub fn new(tasks: &[Task], next_cursor: Option<ListCursor>) -> Self {
        Self {
            schema_version: WIRE_SCHEMA_VERSION,
            tasks: tasks.iter().map(TaskView::from).collect(),
            next_cursor,
        }
    }
}
