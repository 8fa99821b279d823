//! TaskStore port - すべての task の正本（source of truth）
//!
//! # 設計原則
//! - 共有される可変リソースはストアだけ
//! - 他のコンポーネントは [`TaskStore::compare_and_transition`] 経由でのみ task を更新する
//! - 期待する status の確認と変更は task ごとに1つのアトミックな操作
//! - ストア全体をまたぐロックはない

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::app::status::QueueCounts;
use crate::domain::{AttemptRecord, ListCursor, NewTask, QueueError, Task, TaskId, TaskStatus};

/// guarded transition の中で適用する変更
///
/// `Err` を返すと遷移は中止され、task は変更されない。
pub type Mutator = Box<dyn FnOnce(&mut Task) -> Result<(), QueueError> + Send>;

/// Shorthand for a transition that only changes status.
pub fn no_change() -> Mutator {
    Box::new(|_| Ok(()))
}

/// Filter for `list`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    /// Only tasks in this status. Tombstones are listed only when asked for here.
    pub status: Option<TaskStatus>,
    pub task_type: Option<String>,
    /// Resume strictly after this position.
    pub after: Option<ListCursor>,
    pub limit: Option<usize>,
}

impl ListFilter {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = Some(task_type.into());
        self
    }

    pub fn after(mut self, cursor: ListCursor) -> Self {
        self.after = Some(cursor);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, task: &Task) -> bool {
        let status_ok = match self.status {
            Some(status) => task.status == status,
            None => task.status.is_live(),
        };
        let type_ok = self
            .task_type
            .as_deref()
            .is_none_or(|t| t == task.task_type);
        status_ok && type_ok
    }
}

/// One page of `list`, in FIFO order.
#[derive(Debug, Clone, Default)]
pub struct Listing {
    pub tasks: Vec<Task>,
    /// Present when more matching tasks may follow.
    pub next_cursor: Option<ListCursor>,
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Allocate a fresh id and store the task as Pending with zero attempts.
    async fn create(&self, new: NewTask) -> Result<Task, QueueError>;

    async fn get(&self, id: TaskId) -> Result<Task, QueueError>;

    /// Tasks ordered by (created_at, id), ascending.
    async fn list(&self, filter: &ListFilter) -> Result<Listing, QueueError>;

    /// Atomic guard: fails with `Conflict` unless the task is in `expected`,
    /// otherwise applies `mutator` and moves it to `next`.
    async fn compare_and_transition(
        &self,
        id: TaskId,
        expected: TaskStatus,
        next: TaskStatus,
        mutator: Mutator,
    ) -> Result<Task, QueueError>;

    /// running 以外の task を tombstone にする。`compare_and_transition` と同じ guard の下で判定。
    /// - 存在しない / 削除済み: `NotFound`
    /// - running: `InvalidState`（running の task は attempt の報告でしか抜けない）
    async fn delete(&self, id: TaskId) -> Result<Task, QueueError>;

    /// Pending tasks with `next_eligible_at <= now`, FIFO, at most `limit`.
    async fn eligible(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Task>, QueueError>;

    /// Running tasks whose lease expired at or before `now`.
    async fn expired_leases(&self, now: DateTime<Utc>) -> Result<Vec<Task>, QueueError>;

    async fn history(&self, id: TaskId) -> Result<Vec<AttemptRecord>, QueueError>;

    async fn counts(&self) -> Result<QueueCounts, QueueError>;

    /// 最終更新が `before` より前の tombstone を物理削除
    async fn purge_deleted(&self, before: DateTime<Utc>) -> Result<usize, QueueError>;
}
