//! Errors - エラー型と運用上の分類

use std::time::Duration;

use super::ids::TaskId;
use super::status::TaskStatus;

/// 呼び出し側がエラーをどう扱うか
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// guarded transition の競合に負けた。読み直して判断し直すか、スキップ
    Contention,
    /// 現在の task の状態ではリクエストが成立しない
    Rejected,
    /// ストアやランタイムの障害。呼び出した操作は失敗する
    Infrastructure,
}

/// Error surfaced by the task store and the queue API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("task {0} not found")]
    NotFound(TaskId),

    #[error("conflict on task {id}: expected status {expected}, found {actual}")]
    Conflict {
        id: TaskId,
        expected: TaskStatus,
        actual: TaskStatus,
    },

    #[error("cannot {operation} task {id} in status {status}")]
    InvalidState {
        id: TaskId,
        status: TaskStatus,
        operation: &'static str,
    },

    #[error("illegal transition for task {id}: {from} -> {to}")]
    InvalidTransition {
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("task {id} has no retries left ({attempts} attempts, max_retries={max_retries})")]
    RetryExhausted {
        id: TaskId,
        attempts: u32,
        max_retries: u32,
    },

    #[error("task store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("worker for task {id} did not report within {timeout:?}")]
    WorkerTimeout { id: TaskId, timeout: Duration },
}

impl QueueError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueueError::Conflict { .. } => ErrorKind::Contention,
            QueueError::StoreUnavailable(_) => ErrorKind::Infrastructure,
            QueueError::NotFound(_)
            | QueueError::InvalidState { .. }
            | QueueError::InvalidTransition { .. }
            | QueueError::RetryExhausted { .. }
            | QueueError::WorkerTimeout { .. } => ErrorKind::Rejected,
        }
    }

    /// 無害な競合。外部クライアントには返さない
    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Contention
    }
}
