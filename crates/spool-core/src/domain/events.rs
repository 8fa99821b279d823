//! Domain events - コミットされた status 変化ごとに発行

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::TaskId;
use super::status::TaskStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub id: TaskId,
    /// 作成直後は `None`
    pub from: Option<TaskStatus>,
    pub to: TaskStatus,
    pub attempts: u32,
    pub at: DateTime<Utc>,
}
