//! TaskStatus - task の状態機械

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a task.
///
/// # 状態遷移
/// - Pending -> Running（dispatcher が claim、attempts += 1）
/// - Running -> Succeeded | Failed
/// - Failed -> Pending（retry policy または手動 retry、予算が残っている間のみ）
/// - 生存中のどの状態からも -> Deleted
/// - Running -> Running（フラグだけの更新。キャンセル要求など）
///
/// Deleted は tombstone。ここから出る遷移はない。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// dispatcher 待ち（`next_eligible_at` まで待つこともある）
    Pending,

    /// claim 済みで worker が実行中
    Running,

    /// Finished successfully.
    Succeeded,

    /// 最後の attempt が失敗。retry しない限り終端
    Failed,

    /// Tombstone.
    Deleted,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::Succeeded,
        TaskStatus::Failed,
        TaskStatus::Deleted,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::Deleted => "deleted",
        }
    }

    /// 通常の list や操作から見える状態か
    pub fn is_live(self) -> bool {
        self != TaskStatus::Deleted
    }

    /// guarded transition で `self` から `next` へ遷移できるか
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Deleted)
                | (Running, Running)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Deleted)
                | (Failed, Pending)
                | (Failed, Deleted)
                | (Succeeded, Deleted)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
