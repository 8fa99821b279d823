//! Attempt history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::outcome::Outcome;

/// One execution attempt of a task.
///
/// Opened by the claim (`pending -> running`) and closed when the attempt
/// leaves `running`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based attempt number (equals `Task::attempts` at claim time).
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
}

impl AttemptRecord {
    pub fn started(attempt: u32, at: DateTime<Utc>) -> Self {
        Self {
            attempt,
            started_at: at,
            finished_at: None,
            outcome: None,
        }
    }

    pub fn finish(&mut self, outcome: Outcome, at: DateTime<Utc>) {
        self.finished_at = Some(at);
        self.outcome = Some(outcome);
    }

    pub fn is_open(&self) -> bool {
        self.finished_at.is_none()
    }
}
