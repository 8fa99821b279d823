use serde::{Deserialize, Serialize};

/// Tasks per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub deleted: usize,
}

impl QueueCounts {
    /// tombstone 以外のすべて
    pub fn total_live(&self) -> usize {
        self.pending + self.running + self.succeeded + self.failed
    }

    /// まだ決着していない task（pending または running）
    pub fn outstanding(&self) -> usize {
        self.pending + self.running
    }
}
