//! EventSink implementations.

use std::sync::Mutex;

use tracing::debug;

use crate::domain::{TaskEvent, TaskId, TaskStatus};
use crate::ports::EventSink;

/// Logs every committed transition at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &TaskEvent) {
        match event.from {
            Some(from) => debug!(
                task_id = %event.id,
                from = %from,
                status = %event.to,
                attempt = event.attempts,
                "task transitioned"
            ),
            None => debug!(task_id = %event.id, status = %event.to, "task recorded"),
        }
    }
}

/// Keeps every event in memory. Used to assert status sequences.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<TaskEvent>>,
}

impl RecordingEventSink {
    pub fn events(&self) -> Vec<TaskEvent> {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Statuses `id` entered, in commit order, starting with `pending`.
    pub fn statuses(&self, id: TaskId) -> Vec<TaskStatus> {
        self.events()
            .into_iter()
            .filter(|e| e.id == id)
            .map(|e| e.to)
            .collect()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: &TaskEvent) {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ulid::Ulid;

    #[test]
    fn recording_sink_filters_by_task() {
        let sink = RecordingEventSink::default();
        let a = TaskId::from_ulid(Ulid::new());
        let b = TaskId::from_ulid(Ulid::new());
        let at = Utc::now();

        for (id, from, to) in [
            (a, None, TaskStatus::Pending),
            (b, None, TaskStatus::Pending),
            (a, Some(TaskStatus::Pending), TaskStatus::Running),
        ] {
            sink.emit(&TaskEvent { id, from, to, attempts: 0, at });
        }

        assert_eq!(sink.statuses(a), vec![TaskStatus::Pending, TaskStatus::Running]);
        assert_eq!(sink.statuses(b), vec![TaskStatus::Pending]);
        assert_eq!(sink.events().len(), 3);
    }
}
