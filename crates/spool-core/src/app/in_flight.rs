//! Cancellation handles of attempts currently executing in this process.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::domain::TaskId;
use crate::ports::{CancelHandle, CancelSignal};

#[derive(Debug, Default)]
pub struct InFlight {
    handles: Mutex<HashMap<TaskId, CancelHandle>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new execution and return the signal to hand to its worker.
    pub fn register(&self, id: TaskId) -> CancelSignal {
        let (handle, signal) = CancelSignal::pair();
        self.lock().insert(id, handle);
        signal
    }

    /// Signal the execution of `id`, if any. Returns whether one was found.
    pub fn cancel(&self, id: TaskId) -> bool {
        match self.lock().get(&id) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: TaskId) {
        self.lock().remove(&id);
    }

    /// Signal every tracked execution. Returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let handles = self.lock();
        for handle in handles.values() {
            handle.cancel();
        }
        handles.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<TaskId, CancelHandle>> {
        self.handles.lock().unwrap_or_else(|p| p.into_inner())
    }
}
