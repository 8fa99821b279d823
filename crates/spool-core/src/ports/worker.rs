//! Worker port - the execution contract.
//!
//! A worker runs one claimed attempt and returns exactly one [`Outcome`].
//! The core never looks inside the payload. Cancellation is cooperative:
//! workers should check the [`CancelSignal`] at safe points; one that
//! ignores it is cut off by the execution timeout.

use async_trait::async_trait;
use tokio::sync::watch;

use crate::domain::{Outcome, Task};

#[async_trait]
pub trait Worker: Send + Sync {
    async fn execute(&self, ctx: &ExecutionContext) -> Outcome;
}

/// What a worker gets for one attempt.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    task: Task,
    cancel: CancelSignal,
}

impl ExecutionContext {
    pub fn new(task: Task, cancel: CancelSignal) -> Self {
        Self { task, cancel }
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn task_type(&self) -> &str {
        &self.task.task_type
    }

    pub fn payload(&self) -> &str {
        &self.task.payload
    }

    /// 1-based number of this attempt.
    pub fn attempt(&self) -> u32 {
        self.task.attempts
    }

    pub fn cancel_signal(&self) -> &CancelSignal {
        &self.cancel
    }
}

/// Sending half, held by the dispatcher's in-flight registry.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Receiving half, handed to the worker.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn pair() -> (CancelHandle, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, CancelSignal { rx })
    }

    /// A signal that never fires.
    pub fn never() -> CancelSignal {
        Self::pair().1
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested. Pends forever if the
    /// handle is dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn signal_fires_after_cancel() {
        let (handle, signal) = CancelSignal::pair();
        assert!(!signal.is_cancelled());

        let waiter = tokio::spawn({
            let signal = signal.clone();
            async move { signal.cancelled().await }
        });
        handle.cancel();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(signal.is_cancelled());
    }

    #[tokio::test]
    async fn dropped_handle_never_fires() {
        let (handle, signal) = CancelSignal::pair();
        drop(handle);
        let res = tokio::time::timeout(Duration::from_millis(50), signal.cancelled()).await;
        assert!(res.is_err());
        assert!(!signal.is_cancelled());
    }
}
