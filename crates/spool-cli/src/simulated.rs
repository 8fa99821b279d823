//! Simulated workers for the demo: fixed work durations, some of them flaky.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use spool_core::app::{QueueBuilder, RegistryError};
use spool_core::domain::Outcome;
use spool_core::ports::{ExecutionContext, Worker};
use tracing::info;

/// (type, work in ms, success rate)
const SIMULATED: &[(&str, u64, f64)] = &[
    ("email", 2_000, 1.0),
    ("report", 5_000, 1.0),
    ("data-cleanup", 3_000, 1.0),
    ("sms", 1_000, 1.0),
    ("newsletter", 4_000, 1.0),
    ("takes-long", 10_000, 1.0),
    ("fail", 2_000, 0.25),
    ("fail-absolute", 2_000, 0.0),
];

const GENERIC_WORK_MS: u64 = 2_000;

pub struct SimulatedWorker {
    work: Duration,
    success_rate: f64,
}

impl SimulatedWorker {
    pub fn new(work: Duration, success_rate: f64) -> Self {
        Self { work, success_rate }
    }
}

#[async_trait]
impl Worker for SimulatedWorker {
    async fn execute(&self, ctx: &ExecutionContext) -> Outcome {
        info!(task_id = %ctx.task().id, task_type = %ctx.task_type(), attempt = ctx.attempt(), "processing");
        tokio::select! {
            _ = tokio::time::sleep(self.work) => {
                if rand::random::<f64>() < self.success_rate {
                    Outcome::success()
                } else {
                    Outcome::failure(format!("simulated failure in '{}'", ctx.task_type()))
                }
            }
            _ = ctx.cancel_signal().cancelled() => Outcome::cancelled(),
        }
    }
}

pub fn simulated_types() -> Vec<&'static str> {
    SIMULATED.iter().map(|(t, _, _)| *t).collect()
}

/// Register every simulated type plus a generic fallback, with work
/// durations multiplied by `scale`.
pub fn register(mut builder: QueueBuilder, scale: f64) -> Result<QueueBuilder, RegistryError> {
    let scaled = |ms: u64| Duration::from_millis(ms).mul_f64(scale.max(0.0));
    for &(task_type, ms, rate) in SIMULATED {
        builder = builder.register(task_type, Arc::new(SimulatedWorker::new(scaled(ms), rate)))?;
    }
    Ok(builder.fallback(Arc::new(SimulatedWorker::new(scaled(GENERIC_WORK_MS), 1.0))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use spool_core::domain::{NewTask, OutcomeKind, Task};
    use spool_core::ports::{CancelSignal, Clock, IdGenerator, SystemClock, UlidGenerator};

    fn ctx(signal: CancelSignal) -> ExecutionContext {
        let ids = UlidGenerator::new(Arc::new(SystemClock));
        let task = Task::new(
            ids.generate_task_id(),
            NewTask::new("", "fail-absolute", 0),
            SystemClock.now(),
        );
        ExecutionContext::new(task, signal)
    }

    #[tokio::test]
    async fn zero_rate_always_fails() {
        let worker = SimulatedWorker::new(Duration::ZERO, 0.0);
        let outcome = worker.execute(&ctx(CancelSignal::never())).await;
        assert_eq!(outcome.kind, OutcomeKind::Failure);
    }

    #[tokio::test]
    async fn cancel_cuts_work_short() {
        let worker = SimulatedWorker::new(Duration::from_secs(60), 1.0);
        let (handle, signal) = CancelSignal::pair();
        handle.cancel();
        let outcome = worker.execute(&ctx(signal)).await;
        assert_eq!(outcome.kind, OutcomeKind::Cancelled);
    }

    #[test]
    fn all_types_register() {
        let app = register(QueueBuilder::new(), 0.0)
            .unwrap()
            .expect_types(&simulated_types())
            .build();
        assert!(app.is_ok());
    }
}
