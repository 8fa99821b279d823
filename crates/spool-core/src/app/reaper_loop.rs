//! ReaperLoop - Lease 期限切れの回収
//!
//! # フロー
//! 1. `TaskStore::expired_leases()` で lease を過ぎた running task を取得
//! 2. worker のタイムアウトと同じく、timed-out の outcome を報告
//! 3. その後は retry policy が決める
//!
//! 生きている dispatcher は lease 切れ前に必ず報告するので、回収されるのは
//! 落ちた dispatcher に取り残された attempt だけ。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::domain::{Outcome, QueueError};
use crate::app::queue::QueueService;

pub struct ReaperLoop {
    queue: Arc<QueueService>,
    interval: Duration,
}

impl ReaperLoop {
    pub fn new(queue: Arc<QueueService>, interval: Duration) -> Self {
        Self { queue, interval }
    }

    /// One pass. Returns how many attempts were failed.
    pub async fn reap_once(&self) -> Result<usize, QueueError> {
        let now = self.queue.clock().now();
        let expired = self.queue.store().expired_leases(now).await?;

        let mut reaped = 0;
        for task in expired {
            let outcome = Outcome::timed_out(match task.lease_expires_at {
                Some(at) => format!("lease expired at {}", at.to_rfc3339()),
                None => "lease expired".to_string(),
            });
            self.queue.in_flight().cancel(task.id);

            match self.queue.report_result(task.id, task.attempts, outcome).await {
                Ok(settled) => {
                    warn!(task_id = %task.id, attempt = task.attempts, status = %settled.status, "lease expired, attempt failed");
                    reaped += 1;
                }
                // スキャン後に報告済み、または削除済み
                Err(QueueError::InvalidState { .. } | QueueError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(reaped)
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        debug!(interval_ms = self.interval.as_millis() as u64, "reaper started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            if let Err(e) = self.reap_once().await {
                error!(error = %e, "reaper pass failed");
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        debug!("reaper stopped");
    }
}
