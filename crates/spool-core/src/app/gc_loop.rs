//! GcLoop - 古い tombstone の物理削除

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error};

use crate::app::queue::QueueService;
use crate::domain::QueueError;
use crate::ports::clock::before;

/// tombstone になってから `ttl` を過ぎた `deleted` task を削除する。
/// 削除した id が再び払い出されることはない。
pub struct GcLoop {
    queue: Arc<QueueService>,
    interval: Duration,
    ttl: Duration,
}

impl GcLoop {
    pub fn new(queue: Arc<QueueService>, interval: Duration, ttl: Duration) -> Self {
        Self {
            queue,
            interval,
            ttl,
        }
    }

    pub async fn collect_once(&self) -> Result<usize, QueueError> {
        let cutoff = before(self.queue.clock().now(), self.ttl);
        self.queue.store().purge_deleted(cutoff).await
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        debug!(interval_ms = self.interval.as_millis() as u64, ttl_secs = self.ttl.as_secs(), "gc started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            if let Err(e) = self.collect_once().await {
                error!(error = %e, "gc pass failed");
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
        debug!("gc stopped");
    }
}
