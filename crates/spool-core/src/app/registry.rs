//! WorkerRegistry - task_type ごとに worker へ振り分け

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::domain::Outcome;
use crate::ports::{ExecutionContext, Worker};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("worker for task type '{0}' is already registered")]
    AlreadyRegistered(String),
}

/// Type -> worker map.
///
/// # 設計
/// - 初期化時に構築し、以降は読み取り専用
/// - 未登録の type は fallback worker があればそちらへ、なければ attempt を失敗させる
#[derive(Default)]
pub struct WorkerRegistry {
    workers: HashMap<String, Arc<dyn Worker>>,
    fallback: Option<Arc<dyn Worker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        task_type: impl Into<String>,
        worker: Arc<dyn Worker>,
    ) -> Result<(), RegistryError> {
        let task_type = task_type.into();
        if self.workers.contains_key(&task_type) {
            return Err(RegistryError::AlreadyRegistered(task_type));
        }
        self.workers.insert(task_type, worker);
        Ok(())
    }

    pub fn set_fallback(&mut self, worker: Arc<dyn Worker>) {
        self.fallback = Some(worker);
    }

    pub fn get(&self, task_type: &str) -> Option<&Arc<dyn Worker>> {
        self.workers.get(task_type)
    }

    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<_> = self.workers.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

#[async_trait]
impl Worker for WorkerRegistry {
    async fn execute(&self, ctx: &ExecutionContext) -> Outcome {
        match self.get(ctx.task_type()).or(self.fallback.as_ref()) {
            Some(worker) => worker.execute(ctx).await,
            None => {
                warn!(task_id = %ctx.task().id, task_type = %ctx.task_type(), "no worker for task type");
                Outcome::failure(format!(
                    "no worker registered for type '{}'",
                    ctx.task_type()
                ))
            }
        }
    }
}
