//! QueueBuilder - queue の構築とワイヤリング
//!
//! # Fail-fast
//! - 何かが動き出す前に設定を検証する
//! - 期待される task_type がすべて worker 登録済みかを確認する

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::config::{ConfigError, QueueConfig};
use crate::app::dispatcher::DispatcherGroup;
use crate::app::gc_loop::GcLoop;
use crate::app::queue::QueueService;
use crate::app::reaper_loop::ReaperLoop;
use crate::app::registry::{RegistryError, WorkerRegistry};
use crate::app::retry::RetryPolicy;
use crate::impls::{InMemoryTaskStore, TracingEventSink};
use crate::ports::{Clock, EventSink, SystemClock, TaskStore, Worker};

/// # 使用例
/// ```ignore
/// let app = QueueBuilder::new()
///     .config(config)
///     .register("email", Arc::new(EmailWorker))?
///     .expect_types(&["email"])
///     .build()?;
/// let running = app.start();
/// app.queue().enqueue("hello", "email", None).await?;
/// running.shutdown().await;
/// ```
pub struct QueueBuilder {
    config: QueueConfig,
    clock: Arc<dyn Clock>,
    store: Option<Arc<dyn TaskStore>>,
    events: Arc<dyn EventSink>,
    registry: WorkerRegistry,
    expected_types: Option<Vec<String>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing task types: {0:?}. These types were expected but have no worker.")]
    MissingTaskTypes(Vec<String>),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl QueueBuilder {
    pub fn new() -> Self {
        Self {
            config: QueueConfig::default(),
            clock: Arc::new(SystemClock),
            store: None,
            events: Arc::new(TracingEventSink),
            registry: WorkerRegistry::new(),
            expected_types: None,
        }
    }

    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// 新しい in-memory ストアの代わりに `store` を使う。
    /// [`event_sink`](Self::event_sink) はデフォルトのストアにしか効かない。
    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn register(
        mut self,
        task_type: impl Into<String>,
        worker: Arc<dyn Worker>,
    ) -> Result<Self, RegistryError> {
        self.registry.register(task_type, worker)?;
        Ok(self)
    }

    /// 登録のない type を受け持つ worker
    pub fn fallback(mut self, worker: Arc<dyn Worker>) -> Self {
        self.registry.set_fallback(worker);
        self
    }

    /// `build()` 時に worker が必須の type
    pub fn expect_types(mut self, task_types: &[&str]) -> Self {
        self.expected_types = Some(task_types.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn build(self) -> Result<App, BuildError> {
        self.config.validate()?;

        if let Some(expected) = &self.expected_types {
            let registered = self.registry.registered_types();
            let missing: Vec<String> = expected
                .iter()
                .filter(|t| !registered.contains(t))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingTaskTypes(missing));
            }
        }

        let store = match self.store {
            Some(store) => store,
            None => Arc::new(
                InMemoryTaskStore::new(Arc::clone(&self.clock)).with_event_sink(self.events),
            ),
        };
        let queue = Arc::new(QueueService::new(
            store,
            self.clock,
            RetryPolicy::from_config(&self.config.retry),
            self.config.default_max_retries,
        ));

        Ok(App {
            config: self.config,
            queue,
            worker: Arc::new(self.registry),
        })
    }
}

impl Default for QueueBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// ワイヤリング済みでまだ動いていない queue
pub struct App {
    config: QueueConfig,
    queue: Arc<QueueService>,
    worker: Arc<WorkerRegistry>,
}

impl App {
    pub fn queue(&self) -> &Arc<QueueService> {
        &self.queue
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// dispatcher と reaper と gc loop を起動
    pub fn start(&self) -> RunningApp {
        let config = &self.config;
        let dispatchers = DispatcherGroup::spawn(
            config.dispatchers,
            Arc::clone(&self.queue),
            Arc::clone(&self.worker) as Arc<dyn Worker>,
            config,
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let reaper = ReaperLoop::new(Arc::clone(&self.queue), config.reaper_interval());
        let gc = GcLoop::new(
            Arc::clone(&self.queue),
            config.gc_interval(),
            config.tombstone_ttl(),
        );
        let loops = vec![
            tokio::spawn(reaper.run(shutdown_rx.clone())),
            tokio::spawn(gc.run(shutdown_rx)),
        ];
        info!(
            dispatchers = config.dispatchers,
            workers = self.worker.len(),
            "queue started"
        );

        RunningApp {
            dispatchers,
            shutdown_tx,
            loops,
            grace: config.shutdown_grace(),
        }
    }
}

pub struct RunningApp {
    dispatchers: DispatcherGroup,
    shutdown_tx: watch::Sender<bool>,
    loops: Vec<JoinHandle<()>>,
    grace: std::time::Duration,
}

impl RunningApp {
    /// Graceful shutdown.
    /// 1. claim を止める
    /// 2. grace period の間、実行中の task を待つ
    /// 3. 残りをキャンセルしてから background loop を止める
    ///
    /// grace period 内に実行中の task がすべて終われば true。
    pub async fn shutdown(self) -> bool {
        let drained = self.dispatchers.shutdown_and_join(self.grace).await;

        self.shutdown_tx.send_replace(true);
        for join in self.loops {
            if let Err(e) = join.await {
                error!(error = %e, "background loop panicked");
            }
        }
        info!(drained, "queue stopped");
        drained
    }
}
