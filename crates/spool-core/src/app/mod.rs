//! App - ports を組み合わせて queue を動かす
//!
//! - **QueueBuilder**: 構築と起動時検証
//! - **QueueService**: enqueue / get / list / delete / retry / report-result
//! - **Dispatcher**: 実行可能な task を claim して実行（pending -> running -> 決着）
//! - **ReaperLoop**: lease が期限切れになった attempt を失敗させる
//! - **GcLoop**: 古い tombstone を削除

pub mod builder;
pub mod config;
pub mod dispatcher;
pub mod gc_loop;
pub mod in_flight;
pub mod queue;
pub mod reaper_loop;
pub mod registry;
pub mod retry;
pub mod status;

#[cfg(test)]
mod scenarios;
#[cfg(test)]
pub(crate) mod testing;

pub use self::builder::{App, BuildError, QueueBuilder, RunningApp};
pub use self::config::{ConfigError, QueueConfig, RetryConfig, RetryMode};
pub use self::dispatcher::{Dispatcher, DispatcherGroup};
pub use self::gc_loop::GcLoop;
pub use self::in_flight::InFlight;
pub use self::queue::QueueService;
pub use self::reaper_loop::ReaperLoop;
pub use self::registry::{RegistryError, WorkerRegistry};
pub use self::retry::{RetryDecision, RetryPolicy};
pub use self::status::QueueCounts;
