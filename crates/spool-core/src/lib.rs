//! spool-core
//!
//! Core building blocks for the spool job queue.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（task, status, outcome, errors, events, attempt 履歴）
//! - **ports**: 抽象化レイヤー（Clock, IdGenerator, TaskStore, Worker, EventSink）
//! - **impls**: プロセス内実装（InMemoryTaskStore, event sink）
//! - **app**: アプリケーションロジック（queue API, retry, dispatcher, reaper, gc, builder）

pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;

pub use app::{QueueBuilder, QueueConfig, QueueService};
pub use domain::{Outcome, QueueError, Task, TaskId, TaskStatus, TaskView};
