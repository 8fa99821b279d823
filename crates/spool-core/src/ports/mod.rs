//! Ports - 抽象化レイヤー
//!
//! - **Clock**: 現在時刻
//! - **IdGenerator**: id の採番
//! - **TaskStore**: task の正本（source of truth）
//! - **Worker**: task の実行
//! - **EventSink**: 状態変化の通知先

pub mod clock;
pub mod event_sink;
pub mod id_generator;
pub mod task_store;
pub mod worker;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::event_sink::{EventSink, NoopEventSink};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::task_store::{ListFilter, Listing, Mutator, TaskStore, no_change};
pub use self::worker::{CancelHandle, CancelSignal, ExecutionContext, Worker};
