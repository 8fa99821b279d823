//! Impls - ports のプロセス内実装
//!
//! - **InMemoryTaskStore**: CLI とテストで使う task store
//! - **TracingEventSink** / **RecordingEventSink**: event sink
//!
//! 永続化ストアは同じ `TaskStore` trait の裏で別クレートとして実装する。

pub mod event_sinks;
pub mod inmem_store;

pub use self::event_sinks::{RecordingEventSink, TracingEventSink};
pub use self::inmem_store::InMemoryTaskStore;
