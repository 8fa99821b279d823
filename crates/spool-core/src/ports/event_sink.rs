//! EventSink port - コミットされた status 変化の通知先
//!
//! `emit` はストアが row lock を持ったまま呼ぶので、1つの task のイベントは
//! コミット順に届く。実装はブロックしてはいけない。

use crate::domain::TaskEvent;

pub trait EventSink: Send + Sync {
    fn emit(&self, event: &TaskEvent);
}

/// Drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: &TaskEvent) {}
}
