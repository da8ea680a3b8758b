//! EventSink trait: the engine's one-way output channel.
//!
//! The engine and the answer nodes push progress through this interface and
//! never learn whether anyone is listening. A transport adapter maps sink
//! events onto whatever live connection exists, which keeps the pipeline
//! testable without any network layer.

use worklens_types::event::TurnEvent;

use super::bus::EventBus;

/// Fire-and-forget event output.
///
/// `emit` must never block or fail; a disconnected or absent consumer is
/// not the emitter's problem.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: TurnEvent);
}

impl EventSink for EventBus {
    fn emit(&self, event: TurnEvent) {
        self.publish(event);
    }
}

/// Sink that drops everything. Used by tests and one-shot CLI runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: TurnEvent) {}
}
