//! Event bus for turn progress and streamed answer delivery.
//!
//! Provides an `EventBus` that distributes `TurnEvent` messages to all
//! subscribers via a `tokio::sync::broadcast` channel, and the `EventSink`
//! trait the engine emits through.

pub mod bus;
pub mod sink;

pub use bus::EventBus;
pub use sink::{EventSink, NullSink};
