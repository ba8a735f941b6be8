//! Event emitter abstraction for decoupling components from transport.
//!
//! The registry and coordinator depend on the [`EventEmitter`] trait rather
//! than concrete broadcast channels, enabling testing and alternative sinks
//! for events (logging, mDNS advertisement).

use super::{SessionEvent, SinkEvent};

/// Trait for emitting domain events without knowledge of transport.
pub trait EventEmitter: Send + Sync {
    /// Emits a sink lifecycle event.
    fn emit_sink(&self, event: SinkEvent);

    /// Emits a dispatch session event.
    fn emit_session(&self, event: SessionEvent);
}

/// No-op emitter for testing.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit_sink(&self, _event: SinkEvent) {}

    fn emit_session(&self, _event: SessionEvent) {}
}

/// Logging emitter for debugging and development.
///
/// Logs all events at debug level.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit_sink(&self, event: SinkEvent) {
        tracing::debug!(?event, "sink_event");
    }

    fn emit_session(&self, event: SessionEvent) {
        tracing::debug!(?event, "session_event");
    }
}
