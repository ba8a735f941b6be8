//! Event system for observing the bridge.
//!
//! This module provides:
//! - [`EventEmitter`] trait for components to emit events
//! - [`BroadcastEventBridge`] for fan-out over a broadcast channel
//! - Event types for sink lifecycle transitions and dispatch sessions

mod bridge;
mod emitter;

pub use bridge::BroadcastEventBridge;
pub use emitter::{EventEmitter, LoggingEventEmitter, NoopEventEmitter};

use serde::Serialize;

use crate::sink::{Sink, SinkId};

/// Events broadcast to subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "category", rename_all = "camelCase")]
pub enum BroadcastEvent {
    /// Sink lifecycle transitions, emitted by the registry.
    Sink(SinkEvent),

    /// Dispatch session progress, emitted by the coordinator.
    Session(SessionEvent),
}

/// Lifecycle transitions of a sink.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SinkEvent {
    /// A sink was registered for the first time.
    Discovered {
        sink: Sink,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// A known sink was observed again and its address refreshed.
    Refreshed {
        #[serde(rename = "sinkId")]
        sink_id: SinkId,
        timestamp: u64,
    },
    /// A port was assigned to the sink.
    Provisioned { sink: Sink, timestamp: u64 },
    /// Playback was confirmed by the sink.
    Streaming {
        #[serde(rename = "sinkId")]
        sink_id: SinkId,
        timestamp: u64,
    },
    /// The sink was removed and its port released.
    Retired { sink: Sink, timestamp: u64 },
}

/// Progress of a single dispatch session.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    /// A stream-ready signal created a session.
    Started {
        #[serde(rename = "sinkId")]
        sink_id: SinkId,
        #[serde(rename = "streamReference")]
        stream_reference: String,
        timestamp: u64,
    },
    /// The sink acknowledged playback.
    Succeeded {
        #[serde(rename = "sinkId")]
        sink_id: SinkId,
        attempts: u32,
        timestamp: u64,
    },
    /// Dispatch gave up. The sink stays provisioned.
    Failed {
        #[serde(rename = "sinkId")]
        sink_id: SinkId,
        attempts: u32,
        error: String,
        timestamp: u64,
    },
    /// The sink was retired while dispatch was in flight; the result was discarded.
    Voided {
        #[serde(rename = "sinkId")]
        sink_id: SinkId,
        timestamp: u64,
    },
}

impl From<SinkEvent> for BroadcastEvent {
    fn from(event: SinkEvent) -> Self {
        BroadcastEvent::Sink(event)
    }
}

impl From<SessionEvent> for BroadcastEvent {
    fn from(event: SessionEvent) -> Self {
        BroadcastEvent::Session(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_event_serializes_with_category() {
        let event: BroadcastEvent = SessionEvent::Succeeded {
            sink_id: SinkId::from_raw("cast:abc"),
            attempts: 2,
            timestamp: 7,
        }
        .into();
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["category"], "session");
        assert_eq!(json["type"], "succeeded");
        assert_eq!(json["sinkId"], "cast:abc");
        assert_eq!(json["attempts"], 2);
    }
}
