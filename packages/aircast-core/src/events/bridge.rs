//! Bridge implementation that maps domain events to broadcast transport.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use super::emitter::EventEmitter;
use super::{BroadcastEvent, SessionEvent, SinkEvent};

/// Fans domain events out to `tokio::sync::broadcast` subscribers.
///
/// The bridge also forwards to an optional external emitter that can be set
/// after construction (the RAOP advertiser is attached this way).
#[derive(Clone)]
pub struct BroadcastEventBridge {
    tx: broadcast::Sender<BroadcastEvent>,
    external_emitter: Arc<RwLock<Option<Arc<dyn EventEmitter>>>>,
}

impl BroadcastEventBridge {
    /// Creates a new bridge with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self::with_sender(tx)
    }

    /// Creates a new bridge wrapping an existing broadcast sender.
    pub fn with_sender(tx: broadcast::Sender<BroadcastEvent>) -> Self {
        Self {
            tx,
            external_emitter: Arc::new(RwLock::new(None)),
        }
    }

    /// Sets an external emitter that receives every event before broadcast.
    pub fn set_external_emitter(&self, emitter: Arc<dyn EventEmitter>) {
        *self.external_emitter.write() = Some(emitter);
    }

    /// Returns a new receiver for the broadcast channel.
    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.tx.subscribe()
    }
}

/// Generates an [`EventEmitter`] method that forwards to the external emitter
/// (if set) and then sends to the broadcast channel.
macro_rules! impl_emit {
    ($method:ident, $event_ty:ty, $variant:ident) => {
        fn $method(&self, event: $event_ty) {
            if let Some(ref emitter) = *self.external_emitter.read() {
                emitter.$method(event.clone());
            }
            if let Err(e) = self.tx.send(BroadcastEvent::$variant(event)) {
                log::trace!("[EventBridge] No broadcast receivers: {}", e);
            }
        }
    };
}

impl EventEmitter for BroadcastEventBridge {
    impl_emit!(emit_sink, SinkEvent, Sink);
    impl_emit!(emit_session, SessionEvent, Session);
}
