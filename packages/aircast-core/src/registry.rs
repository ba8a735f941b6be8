//! The authoritative table of known sinks.
//!
//! All lifecycle transitions go through the operations on [`SinkRegistry`].
//! A single coarse lock serializes them; discovery delivers at most a few
//! events per second so contention is not a concern.
//!
//! Lock order is registry, then allocator. Events are emitted only after the
//! registry lock has been released so that emitters may call back into the
//! registry.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::allocator::PortAllocator;
use crate::error::{BridgeError, BridgeResult};
use crate::events::{EventEmitter, SinkEvent};
use crate::sink::{Sink, SinkId, SinkObservation, SinkState};
use crate::utils::now_millis;

/// Result of [`SinkRegistry::provision`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// A port was allocated by this call.
    Provisioned(Sink),
    /// The sink already held a port; nothing changed.
    AlreadyProvisioned(Sink),
}

impl ProvisionOutcome {
    #[must_use]
    pub fn sink(&self) -> &Sink {
        match self {
            Self::Provisioned(sink) | Self::AlreadyProvisioned(sink) => sink,
        }
    }

    #[must_use]
    pub fn into_sink(self) -> Sink {
        match self {
            Self::Provisioned(sink) | Self::AlreadyProvisioned(sink) => sink,
        }
    }
}

struct Inner {
    sinks: HashMap<SinkId, Sink>,
    next_generation: u64,
}

/// Concurrency-safe sink table with lifecycle state.
pub struct SinkRegistry {
    inner: Mutex<Inner>,
    allocator: Arc<PortAllocator>,
    emitter: Arc<dyn EventEmitter>,
}

impl SinkRegistry {
    pub fn new(allocator: Arc<PortAllocator>, emitter: Arc<dyn EventEmitter>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                sinks: HashMap::new(),
                next_generation: 1,
            }),
            allocator,
            emitter,
        }
    }

    /// Records an observation.
    ///
    /// Creates a `Discovered` sink on first sight and returns `is_new = true`.
    /// Otherwise refreshes `address` and `last_seen_at` in place.
    pub fn observe(&self, obs: SinkObservation) -> (Sink, bool) {
        let id = obs.sink_id();
        let now = now_millis();

        let (sink, is_new, address_changed) = {
            let mut inner = self.inner.lock();
            let generation = inner.next_generation;

            if let Some(existing) = inner.sinks.get_mut(&id) {
                let address_changed = existing.address != obs.address;
                existing.address = obs.address;
                existing.last_seen_at = now.max(existing.last_seen_at);
                (existing.clone(), false, address_changed)
            } else {
                let sink = Sink {
                    id: id.clone(),
                    display_name: obs.display_name,
                    address: obs.address,
                    protocol_kind: obs.source_protocol,
                    assigned_port: None,
                    state: SinkState::Discovered,
                    last_seen_at: now,
                    first_seen_at: now,
                    generation,
                };
                inner.next_generation += 1;
                inner.sinks.insert(id, sink.clone());
                (sink, true, false)
            }
        };

        if is_new {
            log::info!(
                "[Registry] Discovered {} '{}' at {}",
                sink.protocol_kind,
                sink.display_name,
                sink.address
            );
            self.emitter.emit_sink(SinkEvent::Discovered {
                sink: sink.clone(),
                timestamp: now,
            });
        } else if address_changed {
            log::info!("[Registry] {} moved to {}", sink.id, sink.address);
            self.emitter.emit_sink(SinkEvent::Refreshed {
                sink_id: sink.id.clone(),
                timestamp: now,
            });
        } else {
            log::trace!("[Registry] {} re-observed", sink.id);
        }

        (sink, is_new)
    }

    /// Assigns a port to a `Discovered` sink.
    ///
    /// Calling it again on a provisioned or streaming sink is a no-op that
    /// returns [`ProvisionOutcome::AlreadyProvisioned`].
    ///
    /// # Errors
    /// - `UnknownSink` if the sink is not registered (or was retired)
    /// - `PoolExhausted` if no port is free; the sink stays `Discovered`
    pub fn provision(&self, id: &SinkId) -> BridgeResult<ProvisionOutcome> {
        let outcome = {
            let mut inner = self.inner.lock();
            let sink = inner
                .sinks
                .get_mut(id)
                .ok_or_else(|| BridgeError::UnknownSink(id.clone()))?;

            match sink.state {
                SinkState::Discovered => {
                    let port = self.allocator.allocate()?;
                    sink.assigned_port = Some(port);
                    sink.state = SinkState::Provisioned;
                    ProvisionOutcome::Provisioned(sink.clone())
                }
                SinkState::Provisioned | SinkState::Streaming => {
                    ProvisionOutcome::AlreadyProvisioned(sink.clone())
                }
                SinkState::Retired => return Err(BridgeError::UnknownSink(id.clone())),
            }
        };

        if let ProvisionOutcome::Provisioned(ref sink) = outcome {
            log::info!(
                "[Registry] Provisioned {} on port {}",
                sink.id,
                sink.assigned_port.unwrap_or_default()
            );
            self.emitter.emit_sink(SinkEvent::Provisioned {
                sink: sink.clone(),
                timestamp: now_millis(),
            });
        }

        Ok(outcome)
    }

    /// `Provisioned → Streaming`. A sink that is already streaming is left as is.
    ///
    /// # Errors
    /// - `UnknownSink` if the sink is not registered (or was retired)
    /// - `InvalidTransition` if the sink has not been provisioned
    pub fn mark_streaming(&self, id: &SinkId) -> BridgeResult<Sink> {
        self.transition_to_streaming(id, None)
    }

    /// Like [`mark_streaming`](Self::mark_streaming), but only if the sink is
    /// still the activation identified by `generation`.
    pub(crate) fn mark_streaming_if_current(
        &self,
        id: &SinkId,
        generation: u64,
    ) -> BridgeResult<Sink> {
        self.transition_to_streaming(id, Some(generation))
    }

    fn transition_to_streaming(&self, id: &SinkId, generation: Option<u64>) -> BridgeResult<Sink> {
        let (sink, changed) = {
            let mut inner = self.inner.lock();
            let sink = inner
                .sinks
                .get_mut(id)
                .filter(|s| generation.map_or(true, |g| s.generation == g))
                .ok_or_else(|| BridgeError::UnknownSink(id.clone()))?;

            match sink.state {
                SinkState::Provisioned => {
                    sink.state = SinkState::Streaming;
                    (sink.clone(), true)
                }
                SinkState::Streaming => (sink.clone(), false),
                from => {
                    return Err(BridgeError::InvalidTransition {
                        sink: id.clone(),
                        from,
                        to: SinkState::Streaming,
                    })
                }
            }
        };

        if changed {
            log::info!("[Registry] {} is streaming", sink.id);
            self.emitter.emit_sink(SinkEvent::Streaming {
                sink_id: sink.id.clone(),
                timestamp: now_millis(),
            });
        }
        Ok(sink)
    }

    /// Retires a sink from any live state, releasing its port.
    ///
    /// The sink is removed from the table; the returned snapshot is the last
    /// one anybody will see.
    ///
    /// # Errors
    /// Returns `UnknownSink` if the sink is not registered.
    pub fn retire(&self, id: &SinkId) -> BridgeResult<Sink> {
        let sink = {
            let mut inner = self.inner.lock();
            let sink = inner
                .sinks
                .remove(id)
                .ok_or_else(|| BridgeError::UnknownSink(id.clone()))?;
            self.finish_retirement(sink)
        };
        self.announce_retirement(&sink);
        Ok(sink)
    }

    /// Retires every sink not observed within `threshold_ms` of `now_ms`.
    ///
    /// The age check and the removal happen under one lock, so a sink that
    /// is re-observed concurrently is never retired by mistake.
    pub fn retire_stale(&self, now_ms: u64, threshold_ms: u64) -> Vec<Sink> {
        let retired: Vec<Sink> = {
            let mut inner = self.inner.lock();
            let stale: Vec<SinkId> = inner
                .sinks
                .values()
                .filter(|s| now_ms.saturating_sub(s.last_seen_at) >= threshold_ms)
                .map(|s| s.id.clone())
                .collect();
            stale
                .iter()
                .filter_map(|id| inner.sinks.remove(id))
                .map(|sink| self.finish_retirement(sink))
                .collect()
        };

        for sink in &retired {
            self.announce_retirement(sink);
        }
        retired
    }

    fn finish_retirement(&self, mut sink: Sink) -> Sink {
        if let Some(port) = sink.assigned_port {
            self.allocator.release(port);
        }
        sink.state = SinkState::Retired;
        sink
    }

    fn announce_retirement(&self, sink: &Sink) {
        log::info!(
            "[Registry] Retired {} '{}'{}",
            sink.id,
            sink.display_name,
            sink.assigned_port
                .map(|p| format!(", released port {}", p))
                .unwrap_or_default()
        );
        self.emitter.emit_sink(SinkEvent::Retired {
            sink: sink.clone(),
            timestamp: now_millis(),
        });
    }

    /// Point-in-time copy of every live sink, ordered by id.
    pub fn snapshot(&self) -> Vec<Sink> {
        let mut sinks: Vec<Sink> = self.inner.lock().sinks.values().cloned().collect();
        sinks.sort_by(|a, b| a.id.cmp(&b.id));
        sinks
    }

    pub fn get(&self, id: &SinkId) -> Option<Sink> {
        self.inner.lock().sinks.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn allocator(&self) -> &Arc<PortAllocator> {
        &self.allocator
    }
}
