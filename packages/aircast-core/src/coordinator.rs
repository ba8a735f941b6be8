//! Session coordinator.
//!
//! Consumes discovery events, provisions sinks eagerly, and turns
//! stream-ready signals into exactly one dispatch per session. Dispatch runs
//! without any registry lock held; the result is committed only if the sink
//! is still the same activation it was when the session started.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::discovery::DiscoveryEvent;
use crate::dispatch::AdapterDispatch;
use crate::error::{BridgeError, BridgeResult};
use crate::events::{EventEmitter, SessionEvent};
use crate::normalizer::normalize;
use crate::registry::{ProvisionOutcome, SinkRegistry};
use crate::sink::{Sink, SinkId, SinkState};
use crate::utils::now_millis;

/// Finished sessions kept for diagnostics.
const COMPLETED_SESSION_HISTORY: usize = 64;

/// Where a session stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Dispatching,
    Established,
    Failed,
    Voided,
}

/// One stream-ready signal being (or having been) acted on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub sink_id: SinkId,
    pub stream_reference: String,
    /// Activation of the sink this session targets.
    pub generation: u64,
    pub state: SessionState,
    pub attempts: u32,
    pub started_at: u64,
    pub finished_at: Option<u64>,
    pub error: Option<String>,
}

/// Result of [`SessionCoordinator::on_stream_ready`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamReadyOutcome {
    /// The sink acknowledged playback and is now streaming.
    Dispatched(Session),
    /// The sink was already streaming; nothing was sent.
    AlreadyStreaming(Sink),
    /// Another session for this sink is being dispatched.
    InFlight,
    /// The sink was retired while dispatch was in flight. Nothing was committed.
    Voided(Session),
}

/// Removes the in-flight claim when the session ends, even on unwind.
struct ClaimGuard<'a> {
    in_flight: &'a DashMap<SinkId, Session>,
    sink_id: SinkId,
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.remove(&self.sink_id);
    }
}

/// Ties discovery, registry and dispatch together.
pub struct SessionCoordinator {
    registry: Arc<SinkRegistry>,
    dispatch: Arc<AdapterDispatch>,
    emitter: Arc<dyn EventEmitter>,
    stale_threshold: Duration,
    in_flight: DashMap<SinkId, Session>,
    completed: Mutex<VecDeque<Session>>,
    sessions_started: AtomicU64,
}

impl SessionCoordinator {
    pub fn new(
        registry: Arc<SinkRegistry>,
        dispatch: Arc<AdapterDispatch>,
        emitter: Arc<dyn EventEmitter>,
        stale_threshold: Duration,
    ) -> Self {
        Self {
            registry,
            dispatch,
            emitter,
            stale_threshold,
            in_flight: DashMap::new(),
            completed: Mutex::new(VecDeque::with_capacity(COMPLETED_SESSION_HISTORY)),
            sessions_started: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<SinkRegistry> {
        &self.registry
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Discovery intake
    // ─────────────────────────────────────────────────────────────────────────

    /// Normalizes and records one discovery event, provisioning the sink if
    /// it does not hold a port yet.
    ///
    /// Returns `Ok(None)` for traffic the normalizer filtered out.
    ///
    /// # Errors
    /// - `MalformedObservation` for unusable events
    /// - `PoolExhausted` if no port is free; the sink stays `Discovered` and
    ///   provisioning is retried on its next observation
    pub fn ingest(&self, event: &DiscoveryEvent) -> BridgeResult<Option<Sink>> {
        let Some(observation) = normalize(event)? else {
            return Ok(None);
        };

        let (sink, _) = self.registry.observe(observation);
        if sink.state != SinkState::Discovered {
            return Ok(Some(sink));
        }
        self.registry
            .provision(&sink.id)
            .map(|outcome| Some(outcome.into_sink()))
    }

    /// Drains discovery events and sweeps stale sinks until cancelled.
    ///
    /// This is the single consumer of the discovery channel, so observations
    /// are applied in arrival order.
    pub async fn run(&self, mut rx: mpsc::Receiver<DiscoveryEvent>, sweep_every: Duration, cancel: CancellationToken) {
        log::info!(
            "[Coordinator] Started (sweep every {}s, stale after {}s)",
            sweep_every.as_secs(),
            self.stale_threshold.as_secs()
        );

        let mut sweep = tokio::time::interval_at(tokio::time::Instant::now() + sweep_every, sweep_every);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    self.ingest_logged(&event);
                }
                _ = sweep.tick() => {
                    self.sweep_stale();
                }
            }
        }

        log::info!("[Coordinator] Stopped");
    }

    fn ingest_logged(&self, event: &DiscoveryEvent) {
        match self.ingest(event) {
            Ok(_) => {}
            Err(e @ BridgeError::MalformedObservation(_)) => {
                log::debug!("[Coordinator] Dropped {} event: {}", event.source_protocol, e);
            }
            Err(e @ BridgeError::PoolExhausted { .. }) => {
                log::warn!("[Coordinator] {}; sink left unprovisioned", e);
            }
            Err(e) => log::warn!("[Coordinator] Failed to ingest event: {}", e),
        }
    }

    /// Retires sinks that missed too many discovery windows.
    pub fn sweep_stale(&self) -> Vec<Sink> {
        let retired = self
            .registry
            .retire_stale(now_millis(), self.stale_threshold.as_millis() as u64);
        if !retired.is_empty() {
            log::info!("[Coordinator] Retired {} stale sink(s)", retired.len());
        }
        retired
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sessions
    // ─────────────────────────────────────────────────────────────────────────

    /// Acts on "a stream for `sink_id` is ready at `stream_reference`".
    ///
    /// # Errors
    /// - `UnknownSink` if the sink is not registered (or was retired)
    /// - `PoolExhausted` if the sink had no port and none is free
    /// - `DispatchFailed` once dispatch gives up; the sink stays `Provisioned`
    pub async fn on_stream_ready(
        &self,
        sink_id: &SinkId,
        stream_reference: &str,
    ) -> BridgeResult<StreamReadyOutcome> {
        let current = self
            .registry
            .get(sink_id)
            .ok_or_else(|| BridgeError::UnknownSink(sink_id.clone()))?;
        if current.state == SinkState::Streaming {
            return Ok(StreamReadyOutcome::AlreadyStreaming(current));
        }

        let mut session = Session {
            sink_id: sink_id.clone(),
            stream_reference: stream_reference.to_string(),
            generation: current.generation,
            state: SessionState::Dispatching,
            attempts: 0,
            started_at: now_millis(),
            finished_at: None,
            error: None,
        };

        match self.in_flight.entry(sink_id.clone()) {
            Entry::Occupied(_) => {
                log::debug!("[Coordinator] Session already in flight for {}", sink_id);
                return Ok(StreamReadyOutcome::InFlight);
            }
            Entry::Vacant(slot) => {
                slot.insert(session.clone());
            }
        }
        let _claim = ClaimGuard {
            in_flight: &self.in_flight,
            sink_id: sink_id.clone(),
        };

        // State read after claiming is authoritative: a session that finished
        // between the first look-up and the claim has already committed.
        let sink = match self.registry.provision(sink_id)? {
            ProvisionOutcome::AlreadyProvisioned(sink) if sink.state == SinkState::Streaming => {
                return Ok(StreamReadyOutcome::AlreadyStreaming(sink));
            }
            outcome => outcome.into_sink(),
        };
        session.generation = sink.generation;
        if let Some(mut active) = self.in_flight.get_mut(sink_id) {
            *active = session.clone();
        }

        self.sessions_started.fetch_add(1, Ordering::Relaxed);
        log::info!(
            "[Coordinator] Session started: {} -> {}",
            sink_id,
            stream_reference
        );
        self.emitter.emit_session(SessionEvent::Started {
            sink_id: sink_id.clone(),
            stream_reference: stream_reference.to_string(),
            timestamp: session.started_at,
        });

        let result = self.dispatch.dispatch(&sink, stream_reference).await;
        session.finished_at = Some(now_millis());

        match result {
            Ok(report) => {
                session.attempts = report.attempts;
                match self
                    .registry
                    .mark_streaming_if_current(sink_id, session.generation)
                {
                    Ok(_) => {
                        session.state = SessionState::Established;
                        self.emitter.emit_session(SessionEvent::Succeeded {
                            sink_id: sink_id.clone(),
                            attempts: report.attempts,
                            timestamp: now_millis(),
                        });
                        self.record(session.clone());
                        Ok(StreamReadyOutcome::Dispatched(session))
                    }
                    Err(BridgeError::UnknownSink(_)) => Ok(self.void(session)),
                    Err(e) => Err(e),
                }
            }
            Err(e) => {
                let attempts = match &e {
                    BridgeError::DispatchFailed { attempts, .. } => *attempts,
                    _ => 0,
                };
                session.attempts = attempts;
                if !self.is_current(sink_id, session.generation) {
                    return Ok(self.void(session));
                }
                session.state = SessionState::Failed;
                session.error = Some(e.to_string());
                self.emitter.emit_session(SessionEvent::Failed {
                    sink_id: sink_id.clone(),
                    attempts,
                    error: e.to_string(),
                    timestamp: now_millis(),
                });
                self.record(session);
                Err(e)
            }
        }
    }

    /// The sink has gone away: retire it and release its port.
    ///
    /// A session in flight for the sink is voided when its dispatch returns.
    ///
    /// # Errors
    /// Returns `UnknownSink` if the sink was already retired.
    pub fn on_sink_lost(&self, sink_id: &SinkId) -> BridgeResult<Sink> {
        let sink = self.registry.retire(sink_id)?;
        if self.in_flight.contains_key(sink_id) {
            log::info!(
                "[Coordinator] {} lost with a session in flight; result will be voided",
                sink_id
            );
        }
        Ok(sink)
    }

    fn is_current(&self, sink_id: &SinkId, generation: u64) -> bool {
        self.registry
            .get(sink_id)
            .is_some_and(|s| s.generation == generation)
    }

    fn void(&self, mut session: Session) -> StreamReadyOutcome {
        log::info!(
            "[Coordinator] {} retired during dispatch; session voided",
            session.sink_id
        );
        session.state = SessionState::Voided;
        self.emitter.emit_session(SessionEvent::Voided {
            sink_id: session.sink_id.clone(),
            timestamp: now_millis(),
        });
        self.record(session.clone());
        StreamReadyOutcome::Voided(session)
    }

    fn record(&self, session: Session) {
        let mut completed = self.completed.lock();
        if completed.len() == COMPLETED_SESSION_HISTORY {
            completed.pop_front();
        }
        completed.push_back(session);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Diagnostics
    // ─────────────────────────────────────────────────────────────────────────

    /// Sessions currently dispatching.
    pub fn active_sessions(&self) -> Vec<Session> {
        self.in_flight.iter().map(|e| e.value().clone()).collect()
    }

    /// Most recent finished sessions, oldest first.
    pub fn completed_sessions(&self) -> Vec<Session> {
        self.completed.lock().iter().cloned().collect()
    }

    /// Sessions that reached dispatch since startup.
    pub fn sessions_started(&self) -> u64 {
        self.sessions_started.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::PortAllocator;
    use crate::dispatch::{DispatchError, ProtocolAdapter, RetryPolicy};
    use crate::events::{NoopEventEmitter, SinkEvent};
    use crate::protocol_constants::MEDIA_RENDERER_DEVICE_TYPE;
    use crate::sink::ProtocolKind;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;
    use tokio::sync::Notify;

    /// Adapter that counts calls. Its first call can be held open until
    /// released.
    struct MockAdapter {
        calls: AtomicU32,
        fail: bool,
        gate: Option<Arc<Notify>>,
        entered: Arc<Notify>,
    }

    impl MockAdapter {
        fn ok() -> Arc<Self> {
            Self::build(false, None)
        }

        fn failing() -> Arc<Self> {
            Self::build(true, None)
        }

        fn gated(gate: Arc<Notify>) -> Arc<Self> {
            Self::build(false, Some(gate))
        }

        fn build(fail: bool, gate: Option<Arc<Notify>>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                fail,
                gate,
                entered: Arc::new(Notify::new()),
            })
        }
    }

    #[async_trait]
    impl ProtocolAdapter for MockAdapter {
        fn kind(&self) -> ProtocolKind {
            ProtocolKind::UpnpRenderer
        }

        async fn start_playback(&self, _sink: &Sink, _stream: &str) -> Result<(), DispatchError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.entered.notify_one();
            if let (0, Some(gate)) = (call, &self.gate) {
                gate.notified().await;
            }
            if self.fail {
                Err(DispatchError::Unreachable("no route to host".into()))
            } else {
                Ok(())
            }
        }
    }

    /// Session event names, in emission order.
    #[derive(Default)]
    struct SessionLog(parking_lot::Mutex<Vec<&'static str>>);

    impl SessionLog {
        fn names(&self) -> Vec<&'static str> {
            self.0.lock().clone()
        }
    }

    impl EventEmitter for SessionLog {
        fn emit_sink(&self, _event: SinkEvent) {}

        fn emit_session(&self, event: SessionEvent) {
            let name = match event {
                SessionEvent::Started { .. } => "started",
                SessionEvent::Succeeded { .. } => "succeeded",
                SessionEvent::Failed { .. } => "failed",
                SessionEvent::Voided { .. } => "voided",
            };
            self.0.lock().push(name);
        }
    }

    fn coordinator(adapter: Arc<MockAdapter>, pool: (u16, u16)) -> SessionCoordinator {
        coordinator_with_emitter(adapter, pool, Arc::new(NoopEventEmitter))
    }

    fn coordinator_with_emitter(
        adapter: Arc<MockAdapter>,
        pool: (u16, u16),
        emitter: Arc<dyn EventEmitter>,
    ) -> SessionCoordinator {
        let allocator = Arc::new(PortAllocator::new(pool.0, pool.1).unwrap());
        let registry = Arc::new(SinkRegistry::new(allocator, Arc::new(NoopEventEmitter)));
        let dispatch = Arc::new(
            AdapterDispatch::new(RetryPolicy::new(
                2,
                vec![Duration::from_millis(1)],
                Duration::from_secs(60),
            ))
            .with_adapter(adapter),
        );
        SessionCoordinator::new(registry, dispatch, emitter, Duration::from_secs(90))
    }

    fn renderer(rincon: &str, host: &str) -> DiscoveryEvent {
        DiscoveryEvent::new(ProtocolKind::UpnpRenderer)
            .with_raw_id(format!("uuid:{}::{}", rincon, MEDIA_RENDERER_DEVICE_TYPE))
            .with_address(host, Some(1400))
            .with_record("ST", MEDIA_RENDERER_DEVICE_TYPE)
    }

    #[test]
    fn ingest_provisions_eagerly() {
        let coord = coordinator(MockAdapter::ok(), (5000, 5001));
        let sink = coord.ingest(&renderer("RINCON_A", "10.0.0.1")).unwrap().unwrap();
        assert_eq!(sink.state, SinkState::Provisioned);
        assert_eq!(sink.assigned_port, Some(5000));

        // Re-observation keeps the port
        let again = coord.ingest(&renderer("RINCON_A", "10.0.0.1")).unwrap().unwrap();
        assert_eq!(again.assigned_port, Some(5000));
        assert_eq!(coord.registry().len(), 1);
    }

    #[test]
    fn ingest_filters_and_rejects() {
        let coord = coordinator(MockAdapter::ok(), (5000, 5001));
        let mut other = renderer("RINCON_A", "10.0.0.1");
        other
            .service_record
            .insert("ST".into(), "upnp:rootdevice".into());
        assert_eq!(coord.ingest(&other).unwrap(), None);

        let mut no_addr = renderer("RINCON_A", "10.0.0.1");
        no_addr.address = None;
        assert!(matches!(
            coord.ingest(&no_addr),
            Err(BridgeError::MalformedObservation(_))
        ));
        assert!(coord.registry().is_empty());
    }

    #[test]
    fn exhausted_pool_leaves_sink_discovered_until_a_port_frees() {
        let coord = coordinator(MockAdapter::ok(), (5000, 5000));
        coord.ingest(&renderer("RINCON_A", "10.0.0.1")).unwrap();
        let err = coord.ingest(&renderer("RINCON_B", "10.0.0.2")).unwrap_err();
        assert!(matches!(err, BridgeError::PoolExhausted { .. }));

        let b = SinkId::from_raw("upnp:RINCON_B");
        assert_eq!(coord.registry().get(&b).unwrap().state, SinkState::Discovered);

        coord.on_sink_lost(&SinkId::from_raw("upnp:RINCON_A")).unwrap();
        let b_sink = coord.ingest(&renderer("RINCON_B", "10.0.0.2")).unwrap().unwrap();
        assert_eq!(b_sink.assigned_port, Some(5000));
    }

    #[tokio::test]
    async fn stream_ready_dispatches_once() {
        let adapter = MockAdapter::ok();
        let coord = coordinator(adapter.clone(), (5000, 5001));
        coord.ingest(&renderer("RINCON_A", "10.0.0.1")).unwrap();
        let id = SinkId::from_raw("upnp:RINCON_A");

        let first = coord.on_stream_ready(&id, "http://10.0.0.9:5000/stream").await.unwrap();
        match first {
            StreamReadyOutcome::Dispatched(session) => {
                assert_eq!(session.state, SessionState::Established);
                assert_eq!(session.attempts, 1);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(coord.registry().get(&id).unwrap().state, SinkState::Streaming);

        let second = coord.on_stream_ready(&id, "http://10.0.0.9:5000/stream").await.unwrap();
        assert!(matches!(second, StreamReadyOutcome::AlreadyStreaming(_)));
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 1);
        assert_eq!(coord.sessions_started(), 1);
        assert_eq!(coord.completed_sessions().len(), 1);
    }

    #[tokio::test]
    async fn unknown_sink_is_rejected() {
        let coord = coordinator(MockAdapter::ok(), (5000, 5001));
        let err = coord
            .on_stream_ready(&SinkId::from_raw("cast:nope"), "s")
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::UnknownSink(_)));
    }

    #[tokio::test]
    async fn failure_keeps_sink_provisioned() {
        let adapter = MockAdapter::failing();
        let coord = coordinator(adapter.clone(), (5000, 5001));
        coord.ingest(&renderer("RINCON_A", "10.0.0.1")).unwrap();
        let id = SinkId::from_raw("upnp:RINCON_A");

        let err = coord.on_stream_ready(&id, "s").await.unwrap_err();
        assert!(matches!(err, BridgeError::DispatchFailed { attempts: 2, .. }));
        let sink = coord.registry().get(&id).unwrap();
        assert_eq!(sink.state, SinkState::Provisioned);
        assert_eq!(sink.assigned_port, Some(5000));

        let history = coord.completed_sessions();
        assert_eq!(history[0].state, SessionState::Failed);
        assert!(coord.active_sessions().is_empty());
    }

    #[tokio::test]
    async fn concurrent_signal_sees_in_flight() {
        let gate = Arc::new(Notify::new());
        let adapter = MockAdapter::gated(gate.clone());
        let coord = Arc::new(coordinator(adapter.clone(), (5000, 5001)));
        coord.ingest(&renderer("RINCON_A", "10.0.0.1")).unwrap();
        let id = SinkId::from_raw("upnp:RINCON_A");

        let entered = adapter.entered.clone();
        let first = {
            let coord = coord.clone();
            let id = id.clone();
            tokio::spawn(async move { coord.on_stream_ready(&id, "s").await })
        };
        entered.notified().await;

        assert_eq!(coord.active_sessions().len(), 1);
        let second = coord.on_stream_ready(&id, "s").await.unwrap();
        assert_eq!(second, StreamReadyOutcome::InFlight);

        gate.notify_one();
        let first = first.await.unwrap().unwrap();
        assert!(matches!(first, StreamReadyOutcome::Dispatched(_)));
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retirement_during_dispatch_voids_the_session() {
        let gate = Arc::new(Notify::new());
        let adapter = MockAdapter::gated(gate.clone());
        let coord = Arc::new(coordinator(adapter.clone(), (5000, 5001)));
        coord.ingest(&renderer("RINCON_A", "10.0.0.1")).unwrap();
        let id = SinkId::from_raw("upnp:RINCON_A");

        let entered = adapter.entered.clone();
        let task = {
            let coord = coord.clone();
            let id = id.clone();
            tokio::spawn(async move { coord.on_stream_ready(&id, "s").await })
        };
        entered.notified().await;

        coord.on_sink_lost(&id).unwrap();
        // The device comes straight back as a new activation
        coord.ingest(&renderer("RINCON_A", "10.0.0.1")).unwrap();
        gate.notify_one();

        let outcome = task.await.unwrap().unwrap();
        assert!(matches!(outcome, StreamReadyOutcome::Voided(_)));

        let sink = coord.registry().get(&id).unwrap();
        assert_eq!(sink.state, SinkState::Provisioned);
        assert_eq!(coord.registry().allocator().allocated(), 1);
    }

    #[tokio::test]
    async fn failure_after_retirement_is_voided() {
        let gate = Arc::new(Notify::new());
        let adapter = MockAdapter::build(true, Some(gate.clone()));
        let log = Arc::new(SessionLog::default());
        let coord = Arc::new(coordinator_with_emitter(adapter.clone(), (5000, 5001), log.clone()));
        coord.ingest(&renderer("RINCON_A", "10.0.0.1")).unwrap();
        let id = SinkId::from_raw("upnp:RINCON_A");

        let entered = adapter.entered.clone();
        let task = {
            let coord = coord.clone();
            let id = id.clone();
            tokio::spawn(async move { coord.on_stream_ready(&id, "s").await })
        };
        entered.notified().await;

        coord.on_sink_lost(&id).unwrap();
        gate.notify_one();

        let outcome = task.await.unwrap().unwrap();
        match outcome {
            StreamReadyOutcome::Voided(session) => {
                assert_eq!(session.state, SessionState::Voided);
                assert_eq!(session.attempts, 2);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        // Nothing came back to life and nothing was recorded as failed
        assert!(coord.registry().get(&id).is_none());
        assert_eq!(coord.registry().allocator().allocated(), 0);
        let history = coord.completed_sessions();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].state, SessionState::Voided);
        assert_eq!(log.names(), vec!["started", "voided"]);
        assert!(coord.active_sessions().is_empty());
    }

    #[tokio::test]
    async fn active_session_reflects_the_provisioned_sink() {
        let gate = Arc::new(Notify::new());
        let adapter = MockAdapter::gated(gate.clone());
        let coord = Arc::new(coordinator(adapter.clone(), (5000, 5000)));
        // B stays DISCOVERED until A frees the only port
        coord.ingest(&renderer("RINCON_A", "10.0.0.1")).unwrap();
        let _ = coord.ingest(&renderer("RINCON_B", "10.0.0.2"));
        coord.on_sink_lost(&SinkId::from_raw("upnp:RINCON_A")).unwrap();
        let b = SinkId::from_raw("upnp:RINCON_B");

        let entered = adapter.entered.clone();
        let task = {
            let coord = coord.clone();
            let b = b.clone();
            tokio::spawn(async move { coord.on_stream_ready(&b, "s").await })
        };
        entered.notified().await;

        let sink = coord.registry().get(&b).unwrap();
        assert_eq!(sink.state, SinkState::Provisioned);
        let active = coord.active_sessions();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].sink_id, b);
        assert_eq!(active[0].generation, sink.generation);
        assert_eq!(active[0].state, SessionState::Dispatching);

        gate.notify_one();
        assert!(matches!(
            task.await.unwrap().unwrap(),
            StreamReadyOutcome::Dispatched(_)
        ));
        assert!(coord.active_sessions().is_empty());
    }

    #[tokio::test]
    async fn discovered_sink_is_provisioned_on_stream_ready() {
        let adapter = MockAdapter::ok();
        let coord = coordinator(adapter, (5000, 5000));
        // Fill the pool, then free it so B is left DISCOVERED
        coord.ingest(&renderer("RINCON_A", "10.0.0.1")).unwrap();
        let _ = coord.ingest(&renderer("RINCON_B", "10.0.0.2"));
        coord.on_sink_lost(&SinkId::from_raw("upnp:RINCON_A")).unwrap();

        let b = SinkId::from_raw("upnp:RINCON_B");
        let outcome = coord.on_stream_ready(&b, "s").await.unwrap();
        assert!(matches!(outcome, StreamReadyOutcome::Dispatched(_)));
        assert_eq!(coord.registry().get(&b).unwrap().assigned_port, Some(5000));
    }

    #[tokio::test(start_paused = true)]
    async fn run_consumes_events_until_cancelled() {
        let coord = Arc::new(coordinator(MockAdapter::ok(), (5000, 5010)));
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let task = {
            let coord = coord.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { coord.run(rx, Duration::from_secs(30), cancel).await })
        };

        tx.send(renderer("RINCON_A", "10.0.0.1")).await.unwrap();
        tx.send(renderer("RINCON_B", "10.0.0.2")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(coord.registry().len(), 2);

        cancel.cancel();
        task.await.unwrap();
    }

    #[test]
    fn sweep_stale_keeps_fresh_sinks() {
        let coord = coordinator(MockAdapter::ok(), (5000, 5010));
        coord.ingest(&renderer("RINCON_A", "10.0.0.1")).unwrap();
        assert!(coord.sweep_stale().is_empty());
        assert_eq!(coord.registry().len(), 1);
    }
}
