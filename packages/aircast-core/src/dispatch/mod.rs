//! Protocol adapter dispatch.
//!
//! Instructs a sink to start pulling the stream through the adapter
//! registered for its protocol. Adding a protocol means adding one
//! [`ProtocolAdapter`] implementation; nothing else branches on the kind.
//!
//! Every attempt is bounded by a timeout and guarded against adapter panics.
//! Transient failures are retried per [`RetryPolicy`].

pub mod cast;
mod retry;
pub mod upnp;

pub use retry::RetryPolicy;

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use thiserror::Error;

use crate::error::{BridgeError, BridgeResult};
use crate::sink::{ProtocolKind, Sink};
use cast::CastError;
use upnp::SoapError;

/// Failure of a single dispatch attempt.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Soap(#[from] SoapError),

    #[error(transparent)]
    Cast(#[from] CastError),

    /// The sink could not be reached at all.
    #[error("sink unreachable: {0}")]
    Unreachable(String),

    /// The attempt did not finish within the configured bound.
    #[error("attempt timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    /// No adapter is registered for the sink's protocol.
    #[error("no adapter registered for {0}")]
    NoAdapter(ProtocolKind),

    /// The adapter panicked; the panic was contained.
    #[error("adapter panicked: {0}")]
    Panicked(String),
}

impl DispatchError {
    /// Returns true if another attempt may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Soap(e) => e.is_transient(),
            Self::Cast(e) => e.is_transient(),
            Self::Unreachable(_) | Self::Timeout { .. } => true,
            Self::NoAdapter(_) | Self::Panicked(_) => false,
        }
    }
}

/// Protocol-specific way of telling a sink to start playback.
#[async_trait]
pub trait ProtocolAdapter: Send + Sync {
    /// The protocol this adapter drives.
    fn kind(&self) -> ProtocolKind;

    /// Instructs `sink` to pull `stream_reference`.
    ///
    /// Returns only after the device acknowledged playback.
    async fn start_playback(&self, sink: &Sink, stream_reference: &str)
        -> Result<(), DispatchError>;
}

/// Result of a successful dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    /// Attempts used, including the successful one.
    pub attempts: u32,
}

/// Routes playback requests to the adapter matching each sink's protocol.
pub struct AdapterDispatch {
    adapters: HashMap<ProtocolKind, Arc<dyn ProtocolAdapter>>,
    policy: RetryPolicy,
}

impl AdapterDispatch {
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            adapters: HashMap::new(),
            policy,
        }
    }

    /// Registers `adapter` for its protocol, replacing any previous one.
    #[must_use]
    pub fn with_adapter(mut self, adapter: Arc<dyn ProtocolAdapter>) -> Self {
        self.adapters.insert(adapter.kind(), adapter);
        self
    }

    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Dispatches `stream_reference` to `sink`.
    ///
    /// # Errors
    /// Returns `BridgeError::DispatchFailed` carrying the last attempt's error
    /// once retries are exhausted or a non-transient failure occurs.
    pub async fn dispatch(&self, sink: &Sink, stream_reference: &str) -> BridgeResult<DispatchReport> {
        let Some(adapter) = self.adapters.get(&sink.protocol_kind).cloned() else {
            return Err(BridgeError::DispatchFailed {
                sink: sink.id.clone(),
                attempts: 0,
                source: DispatchError::NoAdapter(sink.protocol_kind),
            });
        };

        let max_attempts = self.policy.max_attempts();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let delay = self.policy.delay_before(attempt);
            if !delay.is_zero() {
                log::info!(
                    "[Dispatch] Retrying {} (attempt {}/{}) after {}ms",
                    sink.id,
                    attempt,
                    max_attempts,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            match self.attempt(adapter.as_ref(), sink, stream_reference).await {
                Ok(()) => {
                    log::info!(
                        "[Dispatch] {} playing {} (attempt {})",
                        sink.id,
                        stream_reference,
                        attempt
                    );
                    return Ok(DispatchReport { attempts: attempt });
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    log::warn!("[Dispatch] {} transient error: {}", sink.id, e);
                }
                Err(e) => {
                    log::error!(
                        "[Dispatch] {} failed after {} attempt(s): {}",
                        sink.id,
                        attempt,
                        e
                    );
                    return Err(BridgeError::DispatchFailed {
                        sink: sink.id.clone(),
                        attempts: attempt,
                        source: e,
                    });
                }
            }
        }
    }

    /// One bounded, panic-contained attempt.
    async fn attempt(
        &self,
        adapter: &dyn ProtocolAdapter,
        sink: &Sink,
        stream_reference: &str,
    ) -> Result<(), DispatchError> {
        let timeout = self.policy.attempt_timeout();
        let guarded = AssertUnwindSafe(adapter.start_playback(sink, stream_reference)).catch_unwind();

        match tokio::time::timeout(timeout, guarded).await {
            Ok(Ok(result)) => result,
            Ok(Err(payload)) => Err(DispatchError::Panicked(panic_message(payload.as_ref()))),
            Err(_) => Err(DispatchError::Timeout {
                after_ms: timeout.as_millis() as u64,
            }),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{SinkAddress, SinkId, SinkState};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    enum Behaviour {
        Succeed,
        FailTransient(u32),
        FailPermanent,
        Hang,
        Panic,
    }

    struct MockAdapter {
        calls: AtomicU32,
        behaviour: Behaviour,
    }

    impl MockAdapter {
        fn new(behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                behaviour,
            })
        }
    }

    #[async_trait]
    impl ProtocolAdapter for MockAdapter {
        fn kind(&self) -> ProtocolKind {
            ProtocolKind::UpnpRenderer
        }

        async fn start_playback(&self, _sink: &Sink, _stream: &str) -> Result<(), DispatchError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            match self.behaviour {
                Behaviour::Succeed => Ok(()),
                Behaviour::FailTransient(n) if call <= n => {
                    Err(DispatchError::Unreachable("connection refused".into()))
                }
                Behaviour::FailTransient(_) => Ok(()),
                Behaviour::FailPermanent => Err(SoapError::Fault("UPnPError 402".into()).into()),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(())
                }
                Behaviour::Panic => panic!("adapter blew up"),
            }
        }
    }

    fn sink(kind: ProtocolKind) -> Sink {
        Sink {
            id: SinkId::derive(kind, "RINCON_1"),
            display_name: "Echo".into(),
            address: SinkAddress::new("192.168.1.20", Some(1400)),
            protocol_kind: kind,
            assigned_port: Some(5000),
            state: SinkState::Provisioned,
            last_seen_at: 0,
            first_seen_at: 0,
            generation: 1,
        }
    }

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(
            attempts,
            vec![Duration::from_millis(10)],
            Duration::from_millis(500),
        )
    }

    #[tokio::test]
    async fn success_reports_single_attempt() {
        let adapter = MockAdapter::new(Behaviour::Succeed);
        let dispatch = AdapterDispatch::new(policy(3)).with_adapter(adapter.clone());

        let report = dispatch
            .dispatch(&sink(ProtocolKind::UpnpRenderer), "http://10.0.0.2:5000/stream")
            .await
            .unwrap();
        assert_eq!(report.attempts, 1);
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let adapter = MockAdapter::new(Behaviour::FailTransient(2));
        let dispatch = AdapterDispatch::new(policy(3)).with_adapter(adapter.clone());

        let report = dispatch
            .dispatch(&sink(ProtocolKind::UpnpRenderer), "s")
            .await
            .unwrap();
        assert_eq!(report.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_yields_dispatch_failed() {
        let adapter = MockAdapter::new(Behaviour::FailTransient(10));
        let dispatch = AdapterDispatch::new(policy(3)).with_adapter(adapter.clone());

        let err = dispatch
            .dispatch(&sink(ProtocolKind::UpnpRenderer), "s")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::DispatchFailed { attempts: 3, source: DispatchError::Unreachable(_), .. }
        ));
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failure_stops_immediately() {
        let adapter = MockAdapter::new(Behaviour::FailPermanent);
        let dispatch = AdapterDispatch::new(policy(3)).with_adapter(adapter.clone());

        let err = dispatch
            .dispatch(&sink(ProtocolKind::UpnpRenderer), "s")
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::DispatchFailed { attempts: 1, .. }));
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_attempt_times_out() {
        let adapter = MockAdapter::new(Behaviour::Hang);
        let dispatch = AdapterDispatch::new(policy(2)).with_adapter(adapter.clone());

        let err = dispatch
            .dispatch(&sink(ProtocolKind::UpnpRenderer), "s")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::DispatchFailed {
                attempts: 2,
                source: DispatchError::Timeout { after_ms: 500 },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn panic_is_contained() {
        let adapter = MockAdapter::new(Behaviour::Panic);
        let dispatch = AdapterDispatch::new(policy(3)).with_adapter(adapter.clone());

        let err = dispatch
            .dispatch(&sink(ProtocolKind::UpnpRenderer), "s")
            .await
            .unwrap_err();
        match err {
            BridgeError::DispatchFailed {
                source: DispatchError::Panicked(msg),
                attempts,
                ..
            } => {
                assert_eq!(attempts, 1);
                assert!(msg.contains("blew up"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_adapter_fails_without_attempts() {
        let dispatch = AdapterDispatch::new(policy(3));
        let err = dispatch
            .dispatch(&sink(ProtocolKind::CastV2), "s")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::DispatchFailed {
                attempts: 0,
                source: DispatchError::NoAdapter(ProtocolKind::CastV2),
                ..
            }
        ));
    }
}
