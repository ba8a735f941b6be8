//! HTTP control API against a live listener.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use aircast_core::events::NoopEventEmitter;
use aircast_core::{
    serve, AdapterDispatch, AppState, DispatchError, EventEmitter, NetworkContext, PortAllocator,
    ProtocolAdapter, ProtocolKind, RetryPolicy, SessionCoordinator, Sink, SinkAddress,
    SinkObservation, SinkRegistry,
};

struct AcceptingAdapter {
    calls: AtomicU32,
    last_reference: Mutex<Option<String>>,
}

#[async_trait]
impl ProtocolAdapter for AcceptingAdapter {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::CastV2
    }

    async fn start_playback(&self, _sink: &Sink, stream_reference: &str) -> Result<(), DispatchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_reference.lock() = Some(stream_reference.to_string());
        Ok(())
    }
}

struct TestServer {
    base: String,
    registry: Arc<SinkRegistry>,
    adapter: Arc<AcceptingAdapter>,
    client: reqwest::Client,
    cancel: CancellationToken,
}

impl TestServer {
    async fn start() -> Self {
        let emitter: Arc<dyn EventEmitter> = Arc::new(NoopEventEmitter);
        let allocator = Arc::new(PortAllocator::new(5000, 5001).unwrap());
        let registry = Arc::new(SinkRegistry::new(allocator, Arc::clone(&emitter)));
        let adapter = Arc::new(AcceptingAdapter {
            calls: AtomicU32::new(0),
            last_reference: Mutex::new(None),
        });
        let dispatch = AdapterDispatch::new(RetryPolicy::new(
            1,
            Vec::new(),
            Duration::from_secs(2),
        ))
        .with_adapter(Arc::clone(&adapter) as Arc<dyn ProtocolAdapter>);
        let coordinator = Arc::new(SessionCoordinator::new(
            Arc::clone(&registry),
            Arc::new(dispatch),
            emitter,
            Duration::from_secs(90),
        ));

        let network = NetworkContext::explicit(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 2)));
        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let cancel = CancellationToken::new();
        tokio::spawn(serve(
            listener,
            AppState::new(coordinator, network),
            cancel.clone(),
        ));

        Self {
            base,
            registry,
            adapter,
            client: reqwest::Client::new(),
            cancel,
        }
    }

    fn observe(&self, raw_id: &str) -> Sink {
        self.registry
            .observe(SinkObservation {
                source_protocol: ProtocolKind::CastV2,
                raw_id: raw_id.to_string(),
                display_name: format!("{} (Chromecast)", raw_id),
                address: SinkAddress::new("10.0.0.7", Some(8009)),
            })
            .0
    }

    async fn get(&self, path: &str) -> (u16, Value) {
        let resp = self
            .client
            .get(format!("{}{}", self.base, path))
            .send()
            .await
            .unwrap();
        (resp.status().as_u16(), resp.json().await.unwrap())
    }

    async fn post(&self, path: &str, body: &str) -> (u16, Value) {
        let resp = self
            .client
            .post(format!("{}{}", self.base, path))
            .header("content-type", "application/json")
            .body(body.to_string())
            .send()
            .await
            .unwrap();
        (resp.status().as_u16(), resp.json().await.unwrap())
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[tokio::test]
async fn health_reports_service_and_counts() {
    let server = TestServer::start().await;
    server.observe("den");

    let (status, body) = server.get("/health").await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "aircast");
    assert_eq!(body["sinks"], 1);
    assert_eq!(body["ports"]["available"], 2);
}

#[tokio::test]
async fn stream_ready_dispatches_with_explicit_reference() {
    let server = TestServer::start().await;
    let sink = server.observe("den");

    let (status, body) = server
        .post(
            &format!("/api/sinks/{}/stream-ready", sink.id),
            r#"{"streamReference":"http://upstream/den.mp3"}"#,
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["outcome"], "dispatched");
    assert_eq!(body["session"]["state"], "established");
    assert_eq!(
        server.adapter.last_reference.lock().as_deref(),
        Some("http://upstream/den.mp3")
    );

    let (_, body) = server
        .post(&format!("/api/sinks/{}/stream-ready", sink.id), "")
        .await;
    assert_eq!(body["outcome"], "alreadyStreaming");
    assert_eq!(server.adapter.calls.load(Ordering::SeqCst), 1);

    let (_, sinks) = server.get("/api/sinks").await;
    assert_eq!(sinks[0]["state"], "streaming");
    assert_eq!(sinks[0]["streamUrl"], "http://192.168.1.2:5000/stream");

    let (_, sessions) = server.get("/api/sessions").await;
    assert_eq!(sessions["started"], 1);
    assert_eq!(sessions["completed"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn stream_ready_defaults_to_the_sink_stream_url() {
    let server = TestServer::start().await;
    let sink = server.observe("den");

    let (status, body) = server
        .post(&format!("/api/sinks/{}/stream-ready", sink.id), "")
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["outcome"], "dispatched");
    assert_eq!(
        server.adapter.last_reference.lock().as_deref(),
        Some("http://192.168.1.2:5000/stream")
    );
}

#[tokio::test]
async fn errors_use_the_json_error_shape() {
    let server = TestServer::start().await;

    let (status, body) = server.get("/api/sinks/cast:nope").await;
    assert_eq!(status, 404);
    assert_eq!(body["error"], "unknown_sink");
    assert_eq!(body["status"], 404);

    let sink = server.observe("den");
    let (status, body) = server
        .post(&format!("/api/sinks/{}/stream-ready", sink.id), "{broken")
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "invalid_request");
}

#[tokio::test]
async fn delete_retires_the_sink() {
    let server = TestServer::start().await;
    let sink = server.observe("den");
    server.registry.provision(&sink.id).unwrap();
    assert_eq!(server.registry.allocator().allocated(), 1);

    let resp = server
        .client
        .delete(format!("{}/api/sinks/{}", server.base, sink.id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({ "success": true }));

    assert!(server.registry.get(&sink.id).is_none());
    assert_eq!(server.registry.allocator().allocated(), 0);

    let resp = server
        .client
        .delete(format!("{}/api/sinks/{}", server.base, sink.id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 404);
}
