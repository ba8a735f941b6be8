//! HTTP route handlers.
//!
//! All handlers are thin - they delegate to the coordinator.

use axum::{
    extract::{Path, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::response::{api_error, api_ok, api_success};
use crate::api::AppState;
use crate::context::NetworkContext;
use crate::coordinator::StreamReadyOutcome;
use crate::error::{BridgeError, BridgeResult};
use crate::protocol_constants::SERVICE_ID;
use crate::sink::{Sink, SinkId};

/// Builds the API router.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/sinks", get(list_sinks))
        .route("/api/sinks/{id}", get(get_sink).delete(remove_sink))
        .route("/api/sinks/{id}/stream-ready", post(stream_ready))
        .route("/api/sessions", get(list_sessions))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Views
// ─────────────────────────────────────────────────────────────────────────────

/// A sink plus the URL its stream is served at.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SinkView {
    #[serde(flatten)]
    sink: Sink,
    stream_url: Option<String>,
}

impl SinkView {
    fn new(sink: Sink, network: &NetworkContext) -> Self {
        let stream_url = sink.assigned_port.map(|p| network.stream_url(p));
        Self { sink, stream_url }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamReadyRequest {
    stream_reference: Option<String>,
}

/// JSON body describing a stream-ready outcome.
fn outcome_json(outcome: &StreamReadyOutcome) -> serde_json::Value {
    match outcome {
        StreamReadyOutcome::Dispatched(session) => json!({
            "outcome": "dispatched",
            "session": session,
        }),
        StreamReadyOutcome::AlreadyStreaming(sink) => json!({
            "outcome": "alreadyStreaming",
            "sinkId": sink.id,
        }),
        StreamReadyOutcome::InFlight => json!({ "outcome": "inFlight" }),
        StreamReadyOutcome::Voided(session) => json!({
            "outcome": "voided",
            "session": session,
        }),
    }
}

/// Parses an optional JSON body. An empty body means "use the defaults".
fn parse_stream_ready(body: &[u8]) -> Result<StreamReadyRequest, serde_json::Error> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(StreamReadyRequest::default());
    }
    serde_json::from_slice(body)
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let registry = state.coordinator.registry();
    let allocator = registry.allocator();
    api_success(json!({
        "status": "ok",
        "service": SERVICE_ID,
        "sinks": registry.len(),
        "ports": {
            "allocated": allocator.allocated(),
            "available": allocator.available(),
        },
        "activeSessions": state.coordinator.active_sessions().len(),
    }))
}

async fn list_sinks(State(state): State<AppState>) -> impl IntoResponse {
    let sinks: Vec<SinkView> = state
        .coordinator
        .registry()
        .snapshot()
        .into_iter()
        .map(|sink| SinkView::new(sink, &state.network))
        .collect();
    api_success(sinks)
}

async fn get_sink(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> BridgeResult<impl IntoResponse> {
    let id = SinkId::from_raw(id);
    let sink = state
        .coordinator
        .registry()
        .get(&id)
        .ok_or(BridgeError::UnknownSink(id))?;
    Ok(api_success(SinkView::new(sink, &state.network)))
}

async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    let coordinator = &state.coordinator;
    api_success(json!({
        "active": coordinator.active_sessions(),
        "completed": coordinator.completed_sessions(),
        "started": coordinator.sessions_started(),
    }))
}

/// Delivers a stream-ready signal.
///
/// Without a `streamReference` the sink's own stream URL is used.
async fn stream_ready(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Response {
    let request = match parse_stream_ready(&body) {
        Ok(r) => r,
        Err(e) => {
            return api_error(StatusCode::BAD_REQUEST, "invalid_request", e).into_response();
        }
    };

    let id = SinkId::from_raw(id);
    let reference = match request.stream_reference.filter(|s| !s.trim().is_empty()) {
        Some(reference) => reference,
        None => {
            // Provisioning is idempotent; it also gives a DISCOVERED sink its port
            match state.coordinator.registry().provision(&id) {
                Ok(outcome) => match outcome.sink().assigned_port {
                    Some(port) => state.network.stream_url(port),
                    None => return BridgeError::UnknownSink(id).into_response(),
                },
                Err(e) => return e.into_response(),
            }
        }
    };

    log::info!("[API] Stream ready for {}: {}", id, reference);
    match state.coordinator.on_stream_ready(&id, &reference).await {
        Ok(outcome) => api_success(outcome_json(&outcome)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn remove_sink(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> BridgeResult<impl IntoResponse> {
    state.coordinator.on_sink_lost(&SinkId::from_raw(id))?;
    Ok(api_ok())
}
