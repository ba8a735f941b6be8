//! Centralized error types for the Aircast core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Maps errors to appropriate HTTP status codes
//! - Implements `IntoResponse` for automatic JSON error responses
//!
//! No error in this crate is fatal to the process. Every failure is scoped to
//! one sink and leaves the registry consistent.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::discovery::DiscoveryError;
use crate::dispatch::cast::CastError;
use crate::dispatch::upnp::SoapError;
use crate::dispatch::DispatchError;
use crate::sink::{SinkId, SinkState};

/// Trait for error types that provide machine-readable error codes.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

impl ErrorCode for DiscoveryError {
    fn code(&self) -> &'static str {
        match self {
            Self::SocketBind(_) => "socket_bind_failed",
            Self::NoInterfaces => "no_network_interfaces",
            Self::MdnsDaemon(_) => "mdns_daemon_failed",
        }
    }
}

impl ErrorCode for SoapError {
    fn code(&self) -> &'static str {
        match self {
            Self::Http(_) => "http_request_failed",
            Self::HttpStatus(_, _) => "http_error_status",
            Self::Fault(_) => "soap_fault",
        }
    }
}

impl ErrorCode for CastError {
    fn code(&self) -> &'static str {
        match self {
            Self::Io(_) => "cast_io_failed",
            Self::Tls(_) => "cast_tls_failed",
            Self::Frame(_) => "cast_frame_invalid",
            Self::Closed => "cast_connection_closed",
            Self::LaunchTimeout => "cast_launch_timeout",
            Self::LoadTimeout => "cast_load_timeout",
            Self::LoadRejected(_) => "cast_load_rejected",
        }
    }
}

impl ErrorCode for DispatchError {
    fn code(&self) -> &'static str {
        match self {
            Self::Soap(e) => e.code(),
            Self::Cast(e) => e.code(),
            Self::Unreachable(_) => "sink_unreachable",
            Self::Timeout { .. } => "dispatch_timeout",
            Self::NoAdapter(_) => "no_adapter",
            Self::Panicked(_) => "adapter_panicked",
        }
    }
}

/// Error taxonomy of the bridge core.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A discovery event lacked a usable identifier or address.
    #[error("Malformed observation: {0}")]
    MalformedObservation(String),

    /// Every port in the pool is assigned.
    #[error("Port pool {min_port}-{max_port} exhausted")]
    PoolExhausted { min_port: u16, max_port: u16 },

    /// The sink is not registered, or has been retired.
    #[error("Unknown sink: {0}")]
    UnknownSink(SinkId),

    /// The requested lifecycle transition is not an edge of the state machine.
    #[error("Invalid transition for {sink}: {from} -> {to}")]
    InvalidTransition {
        sink: SinkId,
        from: SinkState,
        to: SinkState,
    },

    /// Dispatch gave up after the bounded retries.
    #[error("Dispatch to {sink} failed after {attempts} attempt(s): {source}")]
    DispatchFailed {
        sink: SinkId,
        attempts: u32,
        #[source]
        source: DispatchError,
    },

    /// A discovery source could not be started.
    #[error("Discovery failed: {0}")]
    Discovery(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Startup failure outside the domain (HTTP client, network detection).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedObservation(_) => "malformed_observation",
            Self::PoolExhausted { .. } => "pool_exhausted",
            Self::UnknownSink(_) => "unknown_sink",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::DispatchFailed { .. } => "dispatch_failed",
            Self::Discovery(_) => "discovery_failed",
            Self::Configuration(_) => "configuration_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MalformedObservation(_) => StatusCode::BAD_REQUEST,
            Self::UnknownSink(_) => StatusCode::NOT_FOUND,
            Self::InvalidTransition { .. } => StatusCode::CONFLICT,
            Self::PoolExhausted { .. } | Self::Configuration(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::DispatchFailed { .. } => StatusCode::BAD_GATEWAY,
            Self::Discovery(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// True for idempotency signals that callers may safely ignore.
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::UnknownSink(_))
    }
}

/// Convenient Result alias for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

pub use crate::discovery::DiscoveryResult;
pub use crate::dispatch::upnp::SoapResult;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<DiscoveryError> for BridgeError {
    fn from(err: DiscoveryError) -> Self {
        Self::Discovery(err.to_string())
    }
}
