//! Aircast Core - sink registry and session routing for Aircast.
//!
//! Aircast makes cast receivers and UPnP media renderers on the local network
//! usable as targets for an upstream audio source. Each discovered device gets
//! a dedicated port; when the upstream signals that a stream is ready for a
//! device, the bridge tells the device to start playing it.
//!
//! # Architecture
//!
//! - [`discovery`]: SSDP and mDNS producers feeding a bounded channel
//! - [`normalizer`]: Raw discovery events to canonical observations
//! - [`registry`]: Authoritative sink table and lifecycle state machine
//! - [`allocator`]: Port pool for provisioned sinks
//! - [`dispatch`]: Protocol adapters (UPnP SOAP, CASTV2) with retry
//! - [`coordinator`]: Ties discovery, registry and dispatch together
//! - [`advertise`]: AirPlay (RAOP) advertisement of provisioned sinks
//! - [`api`]: HTTP control API
//! - [`bootstrap`]: Composition root
//!
//! # Abstraction Traits
//!
//! - [`DiscoverySource`](discovery::DiscoverySource): One discovery protocol
//! - [`ProtocolAdapter`](dispatch::ProtocolAdapter): Playback start for one sink protocol
//! - [`EventEmitter`](events::EventEmitter): Emitting domain events
//! - [`IpDetector`](context::IpDetector): Local IP detection

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod advertise;
pub mod allocator;
pub mod api;
pub mod bootstrap;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod discovery;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod normalizer;
pub mod protocol_constants;
pub mod registry;
pub mod runtime;
pub mod sink;
pub mod utils;

// Re-export commonly used types at the crate root
pub use allocator::PortAllocator;
pub use config::{Config, DispatchConfig};
pub use context::{IpDetector, LocalIpDetector, NetworkContext, NetworkError};
pub use coordinator::{Session, SessionCoordinator, SessionState, StreamReadyOutcome};
pub use error::{BridgeError, BridgeResult, DiscoveryResult, ErrorCode, SoapResult};
pub use events::{BroadcastEvent, BroadcastEventBridge, EventEmitter, SessionEvent, SinkEvent};
pub use registry::{ProvisionOutcome, SinkRegistry};
pub use runtime::TokioSpawner;
pub use sink::{ProtocolKind, Sink, SinkAddress, SinkId, SinkObservation, SinkState};
pub use utils::now_millis;

// Re-export discovery and dispatch types
pub use discovery::{DiscoveryEvent, DiscoverySource};
pub use dispatch::{AdapterDispatch, DispatchError, DispatchReport, ProtocolAdapter, RetryPolicy};

// Re-export bootstrap types
pub use bootstrap::{bootstrap_services, BootstrappedServices};

// Re-export API types
pub use api::{serve, start_server, AppState, ServerError};
