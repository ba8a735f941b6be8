//! Application bootstrap and dependency wiring.
//!
//! This module is the composition root: the single place where all services
//! are instantiated and wired together. Everything else receives its
//! collaborators through constructors.

use std::sync::Arc;
use std::time::Duration;

use mdns_sd::ServiceDaemon;
use parking_lot::Mutex;
use reqwest::Client;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::advertise::RaopAdvertiser;
use crate::allocator::PortAllocator;
use crate::api::{self, AppState};
use crate::config::Config;
use crate::context::{LocalIpDetector, NetworkContext};
use crate::coordinator::SessionCoordinator;
use crate::discovery::mdns::{self, MdnsConfig, MdnsSource};
use crate::discovery::ssdp::{SsdpConfig, SsdpSource};
use crate::discovery::{run_source, DiscoveryEvent, DiscoverySource};
use crate::dispatch::cast::CastAdapter;
use crate::dispatch::upnp::UpnpAdapter;
use crate::dispatch::{AdapterDispatch, RetryPolicy};
use crate::error::{BridgeError, BridgeResult};
use crate::events::{BroadcastEventBridge, EventEmitter};
use crate::protocol_constants::SOAP_TIMEOUT_SECS;
use crate::registry::SinkRegistry;
use crate::runtime::TokioSpawner;

/// How long shutdown waits for background tasks before aborting them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Container for all bootstrapped services.
pub struct BootstrappedServices {
    /// Authoritative sink table.
    pub registry: Arc<SinkRegistry>,
    /// Routes discovery and stream-ready signals.
    pub coordinator: Arc<SessionCoordinator>,
    /// Event bridge for subscribers and the RAOP advertiser.
    pub event_bridge: Arc<BroadcastEventBridge>,
    /// Local address announced to sinks.
    pub network: NetworkContext,
    /// AirPlay advertisement, when enabled and mDNS is available.
    pub raop: Option<Arc<RaopAdvertiser>>,
    /// Discovery producers started by [`Self::start_background_tasks`].
    sources: Vec<Arc<dyn DiscoverySource>>,
    discovery_tx: mpsc::Sender<DiscoveryEvent>,
    discovery_rx: Mutex<Option<mpsc::Receiver<DiscoveryEvent>>>,
    mdns_daemon: Option<Arc<ServiceDaemon>>,
    /// Shared HTTP client for connection pooling.
    http_client: Client,
    /// Task spawner for background operations.
    pub spawner: TokioSpawner,
    /// Cancellation token for graceful shutdown.
    pub cancel_token: CancellationToken,
    config: Config,
}

impl BootstrappedServices {
    /// Returns the shared HTTP client.
    pub fn http_client(&self) -> &Client {
        &self.http_client
    }

    /// Sender side of the discovery channel. Useful for injecting
    /// observations from outside the built-in sources.
    pub fn discovery_sender(&self) -> mpsc::Sender<DiscoveryEvent> {
        self.discovery_tx.clone()
    }

    /// Names of the enabled discovery sources.
    pub fn source_names(&self) -> Vec<&'static str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// Builds the API state for these services.
    pub fn app_state(&self) -> AppState {
        AppState::new(Arc::clone(&self.coordinator), self.network.clone())
    }

    /// Spawns the coordinator loop, every discovery producer, address
    /// re-detection (auto-detect mode only) and, unless `api_port` is 0, the
    /// HTTP API.
    ///
    /// Calling this more than once only starts the tasks the first time.
    pub fn start_background_tasks(&self) {
        let Some(rx) = self.discovery_rx.lock().take() else {
            log::warn!("[Bootstrap] Background tasks already started");
            return;
        };

        let coordinator = Arc::clone(&self.coordinator);
        let sweep_every = self.config.search_interval();
        let cancel = self.cancel_token.clone();
        self.spawner.spawn("coordinator", async move {
            coordinator.run(rx, sweep_every, cancel).await;
        });

        for source in &self.sources {
            self.spawner.spawn(
                source.name(),
                run_source(
                    Arc::clone(source),
                    self.config.search_interval(),
                    self.discovery_tx.clone(),
                    self.cancel_token.clone(),
                ),
            );
        }

        // Auto-detected addresses are re-checked once per discovery window
        if self.config.advertise_ip.is_none() {
            let network = self.network.clone();
            let every = self.config.search_interval();
            let cancel = self.cancel_token.clone();
            self.spawner.spawn("network", async move {
                let mut ticker =
                    tokio::time::interval_at(tokio::time::Instant::now() + every, every);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {
                            if let Err(e) = network.refresh() {
                                log::warn!("[Network] {}", e);
                            }
                        }
                    }
                }
            });
        }

        if self.config.api_port != 0 {
            let state = self.app_state();
            let port = self.config.api_port;
            let cancel = self.cancel_token.clone();
            self.spawner.spawn("api", async move {
                if let Err(e) = api::start_server(state, port, cancel).await {
                    log::error!("[Bootstrap] API server failed: {}", e);
                }
            });
        }

        log::info!(
            "[Bootstrap] Started {} background task(s)",
            self.spawner.running()
        );
    }

    /// Initiates graceful shutdown of all services.
    pub async fn shutdown(&self) {
        log::info!("[Bootstrap] Beginning graceful shutdown...");

        // Signal cancellation to all background tasks
        self.cancel_token.cancel();

        let aborted = self.spawner.join_all(SHUTDOWN_GRACE).await;
        if aborted > 0 {
            log::warn!("[Bootstrap] Aborted {} task(s)", aborted);
        }

        if let Some(raop) = &self.raop {
            raop.shutdown();
        }

        if let Some(daemon) = &self.mdns_daemon {
            if let Err(e) = daemon.shutdown() {
                log::debug!("[Bootstrap] mDNS daemon shutdown: {}", e);
            }
        }

        log::info!("[Bootstrap] Shutdown complete");
    }
}

/// Creates the shared HTTP client for all UPnP communication.
fn create_http_client() -> BridgeResult<Client> {
    Client::builder()
        .timeout(Duration::from_secs(SOAP_TIMEOUT_SECS))
        .build()
        .map_err(|e| BridgeError::Internal(format!("Failed to create HTTP client: {}", e)))
}

/// Bootstraps all services with their dependencies.
///
/// Services are created in dependency order:
///
/// 1. Shared infrastructure (HTTP client, network context, event bridge)
/// 2. Port allocator and sink registry
/// 3. Protocol adapters and dispatch
/// 4. Session coordinator
/// 5. mDNS daemon, discovery sources and RAOP advertiser
///
/// Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns an error if the configuration is invalid, the HTTP client cannot
/// be built or the local address cannot be determined.
pub fn bootstrap_services(config: &Config) -> BridgeResult<BootstrappedServices> {
    config.validate()?;

    let spawner = TokioSpawner::current();
    let cancel_token = CancellationToken::new();
    let http_client = create_http_client()?;

    let network = match config.advertise_ip {
        Some(ip) => NetworkContext::explicit(ip),
        None => NetworkContext::auto_detect(LocalIpDetector::arc())
            .map_err(|e| BridgeError::Internal(format!("Failed to detect local IP: {}", e)))?,
    };
    log::info!("[Bootstrap] Announcing streams on {}", network.local_ip());

    let event_bridge = Arc::new(BroadcastEventBridge::new(config.event_channel_capacity));

    let allocator = Arc::new(PortAllocator::new(config.min_port, config.max_port)?);
    let registry = Arc::new(SinkRegistry::new(
        allocator,
        Arc::clone(&event_bridge) as Arc<dyn EventEmitter>,
    ));

    let dispatch = Arc::new(
        AdapterDispatch::new(RetryPolicy::from_config(&config.dispatch))
            .with_adapter(Arc::new(UpnpAdapter::new(http_client.clone())))
            .with_adapter(Arc::new(CastAdapter::new())),
    );

    let coordinator = Arc::new(SessionCoordinator::new(
        Arc::clone(&registry),
        dispatch,
        Arc::clone(&event_bridge) as Arc<dyn EventEmitter>,
        config.stale_threshold(),
    ));

    // One daemon serves both cast browsing and RAOP registration
    let mdns_daemon = if config.discovery_cast_mdns || config.advertise_raop {
        match mdns::create_daemon() {
            Ok(daemon) => Some(Arc::new(daemon)),
            Err(e) => {
                log::warn!("[Bootstrap] mDNS unavailable, continuing without it: {}", e);
                None
            }
        }
    } else {
        None
    };

    let mut sources: Vec<Arc<dyn DiscoverySource>> = Vec::new();
    if config.discovery_upnp_ssdp {
        sources.push(Arc::new(SsdpSource::new(SsdpConfig {
            send_count: config.ssdp_send_count,
            retry_delay: Duration::from_millis(config.ssdp_retry_delay_ms),
            listen_window: Duration::from_millis(config.ssdp_listen_window_ms),
            mx_value: config.ssdp_mx,
        })));
    }
    if config.discovery_cast_mdns {
        if let Some(daemon) = &mdns_daemon {
            sources.push(Arc::new(MdnsSource::new(
                Arc::clone(daemon),
                MdnsConfig {
                    browse_timeout: Duration::from_millis(config.mdns_browse_timeout_ms),
                },
            )));
        }
    }

    let raop = match (&mdns_daemon, config.advertise_raop) {
        (Some(daemon), true) => {
            let advertiser = Arc::new(RaopAdvertiser::new(Arc::clone(daemon), network.clone()));
            event_bridge.set_external_emitter(Arc::clone(&advertiser) as Arc<dyn EventEmitter>);
            Some(advertiser)
        }
        _ => None,
    };

    let (discovery_tx, discovery_rx) = mpsc::channel(config.discovery_channel_capacity);

    Ok(BootstrappedServices {
        registry,
        coordinator,
        event_bridge,
        network,
        raop,
        sources,
        discovery_tx,
        discovery_rx: Mutex::new(Some(discovery_rx)),
        mdns_daemon,
        http_client,
        spawner,
        cancel_token,
        config: config.clone(),
    })
}
