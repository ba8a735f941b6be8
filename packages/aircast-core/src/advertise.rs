//! AirPlay (RAOP) advertisement of provisioned sinks.
//!
//! Every sink that holds a port is published as `_raop._tcp` on that port so
//! AirPlay senders can pick it. The advertiser listens to registry events:
//! `Provisioned` registers, `Retired` unregisters.
//!
//! The registry emits outside its lock, so the two events for one activation
//! can arrive in either order. Each retirement leaves a tombstone with the
//! sink's generation, and a `Provisioned` event for that generation or an
//! older one is ignored.
//!
//! Best-effort: failures are logged and never affect the registry.

use std::collections::HashMap;
use std::sync::Arc;

use mdns_sd::{ServiceDaemon, ServiceInfo};
use parking_lot::Mutex;

use crate::context::NetworkContext;
use crate::events::{EventEmitter, SessionEvent, SinkEvent};
use crate::protocol_constants::RAOP_SERVICE_TYPE;
use crate::sink::{Sink, SinkId};

struct Advertisement {
    generation: u64,
    fullname: String,
}

/// Which activations are advertised and which have been retired.
#[derive(Default)]
struct Ledger {
    advertised: HashMap<SinkId, Advertisement>,
    /// Highest retired generation per sink.
    retired: HashMap<SinkId, u64>,
}

impl Ledger {
    /// Whether `generation` of `id` may be advertised now.
    fn admits(&self, id: &SinkId, generation: u64) -> bool {
        let superseded = self
            .advertised
            .get(id)
            .is_some_and(|a| a.generation >= generation);
        let retired = self.retired.get(id).is_some_and(|&g| g >= generation);
        !superseded && !retired
    }

    /// Records an advertisement, returning the one it replaces.
    fn record(&mut self, id: SinkId, generation: u64, fullname: String) -> Option<String> {
        self.advertised
            .insert(id, Advertisement { generation, fullname })
            .map(|old| old.fullname)
    }

    /// Marks `generation` of `id` retired and returns the advertisement to
    /// withdraw, if one belongs to that activation or an older one.
    fn retire(&mut self, id: &SinkId, generation: u64) -> Option<String> {
        let tombstone = self.retired.entry(id.clone()).or_insert(generation);
        *tombstone = (*tombstone).max(generation);

        if self
            .advertised
            .get(id)
            .is_some_and(|a| a.generation <= generation)
        {
            self.advertised.remove(id).map(|a| a.fullname)
        } else {
            None
        }
    }

    fn drain(&mut self) -> Vec<String> {
        self.advertised.drain().map(|(_, a)| a.fullname).collect()
    }
}

/// Publishes provisioned sinks as AirPlay receivers.
pub struct RaopAdvertiser {
    daemon: Arc<ServiceDaemon>,
    network: NetworkContext,
    host_name: String,
    ledger: Mutex<Ledger>,
}

impl RaopAdvertiser {
    pub fn new(daemon: Arc<ServiceDaemon>, network: NetworkContext) -> Self {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "aircast".to_string());

        Self {
            daemon,
            network,
            host_name: format!("{}.local.", dns_label(&hostname)),
            ledger: Mutex::new(Ledger::default()),
        }
    }

    /// Number of sinks currently advertised.
    #[must_use]
    pub fn advertised(&self) -> usize {
        self.ledger.lock().advertised.len()
    }

    fn register(&self, sink: &Sink) {
        let Some(port) = sink.assigned_port else {
            return;
        };

        // Held across the daemon call so a concurrent retirement waits for
        // the record and then withdraws it.
        let mut ledger = self.ledger.lock();
        if !ledger.admits(&sink.id, sink.generation) {
            log::debug!(
                "[RAOP] Not advertising {} (generation {} retired or already advertised)",
                sink.id,
                sink.generation
            );
            return;
        }

        let instance = raop_instance_name(sink);
        let ip = self.network.local_ip();
        let service = match ServiceInfo::new(
            RAOP_SERVICE_TYPE,
            &instance,
            &self.host_name,
            ip,
            port,
            Some(raop_txt_records()),
        ) {
            Ok(service) => service,
            Err(e) => {
                log::warn!("[RAOP] Invalid service for {}: {}", sink.id, e);
                return;
            }
        };

        let fullname = service.get_fullname().to_string();
        match self.daemon.register(service) {
            Ok(()) => {
                log::info!("[RAOP] Advertising '{}' at {}:{}", instance, ip, port);
                if let Some(replaced) = ledger.record(sink.id.clone(), sink.generation, fullname) {
                    self.withdraw(&replaced);
                }
            }
            Err(e) => log::warn!("[RAOP] Failed to advertise {}: {}", sink.id, e),
        }
    }

    fn unregister(&self, sink: &Sink) {
        let withdrawn = self.ledger.lock().retire(&sink.id, sink.generation);
        if let Some(fullname) = withdrawn {
            self.withdraw(&fullname);
        }
    }

    fn withdraw(&self, fullname: &str) {
        match self.daemon.unregister(fullname) {
            Ok(_) => log::info!("[RAOP] Withdrew '{}'", fullname),
            Err(e) => log::warn!("[RAOP] Failed to unregister {}: {}", fullname, e),
        }
    }

    /// Withdraws every advertisement.
    pub fn shutdown(&self) {
        let fullnames = self.ledger.lock().drain();
        for fullname in fullnames {
            self.withdraw(&fullname);
        }
    }
}

impl EventEmitter for RaopAdvertiser {
    fn emit_sink(&self, event: SinkEvent) {
        match event {
            SinkEvent::Provisioned { sink, .. } => self.register(&sink),
            SinkEvent::Retired { sink, .. } => self.unregister(&sink),
            _ => {}
        }
    }

    fn emit_session(&self, _event: SessionEvent) {}
}

impl Drop for RaopAdvertiser {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// 64-bit FNV-1a. Fixed, so the same input hashes identically on every
/// build and platform.
fn fnv1a64(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes
        .iter()
        .fold(OFFSET_BASIS, |hash, &b| (hash ^ u64::from(b)).wrapping_mul(PRIME))
}

/// RAOP instance names are `<12 hex digits>@<name>`. The hex part is the low
/// 48 bits of the FNV-1a hash of the sink id, so senders see the same
/// receiver identity across restarts.
fn raop_instance_name(sink: &Sink) -> String {
    format!(
        "{:012X}@{}",
        fnv1a64(sink.id.as_str().as_bytes()) & 0xFFFF_FFFF_FFFF,
        sink.display_name
    )
}

fn raop_txt_records() -> HashMap<String, String> {
    [
        ("txtvers", "1"),
        ("ch", "2"),
        ("cn", "0,1"),
        ("et", "0"),
        ("sr", "44100"),
        ("ss", "16"),
        ("tp", "UDP"),
        ("md", "0"),
        ("pw", "false"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// Sanitizes a hostname for DNS (lowercase, no spaces).
fn dns_label(hostname: &str) -> String {
    let label: String = hostname
        .to_lowercase()
        .replace(' ', "-")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect();
    if label.is_empty() {
        "aircast".to_string()
    } else {
        label
    }
}
