//! mDNS/DNS-SD discovery of cast receivers.
//!
//! Browses `_googlecast._tcp.local.` for a bounded window and forwards every
//! resolved service. The TXT `id`, `fn` and `md` entries travel in the event's
//! service record together with the instance `fullname`, so the normalizer can
//! fall back to the instance name when a receiver omits its id.
//!
//! Calls `stop_browse()` after each window to avoid accumulating daemon work.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mdns_sd::{ResolvedService, ScopedIp, ServiceDaemon, ServiceEvent};
use tokio::sync::mpsc;
use tokio::time::timeout;

use super::types::{DiscoveryError, DiscoveryEvent, DiscoveryResult};
use super::DiscoverySource;
use crate::protocol_constants::CAST_SERVICE_TYPE;
use crate::sink::ProtocolKind;

/// TXT keys copied into the event's service record.
const CAST_TXT_KEYS: &[&str] = &["id", "fn", "md"];

/// Configuration for mDNS discovery.
#[derive(Debug, Clone)]
pub struct MdnsConfig {
    /// How long to browse for services per search.
    pub browse_timeout: Duration,
}

impl Default for MdnsConfig {
    fn default() -> Self {
        Self {
            browse_timeout: Duration::from_millis(2000),
        }
    }
}

/// Cast receiver discovery source.
pub struct MdnsSource {
    daemon: Arc<ServiceDaemon>,
    config: MdnsConfig,
}

impl MdnsSource {
    /// Creates a source that browses with the shared `daemon`.
    pub fn new(daemon: Arc<ServiceDaemon>, config: MdnsConfig) -> Self {
        Self { daemon, config }
    }
}

#[async_trait]
impl DiscoverySource for MdnsSource {
    fn name(&self) -> &'static str {
        "mDNS"
    }

    async fn search(&self, tx: &mpsc::Sender<DiscoveryEvent>) -> DiscoveryResult<usize> {
        log::debug!(
            "[mDNS] Browsing {} for {}ms",
            CAST_SERVICE_TYPE,
            self.config.browse_timeout.as_millis()
        );

        let receiver = self
            .daemon
            .browse(CAST_SERVICE_TYPE)
            .map_err(|e| DiscoveryError::MdnsDaemon(e.to_string()))?;

        let mut forwarded = 0usize;
        let start = tokio::time::Instant::now();
        while start.elapsed() < self.config.browse_timeout {
            let remaining = self.config.browse_timeout.saturating_sub(start.elapsed());

            match timeout(remaining, receiver.recv_async()).await {
                Ok(Ok(ServiceEvent::ServiceResolved(info))) => {
                    log::trace!("[mDNS] Service resolved: {}", info.fullname);
                    let Some(event) = event_from_service(&info) else {
                        continue;
                    };
                    if tx.send(event).await.is_err() {
                        break;
                    }
                    forwarded += 1;
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    log::debug!("[mDNS] Receiver channel closed: {:?}", e);
                    break;
                }
                Err(_) => break,
            }
        }

        if let Err(e) = self.daemon.stop_browse(CAST_SERVICE_TYPE) {
            log::warn!("[mDNS] Failed to stop browse: {:?}", e);
        }

        Ok(forwarded)
    }
}

/// Converts a resolved service into a raw event.
///
/// Prefers an IPv4 address from the resolved records. Services with no
/// address at all are skipped here since there is nothing to dial.
fn event_from_service(info: &ResolvedService) -> Option<DiscoveryEvent> {
    let ip = info
        .addresses
        .iter()
        .find_map(|addr| match addr {
            ScopedIp::V4(v4) => Some(v4.addr().to_string()),
            _ => None,
        })
        .or_else(|| info.addresses.iter().next().map(|a| a.to_ip_addr().to_string()))?;

    let port = (info.port > 0).then_some(info.port);
    let mut event = DiscoveryEvent::new(ProtocolKind::CastV2)
        .with_address(ip, port)
        .with_record("fullname", info.fullname.as_str())
        .with_record("host", info.host.as_str());

    for key in CAST_TXT_KEYS {
        if let Some(value) = info.txt_properties.get_property_val_str(key) {
            event = event.with_record(*key, value);
        }
    }
    event.raw_id = event.record("id").map(str::to_string);
    event.display_name = event.record("fn").map(str::to_string);

    Some(event)
}

/// Creates a new mDNS service daemon.
///
/// The daemon spawns a background thread; create it once and share it
/// between the browse source and the RAOP advertiser.
pub fn create_daemon() -> DiscoveryResult<ServiceDaemon> {
    ServiceDaemon::new().map_err(|e| DiscoveryError::MdnsDaemon(e.to_string()))
}
