//! Discovery sources for cast receivers and UPnP renderers.
//!
//! Each source runs as one long-lived producer task that performs a search
//! every `search_interval` and pushes raw [`DiscoveryEvent`]s into a bounded
//! channel. The session coordinator is the single consumer of that channel.
//!
//! Sources:
//! - [`ssdp::SsdpSource`]: M-SEARCH for `MediaRenderer:1` devices
//! - [`mdns::MdnsSource`]: DNS-SD browse for `_googlecast._tcp.local.`

pub mod mdns;
pub mod ssdp;
mod types;

pub use types::{
    is_virtual_interface, DiscoveryError, DiscoveryEvent, DiscoveryResult,
    VIRTUAL_INTERFACE_PREFIXES,
};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A protocol-specific "device seen" producer.
#[async_trait]
pub trait DiscoverySource: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Performs one search burst, forwarding every response to `tx`.
    ///
    /// Returns the number of events forwarded.
    async fn search(&self, tx: &mpsc::Sender<DiscoveryEvent>) -> DiscoveryResult<usize>;
}

/// Runs `source` until `cancel` fires or the consumer goes away.
///
/// A search is issued immediately and then once per `interval`. Search
/// failures are logged and retried on the next tick; they never stop the
/// producer.
pub async fn run_source(
    source: Arc<dyn DiscoverySource>,
    interval: Duration,
    tx: mpsc::Sender<DiscoveryEvent>,
    cancel: CancellationToken,
) {
    let name = source.name();
    log::info!(
        "[Discovery] {} source started (interval {}s)",
        name,
        interval.as_secs()
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if tx.is_closed() {
            log::debug!("[Discovery] {} consumer gone, stopping", name);
            break;
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            result = source.search(&tx) => match result {
                Ok(count) => log::debug!("[Discovery] {} search forwarded {} event(s)", name, count),
                Err(e) => log::warn!("[Discovery] {} search failed: {}", name, e),
            },
        }
    }

    log::info!("[Discovery] {} source stopped", name);
}
