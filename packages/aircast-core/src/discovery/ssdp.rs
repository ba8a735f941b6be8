//! SSDP discovery of UPnP media renderers.
//!
//! Sends M-SEARCH for `urn:schemas-upnp-org:device:MediaRenderer:1` to
//! 239.255.255.250:1900 on every non-virtual interface and forwards every
//! response as a raw event. Filtering by device type and identifier prefix
//! is the normalizer's job.
//!
//! Each interface uses the same socket for send AND receive since devices
//! reply unicast back to the sending socket/port.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use local_ip_address::list_afinet_netifas;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::timeout;

use super::types::{is_virtual_interface, DiscoveryError, DiscoveryEvent, DiscoveryResult};
use super::DiscoverySource;
use crate::protocol_constants::{MEDIA_RENDERER_DEVICE_TYPE, SSDP_MULTICAST_ADDR};
use crate::sink::ProtocolKind;

// ─────────────────────────────────────────────────────────────────────────────
// ASCII Case-Insensitive Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Checks if `s` starts with `prefix` (ASCII case-insensitive, no allocation).
#[inline]
fn starts_with_ignore_ascii_case(s: &str, prefix: &str) -> bool {
    s.len() >= prefix.len() && s.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

// ─────────────────────────────────────────────────────────────────────────────

/// Build the M-SEARCH message.
fn build_msearch_message(mx: u64) -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {}\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: {}\r\n\
         ST: {}\r\n\r\n",
        SSDP_MULTICAST_ADDR, mx, MEDIA_RENDERER_DEVICE_TYPE
    )
}

/// Network interface information for discovery.
#[derive(Debug, Clone)]
pub struct InterfaceInfo {
    /// Interface name (e.g., "en0", "eth0").
    pub name: String,
    /// IPv4 address bound to this interface.
    pub ip: Ipv4Addr,
}

/// Gets all usable network interfaces for discovery.
///
/// Filters out virtual/container interfaces and loopback.
pub fn get_interfaces() -> Vec<InterfaceInfo> {
    list_afinet_netifas()
        .unwrap_or_else(|e| {
            log::warn!("[SSDP] Failed to list network interfaces: {}", e);
            Vec::new()
        })
        .into_iter()
        .filter_map(|(name, addr)| {
            if is_virtual_interface(&name) {
                log::debug!("[SSDP] Skipping virtual interface: {}", name);
                return None;
            }
            match addr {
                IpAddr::V4(ip) if !ip.is_loopback() => Some(InterfaceInfo { name, ip }),
                _ => None,
            }
        })
        .collect()
}

/// Creates a UDP socket bound to a specific interface.
fn create_socket(iface_ip: Ipv4Addr) -> DiscoveryResult<UdpSocket> {
    let bind_addr = SocketAddr::new(IpAddr::V4(iface_ip), 0);

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(DiscoveryError::SocketBind)?;

    if let Err(e) = socket.set_reuse_address(true) {
        log::warn!("[SSDP] Failed to set SO_REUSEADDR on {}: {}", iface_ip, e);
    }

    #[cfg(unix)]
    if let Err(e) = socket.set_reuse_port(true) {
        log::warn!("[SSDP] Failed to set SO_REUSEPORT on {}: {}", iface_ip, e);
    }

    // UPnP 1.0 recommends a TTL of 4 for SSDP multicast
    if let Err(e) = socket.set_multicast_ttl_v4(4) {
        log::warn!("[SSDP] Failed to set multicast TTL on {}: {}", iface_ip, e);
    }

    socket
        .set_nonblocking(true)
        .map_err(DiscoveryError::SocketBind)?;
    socket
        .bind(&bind_addr.into())
        .map_err(DiscoveryError::SocketBind)?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket).map_err(DiscoveryError::SocketBind)
}

/// Parses an SSDP search response or NOTIFY into a raw event.
///
/// Header names are upper-cased into the service record. Returns None for
/// datagrams that are not SSDP messages at all.
fn parse_ssdp_response(response: &str, src_ip: &str) -> Option<DiscoveryEvent> {
    let mut lines = response.lines();
    let start_line = lines.next()?;
    if !starts_with_ignore_ascii_case(start_line, "HTTP/1.1 200")
        && !starts_with_ignore_ascii_case(start_line, "NOTIFY")
    {
        return None;
    }

    let headers: HashMap<String, String> = lines
        .filter_map(|line| {
            let (name, value) = line.split_once(':')?;
            Some((name.trim().to_ascii_uppercase(), value.trim().to_string()))
        })
        .collect();

    let port = headers.get("LOCATION").and_then(|loc| location_port(loc));
    let mut event = DiscoveryEvent::new(ProtocolKind::UpnpRenderer).with_address(src_ip, port);
    event.raw_id = headers.get("USN").cloned();
    event.service_record = headers;
    Some(event)
}

/// Extracts the port from a LOCATION URL such as
/// `http://192.168.1.10:1400/xml/device_description.xml`.
fn location_port(location: &str) -> Option<u16> {
    let rest = location.split_once("://").map_or(location, |(_, r)| r);
    let authority = rest.split('/').next()?;
    let (_, port) = authority.rsplit_once(':')?;
    port.parse().ok()
}

/// Configuration for SSDP discovery.
#[derive(Debug, Clone)]
pub struct SsdpConfig {
    /// Number of M-SEARCH packets to send per search.
    pub send_count: u64,
    /// Delay between M-SEARCH packets.
    pub retry_delay: Duration,
    /// How long to collect responses per search.
    pub listen_window: Duration,
    /// MX value (max response delay in seconds).
    pub mx_value: u64,
}

impl Default for SsdpConfig {
    fn default() -> Self {
        Self {
            send_count: 3,
            retry_delay: Duration::from_millis(800),
            listen_window: Duration::from_secs(5),
            mx_value: 1,
        }
    }
}

/// UPnP renderer discovery source.
pub struct SsdpSource {
    config: SsdpConfig,
}

impl SsdpSource {
    pub fn new(config: SsdpConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl DiscoverySource for SsdpSource {
    fn name(&self) -> &'static str {
        "SSDP"
    }

    async fn search(&self, tx: &mpsc::Sender<DiscoveryEvent>) -> DiscoveryResult<usize> {
        let interfaces = get_interfaces();
        if interfaces.is_empty() {
            return Err(DiscoveryError::NoInterfaces);
        }

        let mut sockets: Vec<(InterfaceInfo, Arc<UdpSocket>)> = Vec::new();
        for iface in interfaces {
            match create_socket(iface.ip) {
                Ok(socket) => sockets.push((iface, Arc::new(socket))),
                Err(e) => log::warn!(
                    "[SSDP] Failed to create socket for {} ({}): {}",
                    iface.name,
                    iface.ip,
                    e
                ),
            }
        }
        if sockets.is_empty() {
            return Err(DiscoveryError::NoInterfaces);
        }

        log::debug!(
            "[SSDP] Searching on {} interface(s) ({} sends with {}ms spacing)",
            sockets.len(),
            self.config.send_count,
            self.config.retry_delay.as_millis()
        );

        let msg = build_msearch_message(self.config.mx_value);

        let send_futures: Vec<_> = sockets
            .iter()
            .map(|(iface, socket)| {
                let socket = Arc::clone(socket);
                let name = iface.name.clone();
                let msg = msg.as_bytes().to_vec();
                let send_count = self.config.send_count;
                let retry_delay = self.config.retry_delay;

                async move {
                    for i in 0..send_count {
                        if i > 0 {
                            tokio::time::sleep(retry_delay).await;
                        }
                        if let Err(e) = socket.send_to(&msg, SSDP_MULTICAST_ADDR).await {
                            log::warn!(
                                "[SSDP] Failed to send M-SEARCH on {} (attempt {}): {}",
                                name,
                                i + 1,
                                e
                            );
                        }
                    }
                }
            })
            .collect();

        let recv_futures: Vec<_> = sockets
            .iter()
            .map(|(iface, socket)| {
                let socket = Arc::clone(socket);
                let name = iface.name.clone();
                let listen_window = self.config.listen_window;
                let tx = tx.clone();

                async move {
                    let mut buf = [0u8; 2048];
                    let mut forwarded = 0usize;
                    let start = tokio::time::Instant::now();

                    while start.elapsed() < listen_window {
                        let remaining = listen_window.saturating_sub(start.elapsed());
                        match timeout(remaining, socket.recv_from(&mut buf)).await {
                            Ok(Ok((amt, src))) => {
                                let response = String::from_utf8_lossy(&buf[..amt]);
                                let Some(event) =
                                    parse_ssdp_response(&response, &src.ip().to_string())
                                else {
                                    continue;
                                };
                                log::trace!(
                                    "[SSDP] Response from {} via {}: {:?}",
                                    src,
                                    name,
                                    event.raw_id
                                );
                                if tx.send(event).await.is_err() {
                                    break;
                                }
                                forwarded += 1;
                            }
                            Ok(Err(e)) => {
                                log::warn!("[SSDP] Socket recv error on {}: {}", name, e);
                            }
                            Err(_) => break,
                        }
                    }
                    forwarded
                }
            })
            .collect();

        let (_, forwarded) = tokio::join!(
            futures::future::join_all(send_futures),
            futures::future::join_all(recv_futures)
        );

        Ok(forwarded.into_iter().sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_msearch_message() {
        let msg = build_msearch_message(1);
        assert!(msg.starts_with("M-SEARCH * HTTP/1.1\r\n"));
        assert!(msg.contains("HOST: 239.255.255.250:1900"));
        assert!(msg.contains("MX: 1"));
        assert!(msg.contains("ST: urn:schemas-upnp-org:device:MediaRenderer:1"));
        assert!(msg.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_parse_ssdp_response_renderer() {
        let response = "HTTP/1.1 200 OK\r\n\
CACHE-CONTROL: max-age=1800\r\n\
LOCATION: http://192.168.1.10:1400/xml/device_description.xml\r\n\
SERVER: Linux UPnP/1.0 Sonos/63.2-88230\r\n\
ST: urn:schemas-upnp-org:device:MediaRenderer:1\r\n\
USN: uuid:RINCON_ABC12345678901400::urn:schemas-upnp-org:device:MediaRenderer:1\r\n\r\n";

        let event = parse_ssdp_response(response, "192.168.1.10").unwrap();
        assert_eq!(event.source_protocol, ProtocolKind::UpnpRenderer);
        assert_eq!(event.address.as_deref(), Some("192.168.1.10"));
        assert_eq!(event.port, Some(1400));
        assert_eq!(
            event.raw_id.as_deref(),
            Some("uuid:RINCON_ABC12345678901400::urn:schemas-upnp-org:device:MediaRenderer:1")
        );
        assert_eq!(event.record("ST"), Some(MEDIA_RENDERER_DEVICE_TYPE));
    }

    #[test]
    fn test_parse_ssdp_response_lowercase_headers() {
        let response = "HTTP/1.1 200 OK\r\n\
location: http://192.168.1.11:1400/xml/device_description.xml\r\n\
st: urn:schemas-upnp-org:device:MediaRenderer:1\r\n\
usn: uuid:RINCON_1::urn:schemas-upnp-org:device:MediaRenderer:1\r\n\r\n";

        let event = parse_ssdp_response(response, "192.168.1.11").unwrap();
        assert!(event.record("LOCATION").is_some());
        assert!(event.raw_id.is_some());
    }

    #[test]
    fn test_parse_notify() {
        let response = "NOTIFY * HTTP/1.1\r\nNT: urn:schemas-upnp-org:device:MediaRenderer:1\r\nUSN: uuid:RINCON_2\r\n\r\n";
        let event = parse_ssdp_response(response, "10.0.0.2").unwrap();
        assert_eq!(event.record("NT"), Some(MEDIA_RENDERER_DEVICE_TYPE));
        assert_eq!(event.port, None);
    }

    #[test]
    fn test_parse_rejects_non_ssdp() {
        assert!(parse_ssdp_response("M-SEARCH * HTTP/1.1\r\n\r\n", "10.0.0.2").is_none());
        assert!(parse_ssdp_response("", "10.0.0.2").is_none());
    }

    #[test]
    fn test_location_port() {
        assert_eq!(location_port("http://10.0.0.1:1400/desc.xml"), Some(1400));
        assert_eq!(location_port("http://10.0.0.1/desc.xml"), None);
        assert_eq!(location_port("10.0.0.1:49152"), Some(49152));
    }

    #[test]
    fn test_starts_with_ignore_ascii_case() {
        assert!(starts_with_ignore_ascii_case("notify * HTTP/1.1", "NOTIFY"));
        assert!(!starts_with_ignore_ascii_case("NOT", "NOTIFY"));
    }
}
