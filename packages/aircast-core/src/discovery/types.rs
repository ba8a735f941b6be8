//! Shared types for sink discovery.

use std::collections::HashMap;

use thiserror::Error;

use crate::sink::ProtocolKind;

/// Errors that can occur while starting or running a discovery source.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Failed to bind UDP socket for discovery.
    #[error("failed to bind UDP socket: {0}")]
    SocketBind(#[source] std::io::Error),

    /// No usable network interfaces found.
    #[error("no usable network interfaces found")]
    NoInterfaces,

    /// mDNS daemon error.
    #[error("mDNS daemon error: {0}")]
    MdnsDaemon(String),
}

/// Convenient Result alias for discovery operations.
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// Raw "device seen" notification, exactly as a discovery source produced it.
///
/// Nothing here is validated; the normalizer decides what is usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryEvent {
    pub source_protocol: ProtocolKind,
    /// Protocol-native identifier (SSDP `USN`, cast TXT `id`).
    pub raw_id: Option<String>,
    pub display_name: Option<String>,
    /// Host the device answered from.
    pub address: Option<String>,
    pub port: Option<u16>,
    /// Protocol-specific fields: SSDP headers (upper-case names) or mDNS
    /// TXT entries plus the instance `fullname`.
    pub service_record: HashMap<String, String>,
}

impl DiscoveryEvent {
    /// Creates an empty event for the given protocol.
    #[must_use]
    pub fn new(source_protocol: ProtocolKind) -> Self {
        Self {
            source_protocol,
            raw_id: None,
            display_name: None,
            address: None,
            port: None,
            service_record: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_raw_id(mut self, raw_id: impl Into<String>) -> Self {
        self.raw_id = Some(raw_id.into());
        self
    }

    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_address(mut self, host: impl Into<String>, port: Option<u16>) -> Self {
        self.address = Some(host.into());
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_record(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.service_record.insert(key.into(), value.into());
        self
    }

    /// Looks up a service record field.
    #[must_use]
    pub fn record(&self, key: &str) -> Option<&str> {
        self.service_record.get(key).map(String::as_str)
    }
}

/// Virtual interface prefixes to filter out during discovery.
pub const VIRTUAL_INTERFACE_PREFIXES: &[&str] = &[
    "lo", "docker", "veth", "br-", "virbr", "vmnet", "vbox", "tun", "tap",
];

/// Checks if an interface name belongs to a virtual/container interface.
pub fn is_virtual_interface(name: &str) -> bool {
    let name_lower = name.to_lowercase();
    VIRTUAL_INTERFACE_PREFIXES
        .iter()
        .any(|prefix| name_lower.starts_with(prefix))
}
