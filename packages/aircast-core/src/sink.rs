//! Canonical sink model shared by every component.
//!
//! Discovery sources speak two unrelated protocols. Everything past the
//! normalizer only ever sees the types in this module.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Casting protocol a sink speaks natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProtocolKind {
    /// Chromecast-style receiver (CASTV2 over TLS), discovered via mDNS.
    CastV2,
    /// UPnP AV media renderer, discovered via SSDP.
    UpnpRenderer,
}

impl ProtocolKind {
    /// Short prefix used when deriving sink ids.
    #[must_use]
    pub fn id_prefix(&self) -> &'static str {
        match self {
            Self::CastV2 => "cast",
            Self::UpnpRenderer => "upnp",
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CastV2 => write!(f, "CASTV2"),
            Self::UpnpRenderer => write!(f, "UPnP renderer"),
        }
    }
}

/// Registry key of a sink.
///
/// Derived from `(protocol, raw_id)` so that repeated observations of the
/// same device always map to the same entry, and two protocols can never
/// collide on an identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SinkId(String);

impl SinkId {
    /// Derives the id for a protocol-native identifier.
    #[must_use]
    pub fn derive(protocol: ProtocolKind, raw_id: &str) -> Self {
        Self(format!("{}:{}", protocol.id_prefix(), raw_id))
    }

    /// Wraps an id received from outside (HTTP path, tests).
    #[must_use]
    pub fn from_raw(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Protocol encoded in the id prefix, if any.
    #[must_use]
    pub fn protocol(&self) -> Option<ProtocolKind> {
        let (prefix, _) = self.0.split_once(':')?;
        [ProtocolKind::CastV2, ProtocolKind::UpnpRenderer]
            .into_iter()
            .find(|kind| kind.id_prefix() == prefix)
    }
}

impl fmt::Display for SinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Network location of a sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SinkAddress {
    pub host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl SinkAddress {
    #[must_use]
    pub fn new(host: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Port to contact, falling back to the protocol's well-known port.
    #[must_use]
    pub fn port_or(&self, default: u16) -> u16 {
        self.port.unwrap_or(default)
    }
}

impl fmt::Display for SinkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}:{}", self.host, port),
            None => f.write_str(&self.host),
        }
    }
}

/// A validated "device seen" notification, produced by the normalizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkObservation {
    pub source_protocol: ProtocolKind,
    pub raw_id: String,
    pub display_name: String,
    pub address: SinkAddress,
}

impl SinkObservation {
    /// Registry id this observation maps to.
    #[must_use]
    pub fn sink_id(&self) -> SinkId {
        SinkId::derive(self.source_protocol, &self.raw_id)
    }
}

/// Lifecycle state of a sink.
///
/// `Discovered → Provisioned → Streaming → Retired`, with a direct edge from
/// `Discovered` or `Provisioned` to `Retired`. Nothing leaves `Retired`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SinkState {
    Discovered,
    Provisioned,
    Streaming,
    Retired,
}

impl SinkState {
    /// Whether a port has been assigned in this state.
    #[must_use]
    pub fn holds_port(&self) -> bool {
        matches!(self, Self::Provisioned | Self::Streaming)
    }

    #[must_use]
    pub fn can_transition_to(&self, next: SinkState) -> bool {
        use SinkState::*;
        matches!(
            (self, next),
            (Discovered, Provisioned)
                | (Provisioned, Streaming)
                | (Discovered, Retired)
                | (Provisioned, Retired)
                | (Streaming, Retired)
        )
    }
}

impl fmt::Display for SinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Discovered => "DISCOVERED",
            Self::Provisioned => "PROVISIONED",
            Self::Streaming => "STREAMING",
            Self::Retired => "RETIRED",
        };
        f.write_str(s)
    }
}

/// A known sink. Owned by the registry; everyone else holds snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Sink {
    pub id: SinkId,
    pub display_name: String,
    pub address: SinkAddress,
    pub protocol_kind: ProtocolKind,
    pub assigned_port: Option<u16>,
    pub state: SinkState,
    /// Unix timestamp (ms) of the latest observation.
    pub last_seen_at: u64,
    /// Unix timestamp (ms) of the first observation.
    pub first_seen_at: u64,
    /// Registry-wide activation number. A retired and re-discovered device
    /// gets a new generation, which lets late dispatch results be discarded.
    pub generation: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_id_is_namespaced_by_protocol() {
        let cast = SinkId::derive(ProtocolKind::CastV2, "abc");
        let upnp = SinkId::derive(ProtocolKind::UpnpRenderer, "abc");
        assert_eq!(cast.as_str(), "cast:abc");
        assert_eq!(upnp.as_str(), "upnp:abc");
        assert_ne!(cast, upnp);
    }

    #[test]
    fn sink_id_reports_protocol() {
        assert_eq!(
            SinkId::from_raw("upnp:RINCON_1").protocol(),
            Some(ProtocolKind::UpnpRenderer)
        );
        assert_eq!(SinkId::from_raw("cast:x").protocol(), Some(ProtocolKind::CastV2));
        assert_eq!(SinkId::from_raw("airplay:x").protocol(), None);
        assert_eq!(SinkId::from_raw("nocolon").protocol(), None);
    }

    #[test]
    fn state_machine_edges() {
        use SinkState::*;
        assert!(Discovered.can_transition_to(Provisioned));
        assert!(Provisioned.can_transition_to(Streaming));
        assert!(Discovered.can_transition_to(Retired));
        assert!(Provisioned.can_transition_to(Retired));
        assert!(Streaming.can_transition_to(Retired));

        assert!(!Discovered.can_transition_to(Streaming));
        assert!(!Streaming.can_transition_to(Provisioned));
        for next in [Discovered, Provisioned, Streaming, Retired] {
            assert!(!Retired.can_transition_to(next));
        }
    }

    #[test]
    fn address_port_fallback() {
        assert_eq!(SinkAddress::new("10.0.0.2", None).port_or(8009), 8009);
        assert_eq!(SinkAddress::new("10.0.0.2", Some(1400)).port_or(8009), 1400);
        assert_eq!(SinkAddress::new("10.0.0.2", Some(1400)).to_string(), "10.0.0.2:1400");
    }

    #[test]
    fn sink_serializes_camel_case() {
        let sink = Sink {
            id: SinkId::derive(ProtocolKind::CastV2, "abc"),
            display_name: "Kitchen (Chromecast)".into(),
            address: SinkAddress::new("10.0.0.2", None),
            protocol_kind: ProtocolKind::CastV2,
            assigned_port: Some(5000),
            state: SinkState::Provisioned,
            last_seen_at: 2,
            first_seen_at: 1,
            generation: 1,
        };
        let json = serde_json::to_value(&sink).unwrap();
        assert_eq!(json["id"], "cast:abc");
        assert_eq!(json["assignedPort"], 5000);
        assert_eq!(json["protocolKind"], "castV2");
        assert_eq!(json["state"], "provisioned");
        assert!(json["address"].get("port").is_none());
    }
}
