//! Fixed protocol constants that should NOT be changed.
//!
//! These values are defined by external specifications (SSDP, UPnP AV, CASTV2)
//! and changing them would break protocol compliance.

// ─────────────────────────────────────────────────────────────────────────────
// SSDP / UPnP
// ─────────────────────────────────────────────────────────────────────────────

/// Standard SSDP multicast address and port.
pub const SSDP_MULTICAST_ADDR: &str = "239.255.255.250:1900";

/// Device type every accepted UPnP sink must announce.
pub const MEDIA_RENDERER_DEVICE_TYPE: &str = "urn:schemas-upnp-org:device:MediaRenderer:1";

/// Identifier prefix of renderers we know how to drive.
pub const RECOGNIZED_RENDERER_PREFIX: &str = "RINCON_";

/// Control port used when a renderer did not announce one.
pub const DEFAULT_RENDERER_CONTROL_PORT: u16 = 1400;

/// Timeout for SOAP HTTP requests (seconds).
pub const SOAP_TIMEOUT_SECS: u64 = 10;

// ─────────────────────────────────────────────────────────────────────────────
// CASTV2
// ─────────────────────────────────────────────────────────────────────────────

/// mDNS service type announced by cast receivers (trailing dot required by mdns-sd).
pub const CAST_SERVICE_TYPE: &str = "_googlecast._tcp.local.";

/// TLS control port of cast receivers.
pub const CAST_CONTROL_PORT: u16 = 8009;

/// Default Media Receiver application id.
pub const CAST_DEFAULT_MEDIA_RECEIVER_APP_ID: &str = "CC1AD845";

/// Platform receiver endpoint every sender talks to first.
pub const CAST_PLATFORM_RECEIVER_ID: &str = "receiver-0";

pub const CAST_NAMESPACE_CONNECTION: &str = "urn:x-cast:com.google.cast.tp.connection";
pub const CAST_NAMESPACE_HEARTBEAT: &str = "urn:x-cast:com.google.cast.tp.heartbeat";
pub const CAST_NAMESPACE_RECEIVER: &str = "urn:x-cast:com.google.cast.receiver";
pub const CAST_NAMESPACE_MEDIA: &str = "urn:x-cast:com.google.cast.media";

/// Upper bound for a single cast frame body. Receivers never send more than 64 KiB.
pub const CAST_MAX_FRAME_LEN: usize = 64 * 1024;

/// Content type announced in LOAD requests.
pub const CAST_STREAM_CONTENT_TYPE: &str = "audio/mpeg";

// ─────────────────────────────────────────────────────────────────────────────
// RAOP advertisement
// ─────────────────────────────────────────────────────────────────────────────

/// Service type under which provisioned sinks are offered to AirPlay senders.
pub const RAOP_SERVICE_TYPE: &str = "_raop._tcp.local.";

// ─────────────────────────────────────────────────────────────────────────────
// Application Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Application name used in protocol data (DIDL-Lite metadata, display names).
pub const APP_NAME: &str = "Aircast";

/// Service identifier reported by the health endpoint.
pub const SERVICE_ID: &str = "aircast";

/// Capacity of the event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 100;
