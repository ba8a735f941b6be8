//! Converts raw discovery events into canonical [`SinkObservation`]s.
//!
//! Pure and stateless. Events missing an identifier or an address are
//! rejected as `MalformedObservation`. UPnP traffic that is not a renderer we
//! can drive is filtered out as `Ok(None)`: SSDP is noisy and most of what
//! arrives belongs to other devices.

use std::net::IpAddr;

use crate::discovery::DiscoveryEvent;
use crate::error::{BridgeError, BridgeResult};
use crate::protocol_constants::{
    APP_NAME, CAST_SERVICE_TYPE, MEDIA_RENDERER_DEVICE_TYPE, RECOGNIZED_RENDERER_PREFIX,
};
use crate::sink::{ProtocolKind, SinkAddress, SinkObservation};

/// Normalizes one discovery event.
pub fn normalize(event: &DiscoveryEvent) -> BridgeResult<Option<SinkObservation>> {
    let observation = match event.source_protocol {
        ProtocolKind::CastV2 => normalize_cast(event).map(Some),
        ProtocolKind::UpnpRenderer => normalize_upnp(event),
    }?;

    if let Some(ref obs) = observation {
        debug_assert_eq!(
            obs.sink_id().protocol(),
            Some(obs.source_protocol),
            "sink id must encode its source protocol"
        );
    }
    Ok(observation)
}

fn normalize_cast(event: &DiscoveryEvent) -> BridgeResult<SinkObservation> {
    let fullname = event.record("fullname").and_then(non_blank);
    let raw_id = event
        .raw_id
        .as_deref()
        .and_then(non_blank)
        .or(fullname)
        .ok_or_else(|| {
            BridgeError::MalformedObservation("cast service without id or instance name".into())
        })?;

    let address = usable_address(event)?;

    let friendly = event
        .record("fn")
        .and_then(non_blank)
        .or_else(|| event.display_name.as_deref().and_then(non_blank))
        .map(str::to_string)
        .or_else(|| fullname.map(instance_name))
        .unwrap_or_else(|| raw_id.to_string());

    Ok(SinkObservation {
        source_protocol: ProtocolKind::CastV2,
        raw_id: raw_id.to_string(),
        display_name: format!("{} (Chromecast)", friendly),
        address,
    })
}

fn normalize_upnp(event: &DiscoveryEvent) -> BridgeResult<Option<SinkObservation>> {
    let target = event.record("ST").or_else(|| event.record("NT")).unwrap_or("");
    if !target.contains(MEDIA_RENDERER_DEVICE_TYPE) {
        log::trace!("[Normalizer] Ignoring non-renderer SSDP target '{}'", target);
        return Ok(None);
    }

    let usn = event.raw_id.as_deref().and_then(non_blank).ok_or_else(|| {
        BridgeError::MalformedObservation("renderer announcement without USN".into())
    })?;
    let raw_id = canonical_usn(usn);
    if !raw_id.starts_with(RECOGNIZED_RENDERER_PREFIX) {
        log::trace!("[Normalizer] Ignoring unrecognized renderer '{}'", raw_id);
        return Ok(None);
    }

    let address = usable_address(event)?;
    let display_name = event
        .display_name
        .as_deref()
        .and_then(non_blank)
        .map(str::to_string)
        .unwrap_or_else(|| format!("Echo {} ({})", address.host, APP_NAME));

    Ok(Some(SinkObservation {
        source_protocol: ProtocolKind::UpnpRenderer,
        raw_id: raw_id.to_string(),
        display_name,
        address,
    }))
}

/// Strips the `uuid:` prefix and the `::urn:...` suffix of a USN.
fn canonical_usn(usn: &str) -> &str {
    let usn = usn.trim();
    let usn = match usn.get(..5) {
        Some(prefix) if prefix.eq_ignore_ascii_case("uuid:") => &usn[5..],
        _ => usn,
    };
    usn.split("::").next().unwrap_or(usn)
}

/// Instance label of an mDNS full name (`Kitchen._googlecast._tcp.local.` → `Kitchen`).
fn instance_name(fullname: &str) -> String {
    fullname
        .strip_suffix(CAST_SERVICE_TYPE)
        .map(|s| s.trim_end_matches('.'))
        .unwrap_or(fullname)
        .to_string()
}

fn usable_address(event: &DiscoveryEvent) -> BridgeResult<SinkAddress> {
    let host = event
        .address
        .as_deref()
        .and_then(non_blank)
        .ok_or_else(|| BridgeError::MalformedObservation("event without address".into()))?;

    let valid = host.parse::<IpAddr>().is_ok()
        || host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');
    if !valid {
        return Err(BridgeError::MalformedObservation(format!(
            "unusable host '{}'",
            host
        )));
    }

    Ok(SinkAddress::new(host, event.port.filter(|p| *p != 0)))
}

fn non_blank(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}
