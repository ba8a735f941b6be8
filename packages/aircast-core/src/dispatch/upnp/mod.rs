//! UPnP AV renderer adapter.
//!
//! Playback is two SOAP calls on AVTransport: `SetAVTransportURI` with the
//! stream reference and DIDL-Lite metadata, then `Play`. Dispatch succeeds
//! only after both are acknowledged. Retries happen one level up, in
//! [`AdapterDispatch`](super::AdapterDispatch).

mod didl;
mod soap;

pub use soap::{send_soap_request, SoapError, SoapRequestBuilder, SoapResult, UpnpService};

use async_trait::async_trait;
use reqwest::Client;

use super::{DispatchError, ProtocolAdapter};
use crate::protocol_constants::DEFAULT_RENDERER_CONTROL_PORT;
use crate::sink::{ProtocolKind, Sink};
use didl::format_didl_lite;

/// Drives UPnP media renderers over SOAP.
pub struct UpnpAdapter {
    client: Client,
}

impl UpnpAdapter {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// `ip:port` of the renderer's control endpoint.
fn control_host(sink: &Sink) -> String {
    format!(
        "{}:{}",
        sink.address.host,
        sink.address.port_or(DEFAULT_RENDERER_CONTROL_PORT)
    )
}

#[async_trait]
impl ProtocolAdapter for UpnpAdapter {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::UpnpRenderer
    }

    async fn start_playback(&self, sink: &Sink, stream_reference: &str) -> Result<(), DispatchError> {
        let host = control_host(sink);
        let metadata = format_didl_lite(stream_reference, &sink.display_name);

        log::info!("[UPnP] SetAVTransportURI: host={}, uri={}", host, stream_reference);
        SoapRequestBuilder::new(&self.client, &host)
            .service(UpnpService::AVTransport)
            .action("SetAVTransportURI")
            .instance_id()
            .arg("CurrentURI", stream_reference)
            .arg("CurrentURIMetaData", metadata)
            .send()
            .await?;

        log::info!("[UPnP] SetAVTransportURI succeeded, sending Play to {}", host);
        SoapRequestBuilder::new(&self.client, &host)
            .service(UpnpService::AVTransport)
            .action("Play")
            .instance_id()
            .arg("Speed", "1")
            .send()
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{SinkAddress, SinkId, SinkState};

    fn renderer(port: Option<u16>) -> Sink {
        Sink {
            id: SinkId::derive(ProtocolKind::UpnpRenderer, "RINCON_1"),
            display_name: "Echo 10.0.0.5 (Aircast)".into(),
            address: SinkAddress::new("10.0.0.5", port),
            protocol_kind: ProtocolKind::UpnpRenderer,
            assigned_port: Some(5000),
            state: SinkState::Provisioned,
            last_seen_at: 0,
            first_seen_at: 0,
            generation: 1,
        }
    }

    #[test]
    fn control_host_defaults_to_renderer_port() {
        assert_eq!(control_host(&renderer(None)), "10.0.0.5:1400");
        assert_eq!(control_host(&renderer(Some(49152))), "10.0.0.5:49152");
    }

    #[test]
    fn adapter_kind_is_upnp() {
        assert_eq!(UpnpAdapter::new(Client::new()).kind(), ProtocolKind::UpnpRenderer);
    }
}
