//! Low-level SOAP transport for UPnP AV renderers.
//!
//! Builds the SOAP envelope, sends it over HTTP and turns SOAP faults into
//! typed errors. The renderer adapter in `mod.rs` sits on top of this.

use std::time::Duration;

use reqwest::Client;
use thiserror::Error;

use crate::protocol_constants::SOAP_TIMEOUT_SECS;
use crate::utils::{escape_xml, extract_xml_text};

// ─────────────────────────────────────────────────────────────────────────────
// Error Types
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can occur during SOAP operations with a renderer.
#[derive(Debug, Error)]
pub enum SoapError {
    /// HTTP request to the renderer failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Renderer returned a non-success HTTP status without a SOAP fault.
    #[error("HTTP error {0}: {1}")]
    HttpStatus(u16, String),

    /// Renderer returned a SOAP fault response.
    #[error("SOAP fault: {0}")]
    Fault(String),
}

/// Convenient Result alias for SOAP operations.
pub type SoapResult<T> = Result<T, SoapError>;

impl SoapError {
    /// Returns true if this error is transient and the operation should be retried.
    ///
    /// Transient AVTransport fault codes:
    /// - 701: Transition not available (device changing states)
    /// - 714: Illegal seek target (previous source still loading)
    /// - 716: Resource not found (device busy initializing)
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            SoapError::Fault(msg) => {
                msg.contains("701")
                    || msg.contains("714")
                    || msg.contains("716")
                    || msg.to_lowercase().contains("transition")
            }
            // Refused connections and timeouts clear up once the device settles
            SoapError::Http(e) => e.is_timeout() || e.is_connect(),
            SoapError::HttpStatus(status, _) => *status == 503,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Services
// ─────────────────────────────────────────────────────────────────────────────

/// UPnP services the renderer adapter talks to.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum UpnpService {
    /// Audio/Video transport control (set URI, play).
    AVTransport,
}

impl UpnpService {
    /// Returns the UPnP service URN for SOAP requests.
    #[must_use]
    pub fn urn(&self) -> &'static str {
        match self {
            Self::AVTransport => "urn:schemas-upnp-org:service:AVTransport:1",
        }
    }

    /// Returns the UPnP control endpoint path for SOAP requests.
    #[must_use]
    pub fn control_path(&self) -> &'static str {
        match self {
            Self::AVTransport => "/MediaRenderer/AVTransport/Control",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SOAP Request/Response
// ─────────────────────────────────────────────────────────────────────────────

/// Builds the SOAP envelope for `action`.
///
/// Must be a single line with no leading whitespace; some renderers reject
/// XML with whitespace before the root element.
fn build_envelope(service: &str, action: &str, args: &[(&str, &str)]) -> String {
    let mut body = format!(
        r#"<?xml version="1.0" encoding="utf-8"?><s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/"><s:Body><u:{} xmlns:u="{}">"#,
        action, service
    );
    for (k, v) in args {
        body.push_str(&format!("<{k}>{}</{k}>", escape_xml(v)));
    }
    body.push_str(&format!(r#"</u:{}></s:Body></s:Envelope>"#, action));
    body
}

/// Sends a SOAP request to a renderer.
///
/// # Arguments
/// * `client` - The HTTP client to use for the request
/// * `host` - `ip:port` of the renderer's control endpoint
/// * `endpoint` - The control URL path
/// * `service` - The UPnP service URN
/// * `action` - The SOAP action name (e.g., "Play")
/// * `args` - Key-value pairs for action arguments (order is preserved)
pub async fn send_soap_request(
    client: &Client,
    host: &str,
    endpoint: &str,
    service: &str,
    action: &str,
    args: &[(&str, &str)],
) -> SoapResult<String> {
    let url = format!("http://{}{}", host, endpoint);
    let body = build_envelope(service, action, args);

    log::info!("[SOAP] {} -> {} (body: {} bytes)", action, url, body.len());
    log::debug!("[SOAP] Request body: {}", body);

    let start = std::time::Instant::now();
    let res = client
        .post(&url)
        .header("Content-Type", "text/xml; charset=\"utf-8\"")
        .header("SOAPAction", format!("\"{}#{}\"", service, action))
        .body(body)
        .timeout(Duration::from_secs(SOAP_TIMEOUT_SECS))
        .send()
        .await;

    log::info!(
        "[SOAP] {} completed in {:?}: {:?}",
        action,
        start.elapsed(),
        res.as_ref().map(|r| r.status())
    );

    let res = res?;
    let status = res.status();
    let response_text = res.text().await?;

    // SOAP faults usually arrive with a 500 status, so check them first
    if let Some(fault) = parse_fault(&response_text) {
        return Err(SoapError::Fault(fault));
    }

    if !status.is_success() {
        return Err(SoapError::HttpStatus(status.as_u16(), response_text));
    }

    Ok(response_text)
}

/// Extracts a readable fault description from a SOAP fault response.
///
/// Includes the UPnP `errorCode` when present, so transient fault detection
/// can match on it.
fn parse_fault(xml: &str) -> Option<String> {
    if !xml.contains("Fault>") {
        return None;
    }
    let fault = extract_xml_text(xml, "faultstring").unwrap_or_else(|| "Unknown SOAP fault".into());
    Some(match extract_xml_text(xml, "errorCode") {
        Some(code) => format!("{} {}", fault, code),
        None => fault,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// SOAP Request Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for constructing and sending SOAP requests to renderers.
///
/// # Example
/// ```ignore
/// let response = SoapRequestBuilder::new(&client, "192.168.1.100:1400")
///     .service(UpnpService::AVTransport)
///     .action("Play")
///     .instance_id()
///     .arg("Speed", "1")
///     .send()
///     .await?;
/// ```
pub struct SoapRequestBuilder<'a> {
    client: &'a Client,
    host: &'a str,
    service: Option<UpnpService>,
    action: Option<&'a str>,
    args: Vec<(&'a str, String)>,
}

impl<'a> SoapRequestBuilder<'a> {
    #[must_use]
    pub fn new(client: &'a Client, host: &'a str) -> Self {
        Self {
            client,
            host,
            service: None,
            action: None,
            args: Vec::new(),
        }
    }

    #[must_use]
    pub fn service(mut self, service: UpnpService) -> Self {
        self.service = Some(service);
        self
    }

    #[must_use]
    pub fn action(mut self, action: &'a str) -> Self {
        self.action = Some(action);
        self
    }

    /// Adds an argument. Arguments keep insertion order in the SOAP body.
    #[must_use]
    pub fn arg(mut self, key: &'a str, value: impl Into<String>) -> Self {
        self.args.push((key, value.into()));
        self
    }

    /// Adds the standard InstanceID="0" argument.
    #[must_use]
    pub fn instance_id(self) -> Self {
        self.arg("InstanceID", "0")
    }

    /// Sends the SOAP request and returns the response body.
    ///
    /// # Errors
    /// Returns `SoapError` if the service or action is not set, or if the
    /// request fails.
    pub async fn send(self) -> SoapResult<String> {
        let service = self
            .service
            .ok_or_else(|| SoapError::Fault("SoapRequestBuilder: service not set".into()))?;
        let action = self
            .action
            .ok_or_else(|| SoapError::Fault("SoapRequestBuilder: action not set".into()))?;

        let args: Vec<(&str, &str)> = self.args.iter().map(|(k, v)| (*k, v.as_str())).collect();

        send_soap_request(
            self.client,
            self.host,
            service.control_path(),
            service.urn(),
            action,
            &args,
        )
        .await
    }

    /// Returns the request parts without sending (for testing).
    #[cfg(test)]
    pub fn into_parts(self) -> Option<(UpnpService, &'a str, Vec<(&'a str, String)>)> {
        let service = self.service?;
        let action = self.action?;
        Some((service, action, self.args))
    }
}
