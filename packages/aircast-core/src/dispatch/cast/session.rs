//! One CASTV2 control connection.
//!
//! Generic over the byte stream so the protocol exchange can be exercised
//! against an in-memory peer; production connections run over TLS.

use std::io;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_native_tls::TlsStream;

use super::frame::{check_frame_len, CastMessage};
use super::CastError;
use crate::protocol_constants::{
    CAST_DEFAULT_MEDIA_RECEIVER_APP_ID, CAST_NAMESPACE_CONNECTION, CAST_NAMESPACE_HEARTBEAT,
    CAST_NAMESPACE_MEDIA, CAST_NAMESPACE_RECEIVER, CAST_PLATFORM_RECEIVER_ID,
    CAST_STREAM_CONTENT_TYPE,
};

/// Media namespace replies that reject a LOAD.
const LOAD_ERROR_TYPES: &[&str] = &["LOAD_FAILED", "LOAD_CANCELLED", "INVALID_REQUEST"];

/// TLS connection as used against real receivers.
pub type TlsCastConnection = CastConnection<TlsStream<TcpStream>>;

/// Media receiver application running on the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTransport {
    pub transport_id: String,
    pub session_id: String,
}

/// Sender side of a cast control channel.
pub struct CastConnection<S> {
    stream: S,
    sender_id: String,
    next_request_id: u64,
    transport: Option<MediaTransport>,
}

/// Opens a TLS control connection to `host:port`.
///
/// Receivers present self-signed certificates, so verification is off.
pub async fn connect_tls(
    host: &str,
    port: u16,
    connect_timeout: Duration,
) -> Result<TlsCastConnection, CastError> {
    let addr = format!("{}:{}", host, port);
    let tcp = tokio::time::timeout(connect_timeout, TcpStream::connect(&addr))
        .await
        .map_err(|_| {
            CastError::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("connect to {} timed out", addr),
            ))
        })??;
    let _ = tcp.set_nodelay(true);

    let connector = native_tls::TlsConnector::builder()
        .danger_accept_invalid_certs(true)
        .danger_accept_invalid_hostnames(true)
        .build()?;
    let stream = tokio_native_tls::TlsConnector::from(connector)
        .connect(host, tcp)
        .await?;

    log::debug!("[Cast] TLS connection established to {}", addr);
    Ok(CastConnection::new(
        stream,
        format!("sender-{}", uuid::Uuid::new_v4().simple()),
    ))
}

impl<S> CastConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, sender_id: impl Into<String>) -> Self {
        Self {
            stream,
            sender_id: sender_id.into(),
            next_request_id: 1,
            transport: None,
        }
    }

    #[must_use]
    pub fn transport(&self) -> Option<&MediaTransport> {
        self.transport.as_ref()
    }

    fn alloc_request_id(&mut self) -> u64 {
        let id = self.next_request_id;
        self.next_request_id += 1;
        id
    }

    /// Writes one message.
    pub async fn send_message(&mut self, msg: &CastMessage) -> Result<(), CastError> {
        let frame = msg.encode()?;
        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn send_json(
        &mut self,
        namespace: &str,
        destination_id: &str,
        payload: Value,
    ) -> Result<(), CastError> {
        let msg = CastMessage::new(
            self.sender_id.as_str(),
            destination_id,
            namespace,
            payload.to_string(),
        );
        self.send_message(&msg).await
    }

    /// Reads one message. End of stream maps to `CastError::Closed`.
    pub async fn recv_message(&mut self) -> Result<CastMessage, CastError> {
        let len = match self.stream.read_u32().await {
            Ok(len) => check_frame_len(len)?,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Err(CastError::Closed),
            Err(e) => return Err(e.into()),
        };
        let mut body = vec![0u8; len];
        match self.stream.read_exact(&mut body).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Err(CastError::Closed),
            Err(e) => return Err(e.into()),
        }
        CastMessage::decode(&body)
    }

    /// Next non-heartbeat JSON message. PINGs are answered on the way.
    async fn next_payload(&mut self) -> Result<(CastMessage, Value), CastError> {
        loop {
            let msg = self.recv_message().await?;
            let Ok(value) = serde_json::from_str::<Value>(&msg.payload) else {
                log::trace!("[Cast] Ignoring non-JSON payload on {}", msg.namespace);
                continue;
            };
            let kind = value.get("type").and_then(Value::as_str).unwrap_or("");

            if msg.namespace == CAST_NAMESPACE_HEARTBEAT {
                if kind == "PING" {
                    self.send_json(CAST_NAMESPACE_HEARTBEAT, &msg.source_id, json!({"type": "PONG"}))
                        .await?;
                }
                continue;
            }
            if msg.namespace == CAST_NAMESPACE_CONNECTION && kind == "CLOSE" {
                log::debug!("[Cast] Receiver closed virtual connection {}", msg.source_id);
                self.transport = None;
                return Err(CastError::Closed);
            }
            return Ok((msg, value));
        }
    }

    /// Returns the media transport, launching the Default Media Receiver
    /// when this connection has none yet.
    pub async fn ensure_media_transport(
        &mut self,
        launch_timeout: Duration,
    ) -> Result<MediaTransport, CastError> {
        if let Some(transport) = &self.transport {
            return Ok(transport.clone());
        }

        self.send_json(
            CAST_NAMESPACE_CONNECTION,
            CAST_PLATFORM_RECEIVER_ID,
            json!({"type": "CONNECT", "origin": {}}),
        )
        .await?;

        let request_id = self.alloc_request_id();
        self.send_json(
            CAST_NAMESPACE_RECEIVER,
            CAST_PLATFORM_RECEIVER_ID,
            json!({
                "type": "LAUNCH",
                "appId": CAST_DEFAULT_MEDIA_RECEIVER_APP_ID,
                "requestId": request_id,
            }),
        )
        .await?;

        let transport = tokio::time::timeout(launch_timeout, self.await_media_transport(request_id))
            .await
            .map_err(|_| CastError::LaunchTimeout)??;

        self.send_json(
            CAST_NAMESPACE_CONNECTION,
            &transport.transport_id,
            json!({"type": "CONNECT", "origin": {}}),
        )
        .await?;

        log::info!(
            "[Cast] Media receiver running (transport {}, session {})",
            transport.transport_id,
            transport.session_id
        );
        self.transport = Some(transport.clone());
        Ok(transport)
    }

    async fn await_media_transport(&mut self, request_id: u64) -> Result<MediaTransport, CastError> {
        loop {
            let (msg, value) = self.next_payload().await?;
            if msg.namespace != CAST_NAMESPACE_RECEIVER {
                continue;
            }
            let kind = value.get("type").and_then(Value::as_str).unwrap_or("");
            if kind == "LAUNCH_ERROR" && request_matches(&value, request_id) {
                let reason = value.get("reason").and_then(Value::as_str).unwrap_or("unknown");
                return Err(CastError::LoadRejected(format!("launch failed: {}", reason)));
            }
            if let Some(transport) = media_transport_from_status(&value) {
                return Ok(transport);
            }
        }
    }

    /// LOADs `content_id` on the media transport and waits up to
    /// `load_timeout` for the receiver to answer the request.
    pub async fn load(&mut self, content_id: &str, load_timeout: Duration) -> Result<(), CastError> {
        let transport = self.transport.clone().ok_or(CastError::Closed)?;
        let request_id = self.alloc_request_id();

        self.send_json(
            CAST_NAMESPACE_MEDIA,
            &transport.transport_id,
            json!({
                "type": "LOAD",
                "requestId": request_id,
                "sessionId": transport.session_id,
                "autoplay": true,
                "currentTime": 0,
                "media": {
                    "contentId": content_id,
                    "streamType": "LIVE",
                    "contentType": CAST_STREAM_CONTENT_TYPE,
                },
            }),
        )
        .await?;

        tokio::time::timeout(load_timeout, self.await_load_reply(request_id))
            .await
            .map_err(|_| CastError::LoadTimeout)?
    }

    async fn await_load_reply(&mut self, request_id: u64) -> Result<(), CastError> {
        loop {
            let (msg, value) = self.next_payload().await?;
            if msg.namespace != CAST_NAMESPACE_MEDIA || !request_matches(&value, request_id) {
                continue;
            }
            let kind = value.get("type").and_then(Value::as_str).unwrap_or("");
            if kind == "MEDIA_STATUS" {
                return Ok(());
            }
            if LOAD_ERROR_TYPES.contains(&kind) {
                let reason = value
                    .get("reason")
                    .and_then(Value::as_str)
                    .map_or_else(|| kind.to_string(), |r| format!("{}: {}", kind, r));
                return Err(CastError::LoadRejected(reason));
            }
        }
    }
}

fn request_matches(value: &Value, request_id: u64) -> bool {
    value.get("requestId").and_then(Value::as_u64) == Some(request_id)
}

/// Finds the Default Media Receiver in a RECEIVER_STATUS payload.
fn media_transport_from_status(value: &Value) -> Option<MediaTransport> {
    value
        .get("status")?
        .get("applications")?
        .as_array()?
        .iter()
        .filter(|app| {
            app.get("appId").and_then(Value::as_str) == Some(CAST_DEFAULT_MEDIA_RECEIVER_APP_ID)
        })
        .find_map(|app| {
            Some(MediaTransport {
                transport_id: app.get("transportId")?.as_str()?.to_string(),
                session_id: app.get("sessionId")?.as_str()?.to_string(),
            })
        })
}
