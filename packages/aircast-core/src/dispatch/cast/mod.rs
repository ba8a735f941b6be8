//! CASTV2 receiver adapter.
//!
//! Keeps one TLS control connection per receiver address. A connection is
//! only kept after an exchange that finished cleanly; one that failed or was
//! cancelled mid-exchange is evicted so the next attempt reconnects from
//! scratch.

mod frame;
mod session;

pub use frame::CastMessage;
pub use session::{connect_tls, CastConnection, MediaTransport, TlsCastConnection};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Mutex;

use super::{DispatchError, ProtocolAdapter};
use crate::protocol_constants::CAST_CONTROL_PORT;
use crate::sink::{ProtocolKind, Sink};

/// TCP connect bound for a receiver's control port.
const CAST_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Time a receiver gets to report the launched media application.
const CAST_LAUNCH_TIMEOUT: Duration = Duration::from_secs(6);

/// Time a receiver gets to answer a LOAD.
const CAST_LOAD_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors on a cast control channel.
#[derive(Debug, Error)]
pub enum CastError {
    #[error("cast I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cast TLS error: {0}")]
    Tls(#[from] native_tls::Error),

    #[error("invalid cast frame: {0}")]
    Frame(String),

    #[error("cast connection closed by receiver")]
    Closed,

    #[error("receiver did not launch the media application in time")]
    LaunchTimeout,

    #[error("receiver did not answer the LOAD in time")]
    LoadTimeout,

    #[error("receiver rejected the request: {0}")]
    LoadRejected(String),
}

impl CastError {
    /// Returns true if reconnecting and trying again may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Closed | Self::LaunchTimeout | Self::LoadTimeout
        )
    }

    /// Whether the connection that produced this error must be dropped.
    fn breaks_connection(&self) -> bool {
        !matches!(self, Self::LoadRejected(_))
    }
}

/// Connections keyed by `host:port`, each behind its own async lock.
struct ConnectionPool<C> {
    conns: DashMap<String, Arc<Mutex<C>>>,
}

impl<C> Default for ConnectionPool<C> {
    fn default() -> Self {
        Self {
            conns: DashMap::new(),
        }
    }
}

impl<C> ConnectionPool<C> {
    fn len(&self) -> usize {
        self.conns.len()
    }

    fn lease(&self, key: &str) -> Option<Lease<'_, C>> {
        let conn = self.conns.get(key).map(|c| Arc::clone(c.value()))?;
        Some(Lease::new(self, key, conn))
    }

    /// Pools `conn` unless a concurrent attempt got there first, in which
    /// case the pooled connection wins.
    fn insert(&self, key: &str, conn: C) -> Lease<'_, C> {
        let pooled = Arc::clone(
            self.conns
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(conn)))
                .value(),
        );
        Lease::new(self, key, pooled)
    }

    /// Removes `conn` if it is still the pooled connection for `key`.
    fn evict(&self, key: &str, conn: &Arc<Mutex<C>>) {
        if self
            .conns
            .remove_if(key, |_, pooled| Arc::ptr_eq(pooled, conn))
            .is_some()
        {
            log::debug!("[Cast] Evicted connection to {}", key);
        }
    }
}

/// A pooled connection checked out for one exchange.
///
/// Dropping the lease evicts the connection unless [`Lease::keep`] was
/// called. A cancelled exchange may have consumed part of a frame, so the
/// stream cannot be trusted afterwards.
struct Lease<'a, C> {
    pool: &'a ConnectionPool<C>,
    key: String,
    conn: Arc<Mutex<C>>,
    keep: bool,
}

impl<'a, C> Lease<'a, C> {
    fn new(pool: &'a ConnectionPool<C>, key: &str, conn: Arc<Mutex<C>>) -> Self {
        Self {
            pool,
            key: key.to_string(),
            conn,
            keep: false,
        }
    }

    fn connection(&self) -> &Mutex<C> {
        &self.conn
    }

    /// Returns the connection to the pool for reuse.
    fn keep(mut self) {
        self.keep = true;
    }
}

impl<C> Drop for Lease<'_, C> {
    fn drop(&mut self) {
        if !self.keep {
            self.pool.evict(&self.key, &self.conn);
        }
    }
}

/// Drives cast receivers over CASTV2.
#[derive(Default)]
pub struct CastAdapter {
    pool: ConnectionPool<TlsCastConnection>,
}

impl CastAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pooled connections.
    #[must_use]
    pub fn pooled(&self) -> usize {
        self.pool.len()
    }

    async fn lease(&self, host: &str, port: u16) -> Result<Lease<'_, TlsCastConnection>, CastError> {
        let key = format!("{}:{}", host, port);
        if let Some(lease) = self.pool.lease(&key) {
            return Ok(lease);
        }

        log::info!("[Cast] Connecting to {}", key);
        let conn = connect_tls(host, port, CAST_CONNECT_TIMEOUT).await?;
        Ok(self.pool.insert(&key, conn))
    }
}

/// Launches the media receiver if needed, then LOADs `stream_reference`.
async fn launch_and_load<S>(conn: &mut CastConnection<S>, stream_reference: &str) -> Result<(), CastError>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    conn.ensure_media_transport(CAST_LAUNCH_TIMEOUT).await?;
    conn.load(stream_reference, CAST_LOAD_TIMEOUT).await
}

#[async_trait]
impl ProtocolAdapter for CastAdapter {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::CastV2
    }

    async fn start_playback(&self, sink: &Sink, stream_reference: &str) -> Result<(), DispatchError> {
        let host = sink.address.host.as_str();
        let port = sink.address.port_or(CAST_CONTROL_PORT);

        let lease = self.lease(host, port).await?;
        let result = {
            let mut conn = lease.connection().lock().await;
            launch_and_load(&mut *conn, stream_reference).await
        };

        match result {
            Ok(()) => {
                lease.keep();
                log::info!("[Cast] {} loaded {}", sink.id, stream_reference);
                Ok(())
            }
            Err(e) => {
                // A rejection leaves the channel in sync; anything else drops it
                if !e.breaks_connection() {
                    lease.keep();
                }
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{SinkAddress, SinkId, SinkState};
    use tokio::io::AsyncWriteExt;

    #[test]
    fn transient_classification() {
        assert!(CastError::Closed.is_transient());
        assert!(CastError::LaunchTimeout.is_transient());
        assert!(CastError::LoadTimeout.is_transient());
        assert!(CastError::Io(std::io::Error::from(std::io::ErrorKind::ConnectionRefused)).is_transient());
        assert!(!CastError::LoadRejected("LOAD_FAILED".into()).is_transient());
        assert!(!CastError::Frame("bad".into()).is_transient());
    }

    #[test]
    fn only_rejections_keep_the_connection() {
        assert!(!CastError::LoadRejected("x".into()).breaks_connection());
        assert!(CastError::Closed.breaks_connection());
        assert!(CastError::LoadTimeout.breaks_connection());
    }

    fn frame(payload: &str) -> Vec<u8> {
        CastMessage::new("receiver-0", "sender-test", "urn:x-cast:test", payload)
            .encode()
            .unwrap()
            .to_vec()
    }

    #[test]
    fn dropped_lease_evicts_and_kept_lease_stays() {
        let pool = ConnectionPool::default();
        pool.insert("10.0.0.3:8009", ()).keep();
        assert_eq!(pool.len(), 1);

        let lease = pool.lease("10.0.0.3:8009").unwrap();
        drop(lease);
        assert_eq!(pool.len(), 0);
        assert!(pool.lease("10.0.0.3:8009").is_none());
    }

    #[test]
    fn stale_lease_does_not_evict_a_replacement() {
        let pool = ConnectionPool::default();
        pool.insert("k", 1u8).keep();
        let stale = pool.lease("k").unwrap();

        // Another attempt saw the connection break and reconnected
        drop(pool.lease("k"));
        pool.insert("k", 2u8).keep();

        drop(stale);
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn cancelled_exchange_evicts_the_connection() {
        let (client, mut server) = tokio::io::duplex(64 * 1024);
        let pool = ConnectionPool::default();
        pool.insert("k", CastConnection::new(client, "sender-test")).keep();

        // Half a frame arrives, then the attempt is cancelled mid-read
        let first = frame(r#"{"type":"RECEIVER_STATUS"}"#);
        let (head, tail) = first.split_at(first.len() / 2);
        server.write_all(head).await.unwrap();

        let attempt = async {
            let lease = pool.lease("k").unwrap();
            let mut conn = lease.connection().lock().await;
            let msg = conn.recv_message().await;
            drop(conn);
            lease.keep();
            msg
        };
        let timed_out = tokio::time::timeout(Duration::from_millis(50), attempt).await;
        assert!(timed_out.is_err());
        assert_eq!(pool.len(), 0);

        // The desynchronized stream never reaches another attempt
        server.write_all(tail).await.unwrap();
        server.write_all(&frame(r#"{"type":"PING"}"#)).await.unwrap();
        assert!(pool.lease("k").is_none());
    }

    #[tokio::test]
    async fn unreachable_receiver_fails_transiently_and_pools_nothing() {
        // Port 9 on loopback: nothing listens, connect is refused
        let sink = Sink {
            id: SinkId::derive(ProtocolKind::CastV2, "abc"),
            display_name: "Test (Chromecast)".into(),
            address: SinkAddress::new("127.0.0.1", Some(9)),
            protocol_kind: ProtocolKind::CastV2,
            assigned_port: Some(5000),
            state: SinkState::Provisioned,
            last_seen_at: 0,
            first_seen_at: 0,
            generation: 1,
        };
        let adapter = CastAdapter::new();
        let err = adapter.start_playback(&sink, "http://x/stream").await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(adapter.pooled(), 0);
    }
}
