//! Network context: the address sinks and AirPlay senders reach us at.
//!
//! Supports explicit configuration (`advertise_ip` set) and auto-detection
//! from the system's network interfaces.

use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::RwLock;

/// Local address shared by the API, the RAOP advertiser and stream URLs.
#[derive(Clone)]
pub struct NetworkContext {
    local_ip: Arc<RwLock<IpAddr>>,
    ip_detector: Option<Arc<dyn IpDetector>>,
}

impl NetworkContext {
    /// Creates a context with a fixed advertise address.
    #[must_use]
    pub fn explicit(advertise_ip: IpAddr) -> Self {
        Self {
            local_ip: Arc::new(RwLock::new(advertise_ip)),
            ip_detector: None,
        }
    }

    /// Creates a context whose address is detected, and can be re-detected
    /// when the network changes.
    ///
    /// # Errors
    /// Returns an error if the initial detection fails.
    pub fn auto_detect(ip_detector: Arc<dyn IpDetector>) -> Result<Self, NetworkError> {
        let local_ip = ip_detector.detect()?;
        Ok(Self {
            local_ip: Arc::new(RwLock::new(local_ip)),
            ip_detector: Some(ip_detector),
        })
    }

    #[must_use]
    pub fn local_ip(&self) -> IpAddr {
        *self.local_ip.read()
    }

    /// Re-runs detection and stores the result.
    ///
    /// # Errors
    /// Returns `NetworkError::NoDetector` in explicit mode.
    pub fn refresh(&self) -> Result<IpAddr, NetworkError> {
        let detector = self.ip_detector.as_ref().ok_or(NetworkError::NoDetector)?;
        let ip = detector.detect()?;
        let previous = std::mem::replace(&mut *self.local_ip.write(), ip);
        if previous != ip {
            log::info!("[Network] Local IP changed: {} -> {}", previous, ip);
        }
        Ok(ip)
    }

    /// Default stream URL served for a sink on `port`.
    #[must_use]
    pub fn stream_url(&self, port: u16) -> String {
        match self.local_ip() {
            IpAddr::V6(ip) => format!("http://[{}]:{}/stream", ip, port),
            ip => format!("http://{}:{}/stream", ip, port),
        }
    }
}

/// Strategy for finding the local address.
pub trait IpDetector: Send + Sync {
    fn detect(&self) -> Result<IpAddr, NetworkError>;
}

/// Detector backed by the system's network interfaces.
#[derive(Debug, Clone, Default)]
pub struct LocalIpDetector;

impl LocalIpDetector {
    /// Creates a new `LocalIpDetector` wrapped in an Arc.
    #[must_use]
    pub fn arc() -> Arc<dyn IpDetector> {
        Arc::new(Self)
    }
}

impl IpDetector for LocalIpDetector {
    fn detect(&self) -> Result<IpAddr, NetworkError> {
        local_ip_address::local_ip().map_err(|e| NetworkError::Detection(e.to_string()))
    }
}

/// Errors that can occur while determining the local address.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("Failed to detect local IP: {0}")]
    Detection(String),

    #[error("No IP detector configured (using explicit mode)")]
    NoDetector,
}
