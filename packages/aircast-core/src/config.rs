//! Configuration surface of the bridge.

use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};
use crate::protocol_constants::EVENT_CHANNEL_CAPACITY;

/// Retry and timeout behaviour of protocol dispatch.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct DispatchConfig {
    /// Total attempts per dispatch, including the first one.
    pub max_attempts: u32,

    /// Delay before each retry (milliseconds). The last entry is reused when
    /// there are more retries than entries.
    pub backoff_ms: Vec<u64>,

    /// Upper bound for a single attempt (milliseconds).
    pub attempt_timeout_ms: u64,
}

impl DispatchConfig {
    /// Validates the dispatch configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("dispatch.max_attempts must be >= 1".to_string());
        }
        if self.attempt_timeout_ms == 0 {
            return Err("dispatch.attempt_timeout_ms must be >= 1".to_string());
        }
        if self.max_attempts > 1 && self.backoff_ms.is_empty() {
            return Err("dispatch.backoff_ms must not be empty when retries are enabled".to_string());
        }
        Ok(())
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: vec![200, 500, 1000],
            attempt_timeout_ms: 8000,
        }
    }
}

/// Configuration for the Aircast bridge.
///
/// All fields have sensible defaults.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    // Control API
    /// Port of the HTTP control API (0 = API disabled).
    pub api_port: u16,

    /// IP address announced to sinks and AirPlay senders (None = auto-detect).
    pub advertise_ip: Option<IpAddr>,

    // Port pool
    /// Lowest port handed out to sinks.
    pub min_port: u16,

    /// Highest port handed out to sinks (inclusive).
    pub max_port: u16,

    // Discovery
    /// Interval between discovery searches, and length of one staleness window (seconds).
    pub search_interval_secs: u64,

    /// Consecutive windows a sink may go unseen before it is retired.
    pub stale_after_windows: u32,

    /// Enable cast receiver discovery via mDNS.
    pub discovery_cast_mdns: bool,

    /// Enable UPnP renderer discovery via SSDP.
    pub discovery_upnp_ssdp: bool,

    /// Number of M-SEARCH packets sent per search.
    pub ssdp_send_count: u64,

    /// Delay between M-SEARCH packets (milliseconds).
    pub ssdp_retry_delay_ms: u64,

    /// MX value of M-SEARCH (max response delay in seconds).
    pub ssdp_mx: u64,

    /// How long to collect SSDP responses per search (milliseconds).
    pub ssdp_listen_window_ms: u64,

    /// mDNS browse window per search (milliseconds).
    pub mdns_browse_timeout_ms: u64,

    /// Capacity of the channel between discovery producers and the coordinator.
    pub discovery_channel_capacity: usize,

    // Dispatch
    pub dispatch: DispatchConfig,

    // Advertisement
    /// Publish each provisioned sink as an AirPlay (RAOP) receiver.
    pub advertise_raop: bool,

    /// Capacity of the event broadcast channel.
    pub event_channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_port: 49500,
            advertise_ip: None,
            min_port: 5000,
            max_port: 5099,
            search_interval_secs: 30,
            stale_after_windows: 3,
            discovery_cast_mdns: true,
            discovery_upnp_ssdp: true,
            ssdp_send_count: 3,
            ssdp_retry_delay_ms: 800,
            ssdp_mx: 1,
            ssdp_listen_window_ms: 5000,
            mdns_browse_timeout_ms: 2000,
            discovery_channel_capacity: 256,
            dispatch: DispatchConfig::default(),
            advertise_raop: true,
            event_channel_capacity: EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl Config {
    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns `BridgeError::Configuration` naming the first offending option.
    pub fn validate(&self) -> BridgeResult<()> {
        if self.min_port == 0 {
            return Err(BridgeError::Configuration("min_port must be >= 1".into()));
        }
        if self.min_port > self.max_port {
            return Err(BridgeError::Configuration(format!(
                "min_port ({}) must not exceed max_port ({})",
                self.min_port, self.max_port
            )));
        }
        if self.api_port != 0 && (self.min_port..=self.max_port).contains(&self.api_port) {
            return Err(BridgeError::Configuration(format!(
                "api_port {} overlaps the sink port pool",
                self.api_port
            )));
        }
        if self.search_interval_secs == 0 {
            return Err(BridgeError::Configuration(
                "search_interval_secs must be >= 1".into(),
            ));
        }
        if self.stale_after_windows == 0 {
            return Err(BridgeError::Configuration(
                "stale_after_windows must be >= 1".into(),
            ));
        }
        if self.discovery_channel_capacity == 0 || self.event_channel_capacity == 0 {
            return Err(BridgeError::Configuration(
                "channel capacities must be >= 1".into(),
            ));
        }
        self.dispatch.validate().map_err(BridgeError::Configuration)
    }

    /// Period of the discovery search trigger.
    #[must_use]
    pub fn search_interval(&self) -> Duration {
        Duration::from_secs(self.search_interval_secs)
    }

    /// Age after which an unconfirmed sink is retired.
    #[must_use]
    pub fn stale_threshold(&self) -> Duration {
        self.search_interval() * self.stale_after_windows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.min_port, 5000);
        assert_eq!(config.stale_threshold(), Duration::from_secs(90));
    }

    #[test]
    fn inverted_pool_is_rejected() {
        let config = Config {
            min_port: 6000,
            max_port: 5000,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(BridgeError::Configuration(msg)) if msg.contains("max_port")
        ));
    }

    #[test]
    fn api_port_inside_pool_is_rejected() {
        let config = Config {
            api_port: 5050,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let disabled = Config {
            api_port: 0,
            ..Default::default()
        };
        assert!(disabled.validate().is_ok());
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let config = Config {
            dispatch: DispatchConfig {
                max_attempts: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn single_attempt_needs_no_backoff() {
        let dispatch = DispatchConfig {
            max_attempts: 1,
            backoff_ms: vec![],
            attempt_timeout_ms: 100,
        };
        assert!(dispatch.validate().is_ok());
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"min_port": 7000, "max_port": 7001}"#).unwrap();
        assert_eq!(config.min_port, 7000);
        assert_eq!(config.search_interval_secs, 30);
        assert_eq!(config.dispatch, DispatchConfig::default());
    }
}
