//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::net::IpAddr;
use std::path::Path;

use aircast_core::DispatchConfig;
use anyhow::{Context, Result};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port of the HTTP control API (0 disables it).
    /// Override: `AIRCAST_API_PORT`
    pub api_port: u16,

    /// IP address announced to sinks and AirPlay senders.
    /// If not specified, auto-detection will be attempted.
    /// Override: `AIRCAST_ADVERTISE_IP`
    pub advertise_ip: Option<IpAddr>,

    /// Lowest port of the sink port pool.
    /// Override: `AIRCAST_MIN_PORT`
    pub min_port: u16,

    /// Highest port of the sink port pool (inclusive).
    /// Override: `AIRCAST_MAX_PORT`
    pub max_port: u16,

    /// Seconds between discovery searches.
    /// Override: `AIRCAST_SEARCH_INTERVAL`
    pub search_interval_secs: u64,

    /// Missed search windows before a sink is retired.
    pub stale_after_windows: u32,

    /// Enable cast receiver discovery via mDNS.
    pub discovery_cast_mdns: bool,

    /// Enable UPnP renderer discovery via SSDP.
    pub discovery_upnp_ssdp: bool,

    /// Publish provisioned sinks as AirPlay receivers.
    /// Override: `AIRCAST_ADVERTISE_RAOP`
    pub advertise_raop: bool,

    /// Dispatch retry behaviour.
    pub dispatch: DispatchConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let core = aircast_core::Config::default();
        Self {
            api_port: core.api_port,
            advertise_ip: None,
            min_port: core.min_port,
            max_port: core.max_port,
            search_interval_secs: core.search_interval_secs,
            stale_after_windows: core.stale_after_windows,
            discovery_cast_mdns: true,
            discovery_upnp_ssdp: true,
            advertise_raop: true,
            dispatch: DispatchConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Applies `AIRCAST_*` overrides. Unparsable values are ignored.
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(port) = var("AIRCAST_API_PORT").and_then(|v| v.parse().ok()) {
            self.api_port = port;
        }
        if let Some(ip) = var("AIRCAST_ADVERTISE_IP").and_then(|v| v.parse().ok()) {
            self.advertise_ip = Some(ip);
        }
        if let Some(port) = var("AIRCAST_MIN_PORT").and_then(|v| v.parse().ok()) {
            self.min_port = port;
        }
        if let Some(port) = var("AIRCAST_MAX_PORT").and_then(|v| v.parse().ok()) {
            self.max_port = port;
        }
        if let Some(secs) = var("AIRCAST_SEARCH_INTERVAL").and_then(|v| v.parse().ok()) {
            self.search_interval_secs = secs;
        }
        if let Some(enabled) = var("AIRCAST_ADVERTISE_RAOP").and_then(|v| v.parse().ok()) {
            self.advertise_raop = enabled;
        }
    }

    /// Converts to aircast-core's Config type.
    pub fn to_core_config(&self) -> aircast_core::Config {
        aircast_core::Config {
            api_port: self.api_port,
            advertise_ip: self.advertise_ip,
            min_port: self.min_port,
            max_port: self.max_port,
            search_interval_secs: self.search_interval_secs,
            stale_after_windows: self.stale_after_windows,
            discovery_cast_mdns: self.discovery_cast_mdns,
            discovery_upnp_ssdp: self.discovery_upnp_ssdp,
            advertise_raop: self.advertise_raop,
            dispatch: self.dispatch.clone(),
            ..Default::default()
        }
    }
}
