//! Configuration handling for the console client.
//!
//! Reads the optional YAML config file, falls back to defaults, and applies
//! `UPLINK_*` environment variable overrides last.

use anyhow::Result;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};
use uplink_session::{LinkConfig, ServerConfig};

/// Console client configuration: where the server is, which endpoints to
/// open at startup, and the link tunables.
#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    /// Link tunables, including the server location
    pub link: LinkConfig,
    /// Endpoints opened at startup
    pub endpoints: Vec<String>,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            link: LinkConfig::new(ServerConfig::default()),
            endpoints: vec!["ws/server".to_string()],
        }
    }
}

/// Raw YAML structure; every field optional so partial files work.
#[derive(Debug, Deserialize)]
struct RawConfig {
    server: Option<RawServer>,
    endpoints: Option<Vec<String>>,
    timeouts: Option<RawTimeouts>,
    reconnect: Option<RawReconnect>,
}

#[derive(Debug, Deserialize)]
struct RawServer {
    host: Option<String>,
    port: Option<u16>,
    tls: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawTimeouts {
    ping_interval: Option<String>,
    pong_timeout: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawReconnect {
    base_delay: Option<String>,
    max_delay: Option<String>,
    max_attempts: Option<u32>,
}

impl ConsoleConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = Self::default();

        if let Ok(content) = std::fs::read_to_string(&config_path) {
            match serde_yaml::from_str::<RawConfig>(&content) {
                Ok(raw) => {
                    config.apply_raw(raw);
                    info!("Loaded configuration from {:?}", config_path.as_ref());
                }
                Err(err) => warn!(
                    "Failed to parse config file {:?} ({}), using defaults",
                    config_path.as_ref(),
                    err
                ),
            }
        } else {
            warn!(
                "Config file {:?} not found, using defaults",
                config_path.as_ref()
            );
        }

        config.link.apply_environment_overrides();
        if let Ok(endpoints) = std::env::var("UPLINK_ENDPOINTS") {
            config.endpoints = endpoints
                .split(',')
                .map(|e| e.trim().to_string())
                .filter(|e| !e.is_empty())
                .collect();
            info!("Endpoints overridden by environment: {:?}", config.endpoints);
        }

        info!(
            "Final configuration: server={}:{} tls={} endpoints={:?}",
            config.link.server.host,
            config.link.server.port,
            config.link.server.tls,
            config.endpoints
        );

        Ok(config)
    }

    fn apply_raw(&mut self, raw: RawConfig) {
        if let Some(server) = raw.server {
            if let Some(host) = server.host {
                self.link.server.host = host;
            }
            if let Some(port) = server.port {
                self.link.server.port = port;
            }
            if let Some(tls) = server.tls {
                self.link.server.tls = tls;
            }
        }
        if let Some(endpoints) = raw.endpoints {
            if !endpoints.is_empty() {
                self.endpoints = endpoints;
            }
        }
        if let Some(timeouts) = raw.timeouts {
            if let Some(d) = parse_duration_field("timeouts.ping_interval", timeouts.ping_interval)
            {
                self.link.ping_interval = d;
            }
            if let Some(d) = parse_duration_field("timeouts.pong_timeout", timeouts.pong_timeout) {
                self.link.pong_timeout = d;
            }
        }
        if let Some(reconnect) = raw.reconnect {
            if let Some(d) = parse_duration_field("reconnect.base_delay", reconnect.base_delay) {
                self.link.reconnect.base_delay = d;
            }
            if let Some(d) = parse_duration_field("reconnect.max_delay", reconnect.max_delay) {
                self.link.reconnect.max_delay = d;
            }
            if let Some(attempts) = reconnect.max_attempts {
                self.link.reconnect.max_attempts = attempts;
            }
        }
    }
}

fn parse_duration_field(key: &str, raw: Option<String>) -> Option<Duration> {
    let raw = raw?;
    match humantime::parse_duration(&raw) {
        Ok(d) => Some(d),
        Err(_) => {
            warn!("Ignoring invalid duration for {}: {}", key, raw);
            None
        }
    }
}
