//! Runtime configuration and endpoint URL derivation.
//!
//! Defaults are baked in; deployments override them through `UPLINK_*`
//! environment variables or, for the console binary, its YAML config file.

use crate::backoff::ReconnectPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

/// Where the message server lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host name or address
    pub host: String,
    /// TCP port
    pub port: u16,
    /// Use `wss` instead of `ws`
    pub tls: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8000,
            tls: false,
        }
    }
}

/// Tunables shared by every link a registry creates.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Message server location
    pub server: ServerConfig,
    /// Interval between ping envelopes while connected
    pub ping_interval: Duration,
    /// Window without a pong before the link is declared stale
    pub pong_timeout: Duration,
    /// Reconnect backoff policy
    pub reconnect: ReconnectPolicy,
}

impl LinkConfig {
    /// Configuration with stock timeouts: 15s pings, 30s pong window
    pub fn new(server: ServerConfig) -> Self {
        Self {
            server,
            ping_interval: Duration::from_secs(15),
            pong_timeout: Duration::from_secs(30),
            reconnect: ReconnectPolicy::default(),
        }
    }

    /// Apply `UPLINK_*` environment variable overrides.
    ///
    /// Durations use humantime syntax, e.g. `UPLINK_PING_INTERVAL=15s`.
    pub fn apply_environment_overrides(&mut self) {
        if let Ok(host) = std::env::var("UPLINK_HOST") {
            info!("Server host overridden by environment: {}", host);
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("UPLINK_PORT") {
            match port.parse::<u16>() {
                Ok(port) => {
                    info!("Server port overridden by environment: {}", port);
                    self.server.port = port;
                }
                Err(_) => warn!("Ignoring invalid UPLINK_PORT: {}", port),
            }
        }
        if let Ok(tls) = std::env::var("UPLINK_TLS") {
            self.server.tls = tls.to_lowercase() == "true";
        }
        if let Some(d) = env_duration("UPLINK_PING_INTERVAL") {
            self.ping_interval = d;
        }
        if let Some(d) = env_duration("UPLINK_PONG_TIMEOUT") {
            self.pong_timeout = d;
        }
        if let Some(d) = env_duration("UPLINK_RECONNECT_BASE_DELAY") {
            self.reconnect.base_delay = d;
        }
        if let Some(d) = env_duration("UPLINK_RECONNECT_MAX_DELAY") {
            self.reconnect.max_delay = d;
        }
        if let Ok(attempts) = std::env::var("UPLINK_MAX_RECONNECT_ATTEMPTS") {
            match attempts.parse::<u32>() {
                Ok(n) => self.reconnect.max_attempts = n,
                Err(_) => warn!("Ignoring invalid UPLINK_MAX_RECONNECT_ATTEMPTS: {}", attempts),
            }
        }
    }
}

fn env_duration(key: &str) -> Option<Duration> {
    let raw = std::env::var(key).ok()?;
    match humantime::parse_duration(&raw) {
        Ok(d) => {
            info!("{} overridden by environment: {:?}", key, d);
            Some(d)
        }
        Err(_) => {
            warn!("Ignoring invalid {}: {}", key, raw);
            None
        }
    }
}

/// Derive the full WebSocket URL for an endpoint.
///
/// Pure mapping: `ws[s]://host:port/<endpoint>`, with `wss` iff the server
/// is configured for TLS. A leading slash on the endpoint is tolerated.
pub fn endpoint_url(server: &ServerConfig, endpoint: &str) -> String {
    let scheme = if server.tls { "wss" } else { "ws" };
    let path = endpoint.trim_start_matches('/');
    format!("{}://{}:{}/{}", scheme, server.host, server.port, path)
}

impl LinkConfig {
    /// Stock configuration plus defaults suitable for tests: very short
    /// timeouts so lifecycle paths run in milliseconds.
    #[cfg(test)]
    pub(crate) fn fast(server: ServerConfig) -> Self {
        Self {
            server,
            ping_interval: Duration::from_millis(40),
            pong_timeout: Duration::from_millis(120),
            reconnect: ReconnectPolicy {
                base_delay: Duration::from_millis(20),
                max_delay: Duration::from_millis(200),
                max_attempts: 3,
            },
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}
