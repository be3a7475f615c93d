//! Console client binary.
//!
//! Opens a resilient WebSocket link per configured endpoint, logs every
//! status transition and inbound envelope, and tears the links down cleanly
//! on SIGINT/SIGTERM.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use uplink_session::{LinkRegistry, LinkStatus, WILDCARD};

mod config;
mod logging;

use config::ConsoleConfig;
use logging::UplinkLogFormatter;

/// Console client multiplexing resilient WebSocket links
#[derive(Parser, Debug)]
#[command(name = "uplink-console", version, about = "Resilient WebSocket console client")]
struct Args {
    /// Server host (overrides config file)
    #[arg(long)]
    host: Option<String>,

    /// Server port (overrides config file)
    #[arg(long)]
    port: Option<u16>,

    /// Use wss:// instead of ws://
    #[arg(long)]
    tls: bool,

    /// Endpoint path to open, e.g. ws/robot-1/imu (repeatable; overrides config file)
    #[arg(long)]
    endpoint: Vec<String>,

    /// Ping interval, e.g. 15s
    #[arg(long)]
    ping_interval: Option<humantime::Duration>,

    /// Pong timeout, e.g. 30s
    #[arg(long)]
    pong_timeout: Option<humantime::Duration>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Configuration file path
    #[arg(long, default_value = "uplink.yaml")]
    config: PathBuf,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("info")
        .add_directive(format!("uplink_session={}", args.log_level).parse()?)
        .add_directive(format!("uplink_wire={}", args.log_level).parse()?)
        .add_directive(format!("uplink_console={}", args.log_level).parse()?);

    let formatter = UplinkLogFormatter::new("console".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_ansi(true)
        .event_format(formatter)
        .init();

    info!("Starting uplink console v{}", env!("CARGO_PKG_VERSION"));

    let mut console_config = ConsoleConfig::load_from_file(&args.config)?;

    // Command-line flags win over file and environment
    if let Some(host) = args.host {
        console_config.link.server.host = host;
    }
    if let Some(port) = args.port {
        console_config.link.server.port = port;
    }
    if args.tls {
        console_config.link.server.tls = true;
    }
    if !args.endpoint.is_empty() {
        console_config.endpoints = args.endpoint.clone();
    }
    if let Some(interval) = args.ping_interval {
        console_config.link.ping_interval = Duration::from(interval);
    }
    if let Some(timeout) = args.pong_timeout {
        console_config.link.pong_timeout = Duration::from(timeout);
    }

    if console_config.endpoints.is_empty() {
        anyhow::bail!("No endpoints configured; pass --endpoint or list them in the config file");
    }

    info!(
        "Link config: ping_interval={:?}, pong_timeout={:?}, reconnect base={:?} max={:?} attempts={}",
        console_config.link.ping_interval,
        console_config.link.pong_timeout,
        console_config.link.reconnect.base_delay,
        console_config.link.reconnect.max_delay,
        console_config.link.reconnect.max_attempts
    );

    let registry = Arc::new(LinkRegistry::new(console_config.link.clone()));

    for endpoint in &console_config.endpoints {
        // Subscribe before connecting so the first inbound frame is never lost
        let mut subscription = registry.subscribe(endpoint, WILDCARD).await;
        let mut status = registry.watch_status(endpoint).await;
        registry.connect(endpoint).await;

        let ep = endpoint.clone();
        tokio::spawn(async move {
            while let Some(envelope) = subscription.recv().await {
                info!(endpoint = %ep, "{} {}", envelope.kind, serde_json::Value::Object(envelope.fields));
            }
            debug!(endpoint = %ep, "subscription closed");
        });

        let ep = endpoint.clone();
        tokio::spawn(async move {
            // Skip the initial value; only transitions are worth logging
            status.mark_unchanged();
            while status.changed().await.is_ok() {
                let current = *status.borrow_and_update();
                match current {
                    LinkStatus::Connected => info!(endpoint = %ep, "link connected"),
                    LinkStatus::Connecting => debug!(endpoint = %ep, "link connecting"),
                    LinkStatus::Disconnected => info!(endpoint = %ep, "link disconnected"),
                    LinkStatus::Error => warn!(endpoint = %ep, "link error, reconnect pending"),
                }
            }
        });
    }

    info!(
        "Console started with {} endpoint(s). Waiting for Ctrl+C...",
        console_config.endpoints.len()
    );

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to install SIGTERM handler: {}", e))?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT, shutting down");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down");
        }
    }

    registry.close_all().await;
    // Give the drivers a moment to flush goodbyes and close frames
    tokio::time::sleep(Duration::from_millis(200)).await;

    info!("Console shutdown complete");
    Ok(())
}
