//! WebSocket links, heartbeat liveness, backoff reconnect, and typed fan-out.
//!
//! This crate is the connection-multiplexing and resilience layer of the
//! uplink client runtime. It maintains one long-lived, bidirectional link per
//! logical endpoint (a robot or a control server) over an unreliable network
//! and presents a stable send/subscribe surface on top.
//!
//! ## Features
//!
//! - **Link drivers**: one tokio task per endpoint exclusively owns that
//!   endpoint's socket and drives every state transition
//! - **Heartbeat**: periodic `ping` envelopes with pong-staleness detection;
//!   stale links are force-closed so dead connections cannot linger
//! - **Auto-reconnect**: capped exponential backoff, suppressed on manual
//!   disconnect, parked after the attempt budget is spent
//! - **Dispatcher**: per-link fan-out from message type (or wildcard) to
//!   independent subscriber channels, preserving socket arrival order
//! - **Registry**: the single owner of all links and the only public API
//!
//! ## Example
//!
//! ```rust,no_run
//! use uplink_session::{LinkConfig, LinkRegistry, ServerConfig, WILDCARD};
//! use uplink_wire::Envelope;
//! use serde_json::json;
//!
//! # async fn example() {
//! let registry = LinkRegistry::new(LinkConfig::new(ServerConfig::default()));
//!
//! let mut telemetry = registry.subscribe("ws/robot-1/imu", WILDCARD).await;
//! registry.connect("ws/robot-1/imu").await;
//!
//! let accepted = registry
//!     .send("ws/robot-1/imu", Envelope::new("get_bno055_data").with_field("robot_id", json!(1)))
//!     .await;
//! if !accepted {
//!     eprintln!("link not connected yet");
//! }
//!
//! while let Some(envelope) = telemetry.recv().await {
//!     println!("{}: {:?}", envelope.kind, envelope.fields);
//! }
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backoff;
pub mod config;
mod connection;
pub mod dispatch;
pub mod heartbeat;
pub mod registry;
pub mod status;

// Re-export main types
pub use backoff::{ReconnectPolicy, ReconnectSchedule};
pub use config::{endpoint_url, LinkConfig, ServerConfig};
pub use connection::{DISCONNECT_GRACE, STALE_CLOSE_CODE};
pub use dispatch::{Dispatcher, SubscriberId, WILDCARD};
pub use heartbeat::Heartbeat;
pub use registry::{LinkRegistry, Subscription};
pub use status::LinkStatus;
