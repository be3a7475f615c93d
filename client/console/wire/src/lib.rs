//! Message envelope encoding/decoding and the reserved control vocabulary for uplink.
//!
//! This crate owns the one wire-level contract the whole client runtime relies on:
//! every frame exchanged with an endpoint is a JSON object carrying a `type`
//! string, an optional `timestamp`, and arbitrary payload fields.
//!
//! ## Wire Format
//!
//! ```text
//! { "type": "<string>", "timestamp": <unix seconds>, ...payload }
//! ```
//!
//! - `type` is mandatory; a text frame without it is rejected as malformed.
//! - `timestamp` is unix **seconds**. It is stamped on outbound envelopes when
//!   absent and tolerated when missing on inbound ones.
//! - Everything else is opaque payload: the runtime never interprets it.
//!
//! The control types `ping`, `pong`, and `manual_disconnect` are reserved for
//! the runtime: pings probe liveness, pong frames are consumed by the
//! heartbeat, and `manual_disconnect` announces an intentional close.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod envelope;
pub mod error;

// Re-export main types
pub use envelope::{
    unix_now, Envelope, TYPE_MANUAL_DISCONNECT, TYPE_PING, TYPE_PONG,
};
pub use error::EnvelopeError;
