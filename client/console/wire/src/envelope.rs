//! The JSON message envelope exchanged with endpoints.
//!
//! Envelopes are the unit of exchange on every connection: a flat JSON object
//! with a mandatory `type`, an optional unix-seconds `timestamp`, and any
//! number of payload fields the runtime does not interpret.

use crate::error::EnvelopeError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};

/// Control type sent periodically by the client to probe liveness.
pub const TYPE_PING: &str = "ping";

/// Control type sent by the server in answer to a ping.
pub const TYPE_PONG: &str = "pong";

/// Control type announcing an intentional close, sent best-effort before
/// the socket is closed with code 1000.
pub const TYPE_MANUAL_DISCONNECT: &str = "manual_disconnect";

/// One wire message.
///
/// The `timestamp` convention is unix seconds. Outbound envelopes are stamped
/// when the field is unset; inbound envelopes may legitimately omit it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message type, used for subscriber routing
    #[serde(rename = "type")]
    pub kind: String,

    /// Unix seconds at which the message was produced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,

    /// Payload fields beyond the envelope contract (opaque to the runtime)
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Envelope {
    /// Create an envelope with no timestamp and no payload fields
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            timestamp: None,
            fields: Map::new(),
        }
    }

    /// Create an envelope stamped with the current unix time
    pub fn stamped(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            timestamp: Some(unix_now()),
            fields: Map::new(),
        }
    }

    /// Build a `ping` control envelope
    pub fn ping() -> Self {
        Self::stamped(TYPE_PING)
    }

    /// Build a `manual_disconnect` control envelope
    pub fn manual_disconnect() -> Self {
        Self::stamped(TYPE_MANUAL_DISCONNECT)
    }

    /// Attach a payload field (builder style)
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Set the timestamp to the current unix time if it is not already set
    pub fn stamp(&mut self) {
        if self.timestamp.is_none() {
            self.timestamp = Some(unix_now());
        }
    }

    /// Whether this is one of the reserved control types
    pub fn is_control(&self) -> bool {
        matches!(
            self.kind.as_str(),
            TYPE_PING | TYPE_PONG | TYPE_MANUAL_DISCONNECT
        )
    }

    /// Serialize to the JSON text carried in a WebSocket text frame
    pub fn encode(&self) -> String {
        // A flat map of JSON values cannot fail to serialize
        serde_json::to_string(self).expect("envelope serialization should never fail")
    }

    /// Parse an inbound text frame.
    ///
    /// Frames that are not JSON objects or lack a string `type` are rejected;
    /// the caller logs and drops them without touching connection state.
    pub fn decode(text: &str) -> Result<Self, EnvelopeError> {
        let value: Value = serde_json::from_str(text)?;
        if !value.is_object() {
            return Err(EnvelopeError::NotAnObject);
        }
        if value.get("type").and_then(Value::as_str).is_none() {
            return Err(EnvelopeError::MissingType);
        }
        Ok(serde_json::from_value(value)?)
    }
}

/// Current unix time in whole seconds
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
