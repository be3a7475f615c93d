//! Observable link lifecycle states.

use std::fmt;

/// Lifecycle state of one endpoint's link.
///
/// Every transition is published on the endpoint's `watch` channel, so the
/// latest value is always synchronously readable and late subscribers see
/// the current state immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    /// No socket. Initial state, and the result of a manual disconnect or a
    /// clean (code 1000) close from the peer.
    Disconnected,
    /// Dial and WebSocket handshake in progress.
    Connecting,
    /// Socket open, heartbeat running.
    Connected,
    /// Abnormal close or connect failure. A retry may be pending; once the
    /// attempt cap is reached the link parks here until an explicit connect.
    Error,
}

impl LinkStatus {
    /// Whether the link is currently usable for sending
    pub fn is_connected(self) -> bool {
        self == LinkStatus::Connected
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkStatus::Disconnected => "disconnected",
            LinkStatus::Connecting => "connecting",
            LinkStatus::Connected => "connected",
            LinkStatus::Error => "error",
        };
        f.write_str(s)
    }
}
