//! Heartbeat liveness tracking.
//!
//! While a link is connected the driver sends a `ping` envelope on a fixed
//! interval and records every `pong` that comes back. If no pong arrives
//! within the timeout window the link is declared stale and force-closed,
//! which bounds how long a silently-dead connection can masquerade as alive.

use std::time::{Duration, Instant};

/// Pong arrival tracking for one open socket.
///
/// Created when the link enters the connected state and dropped when it
/// leaves it; the clock starts at creation so a connection that never
/// produces a pong still times out.
#[derive(Debug)]
pub struct Heartbeat {
    last_pong: Instant,
    pong_timeout: Duration,
}

impl Heartbeat {
    /// Start tracking with the clock set to now
    pub fn new(pong_timeout: Duration) -> Self {
        Self {
            last_pong: Instant::now(),
            pong_timeout,
        }
    }

    /// Record a pong arrival
    pub fn record_pong(&mut self) {
        self.last_pong = Instant::now();
    }

    /// Whether the pong timeout window has elapsed without a pong
    pub fn is_stale(&self) -> bool {
        self.last_pong.elapsed() > self.pong_timeout
    }

    /// Time since the most recent pong (or since tracking started)
    pub fn since_last_pong(&self) -> Duration {
        self.last_pong.elapsed()
    }
}
