//! Ping/pong liveness timing.

use std::time::Duration;

use axum::extract::ws::Message;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};

use crate::config::{MIN_PING_INTERVAL, SocketConfig};

use super::connection::Connection;

/// Heartbeat timing for one connection.
///
/// The outbound pump pings every `ping_interval`; the inbound pump fails the
/// next read once `pong_wait` passes without a pong.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Heartbeat {
    /// Window in which a pong must arrive.
    pub pong_wait: Duration,
    /// Ping period; shorter than `pong_wait`.
    pub ping_interval: Duration,
}

impl Heartbeat {
    /// Timing from socket configuration.
    pub fn from_config(config: &SocketConfig) -> Self {
        Self {
            pong_wait: config.pong_wait(),
            ping_interval: config.ping_interval(),
        }
    }

    /// Ping ticker. The first tick fires one period from now.
    pub fn ticker(&self) -> Interval {
        let period = self.ping_interval.max(MIN_PING_INTERVAL);
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    /// Record a pong.
    pub fn pong_received(&self, connection: &Connection) {
        connection.extend_deadline(self.pong_wait);
    }

    /// Empty ping frame.
    pub fn ping() -> Message {
        Message::Ping(Vec::new().into())
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::from_config(&SocketConfig::default())
    }
}
