//! Server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Shortest ping period a ticker accepts.
pub const MIN_PING_INTERVAL: Duration = Duration::from_millis(1);

/// Configuration for the wirehub server.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Per-connection socket limits and heartbeat timing.
    pub socket: SocketConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 1024,
            socket: SocketConfig::default(),
        }
    }
}

/// Per-connection transport limits and heartbeat timing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    /// How long a connection may go without a pong, in milliseconds.
    pub pong_wait_ms: u64,
    /// Ping period in milliseconds. `None` means 9/10 of `pong_wait_ms`.
    pub ping_interval_ms: Option<u64>,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Transport read buffer size in bytes.
    pub read_buffer_size: usize,
    /// Transport write buffer size in bytes.
    pub write_buffer_size: usize,
    /// Outbound queue slots per connection (at least 1).
    pub send_queue_capacity: usize,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            pong_wait_ms: 10_000,
            ping_interval_ms: None,
            max_message_size: 512,
            read_buffer_size: 1024,
            write_buffer_size: 1024,
            send_queue_capacity: 1,
        }
    }
}

impl SocketConfig {
    /// Liveness reply window.
    pub fn pong_wait(&self) -> Duration {
        Duration::from_millis(self.pong_wait_ms)
    }

    /// Liveness ping period, never shorter than [`MIN_PING_INTERVAL`].
    pub fn ping_interval(&self) -> Duration {
        let interval = match self.ping_interval_ms {
            Some(ms) => Duration::from_millis(ms),
            None => self.pong_wait() * 9 / 10,
        };
        interval.max(MIN_PING_INTERVAL)
    }

    /// Queue capacity clamped to what `tokio::sync::mpsc` accepts.
    pub fn queue_capacity(&self) -> usize {
        self.send_queue_capacity.max(1)
    }
}
