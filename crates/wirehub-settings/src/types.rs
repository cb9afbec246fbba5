//! Settings schema: server, socket, and logging sections.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings document (`~/.wirehub/settings.json`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WireHubSettings {
    /// HTTP listener settings.
    pub server: ServerSettings,
    /// Per-connection socket settings.
    pub socket: SocketSettings,
    /// Logging output settings.
    pub logging: LoggingSettings,
}

impl WireHubSettings {
    /// Check cross-field constraints that serde defaults cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.socket.pong_wait_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "socket.pongWaitMs must be greater than zero".into(),
            ));
        }
        if let Some(ping) = self.socket.ping_interval_ms {
            if ping == 0 || ping >= self.socket.pong_wait_ms {
                return Err(SettingsError::InvalidValue(format!(
                    "socket.pingIntervalMs ({ping}) must be between 1 and pongWaitMs ({})",
                    self.socket.pong_wait_ms
                )));
            }
        }
        if self.socket.send_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "socket.sendQueueCapacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// HTTP listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port (`0` picks a free port).
    pub port: u16,
    /// Upgrades beyond this many live connections are refused.
    pub max_connections: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_connections: 1024,
        }
    }
}

/// Per-connection socket settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SocketSettings {
    /// How long to wait for a pong before the peer is considered dead.
    pub pong_wait_ms: u64,
    /// Ping period. Derived as 9/10 of `pong_wait_ms` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ping_interval_ms: Option<u64>,
    /// Largest inbound message accepted, in bytes.
    pub max_message_size: usize,
    /// Transport read buffer size, in bytes.
    pub read_buffer_size: usize,
    /// Transport write buffer size, in bytes.
    pub write_buffer_size: usize,
    /// Outbound queue slots per connection.
    pub send_queue_capacity: usize,
}

impl Default for SocketSettings {
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

/// Logging output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive, overridden by `RUST_LOG`.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = WireHubSettings::default();
        assert_eq!(s.server.host, "0.0.0.0");
        assert_eq!(s.server.port, 8080);
        assert_eq!(s.server.max_connections, 1024);
        assert_eq!(s.socket.pong_wait_ms, 10_000);
        assert!(s.socket.ping_interval_ms.is_none());
        assert_eq!(s.socket.max_message_size, 512);
        assert_eq!(s.socket.read_buffer_size, 1024);
        assert_eq!(s.socket.write_buffer_size, 1024);
        assert_eq!(s.socket.send_queue_capacity, 1);
        assert_eq!(s.logging.level, "info");
        assert!(!s.logging.json);
    }

    #[test]
    fn defaults_validate() {
        assert!(WireHubSettings::default().validate().is_ok());
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(WireHubSettings::default()).unwrap();
        assert_eq!(json["socket"]["pongWaitMs"], 10_000);
        assert_eq!(json["server"]["maxConnections"], 1024);
        assert!(json["socket"].get("pingIntervalMs").is_none());
    }

    #[test]
    fn partial_document_fills_defaults() {
        let s: WireHubSettings =
            serde_json::from_str(r#"{"socket":{"maxMessageSize":4096}}"#).unwrap();
        assert_eq!(s.socket.max_message_size, 4096);
        assert_eq!(s.socket.pong_wait_ms, 10_000);
        assert_eq!(s.server.port, 8080);
    }

    #[test]
    fn ping_not_below_pong_wait_rejected() {
        let mut s = WireHubSettings::default();
        s.socket.ping_interval_ms = Some(10_000);
        let err = s.validate().unwrap_err();
        assert!(matches!(err, SettingsError::InvalidValue(_)));
    }

    #[test]
    fn zero_ping_rejected() {
        let mut s = WireHubSettings::default();
        s.socket.ping_interval_ms = Some(0);
        assert!(s.validate().is_err());
    }

    #[test]
    fn zero_pong_wait_rejected() {
        let mut s = WireHubSettings::default();
        s.socket.pong_wait_ms = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn zero_queue_capacity_rejected() {
        let mut s = WireHubSettings::default();
        s.socket.send_queue_capacity = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn explicit_ping_interval_accepted() {
        let mut s = WireHubSettings::default();
        s.socket.ping_interval_ms = Some(5_000);
        assert!(s.validate().is_ok());
    }
}
