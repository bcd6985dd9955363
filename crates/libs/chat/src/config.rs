use crate::error::ChatError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Timers of the UDP connection layer.
/// Corresponds to the `[transport]` table in either TOML file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TransportConfig {
    /// Idle time after which a heartbeat is sent to keep the peer alive.
    pub heartbeat_ms: u64,
    /// Silence after which a peer is considered gone.
    pub timeout_ms: u64,
    /// Client only: delay between connect request retries.
    pub connect_interval_ms: u64,
    /// Client only: retries before giving up on the handshake.
    pub max_connect_attempts: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            heartbeat_ms: 1000,
            timeout_ms: 10_000,
            connect_interval_ms: 500,
            max_connect_attempts: 20,
        }
    }
}

impl TransportConfig {
    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn connect_interval(&self) -> Duration {
        Duration::from_millis(self.connect_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Lines kept in the in-memory server log; the oldest is evicted first.
    pub max_log_entries: usize,
    pub roster_initial_delay_ms: u64,
    pub roster_interval_ms: u64,
    pub tick_ms: u64,
    pub transport: TransportConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9000,
            max_log_entries: 50,
            roster_initial_delay_ms: 1000,
            roster_interval_ms: 5000,
            tick_ms: 16,
            transport: TransportConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn roster_initial_delay(&self) -> Duration {
        Duration::from_millis(self.roster_initial_delay_ms)
    }

    pub fn roster_interval(&self) -> Duration {
        Duration::from_millis(self.roster_interval_ms)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClientConfig {
    pub server_addr: String,
    /// Name sent in the registration handshake. Supplied by the player profile.
    pub display_name: String,
    pub tick_ms: u64,
    pub transport: TransportConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:9000".to_string(),
            display_name: "Jugador".to_string(),
            tick_ms: 16,
            transport: TransportConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

/// Reads and parses a TOML configuration file.
pub fn load<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ChatError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| ChatError::Config(format!("could not read {}: {}", path.display(), e)))?;
    Ok(toml::from_str(&contents)?)
}
