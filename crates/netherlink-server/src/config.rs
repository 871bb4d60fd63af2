//! Server configuration.

use std::time::Duration;

use netherlink_settings::ServerSettings;

/// Runtime configuration for the relay server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// How long a connection may stay unauthenticated.
    pub auth_timeout: Duration,
    /// Per-connection outbound queue capacity, in frames.
    pub outbound_queue: usize,
    /// Interval between server-initiated Ping frames.
    pub heartbeat_interval: Duration,
    /// Silence after which a peer is dropped.
    pub heartbeat_timeout: Duration,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Grace period for connection tasks on shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            auth_timeout: Duration::from_secs(10),
            outbound_queue: 256,
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(90),
            max_message_size: 64 * 1024,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(s: &ServerSettings) -> Self {
        Self {
            host: s.host.clone(),
            port: s.port,
            auth_timeout: Duration::from_secs(s.auth_timeout_secs),
            outbound_queue: s.outbound_queue,
            heartbeat_interval: Duration::from_secs(s.heartbeat_interval_secs),
            heartbeat_timeout: Duration::from_secs(s.heartbeat_timeout_secs),
            max_message_size: s.max_message_size,
            shutdown_timeout: Duration::from_secs(s.shutdown_timeout_secs),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
