//! Settings shape and compiled defaults.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Secret used when nothing is configured. Fine for local runs only.
pub const DEV_JWT_SECRET: &str = "netherlink-dev-secret";

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub jwt: JwtSettings,
    pub logging: LoggingSettings,
}

/// Listener and per-connection limits.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    /// `0` binds an ephemeral port.
    pub port: u16,
    /// How long a fresh connection may stay unauthenticated.
    pub auth_timeout_secs: u64,
    /// Capacity of each connection's outbound frame queue.
    pub outbound_queue: usize,
    pub heartbeat_interval_secs: u64,
    pub heartbeat_timeout_secs: u64,
    pub max_message_size: usize,
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8081,
            auth_timeout_secs: 10,
            outbound_queue: 256,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            max_message_size: 64 * 1024,
            shutdown_timeout_secs: 10,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub path: PathBuf,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: netherlink_home().join("database").join("netherlink.db"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtSettings {
    pub secret: String,
    pub issuer: String,
    pub expire_secs: u64,
}

impl JwtSettings {
    pub fn uses_dev_secret(&self) -> bool {
        self.secret == DEV_JWT_SECRET
    }
}

impl Default for JwtSettings {
    fn default() -> Self {
        Self {
            secret: DEV_JWT_SECRET.into(),
            issuer: "netherlink".into(),
            expire_secs: 7 * 24 * 60 * 60,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive, overridden by `RUST_LOG`.
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

/// `~/.netherlink`, falling back to `/tmp` without `HOME`.
pub fn netherlink_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".netherlink")
}
