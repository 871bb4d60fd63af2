//! Layered settings loading.
//!
//! Sources, lowest priority first:
//! 1. Compiled [`RelaySettings::default()`]
//! 2. `~/.netherlink/settings.json` (or an explicit path), if present
//! 3. `NETHERLINK_*` environment variables, nested with `__`
//!    (e.g. `NETHERLINK_SERVER__PORT=9000`)

use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Json, Serialized};
use figment::Figment;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::{netherlink_home, RelaySettings};

pub const ENV_PREFIX: &str = "NETHERLINK_";

/// Resolve the path to the settings file (`~/.netherlink/settings.json`).
pub fn settings_path() -> PathBuf {
    netherlink_home().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<RelaySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; malformed JSON or out-of-range values
/// are errors.
pub fn load_settings_from_path(path: &Path) -> Result<RelaySettings> {
    if path.exists() {
        debug!(?path, "loading settings from file");
    } else {
        debug!(?path, "settings file not found, using defaults");
    }

    let settings: RelaySettings = figment_for(path).extract()?;
    validate(&settings)?;
    Ok(settings)
}

fn figment_for(path: &Path) -> Figment {
    Figment::from(Serialized::defaults(RelaySettings::default()))
        .merge(Json::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// Reject values the server cannot run with.
pub fn validate(settings: &RelaySettings) -> Result<()> {
    let server = &settings.server;
    if server.auth_timeout_secs == 0 {
        return Err(invalid("server.auth_timeout_secs must be at least 1"));
    }
    if server.outbound_queue == 0 {
        return Err(invalid("server.outbound_queue must be at least 1"));
    }
    if server.heartbeat_interval_secs == 0 {
        return Err(invalid("server.heartbeat_interval_secs must be at least 1"));
    }
    if server.heartbeat_timeout_secs <= server.heartbeat_interval_secs {
        return Err(invalid(
            "server.heartbeat_timeout_secs must exceed server.heartbeat_interval_secs",
        ));
    }
    if server.max_message_size < 1024 {
        return Err(invalid("server.max_message_size must be at least 1024"));
    }
    if settings.jwt.secret.is_empty() {
        return Err(invalid("jwt.secret must not be empty"));
    }
    if settings.jwt.issuer.is_empty() {
        return Err(invalid("jwt.issuer must not be empty"));
    }
    if settings.jwt.expire_secs == 0 {
        return Err(invalid("jwt.expire_secs must be at least 1"));
    }
    Ok(())
}

fn invalid(msg: &str) -> SettingsError {
    SettingsError::InvalidValue(msg.to_string())
}
