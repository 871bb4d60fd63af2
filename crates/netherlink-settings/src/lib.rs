//! # netherlink-settings
//!
//! Layered configuration for the relay.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** — [`RelaySettings::default()`]
//! 2. **User file** — `~/.netherlink/settings.json`
//! 3. **Environment variables** — `NETHERLINK_*` overrides (highest priority)
//!
//! ```no_run
//! let settings = netherlink_settings::load_settings().unwrap();
//! println!("listening on {}", settings.server.port);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{load_settings, load_settings_from_path, settings_path, validate, ENV_PREFIX};
pub use types::*;
