//! # kgchat-settings
//!
//! Configuration management with layered sources for the kgchat client.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** — [`KgchatSettings::default()`]
//! 2. **User file** — `~/.kgchat/settings.json` (deep-merged over defaults)
//! 3. **Environment variables** — `KGCHAT_*` overrides (highest priority)
//!
//! Unlike a process-wide singleton, the loaded value is handed to the client
//! explicitly so tests can run several isolated clients side by side.
//!
//! # Usage
//!
//! ```no_run
//! use kgchat_settings::load_settings;
//!
//! let settings = load_settings().unwrap_or_default();
//! println!("backend: {}", settings.server.url);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, kgchat_home, load_settings, load_settings_from_path, settings_path};
pub use types::*;
