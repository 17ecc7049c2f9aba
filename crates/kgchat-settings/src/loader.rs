//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`KgchatSettings::default()`]
//! 2. If `~/.kgchat/settings.json` exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate the endpoint URL
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use kgchat_core::ChatMode;
use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::KgchatSettings;

/// Resolve the kgchat home directory (`~/.kgchat`).
pub fn kgchat_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".kgchat")
}

/// Resolve the path to the settings file (`~/.kgchat/settings.json`).
pub fn settings_path() -> PathBuf {
    kgchat_home().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<KgchatSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<KgchatSettings> {
    let defaults = serde_json::to_value(KgchatSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: KgchatSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

/// Overlay a user settings document onto the defaults.
///
/// Nested sections merge key by key, so a file that only sets
/// `connection.reconnectDelayMs` keeps the default `server.url`. Scalars and
/// arrays from the file replace the default; `null` leaves it in place.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are logged and ignored (fall back to file/default).
pub fn apply_env_overrides(settings: &mut KgchatSettings) {
    if let Some(v) = read_env_string("KGCHAT_URL") {
        settings.server.url = v;
    }
    if let Some(v) = read_env_u64("KGCHAT_RECONNECT_DELAY_MS", 100, 600_000) {
        settings.connection.reconnect_delay_ms = v;
    }
    if let Some(v) = read_env_u64("KGCHAT_STARTUP_DELAY_MS", 0, 60_000) {
        settings.connection.startup_delay_ms = v;
    }
    if let Some(v) = read_env_u64("KGCHAT_PING_INTERVAL_MS", 0, 600_000) {
        settings.connection.ping_interval_ms = v;
    }
    if let Some(v) = read_env_string("KGCHAT_SESSION_FILE") {
        settings.session.identity_path = Some(PathBuf::from(v));
    }
    if let Some(v) = read_env_string("KGCHAT_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_string("KGCHAT_MODE") {
        match v.parse::<ChatMode>() {
            Ok(mode) => settings.chat.default_mode = mode,
            Err(e) => tracing::warn!(key = "KGCHAT_MODE", value = %v, error = %e, "invalid chat mode env var, ignoring"),
        }
    }
}

fn validate(settings: &KgchatSettings) -> Result<()> {
    let url = settings.server.url.as_str();
    if !(url.starts_with("ws://") || url.starts_with("wss://")) {
        return Err(SettingsError::UnsupportedScheme(url.to_string()));
    }
    if settings.connection.reconnect_delay_ms == 0 {
        return Err(SettingsError::ZeroReconnectDelay);
    }
    Ok(())
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
