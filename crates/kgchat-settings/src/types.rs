//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so the
//! settings file may be partial. Each type implements [`Default`] with the
//! production values.

use std::path::PathBuf;

use kgchat_core::ChatMode;
use serde::{Deserialize, Serialize};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "url": "wss://kg.example.com/ws" },
///   "connection": { "reconnectDelayMs": 5000 }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KgchatSettings {
    /// Backend endpoint.
    pub server: ServerSettings,
    /// Connection lifecycle timing.
    pub connection: ConnectionSettings,
    /// Durable session identity.
    pub session: SessionSettings,
    /// Chat defaults.
    pub chat: ChatSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

/// Backend endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// WebSocket URL of the agent backend.
    pub url: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8000/ws".to_string(),
        }
    }
}

/// Connection lifecycle timing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSettings {
    /// Fixed delay before each reconnect attempt.
    pub reconnect_delay_ms: u64,
    /// Delay before the very first connect.
    pub startup_delay_ms: u64,
    /// Interval between client `ping` frames while open. `0` disables.
    pub ping_interval_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 3000,
            startup_delay_ms: 100,
            ping_interval_ms: 30_000,
        }
    }
}

/// Durable session identity.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// File holding the identity. `None` means `~/.kgchat/browser_session_id`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_path: Option<PathBuf>,
}

/// Chat defaults.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatSettings {
    /// Mode used when the caller does not pick one.
    pub default_mode: ChatMode,
    /// Round budget shown before the backend announces one.
    pub default_max_rounds: u32,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            default_mode: ChatMode::Group,
            default_max_rounds: kgchat_core::protocol::DEFAULT_MAX_ROUNDS,
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `tracing` filter directive used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}
