//! Errors from loading `~/.kgchat/settings.json`.

use std::path::PathBuf;

use thiserror::Error;

/// Why settings could not be loaded.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Read {
        /// File that was being read.
        path: PathBuf,
        /// Underlying IO failure.
        source: std::io::Error,
    },
    /// The file is not JSON, or a field has the wrong shape.
    #[error("malformed settings: {0}")]
    Json(#[from] serde_json::Error),
    /// `server.url` is not a WebSocket endpoint.
    #[error("server.url must use ws:// or wss://, got `{0}`")]
    UnsupportedScheme(String),
    /// `connection.reconnectDelayMs` is zero.
    #[error("connection.reconnectDelayMs must be positive")]
    ZeroReconnectDelay,
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
