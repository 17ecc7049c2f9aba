//! Error hierarchy for the kgchat client.
//!
//! - [`FrameError`]: an inbound frame could not be decoded. Always logged and
//!   dropped by the dispatcher, never surfaced to the user.
//! - [`TransportError`]: the persistent connection failed to open, send, or
//!   receive. Recovered by the reconnect loop.
//! - [`ClientError`]: what callers of the public client API see.

use thiserror::Error;

/// An inbound frame that could not be turned into an event.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The frame is not valid JSON, or a known variant is missing fields.
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    /// The frame is JSON but has no string `type` field.
    #[error("frame has no `type` discriminator")]
    MissingDiscriminator,
}

/// Failure of the underlying persistent connection.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Opening the connection failed.
    #[error("failed to connect to {url}: {reason}")]
    Connect {
        /// Endpoint that was dialed.
        url: String,
        /// Underlying cause.
        reason: String,
    },

    /// Writing a frame failed.
    #[error("send failed: {0}")]
    Send(String),

    /// Reading a frame failed.
    #[error("receive failed: {0}")]
    Receive(String),

    /// The connection is already closed.
    #[error("connection closed")]
    Closed,
}

/// Errors returned by the client's public operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// A send was attempted while the connection was not open.
    ///
    /// Nothing is queued; the caller decides whether to retry.
    #[error("not connected")]
    NotConnected,

    /// The transport failed.
    #[error("{0}")]
    Transport(#[from] TransportError),

    /// An outbound request could not be serialized.
    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
