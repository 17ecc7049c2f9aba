//! # kgchat-client
//!
//! Real-time consumer of the multi-agent chat backend.
//!
//! - [`identity`]: durable session identity shared across connections
//! - [`transport`]: transport traits and the WebSocket implementation
//! - [`connection`]: connect, register, reconnect, teardown
//! - [`dispatch`]: frame decoding and event routing
//! - [`conversation`]: ordered messages and per-agent streaming buffers
//! - [`deliberation`]: think-tank rounds, citations, consensus, summary
//! - [`highlight`]: completion highlights for the graph view
//! - [`client`]: [`ChatClient`], the assembled session
//!
//! Nothing here is a process-wide singleton. Every component is an owned
//! value, so tests can run several isolated clients side by side.

#![deny(unsafe_code)]

pub mod client;
pub mod connection;
pub mod conversation;
pub mod deliberation;
pub mod dispatch;
pub mod highlight;
pub mod identity;
pub mod transport;

pub use client::ChatClient;
pub use connection::{ConnectionConfig, ConnectionManager, ConnectionState};
pub use conversation::{Conversation, Message, MessageKind};
pub use deliberation::{RoundState, RoundStatus, RoundTracker};
pub use dispatch::EventDispatcher;
pub use highlight::{HighlightMap, HighlightSet, HighlightSink};
pub use identity::SessionIdentityStore;
pub use transport::{Connector, Transport, WebSocketConnector};
