//! # kgchat-core
//!
//! Shared vocabulary for the kgchat client crates:
//!
//! - **Protocol**: [`protocol::InboundEvent`] sum type with one variant per
//!   wire discriminator, [`protocol::OutboundRequest`] for client frames,
//!   and the highlight/citation payload shapes the backend emits
//! - **Errors**: frame, transport, and client error enums via `thiserror`
//! - **Logging**: [`logging::init_subscriber`] for the `tracing` stack
//! - **Time**: millisecond wall-clock helper shared by the aggregators

#![deny(unsafe_code)]

pub mod errors;
pub mod logging;
pub mod protocol;
pub mod time;

pub use errors::{ClientError, FrameError, TransportError};
pub use protocol::{ChatMode, InboundEvent, OutboundRequest, ThinkTankEvent, decode_frame};
