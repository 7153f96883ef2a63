//! Oxibot Core — shared types, the message bus, session storage, and config.
//!
//! This crate contains:
//! - **types**: `Message`, `Session`, `MediaAttachment` and the other shared data model
//! - **bus**: the inbound/outbound message bus, in-process or over TCP
//! - **session**: session persistence
//! - **config**: layered config loading
//! - **heartbeat**: periodic idle-time agent nudges
//! - **error**: the crate-wide `CoreError` type

pub mod bus;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod session;
pub mod types;
pub mod utils;

pub use bus::{Bus, InboundMessage, MessageBus, OutboundMessage};
pub use error::CoreError;
pub use session::SessionManager;
pub use types::{MediaAttachment, Message, Session};
pub use utils::Paths;
