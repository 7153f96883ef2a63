//! Message bus — the publish/consume abstraction between channels and the agent loop.
//!
//! Two implementations satisfy the same [`Bus`] capability: [`queue::MessageBus`]
//! (in-process, used when the agent and gateway run as one program) and
//! [`network::NetworkBusServer`] / [`network::NetworkBusClient`] (split agent/gateway
//! processes talking over TCP). The Channel Manager and Agent Loop are written once
//! against the trait.

pub mod codec;
pub mod network;
pub mod queue;
pub mod traits;
pub mod types;

pub use queue::MessageBus;
pub use traits::Bus;
pub use types::{InboundMessage, OutboundMessage};
