//! The `Bus` capability — the duck-typed contract both bus implementations satisfy.
//!
//! Both [`super::queue::MessageBus`] (in-process) and the network bus halves in
//! [`super::network`] implement this trait so the Channel Manager and Agent Loop
//! depend on the capability alone, never on which transport backs it.

use async_trait::async_trait;

use super::types::{InboundMessage, OutboundMessage};

#[async_trait]
pub trait Bus: Send + Sync {
    /// Publish a message produced by a channel connector.
    async fn publish_inbound(&self, msg: InboundMessage) -> anyhow::Result<()>;

    /// Suspend until the next inbound message is available, or `None` if the
    /// bus has been shut down.
    async fn consume_inbound(&self) -> Option<InboundMessage>;

    /// Publish a message produced by the Agent Loop.
    async fn publish_outbound(&self, msg: OutboundMessage) -> anyhow::Result<()>;

    /// Suspend until the next outbound message is available, or `None` if the
    /// bus has been shut down.
    async fn consume_outbound(&self) -> Option<OutboundMessage>;

    /// Current depth of the inbound queue (0 for implementations that don't
    /// buffer inbound, e.g. the network client).
    fn inbound_size(&self) -> usize;

    /// Current depth of the outbound queue (0 for implementations that
    /// deliver outbound immediately, e.g. the network server).
    fn outbound_size(&self) -> usize;
}
