//! Async message bus — the central nervous system of Oxibot.
//!
//! Replaces nanobot's `bus/queue.py` (asyncio.Queue-based MessageBus).
//! Uses tokio::sync::mpsc bounded channels.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::traits::Bus;
use super::types::{InboundMessage, OutboundMessage};

/// The message bus connecting channels ↔ agent loop.
///
/// - Channels publish to `inbound` (user messages arriving)
/// - Agent loop consumes from `inbound`, processes, publishes to `outbound`
/// - Channel manager consumes from `outbound` and routes to correct channel
pub struct MessageBus {
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: tokio::sync::Mutex<mpsc::Receiver<InboundMessage>>,
    inbound_depth: AtomicUsize,
    outbound_tx: mpsc::Sender<OutboundMessage>,
    outbound_rx: tokio::sync::Mutex<mpsc::Receiver<OutboundMessage>>,
    outbound_depth: AtomicUsize,
}

impl MessageBus {
    /// Create a new message bus with the given buffer capacity.
    pub fn new(buffer_size: usize) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(buffer_size);
        let (outbound_tx, outbound_rx) = mpsc::channel(buffer_size);

        MessageBus {
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            inbound_depth: AtomicUsize::new(0),
            outbound_tx,
            outbound_rx: tokio::sync::Mutex::new(outbound_rx),
            outbound_depth: AtomicUsize::new(0),
        }
    }

    /// Publish a message from a channel to the agent (inbound).
    pub async fn publish_inbound(&self, msg: InboundMessage) -> Result<(), mpsc::error::SendError<InboundMessage>> {
        self.inbound_tx.send(msg).await?;
        self.inbound_depth.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Consume the next inbound message (blocks until available).
    /// Returns None if all senders are dropped.
    pub async fn consume_inbound(&self) -> Option<InboundMessage> {
        let mut rx = self.inbound_rx.lock().await;
        let msg = rx.recv().await;
        if msg.is_some() {
            self.inbound_depth.fetch_sub(1, Ordering::SeqCst);
        }
        msg
    }

    /// Publish a response from the agent to a channel (outbound).
    pub async fn publish_outbound(&self, msg: OutboundMessage) -> Result<(), mpsc::error::SendError<OutboundMessage>> {
        self.outbound_tx.send(msg).await?;
        self.outbound_depth.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Consume the next outbound message (blocks until available).
    /// Returns None if all senders are dropped.
    pub async fn consume_outbound(&self) -> Option<OutboundMessage> {
        let mut rx = self.outbound_rx.lock().await;
        let msg = rx.recv().await;
        if msg.is_some() {
            self.outbound_depth.fetch_sub(1, Ordering::SeqCst);
        }
        msg
    }

    /// Get a clone of the inbound sender (for channels to use).
    pub fn inbound_sender(&self) -> mpsc::Sender<InboundMessage> {
        self.inbound_tx.clone()
    }

    /// Get a clone of the outbound sender (for the agent loop to use).
    pub fn outbound_sender(&self) -> mpsc::Sender<OutboundMessage> {
        self.outbound_tx.clone()
    }

    /// Depth of the inbound queue.
    pub fn inbound_size(&self) -> usize {
        self.inbound_depth.load(Ordering::SeqCst)
    }

    /// Depth of the outbound queue.
    pub fn outbound_size(&self) -> usize {
        self.outbound_depth.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Bus for MessageBus {
    async fn publish_inbound(&self, msg: InboundMessage) -> anyhow::Result<()> {
        MessageBus::publish_inbound(self, msg)
            .await
            .map_err(|e| anyhow::anyhow!("inbound bus closed: {e}"))
    }

    async fn consume_inbound(&self) -> Option<InboundMessage> {
        MessageBus::consume_inbound(self).await
    }

    async fn publish_outbound(&self, msg: OutboundMessage) -> anyhow::Result<()> {
        MessageBus::publish_outbound(self, msg)
            .await
            .map_err(|e| anyhow::anyhow!("outbound bus closed: {e}"))
    }

    async fn consume_outbound(&self) -> Option<OutboundMessage> {
        MessageBus::consume_outbound(self).await
    }

    fn inbound_size(&self) -> usize {
        MessageBus::inbound_size(self)
    }

    fn outbound_size(&self) -> usize {
        MessageBus::outbound_size(self)
    }
}


