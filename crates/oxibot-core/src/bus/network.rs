//! TCP-based message bus for split agent/gateway processes.
//!
//! Ported from nanoclaw's `bus/network.py`: [`NetworkBusServer`] runs inside the
//! agent process and accepts connections from the gateway; [`NetworkBusClient`]
//! runs inside the gateway process and connects to the agent. Both halves
//! satisfy the same [`Bus`] contract as the in-process [`super::queue::MessageBus`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use super::codec::{read_frame, write_frame};
use super::traits::Bus;
use super::types::{InboundMessage, OutboundMessage};

/// Default bind/connect address for the network bus (§6).
pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Default bind/connect port for the network bus (§6).
pub const DEFAULT_PORT: u16 = 18791;

// ─────────────────────────────────────────────
// Server (agent side)
// ─────────────────────────────────────────────

type ClientId = u64;

/// Agent-side TCP bus server.
///
/// Accepts connections from the gateway, receives inbound messages, and fans
/// outbound messages out to every connected client.
pub struct NetworkBusServer {
    host: String,
    port: u16,
    inbound_tx: mpsc::UnboundedSender<InboundMessage>,
    inbound_rx: Mutex<mpsc::UnboundedReceiver<InboundMessage>>,
    inbound_depth: AtomicU64,
    clients: Mutex<HashMap<ClientId, WriteHalf<TcpStream>>>,
    next_client_id: AtomicU64,
    running: AtomicBool,
}

impl NetworkBusServer {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        NetworkBusServer {
            host: host.into(),
            port,
            inbound_tx: tx,
            inbound_rx: Mutex::new(rx),
            inbound_depth: AtomicU64::new(0),
            clients: Mutex::new(HashMap::new()),
            next_client_id: AtomicU64::new(0),
            running: AtomicBool::new(false),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }

    /// Accept connections and serve until [`Self::stop`] is called.
    pub async fn serve(self: &Arc<Self>) -> anyhow::Result<()> {
        self.running.store(true, Ordering::SeqCst);
        let listener = TcpListener::bind((self.host.as_str(), self.port)).await?;
        info!(host = %self.host, port = self.port, "NetworkBusServer listening");

        while self.running.load(Ordering::SeqCst) {
            let (stream, addr) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };
            info!(%addr, "gateway connected");
            let this = self.clone();
            tokio::spawn(async move {
                this.handle_client(stream).await;
            });
        }
        Ok(())
    }

    async fn handle_client(self: Arc<Self>, stream: TcpStream) {
        let client_id = self.next_client_id.fetch_add(1, Ordering::SeqCst);
        let (mut read_half, write_half) = tokio::io::split(stream);
        self.clients.lock().await.insert(client_id, write_half);

        while self.running.load(Ordering::SeqCst) {
            match read_frame(&mut read_half).await {
                Ok(Some(frame)) => {
                    if frame.get("type").and_then(|t| t.as_str()) == Some("inbound") {
                        if let Some(data) = frame.get("data").cloned() {
                            match InboundMessage::from_dict(data) {
                                Ok(msg) => {
                                    if self.inbound_tx.send(msg).is_ok() {
                                        self.inbound_depth.fetch_add(1, Ordering::SeqCst);
                                    }
                                }
                                Err(e) => warn!(error = %e, "malformed inbound frame"),
                            }
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "read error on client connection");
                    break;
                }
            }
        }

        self.clients.lock().await.remove(&client_id);
        info!(client_id, "gateway disconnected");
    }

    /// Stop accepting and serving. In-flight reads unblock on EOF/reset.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn inbound_size(&self) -> usize {
        self.inbound_depth.load(Ordering::SeqCst) as usize
    }

    pub fn outbound_size(&self) -> usize {
        0
    }

    pub async fn publish_inbound(&self, msg: InboundMessage) -> anyhow::Result<()> {
        // Used by in-process test harnesses; normal inbound arrives over the socket.
        self.inbound_tx.send(msg)?;
        self.inbound_depth.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    pub async fn consume_inbound(&self) -> Option<InboundMessage> {
        let mut rx = self.inbound_rx.lock().await;
        let msg = rx.recv().await;
        if msg.is_some() {
            self.inbound_depth.fetch_sub(1, Ordering::SeqCst);
        }
        msg
    }

    /// Fan an outbound message out to every connected client. A client whose
    /// send fails is evicted and its stream closed.
    pub async fn publish_outbound(&self, msg: OutboundMessage) -> anyhow::Result<()> {
        let payload = serde_json::json!({"type": "outbound", "data": msg.to_dict()});
        let mut clients = self.clients.lock().await;
        let mut dead = Vec::new();
        for (id, writer) in clients.iter_mut() {
            if write_frame(writer, &payload).await.is_err() {
                dead.push(*id);
            }
        }
        for id in dead {
            if let Some(mut writer) = clients.remove(&id) {
                let _ = writer.shutdown().await;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Bus for NetworkBusServer {
    async fn publish_inbound(&self, msg: InboundMessage) -> anyhow::Result<()> {
        NetworkBusServer::publish_inbound(self, msg).await
    }

    async fn consume_inbound(&self) -> Option<InboundMessage> {
        NetworkBusServer::consume_inbound(self).await
    }

    async fn publish_outbound(&self, msg: OutboundMessage) -> anyhow::Result<()> {
        NetworkBusServer::publish_outbound(self, msg).await
    }

    async fn consume_outbound(&self) -> Option<OutboundMessage> {
        // The server has no local outbound queue: frames are pushed to clients
        // immediately. This method is never awaited in server mode.
        std::future::pending().await
    }

    fn inbound_size(&self) -> usize {
        NetworkBusServer::inbound_size(self)
    }

    fn outbound_size(&self) -> usize {
        NetworkBusServer::outbound_size(self)
    }
}

// ─────────────────────────────────────────────
// Client (gateway side)
// ─────────────────────────────────────────────

/// Gateway-side TCP bus client.
///
/// Connects to the agent's TCP server, sends inbound messages, and receives
/// outbound messages for dispatch. Reconnection is not automatic at this layer.
pub struct NetworkBusClient {
    writer: Mutex<WriteHalf<TcpStream>>,
    outbound_tx: mpsc::UnboundedSender<OutboundMessage>,
    outbound_rx: Mutex<mpsc::UnboundedReceiver<OutboundMessage>>,
    outbound_depth: AtomicU64,
    recv_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl NetworkBusClient {
    /// Connect to the agent's bus server and spawn the background receive task.
    pub async fn connect(host: &str, port: u16) -> anyhow::Result<Arc<Self>> {
        let stream = TcpStream::connect((host, port)).await?;
        let (read_half, write_half) = tokio::io::split(stream);
        let (tx, rx) = mpsc::unbounded_channel();

        let client = Arc::new(NetworkBusClient {
            writer: Mutex::new(write_half),
            outbound_tx: tx.clone(),
            outbound_rx: Mutex::new(rx),
            outbound_depth: AtomicU64::new(0),
            recv_task: Mutex::new(None),
        });

        let depth_handle = client.clone();
        let task = tokio::spawn(async move {
            depth_handle.receive_loop(read_half, tx).await;
        });
        *client.recv_task.lock().await = Some(task);

        info!(host, port, "connected to agent");
        Ok(client)
    }

    async fn receive_loop(
        self: Arc<Self>,
        mut read_half: ReadHalf<TcpStream>,
        tx: mpsc::UnboundedSender<OutboundMessage>,
    ) {
        loop {
            match read_frame(&mut read_half).await {
                Ok(Some(frame)) => {
                    if frame.get("type").and_then(|t| t.as_str()) == Some("outbound") {
                        if let Some(data) = frame.get("data").cloned() {
                            match OutboundMessage::from_dict(data) {
                                Ok(msg) => {
                                    if tx.send(msg).is_ok() {
                                        self.outbound_depth.fetch_add(1, Ordering::SeqCst);
                                    }
                                }
                                Err(e) => warn!(error = %e, "malformed outbound frame"),
                            }
                        }
                    }
                }
                Ok(None) => {
                    warn!("lost connection to agent");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "lost connection to agent");
                    break;
                }
            }
        }
    }

    pub fn stop(&self) {
        if let Ok(mut guard) = self.recv_task.try_lock() {
            if let Some(task) = guard.take() {
                task.abort();
            }
        }
    }

    pub fn inbound_size(&self) -> usize {
        0
    }

    pub fn outbound_size(&self) -> usize {
        self.outbound_depth.load(Ordering::SeqCst) as usize
    }

    /// Frame and write the message directly; fatal on a lost connection.
    pub async fn publish_inbound(&self, msg: InboundMessage) -> anyhow::Result<()> {
        let payload = serde_json::json!({"type": "inbound", "data": msg.to_dict()});
        let mut writer = self.writer.lock().await;
        write_frame(&mut *writer, &payload).await?;
        Ok(())
    }

    pub async fn consume_outbound(&self) -> Option<OutboundMessage> {
        let mut rx = self.outbound_rx.lock().await;
        let msg = rx.recv().await;
        if msg.is_some() {
            self.outbound_depth.fetch_sub(1, Ordering::SeqCst);
        }
        msg
    }
}

#[async_trait]
impl Bus for NetworkBusClient {
    async fn publish_inbound(&self, msg: InboundMessage) -> anyhow::Result<()> {
        NetworkBusClient::publish_inbound(self, msg).await
    }

    async fn consume_inbound(&self) -> Option<InboundMessage> {
        // The client has no local inbound queue: messages are written straight
        // to the socket. This method is never awaited in client mode.
        std::future::pending().await
    }

    async fn publish_outbound(&self, _msg: OutboundMessage) -> anyhow::Result<()> {
        anyhow::bail!("NetworkBusClient does not accept outbound publishes; it consumes them")
    }

    async fn consume_outbound(&self) -> Option<OutboundMessage> {
        NetworkBusClient::consume_outbound(self).await
    }

    fn inbound_size(&self) -> usize {
        NetworkBusClient::inbound_size(self)
    }

    fn outbound_size(&self) -> usize {
        NetworkBusClient::outbound_size(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, Duration};

    async fn free_port() -> u16 {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn server_client_handoff() {
        let port = free_port().await;
        let server = Arc::new(NetworkBusServer::new("127.0.0.1", port));
        let server_task = {
            let server = server.clone();
            tokio::spawn(async move {
                let _ = server.serve().await;
            })
        };
        sleep(Duration::from_millis(50)).await;

        let client = NetworkBusClient::connect("127.0.0.1", port).await.unwrap();

        let inbound = InboundMessage::new("telegram", "u1", "c1", "hello");
        client.publish_inbound(inbound.clone()).await.unwrap();

        let received = server.consume_inbound().await.unwrap();
        assert_eq!(received, inbound);

        let outbound = OutboundMessage::new("telegram", "c1", "hi back");
        server.publish_outbound(outbound.clone()).await.unwrap();

        let received_outbound = tokio::time::timeout(Duration::from_secs(2), client.consume_outbound())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received_outbound, outbound);

        server.stop();
        server_task.abort();
    }

    #[tokio::test]
    async fn publish_outbound_with_no_clients_succeeds_silently() {
        let server = NetworkBusServer::new("127.0.0.1", 0);
        let outbound = OutboundMessage::new("telegram", "c1", "hi");
        server.publish_outbound(outbound).await.unwrap();
        assert_eq!(server.clients.lock().await.len(), 0);
    }
}
