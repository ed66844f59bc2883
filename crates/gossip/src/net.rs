//! WebSocket peer relay
//!
//! Every node runs a [`GossipServer`] that accepts peer connections and
//! feeds decoded frames into the node's inbound queue, and keeps one
//! outbound [`PeerLink`] per configured peer. Links reconnect with a fixed
//! backoff; messages queued while a link is down are shipped on reconnect.

use crate::{GossipClient, GossipEnvelope, GossipFrame, InboundGossip, InboundSender};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, connect_async, tungstenite::Message};

const RECONNECT_DELAY: Duration = Duration::from_millis(500);

/// Accepts inbound peer connections and surfaces their frames.
pub struct GossipServer {
    inbound: InboundSender,
}

impl GossipServer {
    pub fn new(inbound: InboundSender) -> Self {
        Self { inbound }
    }

    /// Start listening for peer connections. Returns the accept loop's
    /// join handle so the node can cancel it at shutdown.
    pub async fn start(&self, addr: &str) -> anyhow::Result<tokio::task::JoinHandle<()>> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("Gossip server listening on {}", addr);

        let inbound = self.inbound.clone();
        let accept_loop = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer_addr)) => {
                        tracing::debug!("Peer connected from {}", peer_addr);
                        let inbound = inbound.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_peer_connection(stream, inbound).await {
                                tracing::warn!("Peer connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Accept error: {}", e);
                    }
                }
            }
        });

        Ok(accept_loop)
    }
}

async fn handle_peer_connection(
    stream: tokio::net::TcpStream,
    inbound: InboundSender,
) -> anyhow::Result<()> {
    let ws_stream = accept_async(stream).await?;
    let (_, mut ws_receiver) = ws_stream.split();

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Binary(data)) => match GossipFrame::from_bytes(&data) {
                Ok(frame) => {
                    let _ = inbound.send(InboundGossip {
                        origin: frame.origin,
                        envelope: frame.envelope,
                    });
                }
                Err(e) => {
                    tracing::warn!("Dropping undecodable gossip frame: {}", e);
                }
            },
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::warn!("WebSocket error: {}", e);
                break;
            }
            _ => {}
        }
    }

    tracing::debug!("Peer disconnected");
    Ok(())
}

/// Outbound link to one peer. Owns a background task that keeps the
/// connection alive and drains the send queue.
pub struct PeerLink {
    peer_name: String,
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl PeerLink {
    /// Create the link and spawn its connection task.
    pub fn connect(peer_name: impl Into<String>, peer_addr: impl Into<String>) -> Self {
        let peer_name = peer_name.into();
        let peer_addr = peer_addr.into();
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();

        let task_peer = peer_name.clone();
        tokio::spawn(async move {
            let url = format!("ws://{}", peer_addr);
            loop {
                match connect_async(&url).await {
                    Ok((ws_stream, _)) => {
                        tracing::info!("Connected to peer {} at {}", task_peer, peer_addr);
                        let (mut ws_sender, _) = ws_stream.split();
                        while let Some(data) = rx.recv().await {
                            if ws_sender.send(Message::Binary(data)).await.is_err() {
                                tracing::warn!("Lost connection to peer {}", task_peer);
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        tracing::debug!("Peer {} unreachable: {}", task_peer, e);
                        tokio::time::sleep(RECONNECT_DELAY).await;
                    }
                }
                if rx.is_closed() {
                    break;
                }
            }
        });

        Self { peer_name, tx }
    }

    pub fn peer_name(&self) -> &str {
        &self.peer_name
    }

    fn send(&self, data: Vec<u8>) {
        // Best-effort; a closed link means the peer task already exited.
        let _ = self.tx.send(data);
    }
}

/// `GossipClient` backed by the WebSocket mesh.
pub struct WsGossipClient {
    node_name: String,
    links: Arc<Vec<PeerLink>>,
}

impl WsGossipClient {
    pub fn new(node_name: impl Into<String>, links: Vec<PeerLink>) -> Self {
        Self {
            node_name: node_name.into(),
            links: Arc::new(links),
        }
    }

    fn frame(&self, envelope: GossipEnvelope) -> Vec<u8> {
        GossipFrame {
            origin: self.node_name.clone(),
            envelope,
        }
        .to_bytes()
    }
}

impl GossipClient for WsGossipClient {
    fn broadcast_message(&self, envelope: GossipEnvelope) {
        let data = self.frame(envelope);
        for link in self.links.iter() {
            link.send(data.clone());
        }
    }

    fn unicast_message(&self, envelope: GossipEnvelope) {
        let Some(recipient) = envelope.recipient.clone() else {
            tracing::warn!("Unicast envelope without recipient, dropping");
            return;
        };
        let data = self.frame(envelope);
        match self.links.iter().find(|l| l.peer_name() == recipient) {
            Some(link) => link.send(data),
            None => {
                tracing::debug!(peer = %recipient, "No link to unicast recipient, dropping");
            }
        }
    }
}
