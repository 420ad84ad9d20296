//! Cross-process transport collaborator
//!
//! Outbound, accepted messages are published to a shared bus so other
//! gateway nodes can deliver them. Inbound, messages from other nodes
//! re-enter the local room's broadcast without passing through the event
//! registry again.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::TransportError;
use crate::message::{MessageKind, ReplicatedMessage};
use crate::registry::RoomRegistry;
use crate::types::NodeId;

/// Publish side of a message bus
#[async_trait]
pub trait Transport: Send + Sync {
    async fn publish_external(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;
}

/// Deliver inbound replicated messages to local rooms
///
/// Runs until the inbound channel closes or `token` is cancelled. Messages
/// that originated on `node_id` or fail to decode are skipped. So are
/// invalid messages, anything other than Text or Binary, and messages for a
/// room this node does not host.
pub async fn run_inbound(
    mut inbound: mpsc::Receiver<Vec<u8>>,
    rooms: RoomRegistry,
    node_id: NodeId,
    token: CancellationToken,
) {
    info!("Inbound replication started for node {}", node_id);

    loop {
        let payload = tokio::select! {
            _ = token.cancelled() => break,
            payload = inbound.recv() => match payload {
                Some(payload) => payload,
                None => break,
            },
        };

        let envelope = match ReplicatedMessage::decode(&payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!("Failed to decode replicated message: {}", e);
                continue;
            }
        };

        if envelope.origin == node_id {
            continue;
        }

        let message = envelope.message;
        if !matches!(message.kind, MessageKind::Text | MessageKind::Binary) {
            warn!(
                "Ignoring replicated {} message {} from node {}",
                message.kind, message.id, envelope.origin
            );
            continue;
        }
        if let Err(e) = message.validate() {
            warn!("Ignoring replicated message from node {}: {}", envelope.origin, e);
            continue;
        }

        let Some(room) = rooms.get(&message.room_id) else {
            debug!("No local room {} for replicated message", message.room_id);
            continue;
        };

        if let Err(e) = room.broadcast(Arc::new(message)).await {
            warn!("Failed to deliver replicated message: {}", e);
        }
    }

    info!("Inbound replication stopped for node {}", node_id);
}

/// In-process bus connecting gateways that share one host process
///
/// Every published payload is offered to every subscriber, the publisher
/// included. A full subscriber queue drops the payload for that subscriber.
#[derive(Debug, Default)]
pub struct LocalBus {
    subscribers: Mutex<Vec<mpsc::Sender<Vec<u8>>>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node and return its inbound queue
    pub fn subscribe(&self, capacity: usize) -> mpsc::Receiver<Vec<u8>> {
        let (tx, rx) = mpsc::channel(capacity);
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }
}

#[async_trait]
impl Transport for LocalBus {
    async fn publish_external(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        subscribers.retain(|tx| !tx.is_closed());
        if subscribers.is_empty() {
            return Err(TransportError::Closed);
        }

        for tx in subscribers.iter() {
            if tx.try_send(payload.clone()).is_err() {
                warn!("Local bus subscriber lagging, dropped payload on {}", topic);
            }
        }
        Ok(())
    }
}
