//! Event handlers for accepted messages
//!
//! Subscribed to `MessageCreatedInRoom` in this order: persist, broadcast
//! locally, replicate to other nodes. Replication runs last so its failures
//! never hold back local delivery.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::trace;

use crate::error::{HandlerError, RoomError};
use crate::event::{Event, EventHandler, EventPayload, MESSAGE_CREATED_IN_ROOM};
use crate::message::{Message, ReplicatedMessage};
use crate::registry::RoomRegistry;
use crate::storage::MessageStore;
use crate::transport::Transport;
use crate::types::NodeId;

fn created_message(event: &Event) -> Result<&Message, HandlerError> {
    match event.payload() {
        EventPayload::MessageCreated(message) => Ok(message),
        _ => Err(HandlerError::UnexpectedPayload(event.topic().to_string())),
    }
}

/// Persists every accepted message through the storage collaborator
pub struct PersistMessage {
    store: Arc<dyn MessageStore>,
    timeout: Duration,
}

impl PersistMessage {
    pub fn new(store: Arc<dyn MessageStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }
}

#[async_trait]
impl EventHandler for PersistMessage {
    async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        let message = created_message(event)?;
        trace!("Persisting message {}", message.id);

        let persist = self.store.persist_message(
            &message.room_id,
            message.session_id,
            message.kind,
            &message.body,
            message.timestamp,
        );

        tokio::time::timeout(self.timeout, persist)
            .await
            .map_err(|_| HandlerError::Timeout("persisting message"))??;
        Ok(())
    }
}

/// Hands every accepted message to its local room
pub struct BroadcastToRoom {
    rooms: RoomRegistry,
}

impl BroadcastToRoom {
    pub fn new(rooms: RoomRegistry) -> Self {
        Self { rooms }
    }
}

#[async_trait]
impl EventHandler for BroadcastToRoom {
    async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        let message = created_message(event)?;

        if self.rooms.is_closed() {
            return Err(RoomError::RegistryClosed.into());
        }

        let room = self
            .rooms
            .get(&message.room_id)
            .ok_or_else(|| HandlerError::RoomNotFound(message.room_id.clone()))?;

        room.broadcast(Arc::new(message.clone())).await?;
        Ok(())
    }
}

/// Publishes every accepted message to other gateway nodes
pub struct ReplicateMessage {
    transport: Arc<dyn Transport>,
    node_id: NodeId,
    timeout: Duration,
}

impl ReplicateMessage {
    pub fn new(transport: Arc<dyn Transport>, node_id: NodeId, timeout: Duration) -> Self {
        Self {
            transport,
            node_id,
            timeout,
        }
    }
}

#[async_trait]
impl EventHandler for ReplicateMessage {
    async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        let message = created_message(event)?;

        let envelope = ReplicatedMessage {
            origin: self.node_id,
            message: message.clone(),
        };
        let payload = envelope
            .encode()
            .map_err(|e| HandlerError::Transport(e.into()))?;

        let publish = self
            .transport
            .publish_external(MESSAGE_CREATED_IN_ROOM, payload);

        tokio::time::timeout(self.timeout, publish)
            .await
            .map_err(|_| HandlerError::Timeout("replicating message"))??;
        Ok(())
    }
}
