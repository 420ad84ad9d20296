//! In-process event registry
//!
//! Decouples "a domain event happened" from what must run in response.
//! Handlers are grouped by topic and run in registration order on the
//! publisher's task. The first failing handler stops the chain.
//!
//! The handler table sits behind a short-held lock. Publish clones the
//! handler list for its topic and releases the lock before running anything,
//! so handlers may do I/O or publish again without blocking other publishers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::error::{EventError, HandlerError};
use crate::message::Message;
use crate::types::{RoomId, SessionId};

/// Topic for messages accepted from a client
pub const MESSAGE_CREATED_IN_ROOM: &str = "MessageCreatedInRoom";
/// Topic for sessions that became room members
pub const SESSION_JOINED: &str = "SessionJoined";
/// Topic for sessions that left their room
pub const SESSION_LEFT: &str = "SessionLeft";

/// Session presence details
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Presence {
    pub session_id: SessionId,
    pub room_id: RoomId,
    pub display_name: String,
}

/// Event payload, one variant per topic
#[derive(Debug, Clone)]
pub enum EventPayload {
    MessageCreated(Message),
    SessionJoined(Presence),
    SessionLeft(Presence),
}

impl EventPayload {
    /// Topic this payload is published under
    pub fn topic(&self) -> &'static str {
        match self {
            EventPayload::MessageCreated(_) => MESSAGE_CREATED_IN_ROOM,
            EventPayload::SessionJoined(_) => SESSION_JOINED,
            EventPayload::SessionLeft(_) => SESSION_LEFT,
        }
    }
}

/// Envelope passed to handlers
#[derive(Debug, Clone)]
pub struct Event {
    id: Uuid,
    topic: &'static str,
    payload: EventPayload,
    occurred_at: DateTime<Utc>,
}

impl Event {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: payload.topic(),
            payload,
            occurred_at: Utc::now(),
        }
    }

    pub fn message_created(message: Message) -> Self {
        Self::new(EventPayload::MessageCreated(message))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn topic(&self) -> &'static str {
        self.topic
    }

    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

/// A subscriber for one or more topics
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &Event) -> Result<(), HandlerError>;
}

/// Concurrent-safe topic to handler-chain registry
#[derive(Default)]
pub struct EventRegistry {
    handlers: Mutex<HashMap<String, Vec<Arc<dyn EventHandler>>>>,
    closed: AtomicBool,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler to the chain for `topic`
    pub fn subscribe(&self, topic: &str, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        handlers.entry(topic.to_string()).or_default().push(handler);
        debug!("Subscribed handler to topic {}", topic);
    }

    /// Number of handlers currently subscribed to `topic`
    pub fn handler_count(&self, topic: &str) -> usize {
        let handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        handlers.get(topic).map_or(0, Vec::len)
    }

    /// Run every handler for the event's topic, in order
    ///
    /// Stops at the first failure and returns it. Effects of handlers that
    /// already ran are kept.
    pub async fn publish(&self, event: Event) -> Result<(), EventError> {
        if self.is_closed() {
            return Err(EventError::Closed);
        }

        let chain: Vec<Arc<dyn EventHandler>> = {
            let handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
            handlers.get(event.topic()).cloned().unwrap_or_default()
        };

        trace!(
            "Publishing event {} on {} to {} handlers",
            event.id(),
            event.topic(),
            chain.len()
        );

        for handler in chain {
            handler
                .handle(&event)
                .await
                .map_err(|source| EventError::Handler {
                    topic: event.topic().to_string(),
                    source,
                })?;
        }

        Ok(())
    }

    /// Refuse new publishes; running ones finish normally
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
