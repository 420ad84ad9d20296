//! Storage collaborator interface
//!
//! The gateway only needs to persist accepted messages and to know whether
//! the storage connection is alive. `MemoryMessageStore` keeps the most
//! recent records in process and backs the binary and the tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::DEFAULT_STORE_CAPACITY;
use crate::error::StorageError;
use crate::message::MessageKind;
use crate::types::{RoomId, SessionId};

/// Durable message persistence
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn persist_message(
        &self,
        room_id: &RoomId,
        sender_id: SessionId,
        kind: MessageKind,
        body: &[u8],
        timestamp: DateTime<Utc>,
    ) -> Result<(), StorageError>;

    /// Whether the storage connection is usable
    fn is_alive(&self) -> bool;
}

/// One persisted message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub room_id: RoomId,
    pub sender_id: SessionId,
    /// Kind name, e.g. "Text"
    pub kind: String,
    pub body: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

/// In-memory message store with a maximum capacity
///
/// Once full, each new record evicts the oldest one.
#[derive(Debug)]
pub struct MemoryMessageStore {
    messages: Mutex<VecDeque<StoredMessage>>,
    max_size: usize,
    closed: AtomicBool,
}

impl Default for MemoryMessageStore {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_STORE_CAPACITY)
    }
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that keeps at most `capacity` records
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            messages: Mutex::new(VecDeque::with_capacity(capacity)),
            max_size: capacity,
            closed: AtomicBool::new(false),
        }
    }

    /// Snapshot of the retained records, oldest first
    pub fn messages(&self) -> Vec<StoredMessage> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Release the store; later writes fail with `Unavailable`
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn persist_message(
        &self,
        room_id: &RoomId,
        sender_id: SessionId,
        kind: MessageKind,
        body: &[u8],
        timestamp: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        if !self.is_alive() {
            return Err(StorageError::Unavailable);
        }

        let record = StoredMessage {
            room_id: room_id.clone(),
            sender_id,
            kind: kind.to_string(),
            body: body.to_vec(),
            timestamp,
        };
        debug!("Persisting {} message in room {}", record.kind, record.room_id);

        let mut messages = self.messages.lock().unwrap_or_else(PoisonError::into_inner);
        if messages.len() >= self.max_size {
            messages.pop_front();
        }
        messages.push_back(record);
        Ok(())
    }

    fn is_alive(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }
}
