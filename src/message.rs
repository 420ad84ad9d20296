//! Chat message definitions
//!
//! `Message` is the immutable domain value created by a session's read pump,
//! validated once at the session boundary, and shared (behind an `Arc`) by the
//! room actor and every outbound queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::Message as Frame;

use crate::error::{InvalidMessage, ValidationError};
use crate::types::{MessageId, NodeId, RoomId, SessionId};

/// Highest wire code accepted as in range
const MAX_KIND_CODE: u8 = 10;

/// Message kind
///
/// Wire codes match the WebSocket opcodes. Unrecognized codes are carried as
/// `Unknown` without any agreed handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum MessageKind {
    Text,
    Binary,
    Close,
    Ping,
    Pong,
    Unknown(u8),
}

impl MessageKind {
    /// Map a numeric wire code onto a kind
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => MessageKind::Text,
            2 => MessageKind::Binary,
            8 => MessageKind::Close,
            9 => MessageKind::Ping,
            10 => MessageKind::Pong,
            other => MessageKind::Unknown(other),
        }
    }

    /// Numeric wire code for this kind
    pub fn code(self) -> u8 {
        match self {
            MessageKind::Text => 1,
            MessageKind::Binary => 2,
            MessageKind::Close => 8,
            MessageKind::Ping => 9,
            MessageKind::Pong => 10,
            MessageKind::Unknown(code) => code,
        }
    }

    /// Codes 1..=10 are in range, including unassigned ones
    pub fn in_range(self) -> bool {
        (1..=MAX_KIND_CODE).contains(&self.code())
    }
}

impl From<u8> for MessageKind {
    fn from(code: u8) -> Self {
        Self::from_code(code)
    }
}

impl From<MessageKind> for u8 {
    fn from(kind: MessageKind) -> Self {
        kind.code()
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MessageKind::Text => "Text",
            MessageKind::Binary => "Binary",
            MessageKind::Close => "Close",
            MessageKind::Ping => "Ping",
            MessageKind::Pong => "Pong",
            MessageKind::Unknown(_) => "Unknown",
        };
        f.write_str(name)
    }
}

/// One chat payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub kind: MessageKind,
    pub room_id: RoomId,
    pub session_id: SessionId,
    pub body: Vec<u8>,
    /// Display name of the sender
    pub author: String,
    /// When the session received the frame
    #[serde(default)]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a message received now, with a fresh ID
    pub fn new(
        kind: MessageKind,
        room_id: RoomId,
        session_id: SessionId,
        author: impl Into<String>,
        body: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            id: MessageId::new(),
            kind,
            room_id,
            session_id,
            body: body.into(),
            author: author.into(),
            timestamp: Utc::now(),
        }
    }

    /// Check every field, reporting all failures at once
    pub fn validate(&self) -> Result<(), InvalidMessage> {
        let checks = [
            (self.id.is_nil(), ValidationError::Id),
            (!self.kind.in_range(), ValidationError::Kind),
            (self.room_id.is_empty(), ValidationError::RoomId),
            (self.session_id.is_nil(), ValidationError::SessionId),
            (self.body.is_empty(), ValidationError::Body),
            (self.author.is_empty(), ValidationError::Author),
            (self.timestamp == DateTime::<Utc>::default(), ValidationError::Timestamp),
        ];

        let errors: Vec<_> = checks
            .into_iter()
            .filter_map(|(failed, error)| failed.then_some(error))
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(InvalidMessage(errors))
        }
    }

    /// Convert to a WebSocket frame for the write pump
    ///
    /// Returns None for kinds that have no frame representation.
    pub fn to_frame(&self) -> Option<Frame> {
        match self.kind {
            MessageKind::Text => Some(Frame::Text(
                String::from_utf8_lossy(&self.body).into_owned().into(),
            )),
            MessageKind::Binary => Some(Frame::Binary(self.body.clone().into())),
            MessageKind::Ping => Some(Frame::Ping(self.body.clone().into())),
            MessageKind::Pong => Some(Frame::Pong(self.body.clone().into())),
            MessageKind::Close => Some(Frame::Close(None)),
            MessageKind::Unknown(_) => None,
        }
    }

    /// Body as text, lossy for non-UTF-8 payloads
    pub fn body_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Envelope for messages crossing the node boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicatedMessage {
    /// Node that accepted the message from its client
    pub origin: NodeId,
    pub message: Message,
}

impl ReplicatedMessage {
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
