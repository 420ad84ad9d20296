//! Error types for the chat gateway
//!
//! Defines application-level errors plus one enum per component seam.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

use crate::types::RoomId;

/// Application-level errors
///
/// Raised by the connection acceptor and session startup. Any of these ends
/// the connection; none of them affect other sessions.
#[derive(Debug, Error)]
pub enum AppError {
    /// WebSocket protocol error (fatal)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// IO error (fatal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Room could not accept the session
    #[error(transparent)]
    Room(#[from] RoomError),

    /// Gateway is shutting down and refuses new sessions
    #[error("Gateway is shutting down")]
    ShuttingDown,
}

/// Room actor errors
///
/// Occurs when a room's control loop no longer accepts inputs.
#[derive(Debug, Error)]
pub enum RoomError {
    /// The room's control loop has terminated
    #[error("Room {0} is closed")]
    Closed(RoomId),

    /// The registry has been shut down and creates no more rooms
    #[error("Room registry is closed")]
    RegistryClosed,
}

/// A single failed field check on a `Message`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("message ID invalid")]
    Id,
    #[error("message kind invalid")]
    Kind,
    #[error("message room ID invalid")]
    RoomId,
    #[error("message session ID invalid")]
    SessionId,
    #[error("message body invalid")]
    Body,
    #[error("message author invalid")]
    Author,
    #[error("message timestamp invalid")]
    Timestamp,
}

/// Every field check that failed for one message
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid message: {}", join_errors(.0))]
pub struct InvalidMessage(pub Vec<ValidationError>);

impl InvalidMessage {
    /// Check whether a particular field failed
    pub fn contains(&self, error: ValidationError) -> bool {
        self.0.contains(&error)
    }

    pub fn errors(&self) -> &[ValidationError] {
        &self.0
    }
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Event Registry publish errors
#[derive(Debug, Error)]
pub enum EventError {
    /// The registry was closed during shutdown
    #[error("Event registry is closed")]
    Closed,

    /// A handler failed; the rest of the chain did not run
    #[error("Handler for topic '{topic}' failed: {source}")]
    Handler {
        topic: String,
        #[source]
        source: HandlerError,
    },
}

impl EventError {
    /// The failing handler's error, if a handler failed
    pub fn handler_error(&self) -> Option<&HandlerError> {
        match self {
            EventError::Handler { source, .. } => Some(source),
            EventError::Closed => None,
        }
    }
}

/// Errors returned by individual event handlers
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("room: {0}")]
    Room(#[from] RoomError),

    /// No local room exists for a message's room ID
    #[error("Room not found: {0}")]
    RoomNotFound(RoomId),

    /// Handler was subscribed to a topic whose payload it cannot handle
    #[error("Unexpected payload for topic '{0}'")]
    UnexpectedPayload(String),

    /// A collaborator call did not finish in time
    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("{0}")]
    Failed(String),
}

/// Storage collaborator errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// The storage connection is closed or unreachable
    #[error("Storage unavailable")]
    Unavailable,

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Cross-process transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport closed")]
    Closed,

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Transport backend error: {0}")]
    Backend(String),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {key}")]
    Invalid { key: &'static str, value: String },
}

/// Handshake routing errors
///
/// Reported to the peer as an HTTP error before the upgrade completes.
#[derive(Debug, PartialEq, Eq, Error)]
pub enum ConnectError {
    #[error("Missing 'room' query parameter")]
    MissingRoom,

    #[error("Invalid 'user' query parameter: {0}")]
    InvalidUserId(String),

    #[error("No route for path {0}")]
    NotFound(String),
}
