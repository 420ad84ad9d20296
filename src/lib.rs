//! Multi-room WebSocket Chat Gateway Library
//!
//! Clients attach to a named room over a WebSocket; every message one client
//! sends is fanned out to the other members of that room.
//!
//! # Architecture
//! - `Room` is an actor owning one room's member set; joins, leaves and
//!   broadcasts are serialized through its `mpsc` command channel
//! - `RoomRegistry` finds or creates the single `Room` for a room ID
//! - Each `Session` runs a read pump and a write pump; the write pump drains
//!   a bounded outbound queue that only the room pushes to
//! - `EventRegistry` decouples "message accepted" from its side effects:
//!   persistence, local broadcast and cross-node replication are separate
//!   subscribers run in order
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//! use chat_gateway::{handle_connection, Config, Gateway, MemoryMessageStore};
//!
//! #[tokio::main]
//! async fn main() {
//!     let listener = TcpListener::bind("127.0.0.1:8080").await.unwrap();
//!     let gateway = Gateway::new(Config::default(), Arc::new(MemoryMessageStore::new()));
//!
//!     while let Ok((stream, _)) = listener.accept().await {
//!         tokio::spawn(handle_connection(stream, gateway.clone()));
//!     }
//! }
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod gateway;
pub mod handler;
pub mod health;
pub mod message;
pub mod registry;
pub mod room;
pub mod session;
pub mod storage;
pub mod subscribers;
pub mod transport;
pub mod types;

// Re-export main types for convenience
pub use config::Config;
pub use error::{
    AppError, ConfigError, ConnectError, EventError, HandlerError, InvalidMessage, RoomError,
    StorageError, TransportError, ValidationError,
};
pub use event::{Event, EventHandler, EventPayload, EventRegistry, Presence};
pub use gateway::Gateway;
pub use handler::handle_connection;
pub use health::{Health, HealthCheck, HealthStatus};
pub use message::{Message, MessageKind, ReplicatedMessage};
pub use registry::RoomRegistry;
pub use room::{Member, Room, RoomCommand, RoomHandle};
pub use session::{ConnectParams, Session};
pub use storage::{MemoryMessageStore, MessageStore, StoredMessage};
pub use transport::{LocalBus, Transport};
pub use types::{MessageId, NodeId, RoomId, SessionId};
