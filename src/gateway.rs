//! Gateway wiring
//!
//! Owns the room registry, the event registry and the task tracker every
//! room loop and session pump runs on, and sequences shutdown across them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::AppError;
use crate::event::{EventRegistry, MESSAGE_CREATED_IN_ROOM};
use crate::health::{self, HealthCheck};
use crate::registry::RoomRegistry;
use crate::session::{ConnectParams, Session};
use crate::storage::MessageStore;
use crate::subscribers::{BroadcastToRoom, PersistMessage, ReplicateMessage};
use crate::transport::{run_inbound, Transport};
use crate::types::NodeId;

/// Cloneable entry point shared by the connection acceptor
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<Inner>,
}

struct Inner {
    config: Config,
    node_id: NodeId,
    rooms: RoomRegistry,
    events: Arc<EventRegistry>,
    health: HealthCheck,
    tracker: TaskTracker,
    token: CancellationToken,
    shutting_down: AtomicBool,
}

impl Gateway {
    /// Build a gateway that persists through `store`
    ///
    /// Accepted messages are persisted first, then broadcast to the room.
    pub fn new(config: Config, store: Arc<dyn MessageStore>) -> Self {
        let tracker = TaskTracker::new();
        let rooms = RoomRegistry::new(tracker.clone(), config.room_buffer);
        let events = Arc::new(EventRegistry::new());

        events.subscribe(
            MESSAGE_CREATED_IN_ROOM,
            Arc::new(PersistMessage::new(Arc::clone(&store), config.persist_timeout)),
        );
        events.subscribe(
            MESSAGE_CREATED_IN_ROOM,
            Arc::new(BroadcastToRoom::new(rooms.clone())),
        );

        let health = HealthCheck::new(store, config.service_name.clone());

        Self {
            inner: Arc::new(Inner {
                config,
                node_id: NodeId::new(),
                rooms,
                events,
                health,
                tracker,
                token: CancellationToken::new(),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    /// Replicate accepted messages through `transport` and deliver messages
    /// arriving on `inbound` to local rooms
    pub fn replicate_via(&self, transport: Arc<dyn Transport>, inbound: mpsc::Receiver<Vec<u8>>) {
        self.inner.events.subscribe(
            MESSAGE_CREATED_IN_ROOM,
            Arc::new(ReplicateMessage::new(
                transport,
                self.inner.node_id,
                self.inner.config.replicate_timeout,
            )),
        );

        self.inner.tracker.spawn(run_inbound(
            inbound,
            self.inner.rooms.clone(),
            self.inner.node_id,
            self.inner.token.child_token(),
        ));
    }

    /// Serve the health endpoint on `listener` until shutdown
    pub fn serve_health(&self, listener: TcpListener) {
        let check = self.inner.health.clone();
        let token = self.inner.token.child_token();

        self.inner.tracker.spawn(async move {
            if let Err(e) = health::serve(listener, check, token).await {
                error!("Health endpoint failed: {}", e);
            }
        });
    }

    /// Hand a connection to the gateway, which owns it from here on
    pub async fn attach<S>(
        &self,
        ws: WebSocketStream<S>,
        params: ConnectParams,
    ) -> Result<Arc<Session>, AppError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        Session::start(self, ws, params).await
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn node_id(&self) -> NodeId {
        self.inner.node_id
    }

    pub fn rooms(&self) -> &RoomRegistry {
        &self.inner.rooms
    }

    pub fn events(&self) -> &Arc<EventRegistry> {
        &self.inner.events
    }

    pub fn health(&self) -> &HealthCheck {
        &self.inner.health
    }

    pub(crate) fn tracker(&self) -> &TaskTracker {
        &self.inner.tracker
    }

    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.inner.token
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    /// Stop every room and session, then close the event registry
    ///
    /// Rooms are interrupted first so each closes its members' queues and
    /// connections, then all pumps are awaited (up to the configured
    /// timeout). Safe to call more than once.
    pub async fn shutdown(&self) {
        let inner = &self.inner;

        if inner.shutting_down.swap(true, Ordering::SeqCst) {
            let _ = tokio::time::timeout(inner.config.shutdown_timeout, inner.tracker.wait()).await;
            return;
        }

        info!("Gateway shutting down");

        inner.rooms.shutdown().await;
        inner.token.cancel();
        inner.tracker.close();

        if tokio::time::timeout(inner.config.shutdown_timeout, inner.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                "Shutdown timed out with {} tasks still running",
                inner.tracker.len()
            );
        }

        inner.events.close();
        info!("Gateway shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use tokio::sync::Notify;
    use tokio_tungstenite::tungstenite::protocol::Role;

    use crate::error::{EventError, HandlerError, RoomError, StorageError};
    use crate::event::Event;
    use crate::message::{Message, MessageKind};
    use crate::storage::MemoryMessageStore;
    use crate::types::{RoomId, SessionId};

    fn params(room: &str) -> ConnectParams {
        ConnectParams {
            room_id: RoomId::from(room),
            user_id: None,
            display_name: "tester".to_string(),
        }
    }

    async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {}", what);
    }

    #[tokio::test]
    async fn test_stalled_peer_is_torn_down() {
        let config = Config {
            outbound_capacity: 2,
            shutdown_timeout: Duration::from_secs(5),
            ..Config::default()
        };
        let gateway = Gateway::new(config, Arc::new(MemoryMessageStore::new()));

        // The peer end is kept open but never read
        let (server_io, _peer_io) = tokio::io::duplex(1024);
        let ws = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        gateway.attach(ws, params("lobby")).await.unwrap();

        let room = gateway.rooms().get(&RoomId::from("lobby")).unwrap();
        for _ in 0..10 {
            let message = Message::new(
                MessageKind::Binary,
                RoomId::from("lobby"),
                SessionId::new(),
                "other",
                vec![0u8; 64 * 1024],
            );
            room.broadcast(Arc::new(message)).await.unwrap();
        }
        assert_eq!(room.member_count().await.unwrap(), 0);

        // Only the room loop remains once both pumps have stopped
        let tracker = gateway.tracker().clone();
        wait_until("session pumps to stop", || tracker.len() == 1).await;

        tokio::time::timeout(Duration::from_secs(2), gateway.shutdown())
            .await
            .unwrap();
        assert!(gateway.tracker().is_empty());
    }

    /// Persists only after the test opens the gate
    struct GatedStore {
        entered: Notify,
        gate: Notify,
    }

    #[async_trait]
    impl MessageStore for GatedStore {
        async fn persist_message(
            &self,
            _room_id: &RoomId,
            _sender_id: SessionId,
            _kind: MessageKind,
            _body: &[u8],
            _timestamp: DateTime<Utc>,
        ) -> Result<(), StorageError> {
            self.entered.notify_one();
            self.gate.notified().await;
            Ok(())
        }

        fn is_alive(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_in_flight_publish_fails_cleanly_on_shutdown() {
        let store = Arc::new(GatedStore {
            entered: Notify::new(),
            gate: Notify::new(),
        });
        let gateway = Gateway::new(Config::default(), store.clone());
        gateway.rooms().get_or_create(&RoomId::from("lobby")).unwrap();

        let events = Arc::clone(gateway.events());
        let publish = tokio::spawn(async move {
            let message = Message::new(
                MessageKind::Text,
                RoomId::from("lobby"),
                SessionId::new(),
                "Alice",
                "hi",
            );
            events.publish(Event::message_created(message)).await
        });
        store.entered.notified().await;

        let shutdown = {
            let gateway = gateway.clone();
            tokio::spawn(async move { gateway.shutdown().await })
        };
        let rooms = gateway.rooms().clone();
        wait_until("rooms to close", || rooms.is_closed()).await;
        store.gate.notify_one();

        let err = tokio::time::timeout(Duration::from_secs(2), publish)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert!(matches!(
            err.handler_error(),
            Some(HandlerError::Room(RoomError::RegistryClosed))
        ));

        shutdown.await.unwrap();
        let late = gateway
            .events()
            .publish(Event::message_created(Message::new(
                MessageKind::Text,
                RoomId::from("lobby"),
                SessionId::new(),
                "Alice",
                "late",
            )))
            .await;
        assert!(matches!(late, Err(EventError::Closed)));
    }
}
