//! Client session: one connection, one read pump, one write pump
//!
//! The read pump turns inbound frames into validated messages and publishes
//! them on the event registry. The write pump drains the session's bounded
//! outbound queue, which only the session's room writes to. When the room
//! drops its member slot the queue closes, the write pump closes the sink,
//! and the read pump is cancelled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as Frame};
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::event::{Event, EventPayload, EventRegistry, Presence};
use crate::gateway::Gateway;
use crate::message::{Message, MessageKind};
use crate::room::{Member, RoomHandle};
use crate::types::{RoomId, SessionId};

/// Routing parameters extracted from the connection request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub room_id: RoomId,
    pub user_id: Option<Uuid>,
    pub display_name: String,
}

/// Server-side state of one connected client
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    room_id: RoomId,
    user_id: Option<Uuid>,
    display_name: String,
    /// Cleared when the read pump observes disconnection
    active: AtomicBool,
}

impl Session {
    /// Attach a WebSocket connection to its room and start both pumps
    ///
    /// The session joins the room before either pump starts, so it is a
    /// member by the time anything it sends is broadcast.
    pub async fn start<S>(
        gateway: &Gateway,
        ws: WebSocketStream<S>,
        params: ConnectParams,
    ) -> Result<Arc<Session>, AppError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        if gateway.is_shutting_down() {
            return Err(AppError::ShuttingDown);
        }

        let room = gateway.rooms().get_or_create(&params.room_id)?;
        let session = Arc::new(Session {
            id: SessionId::new(),
            room_id: params.room_id,
            user_id: params.user_id,
            display_name: params.display_name,
            active: AtomicBool::new(true),
        });

        let (outbound_tx, outbound_rx) = mpsc::channel(gateway.config().outbound_capacity);
        let closer = gateway.shutdown_token().child_token();
        room.join(Member::new(
            session.id,
            session.display_name.clone(),
            outbound_tx,
            closer.clone(),
        ))
        .await?;

        let events = Arc::clone(gateway.events());
        publish_presence(&events, EventPayload::SessionJoined(session.presence())).await;

        let (sink, stream) = ws.split();
        let tracker = gateway.tracker();
        tracker.spawn(write_pump(
            Arc::clone(&session),
            sink,
            outbound_rx,
            closer.clone(),
        ));
        tracker.spawn(read_pump(
            Arc::clone(&session),
            stream,
            room,
            Arc::clone(&events),
            closer,
        ));

        info!(
            "Session {} ({}) attached to room {}",
            session.id, session.display_name, session.room_id
        );

        Ok(session)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.user_id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Build a message received now from this session
    fn message(&self, kind: MessageKind, body: Vec<u8>) -> Message {
        Message::new(
            kind,
            self.room_id.clone(),
            self.id,
            self.display_name.clone(),
            body,
        )
    }

    fn presence(&self) -> Presence {
        Presence {
            session_id: self.id,
            room_id: self.room_id.clone(),
            display_name: self.display_name.clone(),
        }
    }
}

/// Read frames until the peer goes away or the room closes the session
async fn read_pump<R>(
    session: Arc<Session>,
    mut stream: R,
    room: RoomHandle,
    events: Arc<EventRegistry>,
    closer: CancellationToken,
) where
    R: Stream<Item = Result<Frame, WsError>> + Unpin,
{
    loop {
        let frame = tokio::select! {
            _ = closer.cancelled() => {
                debug!("Session {} closed by room", session.id);
                break;
            }
            frame = stream.next() => frame,
        };

        let frame = match frame {
            Some(Ok(frame)) => frame,
            Some(Err(e)) if is_normal_close(&e) => {
                debug!("Session {} connection closed: {}", session.id, e);
                break;
            }
            Some(Err(e)) => {
                error!("WebSocket error for session {}: {}", session.id, e);
                break;
            }
            None => {
                debug!("Session {} stream ended", session.id);
                break;
            }
        };

        let kind = match &frame {
            Frame::Text(_) => MessageKind::Text,
            Frame::Binary(_) => MessageKind::Binary,
            Frame::Close(close) => {
                info!("Session {} sent close frame: {:?}", session.id, close);
                break;
            }
            // Pong replies are handled by tungstenite
            Frame::Ping(_) | Frame::Pong(_) | Frame::Frame(_) => continue,
        };

        let message = session.message(kind, frame.into_data());
        if let Err(e) = message.validate() {
            warn!("Dropping message from session {}: {}", session.id, e);
            continue;
        }

        if let Err(e) = events.publish(Event::message_created(message)).await {
            error!("Publishing message from session {}: {}", session.id, e);
        }
    }

    session.active.store(false, Ordering::SeqCst);
    if let Err(e) = room.leave(session.id).await {
        debug!("Leave for session {} not delivered: {}", session.id, e);
    }
    publish_presence(&events, EventPayload::SessionLeft(session.presence())).await;

    info!("Session {} disconnected", session.id);
}

/// Deliver queued messages in order until the queue is closed
///
/// A write blocked on a peer that stopped reading is abandoned once `closer`
/// fires; dropping the sink then releases the connection.
async fn write_pump<W>(
    session: Arc<Session>,
    mut sink: W,
    mut outbound: mpsc::Receiver<Arc<Message>>,
    closer: CancellationToken,
) where
    W: Sink<Frame, Error = WsError> + Unpin,
{
    while let Some(message) = outbound.recv().await {
        let Some(frame) = message.to_frame() else {
            debug!("No frame for {} message {}, skipping", message.kind, message.id);
            continue;
        };

        tokio::select! {
            biased;
            sent = sink.send(frame) => {
                if let Err(e) = sent {
                    warn!(
                        "Failed to write message {} to session {}: {}",
                        message.id, session.id, e
                    );
                }
            }
            _ = closer.cancelled() => {
                debug!("Write to session {} abandoned, connection closed", session.id);
                return;
            }
        }
    }

    debug!("Write pump ended for session {}", session.id);

    // Send close frame when done, unless the peer is stuck
    tokio::select! {
        biased;
        _ = sink.close() => {}
        _ = closer.cancelled() => {
            debug!("Close frame for session {} abandoned", session.id);
        }
    }
}

/// Errors that mean the peer went away rather than misbehaved
fn is_normal_close(err: &WsError) -> bool {
    matches!(
        err,
        WsError::ConnectionClosed
            | WsError::AlreadyClosed
            | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake)
    )
}

async fn publish_presence(events: &EventRegistry, payload: EventPayload) {
    if let Err(e) = events.publish(Event::new(payload)).await {
        debug!("Presence event not published: {}", e);
    }
}
