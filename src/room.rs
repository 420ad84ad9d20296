//! Room actor implementation
//!
//! Each room owns its member set inside a single control loop. Joins, leaves
//! and broadcasts arrive over one mpsc channel and are applied one at a time,
//! in arrival order, so membership is never changed while a broadcast is
//! iterating it. No lock guards the member set.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::RoomError;
use crate::message::Message;
use crate::types::{RoomId, SessionId};

/// Commands sent from sessions and the registry to a Room actor
#[derive(Debug)]
pub enum RoomCommand {
    /// Session becomes visible to broadcasts
    Join(Member),
    /// Session leaves; its queue and connection are closed
    Leave { session_id: SessionId },
    /// Deliver a message to every member except its sender
    Broadcast(Arc<Message>),
    /// Report current membership size
    MemberCount { reply: oneshot::Sender<usize> },
    /// Close every member and stop the loop
    Shutdown,
}

/// A session's slot in a room
///
/// The room holds the only sender for the session's outbound queue, so
/// dropping the member closes the queue and ends the session's write pump.
#[derive(Debug)]
pub struct Member {
    pub session_id: SessionId,
    pub display_name: String,
    outbound: mpsc::Sender<Arc<Message>>,
    closer: CancellationToken,
}

impl Member {
    pub fn new(
        session_id: SessionId,
        display_name: String,
        outbound: mpsc::Sender<Arc<Message>>,
        closer: CancellationToken,
    ) -> Self {
        Self {
            session_id,
            display_name,
            outbound,
            closer,
        }
    }

    /// Leave side effects: close the queue first, then signal the connection
    fn close(self) {
        let Member {
            outbound, closer, ..
        } = self;
        drop(outbound);
        closer.cancel();
    }
}

/// Cloneable handle for sending inputs to a Room actor
#[derive(Debug, Clone)]
pub struct RoomHandle {
    id: RoomId,
    sender: mpsc::Sender<RoomCommand>,
}

impl RoomHandle {
    pub fn id(&self) -> &RoomId {
        &self.id
    }

    pub async fn join(&self, member: Member) -> Result<(), RoomError> {
        self.send(RoomCommand::Join(member)).await
    }

    pub async fn leave(&self, session_id: SessionId) -> Result<(), RoomError> {
        self.send(RoomCommand::Leave { session_id }).await
    }

    pub async fn broadcast(&self, message: Arc<Message>) -> Result<(), RoomError> {
        self.send(RoomCommand::Broadcast(message)).await
    }

    pub async fn member_count(&self) -> Result<usize, RoomError> {
        let (reply, rx) = oneshot::channel();
        self.send(RoomCommand::MemberCount { reply }).await?;
        rx.await.map_err(|_| RoomError::Closed(self.id.clone()))
    }

    pub async fn shutdown(&self) -> Result<(), RoomError> {
        self.send(RoomCommand::Shutdown).await
    }

    /// Check whether two handles address the same Room instance
    pub fn same_room(&self, other: &RoomHandle) -> bool {
        self.sender.same_channel(&other.sender)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    async fn send(&self, cmd: RoomCommand) -> Result<(), RoomError> {
        self.sender
            .send(cmd)
            .await
            .map_err(|_| RoomError::Closed(self.id.clone()))
    }
}

/// The Room actor
pub struct Room {
    id: RoomId,
    /// Current members: SessionId -> Member
    members: HashMap<SessionId, Member>,
    /// Command receiver channel
    receiver: mpsc::Receiver<RoomCommand>,
}

impl Room {
    /// Create a room and the handle that feeds it
    pub fn new(id: RoomId, buffer: usize) -> (Self, RoomHandle) {
        let (sender, receiver) = mpsc::channel(buffer);
        let room = Self {
            id: id.clone(),
            members: HashMap::new(),
            receiver,
        };
        (room, RoomHandle { id, sender })
    }

    /// Run the control loop
    ///
    /// Ends on `Shutdown` or once every handle has been dropped.
    pub async fn run(mut self) {
        info!("Room {} started", self.id);

        while let Some(cmd) = self.receiver.recv().await {
            if !self.handle_command(cmd) {
                // Stop accepting new inputs before tearing down
                self.receiver.close();
                break;
            }
        }

        self.close_all();
        info!("Room {} stopped", self.id);
    }

    /// Process a single command, returning false on shutdown
    fn handle_command(&mut self, cmd: RoomCommand) -> bool {
        match cmd {
            RoomCommand::Join(member) => self.handle_join(member),
            RoomCommand::Leave { session_id } => self.handle_leave(session_id),
            RoomCommand::Broadcast(message) => self.handle_broadcast(message),
            RoomCommand::MemberCount { reply } => {
                let _ = reply.send(self.members.len());
            }
            RoomCommand::Shutdown => {
                info!("Room {} interrupted", self.id);
                return false;
            }
        }
        true
    }

    fn handle_join(&mut self, member: Member) {
        if self.members.contains_key(&member.session_id) {
            warn!(
                "Session {} already in room {}, ignoring join",
                member.session_id, self.id
            );
            return;
        }

        info!(
            "Session {} ({}) joined room {}",
            member.session_id, member.display_name, self.id
        );
        self.members.insert(member.session_id, member);
        debug!("Room {} members: {}", self.id, self.members.len());
    }

    fn handle_leave(&mut self, session_id: SessionId) {
        let Some(member) = self.members.remove(&session_id) else {
            debug!("Session {} not in room {}, ignoring leave", session_id, self.id);
            return;
        };

        member.close();
        info!("Session {} left room {}", session_id, self.id);
        debug!("Room {} members: {}", self.id, self.members.len());
    }

    /// Push to every member's queue without waiting
    ///
    /// A full or closed queue drops the message for that member and the
    /// member is removed as if it had left.
    fn handle_broadcast(&mut self, message: Arc<Message>) {
        let mut failed = Vec::new();
        let mut delivered = 0usize;

        for (session_id, member) in &self.members {
            if *session_id == message.session_id {
                continue;
            }

            match member.outbound.try_send(Arc::clone(&message)) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        "Outbound queue full for session {} in room {}, disconnecting",
                        session_id, self.id
                    );
                    failed.push(*session_id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(
                        "Outbound queue closed for session {} in room {}",
                        session_id, self.id
                    );
                    failed.push(*session_id);
                }
            }
        }

        debug!(
            "Room {} broadcast message {} to {} members",
            self.id, message.id, delivered
        );

        for session_id in failed {
            self.handle_leave(session_id);
        }
    }

    fn close_all(&mut self) {
        for (session_id, member) in self.members.drain() {
            debug!("Closing session {} in room {}", session_id, self.id);
            member.close();
        }
    }
}
