//! Room directory
//!
//! Maps room IDs to running Room actors, creating each room on first use.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::error::RoomError;
use crate::room::{Room, RoomHandle};
use crate::types::RoomId;

/// Concurrent-safe directory of running rooms
///
/// Cheap to clone; clones share the same directory. Empty rooms are kept
/// until shutdown so late rejoins find the same instance.
#[derive(Clone)]
pub struct RoomRegistry {
    inner: Arc<Inner>,
}

struct Inner {
    rooms: Mutex<HashMap<RoomId, RoomHandle>>,
    tracker: TaskTracker,
    command_buffer: usize,
    closed: AtomicBool,
}

impl RoomRegistry {
    /// Create a registry whose room loops run on `tracker`
    pub fn new(tracker: TaskTracker, command_buffer: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                rooms: Mutex::new(HashMap::new()),
                tracker,
                command_buffer,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Return the room for `room_id`, starting it if it does not exist
    ///
    /// The directory lock is held across the check and the spawn, so
    /// concurrent first callers all observe the single room that was started.
    pub fn get_or_create(&self, room_id: &RoomId) -> Result<RoomHandle, RoomError> {
        let mut rooms = self.lock_rooms();

        if self.is_closed() {
            return Err(RoomError::RegistryClosed);
        }

        if let Some(handle) = rooms.get(room_id) {
            return Ok(handle.clone());
        }

        let (room, handle) = Room::new(room_id.clone(), self.inner.command_buffer);
        self.inner.tracker.spawn(room.run());
        rooms.insert(room_id.clone(), handle.clone());

        info!("Created room {}", room_id);
        debug!("Total rooms: {}", rooms.len());

        Ok(handle)
    }

    /// Look up an existing room without creating it
    pub fn get(&self, room_id: &RoomId) -> Option<RoomHandle> {
        self.lock_rooms().get(room_id).cloned()
    }

    pub fn room_count(&self) -> usize {
        self.lock_rooms().len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Interrupt every room and stop creating new ones
    ///
    /// Returns once every room has been signalled; the loops finish on the
    /// tracker. Calling this again is a no-op.
    pub async fn shutdown(&self) {
        let handles: Vec<RoomHandle> = {
            let mut rooms = self.lock_rooms();
            if self.inner.closed.swap(true, Ordering::SeqCst) {
                return;
            }
            rooms.drain().map(|(_, handle)| handle).collect()
        };

        info!("Shutting down {} rooms", handles.len());

        for handle in handles {
            if let Err(e) = handle.shutdown().await {
                warn!("Failed to interrupt room {}: {}", handle.id(), e);
            }
        }
    }

    fn lock_rooms(&self) -> std::sync::MutexGuard<'_, HashMap<RoomId, RoomHandle>> {
        self.inner.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
