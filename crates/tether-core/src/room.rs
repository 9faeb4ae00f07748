//! Room directory.
//!
//! Rooms are created lazily on first reference and never destroyed. Each
//! room's connections, presence roster and broadcaster set live behind one
//! room-scoped lock so that join/leave mutations of all three are atomic
//! with respect to each other.

use crate::broadcasters::Broadcasters;
use crate::presence::PresenceRoster;
use crate::registry::RoomConnections;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// A room identifier.
pub type RoomId = String;

/// A user identifier.
pub type UserId = String;

/// Maximum room or user ID length.
pub const MAX_ID_LENGTH: usize = 256;

/// Validate a room or user ID.
///
/// # Errors
///
/// Returns an error message if the ID is empty, too long, or contains
/// control characters.
pub fn validate_id(id: &str) -> Result<(), &'static str> {
    if id.is_empty() {
        return Err("ID cannot be empty");
    }
    if id.len() > MAX_ID_LENGTH {
        return Err("ID too long");
    }
    if id.chars().any(char::is_control) {
        return Err("ID contains invalid characters");
    }
    Ok(())
}

/// Everything the hub knows about one room.
#[derive(Debug, Default)]
pub struct RoomState {
    /// Live channels, one per user.
    pub connections: RoomConnections,
    /// Known users, live or not.
    pub presence: PresenceRoster,
    /// Users currently broadcasting media.
    pub broadcasters: Broadcasters,
}

/// A room behind its lock.
pub type SharedRoom = Arc<Mutex<RoomState>>;

/// All rooms, indexed by ID.
#[derive(Debug, Default)]
pub struct Rooms {
    rooms: DashMap<RoomId, SharedRoom>,
}

impl Rooms {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a room, creating it if this is the first reference.
    #[must_use]
    pub fn get_or_create(&self, room_id: &str) -> SharedRoom {
        if let Some(room) = self.rooms.get(room_id) {
            return Arc::clone(room.value());
        }
        let room = self.rooms.entry(room_id.to_string()).or_insert_with(|| {
            debug!(room = %room_id, "Creating room");
            SharedRoom::default()
        });
        Arc::clone(room.value())
    }

    /// Get a room without creating it.
    #[must_use]
    pub fn get(&self, room_id: &str) -> Option<SharedRoom> {
        self.rooms.get(room_id).map(|room| Arc::clone(room.value()))
    }

    /// Snapshot of every room handle.
    ///
    /// The directory shard locks are released before this returns, so the
    /// caller may await room locks freely.
    #[must_use]
    pub fn all(&self) -> Vec<(RoomId, SharedRoom)> {
        self.rooms
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }

    /// Check if a room has ever been referenced.
    #[must_use]
    pub fn contains(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    /// Number of rooms ever referenced.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// Check if no room exists yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_validation() {
        assert!(validate_id("lobby").is_ok());
        assert!(validate_id("5f0c-room:general").is_ok());
        assert!(validate_id("").is_err());
        assert!(validate_id("bad\nid").is_err());

        let long_id = "a".repeat(MAX_ID_LENGTH + 1);
        assert!(validate_id(&long_id).is_err());
    }

    #[test]
    fn test_rooms_created_lazily_and_shared() {
        let rooms = Rooms::new();
        assert!(rooms.get("r1").is_none());
        assert!(rooms.is_empty());

        let a = rooms.get_or_create("r1");
        let b = rooms.get_or_create("r1");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(rooms.len(), 1);
        assert!(rooms.contains("r1"));
    }

    #[tokio::test]
    async fn test_room_state_starts_empty() {
        let rooms = Rooms::new();
        let room = rooms.get_or_create("r1");
        let state = room.lock().await;
        assert!(state.connections.is_empty());
        assert!(state.presence.is_empty());
        assert!(state.broadcasters.is_empty());
    }
}
