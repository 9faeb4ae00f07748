//! Connection registry.
//!
//! Tracks which channel is live for each `(room, user)` pair, plus a global
//! map of DM endpoints keyed by user. Registration is last-writer-wins: a
//! second channel for the same key supersedes the first without closing it.
//! Absence is a valid, silent state; nothing here returns an error.

use crate::channel::{ChannelHandle, ConnectionId};
use crate::room::{RoomId, Rooms, UserId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Outcome of registering a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// No channel was registered for the key.
    Fresh,
    /// An older channel was registered for the key and has been replaced.
    /// The old channel is not closed; its session finds out when it next
    /// reads from its transport.
    Superseded(ConnectionId),
}

/// Outcome of a session leaving a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Departure {
    /// The session's channel was the registered one (or had already been
    /// pruned): the user is no longer live in the room.
    Left,
    /// A newer channel took the key while this one was registered. The
    /// user is still live, or their newer channel has already left.
    Superseded,
}

/// Live channels for a single room.
#[derive(Debug, Default)]
pub struct RoomConnections {
    channels: HashMap<UserId, ChannelHandle>,
    /// Replaced connections whose sessions have not departed yet.
    superseded: HashSet<ConnectionId>,
}

impl RoomConnections {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the user's channel.
    pub fn register(&mut self, user_id: &str, handle: ChannelHandle) -> Registration {
        match self.channels.insert(user_id.to_string(), handle) {
            Some(previous) => {
                self.superseded.insert(previous.id());
                Registration::Superseded(previous.id())
            }
            None => Registration::Fresh,
        }
    }

    /// Remove the user's channel, whichever it is. Idempotent.
    pub fn deregister(&mut self, user_id: &str) -> Option<ChannelHandle> {
        self.channels.remove(user_id)
    }

    /// Remove the user's channel only if it is the given connection.
    ///
    /// Returns `true` if an entry was removed.
    pub fn deregister_connection(&mut self, user_id: &str, id: ConnectionId) -> bool {
        if self.is_current(user_id, id) {
            self.channels.remove(user_id);
            true
        } else {
            false
        }
    }

    /// Remove the given connection and report whether it had been replaced.
    ///
    /// A replaced connection departs as [`Departure::Superseded`] even when
    /// its replacement has already gone.
    pub fn depart(&mut self, user_id: &str, id: ConnectionId) -> Departure {
        if self.superseded.remove(&id) {
            return Departure::Superseded;
        }
        match self.channels.get(user_id) {
            Some(current) if current.id() != id => Departure::Superseded,
            Some(_) => {
                self.channels.remove(user_id);
                Departure::Left
            }
            None => Departure::Left,
        }
    }

    /// Check whether the given connection is the registered one.
    #[must_use]
    pub fn is_current(&self, user_id: &str, id: ConnectionId) -> bool {
        self.channels
            .get(user_id)
            .is_some_and(|current| current.id() == id)
    }

    /// Get the user's channel.
    #[must_use]
    pub fn get(&self, user_id: &str) -> Option<&ChannelHandle> {
        self.channels.get(user_id)
    }

    /// Check if the user has a live channel.
    #[must_use]
    pub fn contains(&self, user_id: &str) -> bool {
        self.channels.contains_key(user_id)
    }

    /// Independent copy of all `(user, channel)` pairs, safe to iterate
    /// after the room lock is released.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(UserId, ChannelHandle)> {
        self.channels
            .iter()
            .map(|(user, handle)| (user.clone(), handle.clone()))
            .collect()
    }

    /// All connected user IDs.
    #[must_use]
    pub fn users(&self) -> Vec<UserId> {
        self.channels.keys().cloned().collect()
    }

    /// Get the number of live channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Check if no channel is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

/// Room-keyed connection registry plus the global DM endpoint map.
///
/// The DM map has its own lock, independent of every room lock.
#[derive(Debug)]
pub struct ConnectionRegistry {
    rooms: Arc<Rooms>,
    dm_endpoints: RwLock<HashMap<UserId, ChannelHandle>>,
}

impl ConnectionRegistry {
    /// Create a registry over the given rooms.
    #[must_use]
    pub fn new(rooms: Arc<Rooms>) -> Self {
        Self {
            rooms,
            dm_endpoints: RwLock::new(HashMap::new()),
        }
    }

    /// The underlying room directory.
    #[must_use]
    pub fn rooms(&self) -> &Arc<Rooms> {
        &self.rooms
    }

    /// Register a channel for `(room, user)`, replacing any previous one.
    #[cfg(test)]
    pub(crate) async fn register(&self, room_id: &str, user_id: &str, handle: ChannelHandle) -> Registration {
        let connection = handle.id();
        let room = self.rooms.get_or_create(room_id);
        let registration = room.lock().await.connections.register(user_id, handle);

        if let Registration::Superseded(previous) = registration {
            tracing::info!(
                room = %room_id,
                user = %user_id,
                connection = %connection,
                superseded = %previous,
                "Channel superseded"
            );
        }
        registration
    }

    /// Remove the channel for `(room, user)`. Idempotent.
    #[cfg(test)]
    pub(crate) async fn deregister(&self, room_id: &str, user_id: &str) {
        if let Some(room) = self.rooms.get(room_id) {
            if room.lock().await.connections.deregister(user_id).is_some() {
                debug!(room = %room_id, user = %user_id, "Channel deregistered");
            }
        }
    }

    /// Remove the channel for `(room, user)` only if it is `id`.
    pub async fn deregister_connection(&self, room_id: &str, user_id: &str, id: ConnectionId) -> bool {
        match self.rooms.get(room_id) {
            Some(room) => room.lock().await.connections.deregister_connection(user_id, id),
            None => false,
        }
    }

    /// Independent copy of a room's `(user, channel)` pairs.
    #[cfg(test)]
    pub(crate) async fn snapshot(&self, room_id: &str) -> Vec<(UserId, ChannelHandle)> {
        match self.rooms.get(room_id) {
            Some(room) => room.lock().await.connections.snapshot(),
            None => Vec::new(),
        }
    }

    /// The user's channel in one room.
    pub async fn lookup(&self, room_id: &str, user_id: &str) -> Option<ChannelHandle> {
        let room = self.rooms.get(room_id)?;
        let state = room.lock().await;
        state.connections.get(user_id).cloned()
    }

    /// Scan every room for a channel belonging to the user.
    ///
    /// Returns the first match with the room it was found in. Which room
    /// wins when the user is connected to several is unspecified.
    pub async fn find_anywhere(&self, user_id: &str) -> Option<(RoomId, ChannelHandle)> {
        for (room_id, room) in self.rooms.all() {
            let state = room.lock().await;
            if let Some(handle) = state.connections.get(user_id) {
                return Some((room_id, handle.clone()));
            }
        }
        None
    }

    /// Register the user's global DM endpoint, replacing any previous one.
    pub async fn register_dm(&self, user_id: &str, handle: ChannelHandle) -> Registration {
        let mut endpoints = self.dm_endpoints.write().await;
        match endpoints.insert(user_id.to_string(), handle) {
            Some(previous) => Registration::Superseded(previous.id()),
            None => Registration::Fresh,
        }
    }

    /// Remove the user's DM endpoint only if it is `id`.
    pub async fn deregister_dm(&self, user_id: &str, id: ConnectionId) -> bool {
        let mut endpoints = self.dm_endpoints.write().await;
        if endpoints.get(user_id).is_some_and(|h| h.id() == id) {
            endpoints.remove(user_id);
            debug!(user = %user_id, connection = %id, "DM endpoint deregistered");
            true
        } else {
            false
        }
    }

    /// The user's DM endpoint.
    pub async fn dm_endpoint(&self, user_id: &str) -> Option<ChannelHandle> {
        self.dm_endpoints.read().await.get(user_id).cloned()
    }

    /// Number of registered DM endpoints.
    pub async fn dm_endpoint_count(&self) -> usize {
        self.dm_endpoints.read().await.len()
    }
}
