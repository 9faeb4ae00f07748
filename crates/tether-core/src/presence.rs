//! Presence tracking.
//!
//! The presence roster is a per-room directory of users who have joined,
//! with their display metadata. It is deliberately independent of live
//! connectivity: entries are created on REST pre-join or first connect,
//! updated on profile changes, and retained after disconnect.

use crate::room::{Rooms, UserId};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tether_protocol::PresenceView;
use tracing::debug;

/// Display name used when nothing better is known.
pub const ANONYMOUS: &str = "Anonymous";

/// Display metadata for a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceMeta {
    pub display_name: String,
    pub avatar_url: Option<String>,
}

impl PresenceMeta {
    /// Create metadata with a display name and optional avatar.
    #[must_use]
    pub fn new(display_name: impl Into<String>, avatar_url: Option<String>) -> Self {
        Self {
            display_name: display_name.into(),
            avatar_url,
        }
    }

    /// Apply a partial update in place.
    pub fn apply(&mut self, update: &ProfileUpdate) {
        if let Some(name) = &update.display_name {
            self.display_name.clone_from(name);
        }
        if let Some(avatar) = &update.avatar_url {
            self.avatar_url = Some(avatar.clone());
        }
    }
}

impl Default for PresenceMeta {
    fn default() -> Self {
        Self::new(ANONYMOUS, None)
    }
}

/// A partial metadata change. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

impl ProfileUpdate {
    /// Check if the update changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none() && self.avatar_url.is_none()
    }
}

/// One user's presence in a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEntry {
    pub user_id: UserId,
    pub meta: PresenceMeta,
    /// When the user first appeared in the room.
    pub joined_at: DateTime<Utc>,
}

impl PresenceEntry {
    /// Create an entry stamped now.
    #[must_use]
    pub fn new(user_id: impl Into<UserId>, meta: PresenceMeta) -> Self {
        Self {
            user_id: user_id.into(),
            meta,
            joined_at: Utc::now(),
        }
    }

    /// Wire representation for `room_state` seeds.
    #[must_use]
    pub fn to_view(&self) -> PresenceView {
        PresenceView {
            user_id: self.user_id.clone(),
            username: self.meta.display_name.clone(),
            avatar: self.meta.avatar_url.clone(),
            joined_at: self.joined_at,
        }
    }
}

/// Presence roster for a single room.
#[derive(Debug, Default)]
pub struct PresenceRoster {
    members: HashMap<UserId, PresenceEntry>,
}

impl PresenceRoster {
    /// Create an empty roster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of known users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Check if the roster is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Check if a user is known in this room.
    #[must_use]
    pub fn contains(&self, user_id: &str) -> bool {
        self.members.contains_key(user_id)
    }

    /// Get a user's entry.
    #[must_use]
    pub fn get(&self, user_id: &str) -> Option<&PresenceEntry> {
        self.members.get(user_id)
    }

    /// Add a user unless already present. An existing entry keeps its
    /// metadata and join time.
    ///
    /// Returns `true` if a new entry was created.
    pub fn upsert_if_absent(&mut self, user_id: &str, meta: PresenceMeta) -> bool {
        if self.members.contains_key(user_id) {
            return false;
        }
        self.members
            .insert(user_id.to_string(), PresenceEntry::new(user_id, meta));
        debug!(user = %user_id, "Presence: member added");
        true
    }

    /// Add a user, or overwrite an existing user's metadata while keeping
    /// the original join time.
    ///
    /// Returns `true` if a new entry was created.
    pub fn upsert(&mut self, user_id: &str, meta: PresenceMeta) -> bool {
        match self.members.get_mut(user_id) {
            Some(entry) => {
                entry.meta = meta;
                false
            }
            None => {
                self.members
                    .insert(user_id.to_string(), PresenceEntry::new(user_id, meta));
                true
            }
        }
    }

    /// Apply a partial metadata update.
    ///
    /// Returns `true` if the user exists and was updated.
    pub fn update(&mut self, user_id: &str, update: &ProfileUpdate) -> bool {
        match self.members.get_mut(user_id) {
            Some(entry) => {
                entry.meta.apply(update);
                true
            }
            None => false,
        }
    }

    /// All entries, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<PresenceEntry> {
        let mut entries: Vec<PresenceEntry> = self.members.values().cloned().collect();
        entries.sort_by(|a, b| {
            a.joined_at
                .cmp(&b.joined_at)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        entries
    }
}

/// Room-keyed access to presence rosters.
#[derive(Debug, Clone)]
pub struct PresenceDirectory {
    rooms: Arc<Rooms>,
}

impl PresenceDirectory {
    /// Create a directory over the given rooms.
    #[must_use]
    pub fn new(rooms: Arc<Rooms>) -> Self {
        Self { rooms }
    }

    /// Add a user to a room's roster unless already present.
    #[cfg(test)]
    pub(crate) async fn upsert_if_absent(&self, room_id: &str, user_id: &str, meta: PresenceMeta) -> bool {
        let room = self.rooms.get_or_create(room_id);
        let mut state = room.lock().await;
        state.presence.upsert_if_absent(user_id, meta)
    }

    /// Apply a partial metadata update to a user in a room.
    pub async fn update(&self, room_id: &str, user_id: &str, update: &ProfileUpdate) -> bool {
        let Some(room) = self.rooms.get(room_id) else {
            return false;
        };
        let mut state = room.lock().await;
        state.presence.update(user_id, update)
    }

    /// Get one user's entry.
    pub async fn get(&self, room_id: &str, user_id: &str) -> Option<PresenceEntry> {
        let room = self.rooms.get(room_id)?;
        let state = room.lock().await;
        state.presence.get(user_id).cloned()
    }

    /// Snapshot a room's roster. Unknown rooms are empty.
    #[cfg(test)]
    pub(crate) async fn snapshot(&self, room_id: &str) -> Vec<PresenceEntry> {
        match self.rooms.get(room_id) {
            Some(room) => room.lock().await.presence.snapshot(),
            None => Vec::new(),
        }
    }
}
