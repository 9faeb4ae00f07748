//! Collaborator stores.
//!
//! The hub keeps no durable state of its own. User profiles and room chat
//! history live behind these traits; the in-memory implementations here
//! back the default server and the tests.

use crate::presence::ProfileUpdate;
use crate::room::{RoomId, UserId};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use tether_protocol::ChatMessage;
use thiserror::Error;

/// Store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Stored profile for a user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Profile {
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

/// User profile lookup and update.
#[async_trait]
pub trait ProfileStore: Send + Sync + 'static {
    /// Fetch a user's profile, if one is known.
    async fn profile(&self, user_id: &str) -> Result<Option<Profile>, StoreError>;

    /// Apply a partial update, creating the profile if needed.
    async fn update_profile(&self, user_id: &str, update: &ProfileUpdate) -> Result<(), StoreError>;
}

/// Room chat history.
#[async_trait]
pub trait HistoryStore: Send + Sync + 'static {
    /// Append a message to a room's history.
    async fn append(&self, room_id: &str, message: &ChatMessage) -> Result<(), StoreError>;

    /// The most recent `limit` messages, oldest first.
    async fn recent(&self, room_id: &str, limit: usize) -> Result<Vec<ChatMessage>, StoreError>;
}

/// Profiles kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryProfiles {
    profiles: DashMap<UserId, Profile>,
}

impl MemoryProfiles {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProfileStore for MemoryProfiles {
    async fn profile(&self, user_id: &str) -> Result<Option<Profile>, StoreError> {
        Ok(self.profiles.get(user_id).map(|p| p.value().clone()))
    }

    async fn update_profile(&self, user_id: &str, update: &ProfileUpdate) -> Result<(), StoreError> {
        let mut profile = self.profiles.entry(user_id.to_string()).or_default();
        if let Some(name) = &update.display_name {
            profile.display_name = Some(name.clone());
        }
        if let Some(avatar) = &update.avatar_url {
            profile.avatar_url = Some(avatar.clone());
        }
        Ok(())
    }
}

/// Per-room history kept in process memory, capped per room.
#[derive(Debug)]
pub struct MemoryHistory {
    rooms: DashMap<RoomId, VecDeque<ChatMessage>>,
    capacity: usize,
}

impl MemoryHistory {
    /// Default number of messages kept per room.
    pub const DEFAULT_CAPACITY: usize = 500;

    /// Create a store keeping at most `capacity` messages per room.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            rooms: DashMap::new(),
            capacity: capacity.max(1),
        }
    }
}

impl Default for MemoryHistory {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl HistoryStore for MemoryHistory {
    async fn append(&self, room_id: &str, message: &ChatMessage) -> Result<(), StoreError> {
        let mut history = self.rooms.entry(room_id.to_string()).or_default();
        while history.len() >= self.capacity {
            history.pop_front();
        }
        history.push_back(message.clone());
        Ok(())
    }

    async fn recent(&self, room_id: &str, limit: usize) -> Result<Vec<ChatMessage>, StoreError> {
        let Some(history) = self.rooms.get(room_id) else {
            return Ok(Vec::new());
        };
        let skip = history.len().saturating_sub(limit);
        Ok(history.iter().skip(skip).cloned().collect())
    }
}
