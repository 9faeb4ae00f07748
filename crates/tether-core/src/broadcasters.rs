//! Live broadcaster tracking.
//!
//! A broadcaster entry means a user is currently live-streaming media in a
//! room. Entries are created on an explicit start and removed on an explicit
//! stop or when the user's channel goes away. There is no history.

use crate::delivery::FanoutReport;
use crate::fanout::BroadcastEngine;
use crate::presence::PresenceMeta;
use crate::room::{Rooms, UserId};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tether_protocol::{BroadcasterView, ServerEvent};
use tracing::info;

/// One live broadcaster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcasterEntry {
    pub user_id: UserId,
    pub display_name: String,
    pub started_at: DateTime<Utc>,
}

impl BroadcasterEntry {
    /// Wire representation for `active-broadcasts` seeds.
    #[must_use]
    pub fn to_view(&self) -> BroadcasterView {
        BroadcasterView {
            user_id: self.user_id.clone(),
            username: self.display_name.clone(),
            started_at: self.started_at,
        }
    }
}

/// Live broadcasters for a single room.
#[derive(Debug, Default)]
pub struct Broadcasters {
    live: HashMap<UserId, BroadcasterEntry>,
}

impl Broadcasters {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the user's entry with a fresh start time.
    pub fn start(&mut self, user_id: &str, display_name: &str) {
        self.live.insert(
            user_id.to_string(),
            BroadcasterEntry {
                user_id: user_id.to_string(),
                display_name: display_name.to_string(),
                started_at: Utc::now(),
            },
        );
    }

    /// Remove the user's entry, returning it if there was one.
    pub fn stop(&mut self, user_id: &str) -> Option<BroadcasterEntry> {
        self.live.remove(user_id)
    }

    /// Check if the user is live.
    #[must_use]
    pub fn is_live(&self, user_id: &str) -> bool {
        self.live.contains_key(user_id)
    }

    /// Current broadcasters, earliest start first.
    #[must_use]
    pub fn list(&self) -> Vec<BroadcasterEntry> {
        let mut entries: Vec<BroadcasterEntry> = self.live.values().cloned().collect();
        entries.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.live.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}

/// Start/stop semantics for live broadcasts, with room announcements.
#[derive(Debug, Clone)]
pub struct BroadcastLifecycleTracker {
    rooms: Arc<Rooms>,
    engine: BroadcastEngine,
}

impl BroadcastLifecycleTracker {
    #[must_use]
    pub fn new(rooms: Arc<Rooms>, engine: BroadcastEngine) -> Self {
        Self { rooms, engine }
    }

    /// Mark the user live and announce it to everyone else in the room.
    ///
    /// A user with no presence entry gets one, so every broadcaster is also
    /// a known member of the room.
    pub async fn start(&self, room_id: &str, user_id: &str, meta: &PresenceMeta) -> FanoutReport {
        {
            let room = self.rooms.get_or_create(room_id);
            let mut state = room.lock().await;
            state.presence.upsert_if_absent(user_id, meta.clone());
            state.broadcasters.start(user_id, &meta.display_name);
        }
        info!(room = %room_id, user = %user_id, "Broadcast started");

        let event = ServerEvent::BroadcastStarted {
            user_id: user_id.to_string(),
            username: meta.display_name.clone(),
        };
        self.engine.broadcast(room_id, &event, Some(user_id)).await
    }

    /// Remove the user's entry, if any, and announce the stop to the whole
    /// room, the user included.
    pub async fn stop(&self, room_id: &str, user_id: &str, display_name: &str) -> FanoutReport {
        self.remove(room_id, user_id).await;
        info!(room = %room_id, user = %user_id, "Broadcast stopped");
        self.announce_stop(room_id, user_id, display_name).await
    }

    /// Announce a broadcast that ended because its channel left the room.
    ///
    /// The entry must already have been removed. Returns `None` without
    /// announcing anything if the user has gone live again since.
    pub async fn announce_ended(&self, room_id: &str, ended: &BroadcasterEntry) -> Option<FanoutReport> {
        let room = self.rooms.get(room_id)?;
        if room.lock().await.broadcasters.is_live(&ended.user_id) {
            return None;
        }
        info!(room = %room_id, user = %ended.user_id, "Broadcast ended with channel");
        Some(
            self.announce_stop(room_id, &ended.user_id, &ended.display_name)
                .await,
        )
    }

    /// Current broadcasters in a room.
    pub async fn list_active(&self, room_id: &str) -> Vec<BroadcasterEntry> {
        match self.rooms.get(room_id) {
            Some(room) => room.lock().await.broadcasters.list(),
            None => Vec::new(),
        }
    }

    async fn remove(&self, room_id: &str, user_id: &str) -> Option<BroadcasterEntry> {
        let room = self.rooms.get(room_id)?;
        let mut state = room.lock().await;
        state.broadcasters.stop(user_id)
    }

    async fn announce_stop(&self, room_id: &str, user_id: &str, display_name: &str) -> FanoutReport {
        let event = ServerEvent::BroadcastStopped {
            user_id: user_id.to_string(),
            username: display_name.to_string(),
        };
        self.engine.broadcast(room_id, &event, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelHandle, Frame};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn tracker() -> (Arc<Rooms>, BroadcastLifecycleTracker) {
        let rooms = Arc::new(Rooms::new());
        let engine = BroadcastEngine::new(Arc::clone(&rooms), Duration::from_millis(50));
        (Arc::clone(&rooms), BroadcastLifecycleTracker::new(rooms, engine))
    }

    async fn connect(rooms: &Rooms, room: &str, user: &str) -> mpsc::Receiver<Frame> {
        let (handle, rx) = ChannelHandle::new(16);
        rooms
            .get_or_create(room)
            .lock()
            .await
            .connections
            .register(user, handle);
        rx
    }

    #[test]
    fn test_start_overwrites_and_stop_is_idempotent() {
        let mut set = Broadcasters::new();
        set.start("alice", "Alice");
        set.start("alice", "Alice B");
        assert_eq!(set.len(), 1);
        assert_eq!(set.list()[0].display_name, "Alice B");

        assert!(set.stop("alice").is_some());
        assert!(set.stop("alice").is_none());
        assert!(!set.is_live("alice"));
    }

    #[tokio::test]
    async fn test_start_excludes_originator() {
        let (rooms, tracker) = tracker();
        let mut rx_alice = connect(&rooms, "r1", "alice").await;
        let mut rx_bob = connect(&rooms, "r1", "bob").await;

        let report = tracker
            .start("r1", "alice", &PresenceMeta::new("Alice", None))
            .await;

        assert_eq!(report.delivered, 1);
        assert!(rx_alice.try_recv().is_err());
        let frame = rx_bob.try_recv().unwrap();
        assert!(frame.contains("broadcast-started"));
        assert!(frame.contains("Alice"));
    }

    #[tokio::test]
    async fn test_start_adds_presence() {
        let (rooms, tracker) = tracker();
        tracker
            .start("r1", "alice", &PresenceMeta::new("Alice", None))
            .await;

        let room = rooms.get("r1").unwrap();
        let state = room.lock().await;
        assert!(state.presence.contains("alice"));
        assert!(state.broadcasters.is_live("alice"));
    }

    #[tokio::test]
    async fn test_stop_includes_originator_even_without_entry() {
        let (rooms, tracker) = tracker();
        let mut rx_alice = connect(&rooms, "r1", "alice").await;
        let mut rx_bob = connect(&rooms, "r1", "bob").await;

        let report = tracker.stop("r1", "alice", "Alice").await;

        assert_eq!(report.delivered, 2);
        assert!(rx_alice.try_recv().unwrap().contains("broadcast-stopped"));
        assert!(rx_bob.try_recv().unwrap().contains("broadcast-stopped"));
    }

    #[tokio::test]
    async fn test_announce_ended_skips_user_live_again() {
        let (rooms, tracker) = tracker();
        let mut rx_bob = connect(&rooms, "r1", "bob").await;
        let meta = PresenceMeta::new("Alice", None);

        tracker.start("r1", "alice", &meta).await;
        rx_bob.try_recv().unwrap();
        let ended = {
            let room = rooms.get("r1").unwrap();
            let mut state = room.lock().await;
            state.broadcasters.stop("alice").unwrap()
        };

        let report = tracker.announce_ended("r1", &ended).await.unwrap();
        assert_eq!(report.delivered, 1);
        assert!(rx_bob.try_recv().unwrap().contains("broadcast-stopped"));

        tracker.start("r1", "alice", &meta).await;
        rx_bob.try_recv().unwrap();
        assert!(tracker.announce_ended("r1", &ended).await.is_none());
        assert!(rx_bob.try_recv().is_err());
        assert_eq!(tracker.list_active("r1").await.len(), 1);
    }
}
