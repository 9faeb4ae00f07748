//! The hub.
//!
//! [`Hub`] owns every shared directory and component and is the only thing
//! a transport needs to hold. Operations that touch several directories of
//! one room (join, leave) take the room lock once for the whole mutation.

use crate::broadcasters::{BroadcastLifecycleTracker, BroadcasterEntry};
use crate::channel::{ChannelHandle, ConnectionId, Frame};
use crate::delivery::FanoutReport;
use crate::direct::DirectMessageRouter;
use crate::fanout::BroadcastEngine;
use crate::presence::{PresenceDirectory, PresenceEntry, PresenceMeta, ProfileUpdate, ANONYMOUS};
use crate::registry::{ConnectionRegistry, Departure, Registration};
use crate::room::Rooms;
use crate::signaling::SignalingRelay;
use crate::store::{HistoryStore, MemoryHistory, MemoryProfiles, ProfileStore, StoreError};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tether_protocol::{ChatMessage, ServerEvent};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// How long a single send may wait for queue space.
    pub send_timeout: Duration,
    /// Outbound queue depth per connection.
    pub channel_capacity: usize,
    /// Room whose channels also become global DM endpoints.
    pub dm_room: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(2),
            channel_capacity: 256,
            dm_room: "dm".to_string(),
        }
    }
}

/// State handed to a newly joined channel, captured atomically with its
/// registration.
#[derive(Debug, Clone)]
pub struct JoinSeed {
    pub registration: Registration,
    pub roster: Vec<PresenceEntry>,
    pub broadcasters: Vec<BroadcasterEntry>,
}

/// What a session's departure removed from its room, captured under one
/// acquisition of the room lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveOutcome {
    pub departure: Departure,
    /// The user's live broadcast, ended because they are no longer
    /// connected to the room. Always `None` for a superseded channel.
    pub ended_broadcast: Option<BroadcasterEntry>,
}

/// Hub statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Rooms ever referenced.
    pub rooms: usize,
    /// Rooms with at least one live channel.
    pub active_rooms: usize,
    /// Live room channels.
    pub connections: usize,
    /// Distinct users with at least one live room channel.
    pub connected_users: usize,
    /// Registered DM endpoints.
    pub dm_endpoints: usize,
}

/// The presence and messaging hub.
pub struct Hub {
    config: HubConfig,
    rooms: Arc<Rooms>,
    registry: Arc<ConnectionRegistry>,
    presence: PresenceDirectory,
    engine: BroadcastEngine,
    signaling: SignalingRelay,
    direct: DirectMessageRouter,
    broadcasts: BroadcastLifecycleTracker,
    profiles: Arc<dyn ProfileStore>,
    history: Arc<dyn HistoryStore>,
}

impl Hub {
    /// Create a hub with default configuration and in-memory stores.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HubConfig::default())
    }

    /// Create a hub with in-memory stores.
    #[must_use]
    pub fn with_config(config: HubConfig) -> Self {
        Self::with_stores(
            config,
            Arc::new(MemoryProfiles::new()),
            Arc::new(MemoryHistory::default()),
        )
    }

    /// Create a hub over the given stores.
    #[must_use]
    pub fn with_stores(
        config: HubConfig,
        profiles: Arc<dyn ProfileStore>,
        history: Arc<dyn HistoryStore>,
    ) -> Self {
        info!("Creating hub with config: {:?}", config);
        let rooms = Arc::new(Rooms::new());
        let registry = Arc::new(ConnectionRegistry::new(Arc::clone(&rooms)));
        let engine = BroadcastEngine::new(Arc::clone(&rooms), config.send_timeout);
        Self {
            presence: PresenceDirectory::new(Arc::clone(&rooms)),
            signaling: SignalingRelay::new(Arc::clone(&registry), config.send_timeout),
            direct: DirectMessageRouter::new(Arc::clone(&registry), config.send_timeout),
            broadcasts: BroadcastLifecycleTracker::new(Arc::clone(&rooms), engine.clone()),
            engine,
            registry,
            rooms,
            profiles,
            history,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn presence(&self) -> &PresenceDirectory {
        &self.presence
    }

    #[must_use]
    pub fn engine(&self) -> &BroadcastEngine {
        &self.engine
    }

    #[must_use]
    pub fn signaling(&self) -> &SignalingRelay {
        &self.signaling
    }

    #[must_use]
    pub fn direct(&self) -> &DirectMessageRouter {
        &self.direct
    }

    #[must_use]
    pub fn broadcasts(&self) -> &BroadcastLifecycleTracker {
        &self.broadcasts
    }

    #[must_use]
    pub fn history(&self) -> &Arc<dyn HistoryStore> {
        &self.history
    }

    /// Check whether channels in this room double as DM endpoints.
    #[must_use]
    pub fn is_dm_room(&self, room_id: &str) -> bool {
        room_id == self.config.dm_room
    }

    /// Create an outbound channel sized by the configuration.
    #[must_use]
    pub fn open_channel(&self) -> (ChannelHandle, mpsc::Receiver<Frame>) {
        ChannelHandle::new(self.config.channel_capacity)
    }

    /// Work out a connecting user's display metadata.
    ///
    /// Each field is taken from the first source that has it: the supplied
    /// values, the profile store, the user's presence entry in the room.
    /// A name that is still unknown becomes [`ANONYMOUS`].
    pub async fn resolve_meta(
        &self,
        room_id: &str,
        user_id: &str,
        display_name: Option<String>,
        avatar_url: Option<String>,
    ) -> PresenceMeta {
        let mut display_name = display_name.filter(|name| !name.trim().is_empty());
        let mut avatar_url = avatar_url.filter(|url| !url.is_empty());

        if display_name.is_none() || avatar_url.is_none() {
            match self.profiles.profile(user_id).await {
                Ok(Some(profile)) => {
                    display_name = display_name.or(profile.display_name);
                    avatar_url = avatar_url.or(profile.avatar_url);
                }
                Ok(None) => {}
                Err(e) => warn!(user = %user_id, error = %e, "Profile lookup failed"),
            }
        }

        if display_name.is_none() || avatar_url.is_none() {
            if let Some(entry) = self.presence.get(room_id, user_id).await {
                display_name = display_name.or(Some(entry.meta.display_name));
                avatar_url = avatar_url.or(entry.meta.avatar_url);
            }
        }

        PresenceMeta::new(
            display_name.unwrap_or_else(|| ANONYMOUS.to_string()),
            avatar_url,
        )
    }

    /// Register a channel and capture the seed state for it.
    ///
    /// Registration, the presence upsert and both snapshots happen under a
    /// single acquisition of the room lock, so the seed always includes the
    /// joining user and no concurrent join can fall between them. In the DM
    /// room the channel is also registered as the user's DM endpoint.
    pub async fn join(
        &self,
        room_id: &str,
        user_id: &str,
        handle: ChannelHandle,
        meta: PresenceMeta,
    ) -> JoinSeed {
        let connection = handle.id();
        let dm_handle = self.is_dm_room(room_id).then(|| handle.clone());

        let seed = {
            let room = self.rooms.get_or_create(room_id);
            let mut state = room.lock().await;
            let registration = state.connections.register(user_id, handle);
            state.presence.upsert_if_absent(user_id, meta);
            JoinSeed {
                registration,
                roster: state.presence.snapshot(),
                broadcasters: state.broadcasters.list(),
            }
        };

        if let Some(dm_handle) = dm_handle {
            self.registry.register_dm(user_id, dm_handle).await;
        }

        match seed.registration {
            Registration::Fresh => {
                info!(room = %room_id, user = %user_id, connection = %connection, "Joined room");
            }
            Registration::Superseded(previous) => {
                info!(
                    room = %room_id,
                    user = %user_id,
                    connection = %connection,
                    superseded = %previous,
                    "Joined room, replacing older channel"
                );
            }
        }
        seed
    }

    /// Remove a session's channel from its room and, in the DM room, from
    /// the DM endpoints.
    ///
    /// Only the given connection is removed: a newer channel for the same
    /// user is left alone and reported as [`Departure::Superseded`]. When
    /// the user really leaves, their broadcaster entry is removed in the
    /// same critical section, so a broadcast started by a later channel is
    /// never touched by this one's teardown.
    pub async fn leave(&self, room_id: &str, user_id: &str, connection: ConnectionId) -> LeaveOutcome {
        let outcome = match self.rooms.get(room_id) {
            Some(room) => {
                let mut state = room.lock().await;
                let departure = state.connections.depart(user_id, connection);
                let ended_broadcast = match departure {
                    Departure::Left => state.broadcasters.stop(user_id),
                    Departure::Superseded => None,
                };
                LeaveOutcome {
                    departure,
                    ended_broadcast,
                }
            }
            None => LeaveOutcome {
                departure: Departure::Left,
                ended_broadcast: None,
            },
        };
        if self.is_dm_room(room_id) {
            self.registry.deregister_dm(user_id, connection).await;
        }
        debug!(
            room = %room_id,
            user = %user_id,
            connection = %connection,
            departure = ?outcome.departure,
            broadcasting = outcome.ended_broadcast.is_some(),
            "Left room"
        );
        outcome
    }

    /// Record a user in a room's presence roster without a channel.
    ///
    /// Unlike a channel join this overwrites any existing metadata; the
    /// original join time is kept. Returns `true` if the user is new to
    /// the room.
    pub async fn pre_join(&self, room_id: &str, user_id: &str, meta: PresenceMeta) -> bool {
        let room = self.rooms.get_or_create(room_id);
        let created = room.lock().await.presence.upsert(user_id, meta);
        info!(room = %room_id, user = %user_id, created, "Pre-joined room");
        created
    }

    /// Post a chat message to a room.
    ///
    /// The message is stamped, delivered to every member including the
    /// author, then appended to history. A history failure is logged and
    /// does not undo delivery.
    pub async fn post_message(
        &self,
        room_id: &str,
        user_id: &str,
        content: String,
        author: &PresenceMeta,
    ) -> (ChatMessage, FanoutReport) {
        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            room_id: room_id.to_string(),
            user_id: user_id.to_string(),
            username: author.display_name.clone(),
            content,
            avatar: author.avatar_url.clone(),
            timestamp: Utc::now(),
        };

        let report = self
            .engine
            .broadcast(room_id, &ServerEvent::Message(message.clone()), None)
            .await;

        if let Err(e) = self.history.append(room_id, &message).await {
            warn!(room = %room_id, error = %e, "Failed to store message");
        }
        debug!(room = %room_id, user = %user_id, delivered = report.delivered, "Message posted");
        (message, report)
    }

    /// Apply a profile change to the user's presence in a room and to the
    /// profile store.
    ///
    /// Returns the user's presence entry after the change, if they have one.
    pub async fn update_profile(
        &self,
        room_id: &str,
        user_id: &str,
        update: &ProfileUpdate,
    ) -> Option<PresenceEntry> {
        if update.is_empty() {
            return self.presence.get(room_id, user_id).await;
        }

        self.presence.update(room_id, user_id, update).await;
        if let Err(e) = self.profiles.update_profile(user_id, update).await {
            warn!(user = %user_id, error = %e, "Failed to store profile");
        }
        self.presence.get(room_id, user_id).await
    }

    /// The most recent messages in a room, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the history store fails.
    pub async fn recent_messages(
        &self,
        room_id: &str,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        self.history.recent(room_id, limit).await
    }

    /// Get hub statistics.
    pub async fn stats(&self) -> HubStats {
        let mut stats = HubStats {
            rooms: self.rooms.len(),
            dm_endpoints: self.registry.dm_endpoint_count().await,
            ..HubStats::default()
        };

        let mut users = HashSet::new();
        for (_, room) in self.rooms.all() {
            let state = room.lock().await;
            if !state.connections.is_empty() {
                stats.active_rooms += 1;
                stats.connections += state.connections.len();
                users.extend(state.connections.users());
            }
        }
        stats.connected_users = users.len();
        stats
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("config", &self.config)
            .field("rooms", &self.rooms.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(name: &str) -> PresenceMeta {
        PresenceMeta::new(name, None)
    }

    #[tokio::test]
    async fn test_join_seed_includes_joining_user() {
        let hub = Hub::new();
        let (alice, _rx_a) = hub.open_channel();
        let (bob, _rx_b) = hub.open_channel();

        hub.join("r1", "alice", alice, meta("Alice")).await;
        let seed = hub.join("r1", "bob", bob, meta("Bob")).await;

        assert_eq!(seed.registration, Registration::Fresh);
        let users: Vec<_> = seed.roster.iter().map(|e| e.user_id.as_str()).collect();
        assert!(users.contains(&"alice"));
        assert!(users.contains(&"bob"));
        assert!(seed.broadcasters.is_empty());
    }

    #[tokio::test]
    async fn test_rejoin_supersedes_and_old_leave_is_harmless() {
        let hub = Hub::new();
        let (first, _rx1) = hub.open_channel();
        let (second, _rx2) = hub.open_channel();
        let first_id = first.id();
        let second_id = second.id();

        hub.join("r1", "alice", first, meta("Alice")).await;
        let seed = hub.join("r1", "alice", second, meta("Alice")).await;
        assert_eq!(seed.registration, Registration::Superseded(first_id));

        assert_eq!(hub.leave("r1", "alice", first_id).await.departure, Departure::Superseded);
        assert_eq!(
            hub.registry().lookup("r1", "alice").await.unwrap().id(),
            second_id
        );
        assert_eq!(hub.leave("r1", "alice", second_id).await.departure, Departure::Left);
        assert!(hub.registry().lookup("r1", "alice").await.is_none());
    }

    #[tokio::test]
    async fn test_leave_ends_broadcast_in_same_step() {
        let hub = Hub::new();
        let (old, _rx_old) = hub.open_channel();
        let old_id = old.id();
        hub.join("r1", "alice", old, meta("Alice")).await;
        hub.broadcasts().start("r1", "alice", &meta("Alice")).await;

        let outcome = hub.leave("r1", "alice", old_id).await;
        assert_eq!(outcome.departure, Departure::Left);
        let ended = outcome.ended_broadcast.unwrap();
        assert_eq!(ended.user_id, "alice");

        // Reconnect and go live again before the old teardown announces.
        let (new, mut rx_new) = hub.open_channel();
        hub.join("r1", "alice", new, meta("Alice")).await;
        hub.broadcasts().start("r1", "alice", &meta("Alice")).await;
        assert!(hub.broadcasts().announce_ended("r1", &ended).await.is_none());

        let active = hub.broadcasts().list_active("r1").await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].user_id, "alice");
        let frames: Vec<_> = std::iter::from_fn(|| rx_new.try_recv().ok()).collect();
        assert!(frames.iter().all(|f| !f.contains("broadcast-stopped")));
    }

    #[tokio::test]
    async fn test_superseded_leave_keeps_broadcast() {
        let hub = Hub::new();
        let (old, _rx_old) = hub.open_channel();
        let (new, _rx_new) = hub.open_channel();
        let old_id = old.id();
        hub.join("r1", "alice", old, meta("Alice")).await;
        hub.broadcasts().start("r1", "alice", &meta("Alice")).await;
        hub.join("r1", "alice", new, meta("Alice")).await;

        let outcome = hub.leave("r1", "alice", old_id).await;
        assert_eq!(
            outcome,
            LeaveOutcome {
                departure: Departure::Superseded,
                ended_broadcast: None,
            }
        );
        assert_eq!(hub.broadcasts().list_active("r1").await.len(), 1);
    }

    #[tokio::test]
    async fn test_dm_room_registers_endpoint() {
        let hub = Hub::new();
        let (carol, _rx) = hub.open_channel();
        let id = carol.id();

        hub.join("dm", "carol", carol, meta("Carol")).await;
        assert!(hub.registry().dm_endpoint("carol").await.is_some());

        hub.leave("dm", "carol", id).await;
        assert!(hub.registry().dm_endpoint("carol").await.is_none());
    }

    #[tokio::test]
    async fn test_resolve_meta_precedence() {
        let hub = Hub::new();

        let resolved = hub.resolve_meta("r1", "alice", None, None).await;
        assert_eq!(resolved, PresenceMeta::default());

        hub.pre_join("r1", "alice", PresenceMeta::new("From Presence", Some("p.png".into())))
            .await;
        let resolved = hub.resolve_meta("r1", "alice", None, None).await;
        assert_eq!(resolved.display_name, "From Presence");

        hub.update_profile(
            "r1",
            "alice",
            &ProfileUpdate {
                display_name: Some("From Profile".into()),
                avatar_url: None,
            },
        )
        .await;
        let resolved = hub.resolve_meta("r1", "alice", None, None).await;
        assert_eq!(resolved.display_name, "From Profile");
        assert_eq!(resolved.avatar_url.as_deref(), Some("p.png"));

        let resolved = hub
            .resolve_meta("r1", "alice", Some("From Query".into()), Some(String::new()))
            .await;
        assert_eq!(resolved.display_name, "From Query");
        assert_eq!(resolved.avatar_url.as_deref(), Some("p.png"));
    }

    #[tokio::test]
    async fn test_pre_join_overwrites_metadata() {
        let hub = Hub::new();
        assert!(hub.pre_join("r1", "alice", meta("Alice")).await);
        assert!(!hub.pre_join("r1", "alice", meta("Alicia")).await);

        let entry = hub.presence().get("r1", "alice").await.unwrap();
        assert_eq!(entry.meta.display_name, "Alicia");
        assert!(hub.registry().lookup("r1", "alice").await.is_none());
    }

    #[tokio::test]
    async fn test_post_message_reaches_author_and_history() {
        let hub = Hub::new();
        let (alice, mut rx) = hub.open_channel();
        hub.join("r1", "alice", alice, meta("Alice")).await;

        let (message, report) = hub
            .post_message("r1", "alice", "hello".to_string(), &meta("Alice"))
            .await;

        assert_eq!(report.delivered, 1);
        assert!(rx.try_recv().unwrap().contains("hello"));
        let history = hub.recent_messages("r1", 10).await.unwrap();
        assert_eq!(history, vec![message]);
    }

    #[tokio::test]
    async fn test_stats_counts_live_channels() {
        let hub = Hub::new();
        let (a1, _rx1) = hub.open_channel();
        let (a2, _rx2) = hub.open_channel();
        let (b, _rx3) = hub.open_channel();

        hub.join("r1", "alice", a1, meta("Alice")).await;
        hub.join("dm", "alice", a2, meta("Alice")).await;
        hub.join("r1", "bob", b, meta("Bob")).await;
        hub.pre_join("r2", "carol", meta("Carol")).await;

        let stats = hub.stats().await;
        assert_eq!(
            stats,
            HubStats {
                rooms: 3,
                active_rooms: 2,
                connections: 3,
                connected_users: 2,
                dm_endpoints: 1,
            }
        );
    }
}
