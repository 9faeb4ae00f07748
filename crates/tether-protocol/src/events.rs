//! Event types for the Tether wire protocol.
//!
//! Every frame is a JSON object carrying a `type` tag. Inbound frames are
//! decoded into [`ClientEvent`] by the codec; outbound frames are built as
//! [`ServerEvent`] and serialized once per fan-out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A room chat message sent by a client.
///
/// This is also the fallback shape: any frame with an unrecognized `type`
/// that still carries `content` is treated as chat.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChatPayload {
    /// Message text.
    pub content: String,
    /// Display name override for this message.
    #[serde(default)]
    pub username: Option<String>,
    /// Avatar override for this message.
    #[serde(default)]
    pub avatar: Option<String>,
}

/// A profile or avatar change announced by a client.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProfileChange {
    /// New display name.
    #[serde(default)]
    pub username: Option<String>,
    /// New avatar URL.
    #[serde(default)]
    pub avatar: Option<String>,
    /// Older clients send the avatar under this name.
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl ProfileChange {
    /// The announced avatar, whichever field carried it.
    #[must_use]
    pub fn avatar(&self) -> Option<&str> {
        self.avatar.as_deref().or(self.avatar_url.as_deref())
    }
}

/// WebRTC signaling payload addressed to one peer in the same room.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SignalPayload {
    /// User that should receive the signal.
    pub target_user_id: String,
    /// Opaque SDP/ICE blob. Never inspected.
    pub signal: Value,
}

/// Live broadcast start/stop notice.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BroadcastNotice {
    /// Display name to announce with the broadcast.
    #[serde(default)]
    pub username: Option<String>,
}

/// Private message to another user.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DmMessagePayload {
    /// Recipient user id.
    pub receiver_id: String,
    /// Message text.
    pub content: String,
    #[serde(default)]
    pub sender_username: Option<String>,
    #[serde(default)]
    pub sender_avatar: Option<String>,
}

/// Read receipt for messages previously sent by `sender_id`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DmReadPayload {
    /// The user whose messages were read.
    pub sender_id: String,
}

/// Private typing indicator.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DmTypingPayload {
    pub receiver_id: String,
    pub is_typing: bool,
}

/// An event received from a client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Client keep-alive; answered with `ping`.
    KeepAlive,
    /// User started typing in the room.
    TypingStart,
    /// User stopped typing in the room.
    TypingStop,
    /// Display name and/or avatar changed.
    ProfileUpdated(ProfileChange),
    /// Avatar changed.
    AvatarUpdated(ProfileChange),
    /// Point-to-point signaling payload.
    WebrtcSignal(SignalPayload),
    /// User went live.
    BroadcastStarted(BroadcastNotice),
    /// User stopped broadcasting.
    BroadcastStopped(BroadcastNotice),
    /// Private message.
    DmMessage(DmMessagePayload),
    /// Private read receipt.
    DmRead(DmReadPayload),
    /// Private typing indicator.
    DmTyping(DmTypingPayload),
    /// Room chat message.
    Chat(ChatPayload),
    /// Well-formed frame with a tag this server does not handle.
    Unknown(String),
}

impl ClientEvent {
    /// Short name of the event kind, used for logs and metrics labels.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ClientEvent::KeepAlive => "keep_alive",
            ClientEvent::TypingStart => "typing_start",
            ClientEvent::TypingStop => "typing_stop",
            ClientEvent::ProfileUpdated(_) => "profile_updated",
            ClientEvent::AvatarUpdated(_) => "avatar_updated",
            ClientEvent::WebrtcSignal(_) => "webrtc-signal",
            ClientEvent::BroadcastStarted(_) => "broadcast-started",
            ClientEvent::BroadcastStopped(_) => "broadcast-stopped",
            ClientEvent::DmMessage(_) => "dm_message",
            ClientEvent::DmRead(_) => "dm_read",
            ClientEvent::DmTyping(_) => "dm_typing",
            ClientEvent::Chat(_) => "message",
            ClientEvent::Unknown(_) => "unknown",
        }
    }
}

/// One entry of a `room_state` seed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceView {
    pub user_id: String,
    pub username: String,
    pub avatar: Option<String>,
    pub joined_at: DateTime<Utc>,
}

/// One entry of an `active-broadcasts` seed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcasterView {
    pub user_id: String,
    pub username: String,
    pub started_at: DateTime<Utc>,
}

/// A room chat message as delivered to members and kept in history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Server-assigned identifier.
    pub id: String,
    pub room_id: String,
    pub user_id: String,
    pub username: String,
    pub content: String,
    pub avatar: Option<String>,
    /// Server-assigned timestamp.
    pub timestamp: DateTime<Utc>,
}

/// A private message as delivered to its recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectMessage {
    /// Server-assigned identifier.
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub sender_username: Option<String>,
    pub sender_avatar: Option<String>,
    /// Server-assigned timestamp.
    pub timestamp: DateTime<Utc>,
}

/// An event sent to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Presence snapshot sent to a newly opened channel.
    #[serde(rename = "room_state")]
    RoomState {
        room_id: String,
        users: Vec<PresenceView>,
    },

    /// Currently live broadcasters, sent to a newly opened channel.
    #[serde(rename = "active-broadcasts")]
    ActiveBroadcasts {
        room_id: String,
        broadcasters: Vec<BroadcasterView>,
    },

    #[serde(rename = "user_joined")]
    UserJoined {
        room_id: String,
        user_id: String,
        username: String,
        avatar: Option<String>,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "user_left")]
    UserLeft {
        room_id: String,
        user_id: String,
        timestamp: DateTime<Utc>,
    },

    /// Room chat message.
    #[serde(rename = "message")]
    Message(ChatMessage),

    #[serde(rename = "typing_start")]
    TypingStart {
        room_id: String,
        user_id: String,
        username: String,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "typing_stop")]
    TypingStop {
        room_id: String,
        user_id: String,
        username: String,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "profile_updated")]
    ProfileUpdated {
        room_id: String,
        user_id: String,
        username: String,
        avatar: Option<String>,
    },

    #[serde(rename = "avatar_updated")]
    AvatarUpdated {
        room_id: String,
        user_id: String,
        username: String,
        avatar: Option<String>,
    },

    /// Relayed signaling payload.
    #[serde(rename = "webrtc-signal")]
    WebrtcSignal { from_user_id: String, signal: Value },

    #[serde(rename = "broadcast-started")]
    BroadcastStarted { user_id: String, username: String },

    #[serde(rename = "broadcast-stopped")]
    BroadcastStopped { user_id: String, username: String },

    /// Private message.
    #[serde(rename = "dm_message")]
    DmMessage(DirectMessage),

    #[serde(rename = "dm_read")]
    DmRead {
        reader_id: String,
        sender_id: String,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "dm_typing")]
    DmTyping {
        sender_id: String,
        receiver_id: String,
        is_typing: bool,
    },

    /// Reply to a client keep-alive.
    #[serde(rename = "ping")]
    Ping { timestamp: DateTime<Utc> },

    /// Best-effort error report.
    #[serde(rename = "error")]
    Error { message: String },
}

impl ServerEvent {
    /// Create an `error` event.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
        }
    }

    /// Create a `ping` event stamped now.
    #[must_use]
    pub fn ping() -> Self {
        ServerEvent::Ping {
            timestamp: Utc::now(),
        }
    }

    /// The wire `type` tag of this event.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::RoomState { .. } => "room_state",
            ServerEvent::ActiveBroadcasts { .. } => "active-broadcasts",
            ServerEvent::UserJoined { .. } => "user_joined",
            ServerEvent::UserLeft { .. } => "user_left",
            ServerEvent::Message(_) => "message",
            ServerEvent::TypingStart { .. } => "typing_start",
            ServerEvent::TypingStop { .. } => "typing_stop",
            ServerEvent::ProfileUpdated { .. } => "profile_updated",
            ServerEvent::AvatarUpdated { .. } => "avatar_updated",
            ServerEvent::WebrtcSignal { .. } => "webrtc-signal",
            ServerEvent::BroadcastStarted { .. } => "broadcast-started",
            ServerEvent::BroadcastStopped { .. } => "broadcast-stopped",
            ServerEvent::DmMessage(_) => "dm_message",
            ServerEvent::DmRead { .. } => "dm_read",
            ServerEvent::DmTyping { .. } => "dm_typing",
            ServerEvent::Ping { .. } => "ping",
            ServerEvent::Error { .. } => "error",
        }
    }
}
