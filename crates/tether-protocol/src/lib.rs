//! # tether-protocol
//!
//! Wire protocol definitions for the Tether chat and signaling relay.
//!
//! Clients and the server exchange JSON text frames tagged by a `type`
//! field. This crate defines both directions and the codec between them.
//!
//! ## Event families
//!
//! - Room chat: `message`, `typing_start` / `typing_stop`
//! - Presence: `room_state`, `user_joined`, `user_left`, `profile_updated`
//! - Live media: `webrtc-signal`, `broadcast-started` / `broadcast-stopped`
//! - Private messaging: `dm_message`, `dm_read`, `dm_typing`
//!
//! ## Example
//!
//! ```rust
//! use tether_protocol::{codec, ClientEvent, ServerEvent};
//!
//! let event = codec::decode(r#"{"type":"keep_alive"}"#).unwrap();
//! assert_eq!(event, ClientEvent::KeepAlive);
//!
//! let reply = codec::encode(&ServerEvent::ping()).unwrap();
//! assert!(reply.contains("\"type\":\"ping\""));
//! ```

pub mod codec;
pub mod events;

pub use codec::{decode, encode, ProtocolError, MAX_FRAME_SIZE};
pub use events::{
    BroadcastNotice, BroadcasterView, ChatMessage, ChatPayload, ClientEvent, DirectMessage,
    DmMessagePayload, DmReadPayload, DmTypingPayload, PresenceView, ProfileChange, ServerEvent,
    SignalPayload,
};
