//! # tether-core
//!
//! In-memory presence and messaging hub for the Tether relay.
//!
//! This crate provides the shared state and the components that act on it:
//!
//! - **ConnectionRegistry** - live channel per `(room, user)` plus global DM endpoints
//! - **PresenceRoster** - per-room directory of known users, independent of connectivity
//! - **BroadcastEngine** - room fan-out that prunes channels whose send fails
//! - **SignalingRelay** - opaque point-to-point payloads within a room
//! - **DirectMessageRouter** - private events routed across rooms
//! - **BroadcastLifecycleTracker** - who is live-broadcasting in each room
//! - **Session** - one channel's join, dispatch loop and teardown
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────────────────────┐
//! │  Transport  │────▶│   Session   │────▶│ Hub                         │
//! └─────────────┘     └─────────────┘     │  Rooms (one lock per room)  │
//!        ▲                                │   ├ connections             │
//!        │ writer task                    │   ├ presence                │
//! ┌─────────────┐                         │   └ broadcasters            │
//! │ChannelHandle│◀────── fan-out ─────────│  DM endpoints (own lock)    │
//! └─────────────┘                         └─────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tether_core::{Hub, Session, SessionParams, TransportError};
//!
//! # async fn example(inbound: impl futures_util::Stream<Item = Result<String, TransportError>>) {
//! let hub = Arc::new(Hub::new());
//! let (handle, mut outbound) = hub.open_channel();
//!
//! tokio::spawn(async move {
//!     while let Some(frame) = outbound.recv().await {
//!         // write `frame` to the socket
//!         let _ = frame;
//!     }
//! });
//!
//! let params = SessionParams::new("lobby", "alice").display_name("Alice");
//! Session::connect(hub, params, handle).await.run(inbound).await;
//! # }
//! ```

pub mod broadcasters;
pub mod channel;
pub mod delivery;
pub mod direct;
pub mod error;
pub mod fanout;
pub mod hub;
pub mod presence;
pub mod registry;
pub mod room;
pub mod session;
pub mod signaling;
pub mod store;

pub use broadcasters::{BroadcastLifecycleTracker, BroadcasterEntry, Broadcasters};
pub use channel::{ChannelHandle, ConnectionId, Frame, SendFailure};
pub use delivery::{Delivery, DropReason, FanoutReport};
pub use direct::{DirectEvent, DirectKind, DirectMessageRouter};
pub use error::TransportError;
pub use fanout::BroadcastEngine;
pub use hub::{Hub, HubConfig, HubStats, JoinSeed, LeaveOutcome};
pub use presence::{PresenceDirectory, PresenceEntry, PresenceMeta, PresenceRoster, ProfileUpdate};
pub use registry::{ConnectionRegistry, Departure, Registration};
pub use room::{validate_id, RoomId, Rooms, UserId};
pub use session::{Outcome, Session, SessionObserver, SessionParams, SessionState};
pub use signaling::SignalingRelay;
pub use store::{HistoryStore, MemoryHistory, MemoryProfiles, Profile, ProfileStore, StoreError};
