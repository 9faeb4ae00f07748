//! Connection lifecycle.
//!
//! A [`Session`] is one channel's life in a room: it joins and seeds the
//! channel, dispatches inbound frames until the transport ends, then tears
//! down. It never writes to the transport directly; everything outbound
//! goes through its [`ChannelHandle`].
//!
//! ```text
//! Connecting ──open──▶ Open ──transport ends──▶ Closing ──teardown──▶ Closed
//! ```

use crate::channel::{ChannelHandle, Frame};
use crate::delivery::{Delivery, FanoutReport};
use crate::direct::DirectEvent;
use crate::error::TransportError;
use crate::hub::{Hub, LeaveOutcome};
use crate::presence::{PresenceMeta, ProfileUpdate};
use crate::registry::{Departure, Registration};
use crate::room::{RoomId, UserId};
use chrono::Utc;
use futures_util::{pin_mut, Stream, StreamExt};
use std::sync::Arc;
use tether_protocol::{codec, ClientEvent, ProfileChange, ServerEvent};
use tracing::{debug, info, warn};

/// Connection parameters supplied at handshake.
#[derive(Debug, Clone, Default)]
pub struct SessionParams {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

impl SessionParams {
    #[must_use]
    pub fn new(room_id: impl Into<RoomId>, user_id: impl Into<UserId>) -> Self {
        Self {
            room_id: room_id.into(),
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn avatar_url(mut self, url: impl Into<String>) -> Self {
        self.avatar_url = Some(url.into());
        self
    }
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// What handling one inbound frame did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The event was fanned out to the room.
    Fanout(FanoutReport),
    /// The event was sent to a single target.
    Delivery(Delivery),
    /// The session answered the sender directly.
    Replied,
    /// Well-formed but not handled here.
    Ignored,
    /// The frame could not be decoded; the sender was sent an `error`.
    Rejected,
}

/// Hook for observing dispatch, e.g. for metrics.
pub trait SessionObserver: Send + Sync {
    /// Called after every inbound frame. `kind` is the decoded event kind,
    /// or `"invalid"` if decoding failed.
    fn on_dispatch(&self, kind: &'static str, outcome: &Outcome);
}

/// One channel's lifetime in a room.
pub struct Session {
    hub: Arc<Hub>,
    room_id: RoomId,
    user_id: UserId,
    meta: PresenceMeta,
    handle: ChannelHandle,
    state: SessionState,
    observer: Option<Arc<dyn SessionObserver>>,
}

impl Session {
    /// Create a session in the `Connecting` state.
    pub async fn connect(hub: Arc<Hub>, params: SessionParams, handle: ChannelHandle) -> Self {
        let meta = hub
            .resolve_meta(
                &params.room_id,
                &params.user_id,
                params.display_name,
                params.avatar_url,
            )
            .await;
        Self {
            hub,
            room_id: params.room_id,
            user_id: params.user_id,
            meta,
            handle,
            state: SessionState::Connecting,
            observer: None,
        }
    }

    /// Attach a dispatch observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    #[must_use]
    pub fn meta(&self) -> &PresenceMeta {
        &self.meta
    }

    #[must_use]
    pub fn handle(&self) -> &ChannelHandle {
        &self.handle
    }

    /// Join the room, seed the channel and announce the user.
    ///
    /// The channel is sent `room_state` then `active-broadcasts`, both
    /// captured atomically with its registration. Everyone else receives
    /// `user_joined`.
    pub async fn open(&mut self) -> Registration {
        if self.state != SessionState::Connecting {
            return Registration::Fresh;
        }

        let seed = self
            .hub
            .join(
                &self.room_id,
                &self.user_id,
                self.handle.clone(),
                self.meta.clone(),
            )
            .await;
        self.state = SessionState::Open;

        self.reply(&ServerEvent::RoomState {
            room_id: self.room_id.clone(),
            users: seed.roster.iter().map(|entry| entry.to_view()).collect(),
        })
        .await;
        self.reply(&ServerEvent::ActiveBroadcasts {
            room_id: self.room_id.clone(),
            broadcasters: seed.broadcasters.iter().map(|entry| entry.to_view()).collect(),
        })
        .await;

        let joined = ServerEvent::UserJoined {
            room_id: self.room_id.clone(),
            user_id: self.user_id.clone(),
            username: self.meta.display_name.clone(),
            avatar: self.meta.avatar_url.clone(),
            timestamp: Utc::now(),
        };
        self.hub
            .engine()
            .broadcast(&self.room_id, &joined, Some(&self.user_id))
            .await;

        seed.registration
    }

    /// Open the session, dispatch frames until the transport ends, then
    /// tear down.
    pub async fn run<S>(mut self, inbound: S) -> Departure
    where
        S: Stream<Item = Result<String, TransportError>>,
    {
        self.open().await;
        pin_mut!(inbound);

        while let Some(frame) = inbound.next().await {
            match frame {
                Ok(text) => {
                    self.handle_frame(&text).await;
                }
                Err(e) => {
                    warn!(
                        room = %self.room_id,
                        user = %self.user_id,
                        connection = %self.handle.id(),
                        error = %e,
                        "Transport error"
                    );
                    break;
                }
            }
        }

        self.close().await
    }

    /// Decode and dispatch one inbound frame.
    ///
    /// Bad input never ends the session: it is answered with an `error`
    /// event and the session carries on.
    pub async fn handle_frame(&mut self, text: &str) -> Outcome {
        let (kind, outcome) = match codec::decode(text) {
            Ok(event) => {
                let kind = event.kind();
                (kind, self.dispatch(event).await)
            }
            Err(e) => {
                debug!(room = %self.room_id, user = %self.user_id, error = %e, "Rejected frame");
                self.reply(&ServerEvent::error(e.to_string())).await;
                ("invalid", Outcome::Rejected)
            }
        };

        if let Some(observer) = &self.observer {
            observer.on_dispatch(kind, &outcome);
        }
        outcome
    }

    async fn dispatch(&mut self, event: ClientEvent) -> Outcome {
        debug!(room = %self.room_id, user = %self.user_id, kind = event.kind(), "Dispatching");

        match event {
            ClientEvent::KeepAlive => {
                self.reply(&ServerEvent::ping()).await;
                Outcome::Replied
            }

            ClientEvent::TypingStart => self.typing(true).await,
            ClientEvent::TypingStop => self.typing(false).await,

            ClientEvent::ProfileUpdated(change) => self.profile_change(change, false).await,
            ClientEvent::AvatarUpdated(change) => self.profile_change(change, true).await,

            ClientEvent::WebrtcSignal(payload) => Outcome::Delivery(
                self.hub
                    .signaling()
                    .relay(
                        &self.room_id,
                        &self.user_id,
                        &payload.target_user_id,
                        payload.signal,
                    )
                    .await,
            ),

            ClientEvent::BroadcastStarted(notice) => {
                let meta = PresenceMeta::new(
                    notice
                        .username
                        .unwrap_or_else(|| self.meta.display_name.clone()),
                    self.meta.avatar_url.clone(),
                );
                Outcome::Fanout(
                    self.hub
                        .broadcasts()
                        .start(&self.room_id, &self.user_id, &meta)
                        .await,
                )
            }

            ClientEvent::BroadcastStopped(notice) => {
                let name = notice
                    .username
                    .unwrap_or_else(|| self.meta.display_name.clone());
                Outcome::Fanout(
                    self.hub
                        .broadcasts()
                        .stop(&self.room_id, &self.user_id, &name)
                        .await,
                )
            }

            ClientEvent::DmMessage(payload) => {
                let event = DirectEvent::Message {
                    content: payload.content,
                    sender_username: payload
                        .sender_username
                        .or_else(|| Some(self.meta.display_name.clone())),
                    sender_avatar: payload
                        .sender_avatar
                        .or_else(|| self.meta.avatar_url.clone()),
                };
                self.route_direct(&payload.receiver_id, event).await
            }

            ClientEvent::DmRead(payload) => {
                self.route_direct(&payload.sender_id, DirectEvent::ReadReceipt)
                    .await
            }

            ClientEvent::DmTyping(payload) => {
                self.route_direct(
                    &payload.receiver_id,
                    DirectEvent::Typing {
                        is_typing: payload.is_typing,
                    },
                )
                .await
            }

            ClientEvent::Chat(payload) => {
                let author = PresenceMeta::new(
                    payload
                        .username
                        .unwrap_or_else(|| self.meta.display_name.clone()),
                    payload.avatar.or_else(|| self.meta.avatar_url.clone()),
                );
                let (_, report) = self
                    .hub
                    .post_message(&self.room_id, &self.user_id, payload.content, &author)
                    .await;
                Outcome::Fanout(report)
            }

            ClientEvent::Unknown(tag) => {
                debug!(room = %self.room_id, user = %self.user_id, tag = %tag, "Ignoring event");
                Outcome::Ignored
            }
        }
    }

    async fn typing(&self, started: bool) -> Outcome {
        let (room_id, user_id, username, timestamp) = (
            self.room_id.clone(),
            self.user_id.clone(),
            self.meta.display_name.clone(),
            Utc::now(),
        );
        let event = if started {
            ServerEvent::TypingStart {
                room_id,
                user_id,
                username,
                timestamp,
            }
        } else {
            ServerEvent::TypingStop {
                room_id,
                user_id,
                username,
                timestamp,
            }
        };
        Outcome::Fanout(self.broadcast(&event, Some(&self.user_id)).await)
    }

    async fn profile_change(&mut self, change: ProfileChange, avatar_only: bool) -> Outcome {
        let update = ProfileUpdate {
            display_name: change.username.clone(),
            avatar_url: change.avatar().map(str::to_string),
        };
        self.hub
            .update_profile(&self.room_id, &self.user_id, &update)
            .await;
        self.meta.apply(&update);

        let (room_id, user_id, username, avatar) = (
            self.room_id.clone(),
            self.user_id.clone(),
            self.meta.display_name.clone(),
            self.meta.avatar_url.clone(),
        );
        let event = if avatar_only {
            ServerEvent::AvatarUpdated {
                room_id,
                user_id,
                username,
                avatar,
            }
        } else {
            ServerEvent::ProfileUpdated {
                room_id,
                user_id,
                username,
                avatar,
            }
        };
        Outcome::Fanout(self.broadcast(&event, None).await)
    }

    async fn route_direct(&self, to: &str, event: DirectEvent) -> Outcome {
        Outcome::Delivery(self.hub.direct().route(&self.user_id, to, event).await)
    }

    async fn broadcast(&self, event: &ServerEvent, exclude: Option<&str>) -> FanoutReport {
        self.hub.engine().broadcast(&self.room_id, event, exclude).await
    }

    /// Send an event to this session's own channel.
    async fn reply(&self, event: &ServerEvent) {
        let frame = match codec::encode(event) {
            Ok(text) => Frame::from(text),
            Err(e) => {
                warn!(kind = event.kind(), error = %e, "Failed to encode reply");
                return;
            }
        };
        if let Err(e) = self
            .handle
            .send(frame, self.hub.config().send_timeout)
            .await
        {
            debug!(
                room = %self.room_id,
                user = %self.user_id,
                kind = event.kind(),
                error = %e,
                "Reply not delivered"
            );
        }
    }

    /// Tear the session down.
    ///
    /// A session whose channel has been superseded leaves quietly: the
    /// newer channel owns the user's broadcast and their eventual
    /// `user_left`. Otherwise the broadcast removed on leaving, if any, is
    /// announced as stopped and the room is told the user left. Presence
    /// is kept.
    pub async fn close(&mut self) -> Departure {
        if self.state == SessionState::Closed {
            return Departure::Left;
        }
        self.state = SessionState::Closing;

        let LeaveOutcome {
            departure,
            ended_broadcast,
        } = self
            .hub
            .leave(&self.room_id, &self.user_id, self.handle.id())
            .await;

        if departure == Departure::Left {
            if let Some(ended) = &ended_broadcast {
                self.hub
                    .broadcasts()
                    .announce_ended(&self.room_id, ended)
                    .await;
            }

            let left = ServerEvent::UserLeft {
                room_id: self.room_id.clone(),
                user_id: self.user_id.clone(),
                timestamp: Utc::now(),
            };
            self.broadcast(&left, None).await;
        }

        self.state = SessionState::Closed;
        info!(
            room = %self.room_id,
            user = %self.user_id,
            connection = %self.handle.id(),
            ?departure,
            "Session closed"
        );
        departure
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("room_id", &self.room_id)
            .field("user_id", &self.user_id)
            .field("connection", &self.handle.id())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
