//! Private message routing.
//!
//! Direct events cross rooms. The target is looked up first among global DM
//! endpoints, then in every room. Nothing is queued: an unreachable target
//! means the event is dropped and the sender is not told.

use crate::channel::{ChannelHandle, Frame};
use crate::delivery::{Delivery, DropReason};
use crate::registry::ConnectionRegistry;
use crate::room::RoomId;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tether_protocol::{codec, DirectMessage, ServerEvent};
use tracing::{debug, warn};
use uuid::Uuid;

/// Kinds of direct event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectKind {
    Message,
    Typing,
    ReadReceipt,
}

impl DirectKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            DirectKind::Message => "message",
            DirectKind::Typing => "typing",
            DirectKind::ReadReceipt => "read_receipt",
        }
    }
}

/// A direct event as submitted by the sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectEvent {
    Message {
        content: String,
        sender_username: Option<String>,
        sender_avatar: Option<String>,
    },
    Typing {
        is_typing: bool,
    },
    /// The sender has read the target's messages.
    ReadReceipt,
}

impl DirectEvent {
    #[must_use]
    pub fn kind(&self) -> DirectKind {
        match self {
            DirectEvent::Message { .. } => DirectKind::Message,
            DirectEvent::Typing { .. } => DirectKind::Typing,
            DirectEvent::ReadReceipt => DirectKind::ReadReceipt,
        }
    }

    /// Build the outbound event. Messages get a fresh ID and timestamp here.
    fn into_server_event(self, from: &str, to: &str) -> ServerEvent {
        match self {
            DirectEvent::Message {
                content,
                sender_username,
                sender_avatar,
            } => ServerEvent::DmMessage(DirectMessage {
                id: Uuid::new_v4().to_string(),
                sender_id: from.to_string(),
                receiver_id: to.to_string(),
                content,
                sender_username,
                sender_avatar,
                timestamp: Utc::now(),
            }),
            DirectEvent::Typing { is_typing } => ServerEvent::DmTyping {
                sender_id: from.to_string(),
                receiver_id: to.to_string(),
                is_typing,
            },
            DirectEvent::ReadReceipt => ServerEvent::DmRead {
                reader_id: from.to_string(),
                sender_id: to.to_string(),
                timestamp: Utc::now(),
            },
        }
    }
}

/// Where a target's channel was found.
enum Endpoint {
    Dm(ChannelHandle),
    Room(RoomId, ChannelHandle),
}

impl Endpoint {
    fn handle(&self) -> &ChannelHandle {
        match self {
            Endpoint::Dm(handle) | Endpoint::Room(_, handle) => handle,
        }
    }
}

/// Routes direct events to a user wherever they are connected.
#[derive(Debug, Clone)]
pub struct DirectMessageRouter {
    registry: Arc<ConnectionRegistry>,
    send_timeout: Duration,
}

impl DirectMessageRouter {
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>, send_timeout: Duration) -> Self {
        Self {
            registry,
            send_timeout,
        }
    }

    /// Deliver `event` from `from` to `to`.
    pub async fn route(&self, from: &str, to: &str, event: DirectEvent) -> Delivery {
        let kind = event.kind();
        let Some(endpoint) = self.resolve(to).await else {
            debug!(from = %from, to = %to, kind = kind.as_str(), "Direct target unreachable");
            return Delivery::Dropped(DropReason::TargetNotFound);
        };

        let frame = match codec::encode(&event.into_server_event(from, to)) {
            Ok(text) => Frame::from(text),
            Err(e) => {
                warn!(to = %to, error = %e, "Failed to encode direct event");
                return Delivery::Dropped(DropReason::EncodeFailed);
            }
        };

        let handle = endpoint.handle();
        match handle.send(frame, self.send_timeout).await {
            Ok(()) => {
                debug!(from = %from, to = %to, kind = kind.as_str(), "Direct event delivered");
                Delivery::Delivered
            }
            Err(failure) => {
                warn!(to = %to, error = %failure, "Direct send failed, pruning target");
                match &endpoint {
                    Endpoint::Dm(handle) => {
                        self.registry.deregister_dm(to, handle.id()).await;
                    }
                    Endpoint::Room(room_id, handle) => {
                        self.registry
                            .deregister_connection(room_id, to, handle.id())
                            .await;
                    }
                }
                Delivery::Dropped(DropReason::SendFailed(failure))
            }
        }
    }

    async fn resolve(&self, user_id: &str) -> Option<Endpoint> {
        if let Some(handle) = self.registry.dm_endpoint(user_id).await {
            return Some(Endpoint::Dm(handle));
        }
        self.registry
            .find_anywhere(user_id)
            .await
            .map(|(room_id, handle)| Endpoint::Room(room_id, handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::Rooms;
    use serde_json::Value;

    fn router() -> (Arc<ConnectionRegistry>, DirectMessageRouter) {
        let registry = Arc::new(ConnectionRegistry::new(Arc::new(Rooms::new())));
        let router = DirectMessageRouter::new(Arc::clone(&registry), Duration::from_millis(50));
        (registry, router)
    }

    fn message(content: &str) -> DirectEvent {
        DirectEvent::Message {
            content: content.to_string(),
            sender_username: Some("Carol".to_string()),
            sender_avatar: None,
        }
    }

    #[tokio::test]
    async fn test_message_assigned_id_and_timestamp() {
        let (registry, router) = router();
        let (dave, mut rx) = ChannelHandle::new(4);
        registry.register_dm("dave", dave).await;

        let delivery = router.route("carol", "dave", message("hi")).await;
        assert!(delivery.is_delivered());

        let value: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(value["type"], "dm_message");
        assert_eq!(value["sender_id"], "carol");
        assert_eq!(value["receiver_id"], "dave");
        assert_eq!(value["content"], "hi");
        assert!(Uuid::parse_str(value["id"].as_str().unwrap()).is_ok());
        assert!(value["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_dm_endpoint_preferred_over_room() {
        let (registry, router) = router();
        let (in_room, mut rx_room) = ChannelHandle::new(4);
        let (dm, mut rx_dm) = ChannelHandle::new(4);
        registry.register("lobby", "dave", in_room).await;
        registry.register_dm("dave", dm).await;

        router
            .route("carol", "dave", DirectEvent::Typing { is_typing: true })
            .await;

        assert!(rx_dm.try_recv().unwrap().contains("dm_typing"));
        assert!(rx_room.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_falls_back_to_any_room() {
        let (registry, router) = router();
        let (dave, mut rx) = ChannelHandle::new(4);
        registry.register("lobby", "dave", dave).await;

        let delivery = router.route("carol", "dave", DirectEvent::ReadReceipt).await;
        assert_eq!(delivery, Delivery::Delivered);

        let value: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(value["type"], "dm_read");
        assert_eq!(value["reader_id"], "carol");
        assert_eq!(value["sender_id"], "dave");
    }

    #[tokio::test]
    async fn test_offline_target_dropped() {
        let (_registry, router) = router();
        let delivery = router.route("carol", "dave", message("hello?")).await;
        assert_eq!(delivery, Delivery::Dropped(DropReason::TargetNotFound));
    }

    #[tokio::test]
    async fn test_failed_dm_endpoint_is_pruned() {
        let (registry, router) = router();
        let (dave, rx) = ChannelHandle::new(4);
        registry.register_dm("dave", dave).await;
        drop(rx);

        let delivery = router.route("carol", "dave", message("hi")).await;
        assert!(!delivery.is_delivered());
        assert!(registry.dm_endpoint("dave").await.is_none());
    }
}
