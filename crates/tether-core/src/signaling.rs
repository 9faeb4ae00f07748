//! Point-to-point signaling relay.
//!
//! Signaling payloads are opaque: they are forwarded verbatim to one target
//! in the sender's room, tagged with the sender's ID. A target that is not
//! connected to the same room is a silent drop.

use crate::channel::Frame;
use crate::delivery::{Delivery, DropReason};
use crate::registry::ConnectionRegistry;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tether_protocol::{codec, ServerEvent};
use tracing::{debug, warn};

/// Forwards signaling payloads between members of a room.
#[derive(Debug, Clone)]
pub struct SignalingRelay {
    registry: Arc<ConnectionRegistry>,
    send_timeout: Duration,
}

impl SignalingRelay {
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>, send_timeout: Duration) -> Self {
        Self {
            registry,
            send_timeout,
        }
    }

    /// Deliver `signal` from `from` to `target` within `room_id`.
    pub async fn relay(&self, room_id: &str, from: &str, target: &str, signal: Value) -> Delivery {
        let Some(handle) = self.registry.lookup(room_id, target).await else {
            debug!(room = %room_id, from = %from, target = %target, "Signal target not connected");
            return Delivery::Dropped(DropReason::TargetNotFound);
        };

        let event = ServerEvent::WebrtcSignal {
            from_user_id: from.to_string(),
            signal,
        };
        let frame = match codec::encode(&event) {
            Ok(text) => Frame::from(text),
            Err(e) => {
                warn!(room = %room_id, error = %e, "Failed to encode signal");
                return Delivery::Dropped(DropReason::EncodeFailed);
            }
        };

        match handle.send(frame, self.send_timeout).await {
            Ok(()) => Delivery::Delivered,
            Err(failure) => {
                warn!(
                    room = %room_id,
                    target = %target,
                    error = %failure,
                    "Signal send failed, pruning target"
                );
                self.registry
                    .deregister_connection(room_id, target, handle.id())
                    .await;
                Delivery::Dropped(DropReason::SendFailed(failure))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelHandle, SendFailure};
    use crate::room::Rooms;
    use serde_json::json;

    fn relay() -> (Arc<ConnectionRegistry>, SignalingRelay) {
        let registry = Arc::new(ConnectionRegistry::new(Arc::new(Rooms::new())));
        let relay = SignalingRelay::new(Arc::clone(&registry), Duration::from_millis(50));
        (registry, relay)
    }

    #[tokio::test]
    async fn test_signal_forwarded_verbatim() {
        let (registry, relay) = relay();
        let (bob, mut rx_bob) = ChannelHandle::new(4);
        registry.register("r1", "bob", bob).await;

        let signal = json!({"sdp": "v=0", "candidates": [1, 2, {"nested": null}]});
        let delivery = relay.relay("r1", "alice", "bob", signal.clone()).await;
        assert_eq!(delivery, Delivery::Delivered);

        let frame = rx_bob.try_recv().unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "webrtc-signal");
        assert_eq!(value["from_user_id"], "alice");
        assert_eq!(value["signal"], signal);
    }

    #[tokio::test]
    async fn test_signal_is_room_scoped() {
        let (registry, relay) = relay();
        let (bob, mut rx_bob) = ChannelHandle::new(4);
        registry.register("r2", "bob", bob).await;

        let delivery = relay.relay("r1", "alice", "bob", json!({})).await;
        assert_eq!(delivery, Delivery::Dropped(DropReason::TargetNotFound));
        assert!(rx_bob.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failed_signal_prunes_target() {
        let (registry, relay) = relay();
        let (bob, rx_bob) = ChannelHandle::new(4);
        registry.register("r1", "bob", bob).await;
        drop(rx_bob);

        let delivery = relay.relay("r1", "alice", "bob", json!({})).await;
        assert_eq!(
            delivery,
            Delivery::Dropped(DropReason::SendFailed(SendFailure::Closed))
        );
        assert!(registry.lookup("r1", "bob").await.is_none());
    }
}
