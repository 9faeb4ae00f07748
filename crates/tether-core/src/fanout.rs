//! Room fan-out.
//!
//! An event is encoded once and offered to every live channel in the room
//! independently. Sends run concurrently with the room lock released, each
//! bounded by the send timeout, so one slow peer cannot stall the rest.
//! Channels whose send fails are pruned from the room before the call
//! returns.

use crate::channel::{ChannelHandle, Frame};
use crate::delivery::FanoutReport;
use crate::room::{Rooms, UserId};
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tether_protocol::{codec, ServerEvent};
use tracing::{error, trace, warn};

/// Delivers events to every member of a room.
#[derive(Debug, Clone)]
pub struct BroadcastEngine {
    rooms: Arc<Rooms>,
    send_timeout: Duration,
}

impl BroadcastEngine {
    /// Create an engine over the given rooms.
    #[must_use]
    pub fn new(rooms: Arc<Rooms>, send_timeout: Duration) -> Self {
        Self {
            rooms,
            send_timeout,
        }
    }

    /// Deliver `event` to every channel in the room except `exclude`.
    pub async fn broadcast(
        &self,
        room_id: &str,
        event: &ServerEvent,
        exclude: Option<&str>,
    ) -> FanoutReport {
        match codec::encode(event) {
            Ok(text) => self.broadcast_frame(room_id, Frame::from(text), exclude).await,
            Err(e) => {
                error!(room = %room_id, kind = event.kind(), error = %e, "Failed to encode event");
                FanoutReport::default()
            }
        }
    }

    /// Deliver a pre-encoded frame to every channel in the room except
    /// `exclude`.
    pub async fn broadcast_frame(
        &self,
        room_id: &str,
        frame: Frame,
        exclude: Option<&str>,
    ) -> FanoutReport {
        let Some(room) = self.rooms.get(room_id) else {
            return FanoutReport::default();
        };

        let recipients: Vec<(UserId, ChannelHandle)> = {
            let state = room.lock().await;
            state.connections.snapshot()
        };

        let timeout = self.send_timeout;
        let sends = recipients
            .into_iter()
            .filter(|(user, _)| Some(user.as_str()) != exclude)
            .map(|(user, handle)| {
                let frame = Arc::clone(&frame);
                async move {
                    let result = handle.send(frame, timeout).await;
                    (user, handle.id(), result)
                }
            });
        let results = join_all(sends).await;

        let mut report = FanoutReport::default();
        let mut failed = Vec::new();
        for (user, connection, result) in results {
            match result {
                Ok(()) => report.delivered += 1,
                Err(failure) => {
                    warn!(
                        room = %room_id,
                        user = %user,
                        connection = %connection,
                        error = %failure,
                        "Send failed during fan-out"
                    );
                    report.failed += 1;
                    failed.push((user, connection));
                }
            }
        }

        if !failed.is_empty() {
            let mut state = room.lock().await;
            for (user, connection) in failed {
                if state.connections.deregister_connection(&user, connection) {
                    report.pruned.push(user);
                }
            }
        }

        trace!(
            room = %room_id,
            delivered = report.delivered,
            pruned = report.pruned.len(),
            "Fan-out complete"
        );
        report
    }
}
