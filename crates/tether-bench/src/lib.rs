//! Shared fixtures for Tether benchmarks.

use serde_json::json;
use std::io;
use tether_core::{Frame, Hub, PresenceMeta};
use tokio::runtime::{Builder, Runtime};
use tokio::sync::mpsc;

/// Single-threaded runtime for async benchmarks.
///
/// # Errors
///
/// Returns an error if the runtime cannot be built.
pub fn runtime() -> io::Result<Runtime> {
    Builder::new_current_thread().enable_all().build()
}

/// Join `members` users to a room, returning their outbound receivers.
pub async fn populate_room(hub: &Hub, room_id: &str, members: usize) -> Vec<mpsc::Receiver<Frame>> {
    let mut receivers = Vec::with_capacity(members);
    for i in 0..members {
        let (handle, rx) = hub.open_channel();
        let user = format!("user-{i}");
        hub.join(room_id, &user, handle, PresenceMeta::new(user.clone(), None))
            .await;
        receivers.push(rx);
    }
    receivers
}

/// Empty every receiver, returning how many frames were waiting.
pub fn drain(receivers: &mut [mpsc::Receiver<Frame>]) -> usize {
    let mut count = 0;
    for rx in receivers {
        while rx.try_recv().is_ok() {
            count += 1;
        }
    }
    count
}

/// A chat frame with `len` bytes of content.
#[must_use]
pub fn chat_frame(len: usize) -> String {
    json!({"type": "message", "content": "x".repeat(len)}).to_string()
}
