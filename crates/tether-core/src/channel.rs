//! Outbound channel handles.
//!
//! A [`ChannelHandle`] is the only way the hub writes to a connection. It
//! wraps the sending half of a bounded queue; exactly one writer task owns
//! the receiving half and drains it into the transport, so writes to one
//! connection are never concurrent and always leave in enqueue order.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::SendTimeoutError};

/// An encoded outbound frame, shared between all recipients of a fan-out.
pub type Frame = Arc<str>;

/// Atomic counter for process-unique connection IDs.
static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Identifies one physical connection.
///
/// Two sessions for the same `(room, user)` key always have different IDs,
/// which is what lets a superseded session clean up without evicting its
/// replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next connection ID.
    #[must_use]
    pub fn next() -> Self {
        Self(CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw value.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn_{}", self.0)
    }
}

/// Why a send to a single channel failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendFailure {
    /// The writer side is gone.
    #[error("channel closed")]
    Closed,

    /// The queue stayed full for the whole send timeout.
    #[error("send timed out")]
    TimedOut,
}

/// Cloneable sending half of a connection.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    id: ConnectionId,
    sender: mpsc::Sender<Frame>,
}

impl ChannelHandle {
    /// Create a handle and the receiver its writer task should drain.
    ///
    /// A capacity of zero is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id: ConnectionId::next(),
            sender,
        };
        (handle, receiver)
    }

    /// Get the connection ID.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Check whether the writer side has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Enqueue a frame, waiting at most `timeout` for queue space.
    ///
    /// # Errors
    ///
    /// Returns [`SendFailure::Closed`] if the writer has stopped, or
    /// [`SendFailure::TimedOut`] if the queue stayed full.
    pub async fn send(&self, frame: Frame, timeout: Duration) -> Result<(), SendFailure> {
        match self.sender.send_timeout(frame, timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(SendFailure::TimedOut),
            Err(SendTimeoutError::Closed(_)) => Err(SendFailure::Closed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_ids_are_unique() {
        let (a, _rx_a) = ChannelHandle::new(4);
        let (b, _rx_b) = ChannelHandle::new(4);
        assert_ne!(a.id(), b.id());
        assert!(a.id().to_string().starts_with("conn_"));
    }

    #[tokio::test]
    async fn test_send_preserves_order() {
        let (handle, mut rx) = ChannelHandle::new(8);
        for i in 0..5 {
            handle
                .send(Arc::from(i.to_string()), Duration::from_millis(50))
                .await
                .unwrap();
        }
        for i in 0..5 {
            assert_eq!(&*rx.recv().await.unwrap(), i.to_string());
        }
    }

    #[tokio::test]
    async fn test_send_to_dropped_receiver_fails_closed() {
        let (handle, rx) = ChannelHandle::new(1);
        drop(rx);
        assert!(handle.is_closed());
        let result = handle.send(Arc::from("x"), Duration::from_millis(10)).await;
        assert_eq!(result, Err(SendFailure::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_to_full_queue_times_out() {
        let (handle, _rx) = ChannelHandle::new(1);
        handle
            .send(Arc::from("first"), Duration::from_millis(10))
            .await
            .unwrap();
        let result = handle
            .send(Arc::from("second"), Duration::from_millis(10))
            .await;
        assert_eq!(result, Err(SendFailure::TimedOut));
    }
}
