//! Delivery outcomes.
//!
//! Delivery in this hub is at-most-once and best-effort. Instead of
//! swallowing failures, every point-to-point send reports a [`Delivery`]
//! and every fan-out reports a [`FanoutReport`].

use crate::channel::SendFailure;
use crate::room::UserId;

/// Why an event was not delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The target has no reachable channel.
    TargetNotFound,
    /// The target's channel rejected the frame; it has been pruned.
    SendFailed(SendFailure),
    /// The event could not be encoded.
    EncodeFailed,
}

impl DropReason {
    /// Short label for logs and metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::TargetNotFound => "target_not_found",
            DropReason::SendFailed(SendFailure::Closed) => "channel_closed",
            DropReason::SendFailed(SendFailure::TimedOut) => "send_timeout",
            DropReason::EncodeFailed => "encode_failed",
        }
    }
}

/// Result of a point-to-point send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    Dropped(DropReason),
}

impl Delivery {
    /// Check whether the event reached the target's queue.
    #[must_use]
    pub fn is_delivered(&self) -> bool {
        matches!(self, Delivery::Delivered)
    }
}

/// Result of a room fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutReport {
    /// Recipients whose queue accepted the frame.
    pub delivered: usize,
    /// Recipients whose send failed.
    pub failed: usize,
    /// Failed recipients that were removed from the room. A failed recipient
    /// already replaced by a newer channel is not pruned.
    pub pruned: Vec<UserId>,
}

impl FanoutReport {
    /// Total recipients attempted.
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.delivered + self.failed
    }
}
