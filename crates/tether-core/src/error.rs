//! Transport-level errors.

use thiserror::Error;

/// A failure on the transport underneath a session.
///
/// Any of these ends the session's read loop and triggers teardown.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer closed the connection.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// The peer violated the framing protocol.
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
