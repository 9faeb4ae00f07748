//! Codec for decoding client frames and encoding server events.
//!
//! Frames are UTF-8 JSON objects. Decoding is two-staged: the `type` tag is
//! read from the raw object first, then the matching payload is extracted so
//! that a missing field produces an error naming that field.

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::events::{ClientEvent, ServerEvent};

/// Maximum inbound frame size (64 KiB).
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Frame is not valid JSON, or a field is missing or mistyped.
    #[error("Invalid message format: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame is valid JSON but not an object.
    #[error("Invalid message format: expected a JSON object")]
    NotAnObject,
}

/// Decode a client frame.
///
/// # Errors
///
/// Returns an error if the frame is too large, not a JSON object, or lacks a
/// field required by its `type`.
pub fn decode(text: &str) -> Result<ClientEvent, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }

    let value: Value = serde_json::from_str(text)?;
    let Value::Object(map) = &value else {
        return Err(ProtocolError::NotAnObject);
    };

    let tag = map.get("type").and_then(Value::as_str).map(str::to_owned);
    let has_content = map.contains_key("content");

    let event = match tag.as_deref() {
        Some("keep_alive") => ClientEvent::KeepAlive,
        Some("typing_start") => ClientEvent::TypingStart,
        Some("typing_stop") => ClientEvent::TypingStop,
        Some("profile_updated") => ClientEvent::ProfileUpdated(payload(value)?),
        Some("avatar_updated") => ClientEvent::AvatarUpdated(payload(value)?),
        Some("webrtc-signal") => ClientEvent::WebrtcSignal(payload(value)?),
        Some("broadcast-started") => ClientEvent::BroadcastStarted(payload(value)?),
        Some("broadcast-stopped") => ClientEvent::BroadcastStopped(payload(value)?),
        Some("dm_message") => ClientEvent::DmMessage(payload(value)?),
        Some("dm_read") => ClientEvent::DmRead(payload(value)?),
        Some("dm_typing") => ClientEvent::DmTyping(payload(value)?),
        Some("message") | None => ClientEvent::Chat(payload(value)?),
        Some(_) if has_content => ClientEvent::Chat(payload(value)?),
        Some(other) => ClientEvent::Unknown(other.to_owned()),
    };

    Ok(event)
}

fn payload<T: DeserializeOwned>(value: Value) -> Result<T, ProtocolError> {
    Ok(serde_json::from_value(value)?)
}

/// Encode a server event to a JSON text frame.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(event: &ServerEvent) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(event)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ChatPayload;
    use serde_json::json;

    #[test]
    fn test_decode_known_tags() {
        assert_eq!(
            decode(r#"{"type":"keep_alive","timestamp":1}"#).unwrap(),
            ClientEvent::KeepAlive
        );
        assert_eq!(
            decode(r#"{"type":"typing_stop"}"#).unwrap(),
            ClientEvent::TypingStop
        );

        match decode(r#"{"type":"dm_typing","receiver_id":"bob","is_typing":true}"#).unwrap() {
            ClientEvent::DmTyping(p) => {
                assert_eq!(p.receiver_id, "bob");
                assert!(p.is_typing);
            }
            other => panic!("Expected DmTyping, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_signal_keeps_payload_opaque() {
        let frame = json!({
            "type": "webrtc-signal",
            "target_user_id": "alice",
            "signal": {"sdp": "x", "candidates": [1, 2, {"nested": null}]}
        });
        match decode(&frame.to_string()).unwrap() {
            ClientEvent::WebrtcSignal(p) => {
                assert_eq!(p.target_user_id, "alice");
                assert_eq!(p.signal, frame["signal"]);
            }
            other => panic!("Expected WebrtcSignal, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_missing_field_names_it() {
        let err = decode(r#"{"type":"webrtc-signal","signal":{}}"#).unwrap_err();
        assert!(err.to_string().contains("target_user_id"), "{}", err);

        let err = decode(r#"{"type":"dm_message","receiver_id":"bob"}"#).unwrap_err();
        assert!(err.to_string().contains("content"), "{}", err);
    }

    #[test]
    fn test_decode_chat_fallbacks() {
        let expected = ClientEvent::Chat(ChatPayload {
            content: "hello".into(),
            username: None,
            avatar: None,
        });
        assert_eq!(decode(r#"{"content":"hello"}"#).unwrap(), expected);
        assert_eq!(
            decode(r#"{"type":"message","content":"hello"}"#).unwrap(),
            expected
        );
        assert_eq!(
            decode(r#"{"type":"shout","content":"hello"}"#).unwrap(),
            expected
        );
    }

    #[test]
    fn test_decode_unknown_without_content_is_ignorable() {
        assert_eq!(
            decode(r#"{"type":"pong"}"#).unwrap(),
            ClientEvent::Unknown("pong".into())
        );
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(decode("not json"), Err(ProtocolError::Json(_))));
        assert!(matches!(decode("[1,2,3]"), Err(ProtocolError::NotAnObject)));
        assert!(matches!(decode("{}"), Err(ProtocolError::Json(_))));
    }

    #[test]
    fn test_frame_too_large() {
        let content = "a".repeat(MAX_FRAME_SIZE);
        let frame = json!({ "content": content }).to_string();

        match decode(&frame) {
            Err(ProtocolError::FrameTooLarge(_)) => {}
            other => panic!("Expected FrameTooLarge error, got {:?}", other),
        }
    }

    #[test]
    fn test_encode_error_event() {
        let text = encode(&ServerEvent::error("Invalid message format")).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, json!({"type": "error", "message": "Invalid message format"}));
    }
}
