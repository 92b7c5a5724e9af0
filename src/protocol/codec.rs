//! Frame encode/decode for the SockJS wire protocol.
//!
//! Four frame kinds travel on the wire, one ASCII prefix character each:
//!
//! | Prefix | Name | Payload |
//! |--------|------|---------|
//! | `o` | open | none |
//! | `h` | heartbeat | none |
//! | `a` | message batch | JSON array of opaque values |
//! | `c` | close | `[code, "reason"]` |
//!
//! Encoding never emits whitespace (SockJS clients parse frames byte for
//! byte); decoding requires the payload to start with `[` after leading
//! whitespace is stripped.

use serde_json::Value;

use crate::error::{Result, SockJsError};

/// JSON-encode a sequence of messages with compact (no-space) separators,
/// matching what SockJS clients expect inside an `a` frame.
pub fn encode_messages(messages: &[Value]) -> String {
    serde_json::to_string(messages).expect("Value slice is always serializable")
}

/// Parse a SockJS message batch: the first non-whitespace byte must be `[`.
///
/// Used both to validate `POST` bodies on writing-only transports and to
/// decode data frames received over a WebSocket connection.
pub fn decode_messages(data: &str) -> Result<Vec<Value>> {
    let trimmed = data.trim_start();

    if !trimmed.starts_with('[') {
        return Err(SockJsError::InvalidPayload(
            "payload must be a JSON array".to_string(),
        ));
    }

    serde_json::from_str(trimmed).map_err(|e| SockJsError::InvalidPayload(e.to_string()))
}

/// The `o\n` open frame.
pub fn open_frame() -> String {
    "o\n".to_string()
}

/// The `h\n` heartbeat frame.
pub fn heartbeat_frame() -> String {
    "h\n".to_string()
}

/// An `a[...]` message-batch frame carrying one or more messages.
pub fn message_frame(messages: &[Value]) -> String {
    format!("a{}", encode_messages(messages))
}

/// A `c[code,"reason"]` close frame.
pub fn close_frame(code: u16, reason: &str) -> String {
    format!("c[{},{}]", code, serde_json::to_string(reason).unwrap())
}
