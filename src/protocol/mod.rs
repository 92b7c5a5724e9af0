//! SockJS wire protocol: frame encoding/decoding.
//!
//! The protocol multiplexes a bidirectional message stream over otherwise
//! stateless HTTP request/response cycles (or a WebSocket). Every transport
//! in [`crate::transport`] ultimately produces and consumes the four frame
//! shapes defined here.

pub mod codec;

pub use codec::{
    close_frame, decode_messages, encode_messages, heartbeat_frame, message_frame, open_frame,
};
