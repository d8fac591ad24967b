//! Protocol error types

use thiserror::Error;

use crate::ids::StreamId;

/// Errors that can occur while framing or parsing protocol messages
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Response header carried a status code outside the known set
    #[error("Unknown response status: {0}")]
    UnknownStatus(u16),

    /// Negative or otherwise unusable length field
    #[error("Invalid payload length: {0}")]
    InvalidLength(i32),

    /// Payload exceeds maximum size
    #[error("Payload too large: {size} bytes exceeds maximum of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    /// Message body shorter than its fixed layout requires
    #[error("Truncated message: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// Handshake reply did not match the expected layout
    #[error("Invalid handshake: {0}")]
    InvalidHandshake(String),

    /// Asynchronous notification with an unknown action code
    #[error("Unknown attn action: {0}")]
    UnknownAttnAction(i32),

    /// Async response whose embedded frame is itself an `Attn`; carries the
    /// stream the embedded frame named
    #[error("Nested async response on stream {0}")]
    NestedAsyncResponse(StreamId),

    /// Security level outside the negotiated range
    #[error("Unknown security level: {0}")]
    UnknownSecurityLevel(u8),

    /// Text field was not valid UTF-8
    #[error("Invalid UTF-8 in {field}")]
    InvalidUtf8 { field: &'static str },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Build a truncation error for a body that needed `expected` bytes
    pub fn truncated(expected: usize, actual: usize) -> Self {
        Self::Truncated { expected, actual }
    }
}
