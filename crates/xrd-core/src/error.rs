//! Core error types for xrdmux

use std::path::PathBuf;

use thiserror::Error;
use xrd_protocol::{ProtocolError, ServerError};

/// Errors surfaced by a session and its requests
#[derive(Error, Debug)]
pub enum SessionError {
    /// Socket-level failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection failed while requests were outstanding
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Malformed frame or payload
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The server answered with an error status
    #[error("Server error [{code}]: {message}")]
    Server { code: i32, message: String },

    /// Every stream id is claimed
    #[error("No free stream ids")]
    StreamsExhausted,

    /// The sub-session pool is at capacity
    #[error("Sub-session pool exhausted")]
    PoolExhausted,

    /// The session has been closed
    #[error("Session closed")]
    Closed,

    /// The caller abandoned the wait
    #[error("Request cancelled")]
    Cancelled,

    /// The operation did not complete in time
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The server's handshake reply was unusable
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Authentication was required but could not be performed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Request signing failed
    #[error("Signing failed: {0}")]
    Signing(String),

    /// A request was bound to a data path with no live sub-session
    #[error("Unknown data path: {0}")]
    UnknownPath(u8),

    /// One or more components failed to shut down
    #[error("Close failed: {}", .0.join("; "))]
    Close(Vec<String>),
}

impl From<ServerError> for SessionError {
    fn from(err: ServerError) -> Self {
        Self::Server {
            code: err.code,
            message: err.message,
        }
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
