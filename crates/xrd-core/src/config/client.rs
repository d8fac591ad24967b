//! Client session configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::duration_secs;

/// Default port of a storage server
pub const DEFAULT_PORT: u16 = 1094;

/// Configuration for a client session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// User name sent at login
    pub username: String,

    /// Upper bound on concurrently live data-path sub-sessions
    pub max_subsessions: usize,

    /// Number of stream ids available for outstanding requests
    pub max_streams: u16,

    /// Bound on dial, handshake, login, auth and protocol negotiation
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Port used when an address does not carry one
    pub default_port: u16,

    /// Protocol version announced during negotiation
    pub protocol_version: i32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            username: whoami::username(),
            max_subsessions: 8,
            max_streams: 1024,
            connect_timeout: Duration::from_secs(30),
            default_port: DEFAULT_PORT,
            protocol_version: xrd_protocol::request::CLIENT_PROTOCOL_VERSION,
        }
    }
}
