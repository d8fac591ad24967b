//! Core domain types

use bytes::Bytes;
use std::fmt;

/// Identity presented to a server at login
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// User name; the wire format keeps the first 8 bytes
    pub username: String,
    /// Opaque login token, usually empty
    pub token: Bytes,
}

impl Credentials {
    /// Credentials with a user name and no token
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            token: Bytes::new(),
        }
    }

    /// Attach a login token
    pub fn with_token(mut self, token: impl Into<Bytes>) -> Self {
        self.token = token.into();
        self
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("token", &format_args!("<{} bytes>", self.token.len()))
            .finish()
    }
}

/// Normalise a server address to `host:port`.
///
/// Accepts `root://host[:port][/path]`, `host` and `host:port`. Bracketed
/// IPv6 literals keep their brackets.
pub fn normalize_addr(addr: &str, default_port: u16) -> String {
    let addr = addr
        .strip_prefix("root://")
        .or_else(|| addr.strip_prefix("xroot://"))
        .unwrap_or(addr);
    let addr = addr.split('/').next().unwrap_or(addr);
    // user@host
    let addr = addr.rsplit_once('@').map_or(addr, |(_, host)| host);

    let has_port = match addr.rfind(']') {
        Some(end) => addr[end..].contains(':'),
        None => addr.contains(':'),
    };
    if has_port {
        addr.to_string()
    } else {
        format!("{}:{}", addr, default_port)
    }
}
