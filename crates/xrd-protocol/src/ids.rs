//! Stream, path and login identifier types

use std::fmt;

/// Identifies one request/response exchange on a server connection.
///
/// Two bytes on the wire. Only unique among the requests currently
/// outstanding against one server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub [u8; 2]);

impl StreamId {
    /// Stream id used by the handshake and by unsolicited notifications
    pub const ZERO: StreamId = StreamId([0, 0]);

    /// Create a stream id from its numeric value
    pub fn new(id: u16) -> Self {
        Self(id.to_be_bytes())
    }

    /// Get the numeric value
    pub fn as_u16(&self) -> u16 {
        u16::from_be_bytes(self.0)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream-{}", self.as_u16())
    }
}

impl From<u16> for StreamId {
    fn from(id: u16) -> Self {
        Self::new(id)
    }
}

/// Identifies a bulk-data side channel bound to a login session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct PathId(pub u8);

impl PathId {
    /// No side channel: data shares the control socket
    pub const CONTROL: PathId = PathId(0);

    /// Whether this id designates the control socket
    pub fn is_control(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for PathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "path-{}", self.0)
    }
}

/// Server-assigned identity of a logged-in session.
///
/// Sub-sessions present it in `bind` to join the same identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LoginId(pub [u8; 16]);

impl fmt::Display for LoginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}
