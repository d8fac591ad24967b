//! Request signing policy and the `sigver` envelope
//!
//! During protocol negotiation the server announces a security level and
//! optional per-request overrides. Requests that the resulting policy marks
//! as needing a signature are preceded, in the same write, by a `sigver`
//! request carrying a sequence number and a SHA-256 digest of
//! `seqno || request bytes`.

use std::collections::HashMap;

use bytes::{BufMut, BytesMut};
use sha2::{Digest, Sha256};

use crate::frame::{REQUEST_HEADER_SIZE, REQUEST_PARAMS_SIZE};
use crate::ids::StreamId;
use crate::request::{RequestId, RequestKind};

/// Security level negotiated with the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[repr(u8)]
pub enum SecurityLevel {
    /// Nothing is signed
    #[default]
    None = 0,
    /// Destructive namespace operations are signed
    Compatible = 1,
    /// Plus session-state changes
    Standard = 2,
    /// Plus data modification
    Intense = 3,
    /// Every request is signed
    Pedantic = 4,
}

impl SecurityLevel {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::Compatible),
            2 => Some(Self::Standard),
            3 => Some(Self::Intense),
            4 => Some(Self::Pedantic),
            _ => None,
        }
    }
}

/// Signing requirement for a single request kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SigningLevel {
    /// Never signed
    Never = 0,
    /// Signed when the request modifies server state
    Likely = 1,
    /// Always signed
    Always = 2,
}

impl SigningLevel {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Never),
            1 => Some(Self::Likely),
            2 => Some(Self::Always),
            _ => None,
        }
    }
}

/// Server-supplied adjustment for one request kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityOverride {
    /// Request id minus [`RequestId::BASE`]
    pub request_index: u8,
    /// Requirement for that request
    pub level: SigningLevel,
}

const COMPATIBLE: &[(RequestId, SigningLevel)] = &[
    (RequestId::CHMOD, SigningLevel::Always),
    (RequestId::MKDIR, SigningLevel::Always),
    (RequestId::MV, SigningLevel::Always),
    (RequestId::RM, SigningLevel::Always),
    (RequestId::RMDIR, SigningLevel::Always),
    (RequestId::TRUNCATE, SigningLevel::Always),
    (RequestId::OPEN, SigningLevel::Likely),
];

const STANDARD: &[(RequestId, SigningLevel)] = &[
    (RequestId::CLOSE, SigningLevel::Always),
    (RequestId::SET, SigningLevel::Always),
    (RequestId::PREPARE, SigningLevel::Always),
    (RequestId::QUERY, SigningLevel::Likely),
];

const INTENSE: &[(RequestId, SigningLevel)] = &[
    (RequestId::OPEN, SigningLevel::Always),
    (RequestId::WRITE, SigningLevel::Always),
    (RequestId::WRITEV, SigningLevel::Always),
    (RequestId::SYNC, SigningLevel::Always),
    (RequestId::QUERY, SigningLevel::Always),
];

const PEDANTIC: &[(RequestId, SigningLevel)] = &[
    (RequestId::DIRLIST, SigningLevel::Always),
    (RequestId::LOCATE, SigningLevel::Always),
    (RequestId::PING, SigningLevel::Always),
    (RequestId::READ, SigningLevel::Always),
    (RequestId::READV, SigningLevel::Always),
    (RequestId::STAT, SigningLevel::Always),
    (RequestId::ENDSESS, SigningLevel::Always),
];

/// Which requests must be signed on a session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SigningRequirements {
    levels: HashMap<RequestId, SigningLevel>,
}

impl SigningRequirements {
    /// Build the policy for a negotiated level and its overrides
    pub fn new(level: SecurityLevel, overrides: &[SecurityOverride]) -> Self {
        let mut levels = HashMap::new();
        if level == SecurityLevel::None {
            return Self { levels };
        }

        let tiers = [
            (SecurityLevel::Compatible, COMPATIBLE),
            (SecurityLevel::Standard, STANDARD),
            (SecurityLevel::Intense, INTENSE),
            (SecurityLevel::Pedantic, PEDANTIC),
        ];
        for (tier, entries) in tiers {
            if level >= tier {
                levels.extend(entries.iter().copied());
            }
        }

        for o in overrides {
            let id = RequestId(RequestId::BASE + o.request_index as u16);
            levels.insert(id, o.level);
        }

        Self { levels }
    }

    /// Whether a request of this kind must be signed
    pub fn needed(&self, kind: RequestKind) -> bool {
        match self.levels.get(&kind.id) {
            None | Some(SigningLevel::Never) => false,
            Some(SigningLevel::Likely) => kind.modifies,
            Some(SigningLevel::Always) => true,
        }
    }

    /// Whether nothing is ever signed
    pub fn is_empty(&self) -> bool {
        self.levels
            .values()
            .all(|level| *level == SigningLevel::Never)
    }
}

/// `sigver` envelope version
pub const SIGVER_VERSION: u8 = 0;

/// Digest algorithm marker: SHA-256
pub const SIGVER_SHA256: u8 = 0x01;

/// Flag: the request body was not covered by the digest
pub const SIGVER_NODATA: u8 = 0x01;

/// Size of the digest carried by a `sigver` request
pub const DIGEST_SIZE: usize = 32;

/// SHA-256 over `seqno || payload`
pub fn digest(seqno: u64, payload: &[u8]) -> [u8; DIGEST_SIZE] {
    let mut hasher = Sha256::new();
    hasher.update(seqno.to_be_bytes());
    hasher.update(payload);
    hasher.finalize().into()
}

/// Wrap an encoded request in a `sigver` envelope.
///
/// `payload` is the complete encoded request (header and any inline body).
/// `detached_body` is set when the body travels on a data path and is
/// therefore not covered by the digest.
pub fn envelope(
    stream_id: StreamId,
    expected: RequestId,
    seqno: u64,
    payload: &[u8],
    detached_body: bool,
) -> BytesMut {
    let digest = digest(seqno, payload);
    let mut out = BytesMut::with_capacity(REQUEST_HEADER_SIZE + DIGEST_SIZE + payload.len());

    out.put_slice(&stream_id.0);
    out.put_u16(RequestId::SIGVER.0);

    let mut params = [0u8; REQUEST_PARAMS_SIZE];
    {
        let mut buf = &mut params[..];
        buf.put_u16(expected.0);
        buf.put_u8(SIGVER_VERSION);
        buf.put_u8(if detached_body { SIGVER_NODATA } else { 0 });
        buf.put_u64(seqno);
        buf.put_u8(SIGVER_SHA256);
    }
    out.put_slice(&params);
    out.put_i32(DIGEST_SIZE as i32);
    out.put_slice(&digest);

    out.put_slice(payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(id: RequestId, modifies: bool) -> RequestKind {
        RequestKind { id, modifies }
    }

    #[test]
    fn test_none_signs_nothing() {
        let reqs = SigningRequirements::new(SecurityLevel::None, &[]);
        assert!(reqs.is_empty());
        assert!(!reqs.needed(kind(RequestId::RM, true)));
    }

    #[test]
    fn test_levels_are_cumulative() {
        let compatible = SigningRequirements::new(SecurityLevel::Compatible, &[]);
        assert!(compatible.needed(kind(RequestId::RM, false)));
        assert!(!compatible.needed(kind(RequestId::WRITE, true)));

        let intense = SigningRequirements::new(SecurityLevel::Intense, &[]);
        assert!(intense.needed(kind(RequestId::RM, false)));
        assert!(intense.needed(kind(RequestId::WRITE, true)));
        assert!(!intense.needed(kind(RequestId::PING, false)));

        let pedantic = SigningRequirements::new(SecurityLevel::Pedantic, &[]);
        assert!(pedantic.needed(kind(RequestId::PING, false)));
    }

    #[test]
    fn test_likely_depends_on_modification() {
        let reqs = SigningRequirements::new(SecurityLevel::Compatible, &[]);
        assert!(reqs.needed(kind(RequestId::OPEN, true)));
        assert!(!reqs.needed(kind(RequestId::OPEN, false)));
    }

    #[test]
    fn test_overrides_win() {
        let overrides = [
            SecurityOverride {
                request_index: 11,
                level: SigningLevel::Never,
            },
            SecurityOverride {
                request_index: 17,
                level: SigningLevel::Always,
            },
        ];
        let reqs = SigningRequirements::new(SecurityLevel::Pedantic, &overrides);
        assert!(!reqs.needed(kind(RequestId::PING, false)));

        let reqs = SigningRequirements::new(SecurityLevel::Compatible, &overrides);
        assert!(reqs.needed(kind(RequestId::STAT, false)));
    }

    #[test]
    fn test_envelope_layout() {
        let payload = b"original request";
        let out = envelope(StreamId::new(5), RequestId::PING, 7, payload, false);

        assert_eq!(&out[..2], &[0, 5]);
        assert_eq!(u16::from_be_bytes([out[2], out[3]]), RequestId::SIGVER.0);
        assert_eq!(u16::from_be_bytes([out[4], out[5]]), RequestId::PING.0);
        assert_eq!(out[7], 0);
        assert_eq!(&out[8..16], &7u64.to_be_bytes());
        assert_eq!(out[16], SIGVER_SHA256);
        assert_eq!(&out[20..24], &(DIGEST_SIZE as i32).to_be_bytes());
        assert_eq!(&out[24..24 + DIGEST_SIZE], &digest(7, payload));
        assert_eq!(&out[24 + DIGEST_SIZE..], payload);
    }

    #[test]
    fn test_digest_depends_on_seqno() {
        assert_ne!(digest(1, b"x"), digest(2, b"x"));
    }
}
