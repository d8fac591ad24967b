//! Response types and status-payload parsers

use std::fmt;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};

use crate::codec::ResponseFrame;
use crate::error::ProtocolError;
use crate::frame::{ResponseHeader, ResponseStatus, RESPONSE_HEADER_SIZE};
use crate::ids::{LoginId, PathId};
use crate::signing::{SecurityLevel, SecurityOverride, SigningLevel};

/// Decoder for the accumulated payload of a successful exchange
pub trait Response: Sized + Send {
    /// Decode from the concatenated payload bytes
    fn decode(payload: Bytes) -> Result<Self, ProtocolError>;
}

impl Response for () {
    fn decode(_payload: Bytes) -> Result<Self, ProtocolError> {
        Ok(())
    }
}

impl Response for Bytes {
    fn decode(payload: Bytes) -> Result<Self, ProtocolError> {
        Ok(payload)
    }
}

fn text(raw: &[u8], field: &'static str) -> Result<String, ProtocolError> {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    std::str::from_utf8(&raw[..end])
        .map(str::to_string)
        .map_err(|_| ProtocolError::InvalidUtf8 { field })
}

fn ensure(payload: &[u8], expected: usize) -> Result<(), ProtocolError> {
    if payload.len() < expected {
        return Err(ProtocolError::truncated(expected, payload.len()));
    }
    Ok(())
}

/// Reply to a login
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginResponse {
    /// Server-assigned login identity
    pub login_id: LoginId,
    /// Security information; empty when no authentication is required
    pub security_info: Bytes,
}

impl LoginResponse {
    /// Security protocols offered by the server, in preference order.
    ///
    /// Security information is a sequence of `&P=<name>[,<params>]` entries.
    pub fn security_protocols(&self) -> Vec<String> {
        let info = String::from_utf8_lossy(&self.security_info);
        info.split("&P=")
            .skip(1)
            .filter_map(|entry| {
                let name = entry.split(',').next()?.trim_end_matches('\0').trim();
                (!name.is_empty()).then(|| name.to_string())
            })
            .collect()
    }
}

impl Response for LoginResponse {
    fn decode(mut payload: Bytes) -> Result<Self, ProtocolError> {
        ensure(&payload, 16)?;
        let mut raw = [0u8; 16];
        payload.copy_to_slice(&mut raw);
        Ok(Self {
            login_id: LoginId(raw),
            security_info: payload,
        })
    }
}

/// Reply to protocol negotiation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolResponse {
    /// Server protocol version
    pub version: i32,
    /// Server flags
    pub flags: u32,
    /// Negotiated signing level
    pub security_level: SecurityLevel,
    /// Per-request adjustments to the signing level
    pub security_overrides: Vec<SecurityOverride>,
}

impl Response for ProtocolResponse {
    fn decode(mut payload: Bytes) -> Result<Self, ProtocolError> {
        ensure(&payload, 8)?;
        let version = payload.get_i32();
        let flags = payload.get_u32();

        let mut security_level = SecurityLevel::None;
        let mut security_overrides = Vec::new();

        // 'S' | reserved | secver | secopt | seclvl | secvsz | secvsz * (index, level)
        if payload.len() >= 6 && payload[0] == b'S' {
            payload.advance(4);
            let raw_level = payload.get_u8();
            security_level = SecurityLevel::from_u8(raw_level)
                .ok_or(ProtocolError::UnknownSecurityLevel(raw_level))?;
            let count = payload.get_u8() as usize;
            ensure(&payload, count * 2)?;
            for _ in 0..count {
                let request_index = payload.get_u8();
                let raw = payload.get_u8();
                let level = SigningLevel::from_u8(raw)
                    .ok_or(ProtocolError::UnknownSecurityLevel(raw))?;
                security_overrides.push(SecurityOverride {
                    request_index,
                    level,
                });
            }
        }

        Ok(Self {
            version,
            flags,
            security_level,
            security_overrides,
        })
    }
}

/// Reply to bind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindResponse {
    /// Data path assigned by the server
    pub path_id: PathId,
}

impl Response for BindResponse {
    fn decode(payload: Bytes) -> Result<Self, ProtocolError> {
        ensure(&payload, 1)?;
        Ok(Self {
            path_id: PathId(payload[0]),
        })
    }
}

/// Structured error carried by an `Error` status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    /// Server error code
    pub code: i32,
    /// Human-readable message
    pub message: String,
}

impl ServerError {
    /// Decode from an `Error` payload: `code i32 | message\0`
    pub fn decode(mut payload: Bytes) -> Result<Self, ProtocolError> {
        ensure(&payload, 4)?;
        let code = payload.get_i32();
        let message = text(&payload, "error message")?;
        Ok(Self { code, message })
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// Instruction to reissue a request against another server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirection {
    /// Target host
    pub host: String,
    /// Target port
    pub port: i32,
    /// Opaque data to append to the reissued request's path
    pub opaque: Option<String>,
}

impl Redirection {
    /// Redirection straight to an address, without opaque data
    pub fn to_addr(addr: &str) -> Self {
        if let Some((host, port)) = addr.rsplit_once(':') {
            if let Ok(port) = port.parse() {
                return Self {
                    host: host.to_string(),
                    port,
                    opaque: None,
                };
            }
        }
        Self {
            host: addr.to_string(),
            port: 0,
            opaque: None,
        }
    }

    /// `host:port` of the target
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Decode from a `Redirect` payload: `port i32 | host[?opaque]`
    pub fn decode(mut payload: Bytes) -> Result<Self, ProtocolError> {
        ensure(&payload, 4)?;
        let port = payload.get_i32();
        let target = text(&payload, "redirect target")?;
        let (host, opaque) = match target.split_once('?') {
            Some((host, opaque)) => (host.to_string(), Some(opaque.to_string())),
            None => (target, None),
        };
        Ok(Self { host, port, opaque })
    }
}

impl fmt::Display for Redirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Delay carried by `Wait` and `WaitResp` statuses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitResponse {
    /// How long to wait before reissuing
    pub delay: Duration,
    /// Optional server message
    pub message: String,
}

impl WaitResponse {
    /// Decode from a `Wait`/`WaitResp` payload: `seconds i32 | message`
    pub fn decode(mut payload: Bytes) -> Result<Self, ProtocolError> {
        ensure(&payload, 4)?;
        let seconds = payload.get_i32();
        if seconds < 0 {
            return Err(ProtocolError::InvalidLength(seconds));
        }
        let message = text(&payload, "wait message")?;
        Ok(Self {
            delay: Duration::from_secs(seconds as u64),
            message,
        })
    }
}

/// Action code of an asynchronous notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttnAction {
    /// Client should abort
    Abort,
    /// Client should disconnect
    Disconnect,
    /// Informational message
    Message(String),
    /// Client should reconnect
    Reconnect,
    /// Client should hold off sending
    HoldOff,
    /// Server available again
    Available,
    /// Server unavailable
    Unavailable,
    /// Client may resume
    Go,
    /// Deferred response to an earlier request
    AsyncResponse(ResponseFrame),
}

impl AttnAction {
    /// Wire code of the action
    pub fn code(&self) -> i32 {
        match self {
            Self::Abort => 5000,
            Self::Disconnect => 5001,
            Self::Message(_) => 5002,
            Self::Reconnect => 5003,
            Self::HoldOff => 5004,
            Self::Available => 5005,
            Self::Unavailable => 5006,
            Self::Go => 5007,
            Self::AsyncResponse(_) => 5008,
        }
    }
}

/// Payload of an `Attn` status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttnResponse {
    /// Requested action
    pub action: AttnAction,
}

impl AttnResponse {
    /// Decode from an `Attn` payload: `action i32 | action-specific data`.
    ///
    /// An async response carries 4 reserved bytes followed by a complete
    /// embedded response frame.
    pub fn decode(mut payload: Bytes) -> Result<Self, ProtocolError> {
        ensure(&payload, 4)?;
        let code = payload.get_i32();
        let action = match code {
            5000 => AttnAction::Abort,
            5001 => AttnAction::Disconnect,
            5002 => AttnAction::Message(text(&payload, "attn message")?),
            5003 => AttnAction::Reconnect,
            5004 => AttnAction::HoldOff,
            5005 => AttnAction::Available,
            5006 => AttnAction::Unavailable,
            5007 => AttnAction::Go,
            5008 => {
                ensure(&payload, 4 + RESPONSE_HEADER_SIZE)?;
                payload.advance(4);
                let mut head = BytesMut::from(&payload.split_to(RESPONSE_HEADER_SIZE)[..]);
                let header = ResponseHeader::decode(&mut head)?
                    .ok_or_else(|| ProtocolError::truncated(RESPONSE_HEADER_SIZE, head.len()))?;
                // One level of embedding only
                if header.status == ResponseStatus::Attn {
                    return Err(ProtocolError::NestedAsyncResponse(header.stream_id));
                }
                let len = header.payload_length as usize;
                ensure(&payload, len)?;
                AttnAction::AsyncResponse(ResponseFrame::new(
                    header.stream_id,
                    header.status,
                    payload.split_to(len),
                ))
            }
            other => return Err(ProtocolError::UnknownAttnAction(other)),
        };
        Ok(Self { action })
    }

    /// Encode an async response notification wrapping `frame`
    pub fn encode_async_response(frame: &ResponseFrame) -> Bytes {
        let mut out = BytesMut::new();
        out.extend_from_slice(&5008i32.to_be_bytes());
        out.extend_from_slice(&[0u8; 4]);
        frame.encode(&mut out);
        out.freeze()
    }
}
