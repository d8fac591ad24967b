//! Initial connection handshake
//!
//! The client opens every connection with a fixed 20-byte greeting. The
//! server answers with an ordinary response header on stream zero followed
//! by its protocol version and server type.

use bytes::Buf;

use crate::error::ProtocolError;

/// Size of the client greeting in bytes
pub const HANDSHAKE_SIZE: usize = 20;

/// Size of the server's handshake reply payload
pub const HANDSHAKE_REPLY_SIZE: usize = 8;

const HANDSHAKE: [u8; HANDSHAKE_SIZE] = [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 4, 0, 0, 7, 220];

/// The client greeting
pub fn handshake_bytes() -> [u8; HANDSHAKE_SIZE] {
    HANDSHAKE
}

/// Whether `bytes` is a well-formed client greeting
pub fn is_handshake(bytes: &[u8]) -> bool {
    bytes == HANDSHAKE
}

/// Role announced by the server in its handshake reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerType {
    /// Redirector / load balancer
    LoadBalancer,
    /// Data server
    DataServer,
}

impl ServerType {
    fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::LoadBalancer),
            1 => Some(Self::DataServer),
            _ => None,
        }
    }

    /// Wire value
    pub fn as_i32(&self) -> i32 {
        match self {
            Self::LoadBalancer => 0,
            Self::DataServer => 1,
        }
    }
}

/// Server reply to the greeting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeReply {
    /// Server protocol version
    pub protocol_version: i32,
    /// Server role
    pub server_type: ServerType,
}

impl HandshakeReply {
    /// Decode the reply payload
    pub fn decode(mut payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() < HANDSHAKE_REPLY_SIZE {
            return Err(ProtocolError::truncated(HANDSHAKE_REPLY_SIZE, payload.len()));
        }
        let protocol_version = payload.get_i32();
        let raw_type = payload.get_i32();
        let server_type = ServerType::from_i32(raw_type)
            .ok_or_else(|| ProtocolError::InvalidHandshake(format!("server type {}", raw_type)))?;
        Ok(Self {
            protocol_version,
            server_type,
        })
    }

    /// Encode the reply payload
    pub fn encode(&self) -> [u8; HANDSHAKE_REPLY_SIZE] {
        let mut out = [0u8; HANDSHAKE_REPLY_SIZE];
        out[..4].copy_from_slice(&self.protocol_version.to_be_bytes());
        out[4..].copy_from_slice(&self.server_type.as_i32().to_be_bytes());
        out
    }
}
