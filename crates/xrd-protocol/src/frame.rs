//! Request and response header encoding/decoding
//!
//! Response header (8 bytes, big-endian):
//! - stream_id: 2 bytes
//! - status: 2 bytes (u16)
//! - payload_length: 4 bytes (i32)
//!
//! Request header (24 bytes, big-endian):
//! - stream_id: 2 bytes
//! - request_id: 2 bytes (u16)
//! - params: 16 bytes, layout owned by the request type
//! - payload_length: 4 bytes (i32)

use bytes::{Buf, BufMut, BytesMut};

use crate::error::ProtocolError;
use crate::ids::StreamId;
use crate::request::RequestId;

/// Size of the response header in bytes
pub const RESPONSE_HEADER_SIZE: usize = 8;

/// Size of the request header in bytes
pub const REQUEST_HEADER_SIZE: usize = 24;

/// Size of the per-request parameter block inside the request header
pub const REQUEST_PARAMS_SIZE: usize = 16;

/// Maximum payload size accepted in either direction (256MB)
pub const MAX_PAYLOAD_SIZE: usize = 0x1000_0000;

/// Status carried by every response frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ResponseStatus {
    /// Final (or only) part of the response
    Ok = 0,
    /// Partial response, more frames follow on the same stream
    OkSoFar = 4000,
    /// Asynchronous notification
    Attn = 4001,
    /// Request failed; payload carries code and message
    Error = 4003,
    /// Reissue the request against another server
    Redirect = 4004,
    /// Reissue the same request after a delay
    Wait = 4005,
    /// Response will arrive later; retry once after a delay
    WaitResp = 4006,
}

impl ResponseStatus {
    /// Convert to u16
    pub fn as_u16(&self) -> u16 {
        *self as u16
    }

    /// Convert from u16
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::Ok),
            4000 => Some(Self::OkSoFar),
            4001 => Some(Self::Attn),
            4003 => Some(Self::Error),
            4004 => Some(Self::Redirect),
            4005 => Some(Self::Wait),
            4006 => Some(Self::WaitResp),
            _ => None,
        }
    }
}

fn checked_length(raw: i32) -> Result<u32, ProtocolError> {
    if raw < 0 {
        return Err(ProtocolError::InvalidLength(raw));
    }
    let len = raw as usize;
    if len > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge {
            size: len,
            max: MAX_PAYLOAD_SIZE,
        });
    }
    Ok(raw as u32)
}

/// Header preceding every response payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    /// Stream the response belongs to
    pub stream_id: StreamId,
    /// Status of this frame
    pub status: ResponseStatus,
    /// Length of the payload in bytes
    pub payload_length: u32,
}

impl ResponseHeader {
    /// Create a new response header
    pub fn new(stream_id: StreamId, status: ResponseStatus, payload_length: u32) -> Self {
        Self {
            stream_id,
            status,
            payload_length,
        }
    }

    /// Encode the header into a byte buffer
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(RESPONSE_HEADER_SIZE);
        dst.put_slice(&self.stream_id.0);
        dst.put_u16(self.status.as_u16());
        dst.put_i32(self.payload_length as i32);
    }

    /// Decode a header from a byte buffer
    ///
    /// Returns None if there aren't enough bytes in the buffer.
    /// Returns Err if the status is unknown or the length is unusable;
    /// nothing is consumed in that case.
    pub fn decode(src: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if src.len() < RESPONSE_HEADER_SIZE {
            return Ok(None);
        }

        // Validate before consuming
        let code = u16::from_be_bytes([src[2], src[3]]);
        let status = ResponseStatus::from_u16(code).ok_or(ProtocolError::UnknownStatus(code))?;
        let raw_len = i32::from_be_bytes([src[4], src[5], src[6], src[7]]);
        let payload_length = checked_length(raw_len)?;

        let stream_id = StreamId([src.get_u8(), src.get_u8()]);
        src.advance(6);

        Ok(Some(Self {
            stream_id,
            status,
            payload_length,
        }))
    }
}

/// Header preceding every request body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    /// Stream the request is sent on
    pub stream_id: StreamId,
    /// Kind of request
    pub request_id: RequestId,
    /// Request-specific parameter block
    pub params: [u8; REQUEST_PARAMS_SIZE],
    /// Length of the body in bytes
    pub payload_length: u32,
}

impl RequestHeader {
    /// Encode the header into a byte buffer
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(REQUEST_HEADER_SIZE);
        dst.put_slice(&self.stream_id.0);
        dst.put_u16(self.request_id.0);
        dst.put_slice(&self.params);
        dst.put_i32(self.payload_length as i32);
    }

    /// Decode a header from a byte buffer
    ///
    /// Returns None if there aren't enough bytes in the buffer.
    pub fn decode(src: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if src.len() < REQUEST_HEADER_SIZE {
            return Ok(None);
        }

        let raw_len = i32::from_be_bytes([src[20], src[21], src[22], src[23]]);
        let payload_length = checked_length(raw_len)?;

        let stream_id = StreamId([src.get_u8(), src.get_u8()]);
        let request_id = RequestId(src.get_u16());
        let mut params = [0u8; REQUEST_PARAMS_SIZE];
        src.copy_to_slice(&mut params);
        let _ = src.get_i32(); // length already validated

        Ok(Some(Self {
            stream_id,
            request_id,
            params,
            payload_length,
        }))
    }
}
