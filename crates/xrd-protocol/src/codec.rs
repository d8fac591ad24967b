//! Tokio codecs for framed requests and responses

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;
use crate::frame::{RequestHeader, ResponseHeader, ResponseStatus};
use crate::ids::StreamId;

/// A complete response frame: header fields plus payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    /// Stream the response belongs to
    pub stream_id: StreamId,
    /// Status of this frame
    pub status: ResponseStatus,
    /// Payload bytes
    pub payload: Bytes,
}

impl ResponseFrame {
    /// Create a new frame
    pub fn new(stream_id: StreamId, status: ResponseStatus, payload: impl Into<Bytes>) -> Self {
        Self {
            stream_id,
            status,
            payload: payload.into(),
        }
    }

    /// Encode header and payload into a byte buffer
    pub fn encode(&self, dst: &mut BytesMut) {
        ResponseHeader::new(self.stream_id, self.status, self.payload.len() as u32).encode(dst);
        dst.extend_from_slice(&self.payload);
    }
}

/// Codec for reading response frames off a connection
#[derive(Debug, Default)]
pub struct ResponseCodec {
    /// Current header being decoded (if any)
    pending_header: Option<ResponseHeader>,
}

impl ResponseCodec {
    /// Create a new codec
    pub fn new() -> Self {
        Self {
            pending_header: None,
        }
    }
}

impl Decoder for ResponseCodec {
    type Item = ResponseFrame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let header = match self.pending_header.take() {
            Some(h) => h,
            None => match ResponseHeader::decode(src)? {
                Some(h) => h,
                None => return Ok(None),
            },
        };

        let payload_len = header.payload_length as usize;
        if src.len() < payload_len {
            self.pending_header = Some(header);
            src.reserve(payload_len - src.len());
            return Ok(None);
        }

        let payload = src.split_to(payload_len).freeze();
        tracing::trace!(
            stream_id = %header.stream_id,
            status = ?header.status,
            len = payload_len,
            "decoded response frame"
        );

        Ok(Some(ResponseFrame {
            stream_id: header.stream_id,
            status: header.status,
            payload,
        }))
    }
}

impl Encoder<ResponseFrame> for ResponseCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: ResponseFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        frame.encode(dst);
        Ok(())
    }
}

/// A complete request frame as seen by the server side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFrame {
    /// Decoded header
    pub header: RequestHeader,
    /// Inline body bytes (empty when the body travels on a data path)
    pub body: Bytes,
}

/// Codec for reading request frames; used by servers and test peers.
///
/// The codec always reads `payload_length` body bytes inline. Requests whose
/// body travels on a side channel must be decoded with [`RequestCodec::header_only`].
#[derive(Debug, Default)]
pub struct RequestCodec {
    pending_header: Option<RequestHeader>,
    body_inline: Option<fn(RequestHeader) -> bool>,
}

impl RequestCodec {
    /// Create a new codec that reads every body inline
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a codec that consults `inline` to decide whether a request's
    /// body follows on this connection
    pub fn header_only(inline: fn(RequestHeader) -> bool) -> Self {
        Self {
            pending_header: None,
            body_inline: Some(inline),
        }
    }
}

impl Decoder for RequestCodec {
    type Item = RequestFrame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let header = match self.pending_header.take() {
            Some(h) => h,
            None => match RequestHeader::decode(src)? {
                Some(h) => h,
                None => return Ok(None),
            },
        };

        let inline = self.body_inline.map_or(true, |f| f(header));
        let body_len = if inline {
            header.payload_length as usize
        } else {
            0
        };
        if src.len() < body_len {
            self.pending_header = Some(header);
            return Ok(None);
        }

        let body = src.split_to(body_len).freeze();
        Ok(Some(RequestFrame { header, body }))
    }
}
