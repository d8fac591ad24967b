//! xrd-protocol: Wire vocabulary for the xrdmux session
//!
//! This crate defines the binary framing used between an xrdmux client
//! session and an XRootD-style storage server: identifiers, request and
//! response headers, the response status set, the framed response codec,
//! the handful of request/response types the session needs to establish
//! itself, and the request-signing policy.

pub mod codec;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod ids;
pub mod request;
pub mod response;
pub mod signing;

pub use codec::{RequestCodec, RequestFrame, ResponseCodec, ResponseFrame};
pub use error::ProtocolError;
pub use frame::{
    RequestHeader, ResponseHeader, ResponseStatus, MAX_PAYLOAD_SIZE, REQUEST_HEADER_SIZE,
    REQUEST_PARAMS_SIZE, RESPONSE_HEADER_SIZE,
};
pub use handshake::{HandshakeReply, ServerType, HANDSHAKE_SIZE};
pub use ids::{LoginId, PathId, StreamId};
pub use request::{encode_request, EncodedRequest, Request, RequestId, RequestKind};
pub use response::{AttnAction, AttnResponse, Redirection, Response, ServerError, WaitResponse};
pub use signing::{SecurityLevel, SecurityOverride, SigningLevel, SigningRequirements};
