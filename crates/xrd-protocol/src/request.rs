//! Request types
//!
//! A [`Request`] binds one request kind to the [`Response`] type that decodes
//! its reply. The session only needs the handful of requests defined here to
//! establish itself and move bulk data; other request kinds are supplied by
//! callers implementing the trait.
//!
//! Every request is sent as a 24-byte header (stream id, request id, a
//! 16-byte parameter block and the body length) followed by the body. A
//! request that supports a data path may have its body carried by a
//! sub-session socket instead of the control socket.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::frame::{REQUEST_HEADER_SIZE, REQUEST_PARAMS_SIZE};
use crate::ids::{LoginId, PathId, StreamId};
use crate::response::{BindResponse, LoginResponse, ProtocolResponse, Response};

/// Request kind identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u16);

impl RequestId {
    pub const AUTH: RequestId = RequestId(3000);
    pub const QUERY: RequestId = RequestId(3001);
    pub const CHMOD: RequestId = RequestId(3002);
    pub const CLOSE: RequestId = RequestId(3003);
    pub const DIRLIST: RequestId = RequestId(3004);
    pub const PROTOCOL: RequestId = RequestId(3006);
    pub const LOGIN: RequestId = RequestId(3007);
    pub const MKDIR: RequestId = RequestId(3008);
    pub const MV: RequestId = RequestId(3009);
    pub const OPEN: RequestId = RequestId(3010);
    pub const PING: RequestId = RequestId(3011);
    pub const READ: RequestId = RequestId(3013);
    pub const RM: RequestId = RequestId(3014);
    pub const RMDIR: RequestId = RequestId(3015);
    pub const SYNC: RequestId = RequestId(3016);
    pub const STAT: RequestId = RequestId(3017);
    pub const SET: RequestId = RequestId(3018);
    pub const WRITE: RequestId = RequestId(3019);
    pub const PREPARE: RequestId = RequestId(3021);
    pub const ENDSESS: RequestId = RequestId(3023);
    pub const BIND: RequestId = RequestId(3024);
    pub const READV: RequestId = RequestId(3025);
    pub const LOCATE: RequestId = RequestId(3027);
    pub const TRUNCATE: RequestId = RequestId(3028);
    pub const SIGVER: RequestId = RequestId(3029);
    pub const WRITEV: RequestId = RequestId(3031);

    /// First request id; security overrides index request ids from here
    pub const BASE: u16 = 3000;
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "request-{}", self.0)
    }
}

/// What the signing policy needs to know about a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestKind {
    /// Request id
    pub id: RequestId,
    /// Whether the request modifies server-side state
    pub modifies: bool,
}

/// A request that can be sent over a session.
pub trait Request: Send + Sync {
    /// Decoder for the reply to this request
    type Response: Response;

    /// Wire identifier
    const ID: RequestId;

    /// The 16-byte parameter block of the request header
    fn params(&self) -> [u8; REQUEST_PARAMS_SIZE];

    /// Body bytes following the header
    fn body(&self) -> Bytes {
        Bytes::new()
    }

    /// Whether the body may be carried on a sub-session data path
    fn supports_data_path(&self) -> bool {
        false
    }

    /// Record the data path chosen for this request
    fn set_path_id(&mut self, _path_id: PathId) {}

    /// Whether the request modifies server-side state
    fn modifies(&self) -> bool {
        false
    }

    /// Signing-relevant description of this request
    fn kind(&self) -> RequestKind {
        RequestKind {
            id: Self::ID,
            modifies: self.modifies(),
        }
    }
}

/// A request serialized for a particular stream
#[derive(Debug, Clone)]
pub struct EncodedRequest {
    /// Request header including the body length
    pub header: BytesMut,
    /// Body bytes, not yet appended to the header
    pub body: Bytes,
}

/// Serialize `request` for `stream_id`
pub fn encode_request<R: Request>(stream_id: StreamId, request: &R) -> EncodedRequest {
    let body = request.body();
    let mut header = BytesMut::with_capacity(REQUEST_HEADER_SIZE + body.len());
    header.put_slice(&stream_id.0);
    header.put_u16(R::ID.0);
    header.put_slice(&request.params());
    header.put_i32(body.len() as i32);
    EncodedRequest { header, body }
}

fn params_with(fill: impl FnOnce(&mut &mut [u8])) -> [u8; REQUEST_PARAMS_SIZE] {
    let mut params = [0u8; REQUEST_PARAMS_SIZE];
    let mut cursor = &mut params[..];
    fill(&mut cursor);
    params
}

/// Capability byte: async support plus protocol capability version 5
pub const LOGIN_CAPABILITY: u8 = 0x80 | 5;

/// Login with a user name and optional token
#[derive(Debug, Clone)]
pub struct Login {
    /// Client process id
    pub pid: i32,
    /// User name; truncated to 8 bytes on the wire
    pub username: String,
    /// Opaque token sent as the body
    pub token: Bytes,
}

impl Login {
    /// Create a login request for the current process
    pub fn new(username: impl Into<String>, token: impl Into<Bytes>) -> Self {
        Self {
            pid: std::process::id() as i32,
            username: username.into(),
            token: token.into(),
        }
    }
}

impl Request for Login {
    type Response = LoginResponse;
    const ID: RequestId = RequestId::LOGIN;

    fn params(&self) -> [u8; REQUEST_PARAMS_SIZE] {
        params_with(|buf| {
            buf.put_i32(self.pid);
            let mut name = [0u8; 8];
            let raw = self.username.as_bytes();
            let len = raw.len().min(name.len());
            name[..len].copy_from_slice(&raw[..len]);
            buf.put_slice(&name);
            buf.put_u8(0); // reserved
            buf.put_u8(0); // ability
            buf.put_u8(LOGIN_CAPABILITY);
            buf.put_u8(0); // role: user
        })
    }

    fn body(&self) -> Bytes {
        self.token.clone()
    }
}

/// Present credentials for a security protocol
#[derive(Debug, Clone)]
pub struct Auth {
    /// Protocol name, at most 4 bytes (e.g. "unix")
    pub credential_type: [u8; 4],
    /// Protocol-specific credentials
    pub credentials: Bytes,
}

impl Auth {
    /// Create an auth request for the named protocol
    pub fn new(protocol: &str, credentials: impl Into<Bytes>) -> Self {
        let mut credential_type = [0u8; 4];
        let raw = protocol.as_bytes();
        let len = raw.len().min(4);
        credential_type[..len].copy_from_slice(&raw[..len]);
        Self {
            credential_type,
            credentials: credentials.into(),
        }
    }
}

impl Request for Auth {
    type Response = ();
    const ID: RequestId = RequestId::AUTH;

    fn params(&self) -> [u8; REQUEST_PARAMS_SIZE] {
        params_with(|buf| {
            buf.put_slice(&[0u8; 12]);
            buf.put_slice(&self.credential_type);
        })
    }

    fn body(&self) -> Bytes {
        self.credentials.clone()
    }
}

/// Protocol version this client speaks (5.2.0)
pub const CLIENT_PROTOCOL_VERSION: i32 = 0x0000_0520;

/// Ask the server to report its signing requirements
pub const PROTOCOL_SECREQS: u8 = 0x01;

/// Negotiate protocol version and security requirements
#[derive(Debug, Clone, Copy)]
pub struct Protocol {
    /// Client protocol version
    pub client_version: i32,
    /// Option flags
    pub options: u8,
}

impl Protocol {
    /// Create a protocol request asking for security requirements
    pub fn new(client_version: i32) -> Self {
        Self {
            client_version,
            options: PROTOCOL_SECREQS,
        }
    }
}

impl Request for Protocol {
    type Response = ProtocolResponse;
    const ID: RequestId = RequestId::PROTOCOL;

    fn params(&self) -> [u8; REQUEST_PARAMS_SIZE] {
        params_with(|buf| {
            buf.put_i32(self.client_version);
            buf.put_u8(self.options);
        })
    }
}

/// Bind a new connection to an existing login as a data path
#[derive(Debug, Clone, Copy)]
pub struct Bind {
    /// Login to bind to
    pub login_id: LoginId,
}

impl Request for Bind {
    type Response = BindResponse;
    const ID: RequestId = RequestId::BIND;

    fn params(&self) -> [u8; REQUEST_PARAMS_SIZE] {
        self.login_id.0
    }
}

/// Liveness check
#[derive(Debug, Clone, Copy, Default)]
pub struct Ping;

impl Request for Ping {
    type Response = ();
    const ID: RequestId = RequestId::PING;

    fn params(&self) -> [u8; REQUEST_PARAMS_SIZE] {
        [0u8; REQUEST_PARAMS_SIZE]
    }
}

/// Read from an open file
#[derive(Debug, Clone, Copy)]
pub struct Read {
    /// Server file handle
    pub handle: [u8; 4],
    /// Byte offset
    pub offset: i64,
    /// Number of bytes requested
    pub length: i32,
}

impl Request for Read {
    type Response = Bytes;
    const ID: RequestId = RequestId::READ;

    fn params(&self) -> [u8; REQUEST_PARAMS_SIZE] {
        params_with(|buf| {
            buf.put_slice(&self.handle);
            buf.put_i64(self.offset);
            buf.put_i32(self.length);
        })
    }
}

/// Write to an open file; the data may travel on a data path
#[derive(Debug, Clone)]
pub struct Write {
    /// Server file handle
    pub handle: [u8; 4],
    /// Byte offset
    pub offset: i64,
    /// Data path carrying the body
    pub path_id: PathId,
    /// Data to write
    pub data: Bytes,
}

impl Write {
    /// Create a write request on the control socket
    pub fn new(handle: [u8; 4], offset: i64, data: impl Into<Bytes>) -> Self {
        Self {
            handle,
            offset,
            path_id: PathId::CONTROL,
            data: data.into(),
        }
    }
}

impl Request for Write {
    type Response = ();
    const ID: RequestId = RequestId::WRITE;

    fn params(&self) -> [u8; REQUEST_PARAMS_SIZE] {
        params_with(|buf| {
            buf.put_slice(&self.handle);
            buf.put_i64(self.offset);
            buf.put_u8(self.path_id.0);
        })
    }

    fn body(&self) -> Bytes {
        self.data.clone()
    }

    fn supports_data_path(&self) -> bool {
        true
    }

    fn set_path_id(&mut self, path_id: PathId) {
        self.path_id = path_id;
    }

    fn modifies(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_request_layout() {
        let encoded = encode_request(StreamId::new(9), &Ping);
        assert_eq!(encoded.header.len(), REQUEST_HEADER_SIZE);
        assert_eq!(&encoded.header[..2], &[0, 9]);
        assert_eq!(u16::from_be_bytes([encoded.header[2], encoded.header[3]]), 3011);
        assert!(encoded.body.is_empty());
    }

    #[test]
    fn test_login_params() {
        let login = Login {
            pid: 42,
            username: "averylongname".to_string(),
            token: Bytes::from_static(b"tok"),
        };
        let params = login.params();
        assert_eq!(&params[..4], &42i32.to_be_bytes());
        assert_eq!(&params[4..12], b"averylon");
        assert_eq!(params[14], LOGIN_CAPABILITY);

        let encoded = encode_request(StreamId::new(1), &login);
        assert_eq!(&encoded.header[20..], &3i32.to_be_bytes());
        assert_eq!(encoded.body.as_ref(), b"tok");
    }

    #[test]
    fn test_write_carries_path_id() {
        let mut write = Write::new([1, 2, 3, 4], 1024, &b"payload"[..]);
        assert!(write.supports_data_path());
        assert!(write.kind().modifies);

        write.set_path_id(PathId(5));
        let params = write.params();
        assert_eq!(&params[..4], &[1, 2, 3, 4]);
        assert_eq!(&params[4..12], &1024i64.to_be_bytes());
        assert_eq!(params[12], 5);
    }

    #[test]
    fn test_auth_credential_type() {
        let auth = Auth::new("unix", &b"alice users\0"[..]);
        let params = auth.params();
        assert_eq!(&params[12..], b"unix");
    }
}
