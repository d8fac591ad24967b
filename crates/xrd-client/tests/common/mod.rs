//! Scripted in-process server for session tests
//!
//! Speaks just enough of the protocol to host a session: handshake,
//! login, protocol negotiation, auth and bind. Every other request is
//! handed to the test's handler, which answers through the [`Conn`] it
//! arrived on. Connections that have been bound as data paths switch to
//! raw mode and record whatever bytes arrive.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;

use xrd_core::{ClientConfig, Credentials};
use xrd_protocol::handshake::{is_handshake, HANDSHAKE_SIZE};
use xrd_protocol::{
    HandshakeReply, RequestCodec, RequestFrame, RequestHeader, RequestId, ResponseFrame,
    ResponseStatus, SecurityLevel, SecurityOverride, ServerType, StreamId,
};

/// Handler for requests the server does not answer itself
pub type Handler = Arc<dyn Fn(&Conn, &RequestFrame) + Send + Sync>;

enum Outgoing {
    Bytes(Bytes),
    Close,
}

/// One accepted connection, as seen by a handler
#[derive(Clone)]
pub struct Conn {
    pub index: usize,
    tx: mpsc::UnboundedSender<Outgoing>,
    cancel: CancellationToken,
}

impl Conn {
    /// Send a response frame
    pub fn reply(&self, stream_id: StreamId, status: ResponseStatus, payload: impl Into<Bytes>) {
        let mut buf = BytesMut::new();
        ResponseFrame::new(stream_id, status, payload).encode(&mut buf);
        let _ = self.tx.send(Outgoing::Bytes(buf.freeze()));
    }

    /// Send a response frame after `delay`
    pub fn reply_after(
        &self,
        delay: Duration,
        stream_id: StreamId,
        status: ResponseStatus,
        payload: impl Into<Bytes>,
    ) {
        let conn = self.clone();
        let payload = payload.into();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            conn.reply(stream_id, status, payload);
        });
    }

    /// Drop the connection
    pub fn close(&self) {
        let _ = self.tx.send(Outgoing::Close);
        self.cancel.cancel();
    }
}

/// How the server answers a login
#[derive(Clone, Default)]
pub enum LoginScript {
    #[default]
    Accept,
    Fail(i32, String),
    Drop,
    Ignore,
}

/// Server-side settings for the built-in requests
#[derive(Clone, Default)]
pub struct Script {
    pub login: LoginScript,
    /// Security info returned with the login response
    pub security_info: Bytes,
    /// Security section of the protocol response
    pub security: Option<(SecurityLevel, Vec<SecurityOverride>)>,
}

#[derive(Default)]
struct State {
    accepts: AtomicUsize,
    eofs: AtomicUsize,
    next_path: AtomicU8,
    requests: Mutex<Vec<(usize, RequestFrame)>>,
    path_data: Mutex<HashMap<u8, Vec<u8>>>,
    conns: Mutex<HashMap<usize, Conn>>,
}

pub struct MockServer {
    pub addr: String,
    state: Arc<State>,
    task: JoinHandle<()>,
}

impl MockServer {
    pub async fn start(handler: impl Fn(&Conn, &RequestFrame) + Send + Sync + 'static) -> Self {
        Self::start_with(Script::default(), handler).await
    }

    pub async fn start_with(
        script: Script,
        handler: impl Fn(&Conn, &RequestFrame) + Send + Sync + 'static,
    ) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let state = Arc::new(State {
            next_path: AtomicU8::new(1),
            ..State::default()
        });
        let handler: Handler = Arc::new(handler);
        let script = Arc::new(script);

        let accept_state = Arc::clone(&state);
        let task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let index = accept_state.accepts.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(
                    stream,
                    index,
                    Arc::clone(&accept_state),
                    Arc::clone(&script),
                    Arc::clone(&handler),
                ));
            }
        });

        Self { addr, state, task }
    }

    /// Number of connections accepted so far
    pub fn accepts(&self) -> usize {
        self.state.accepts.load(Ordering::SeqCst)
    }

    /// Number of connections the client closed
    pub fn eofs(&self) -> usize {
        self.state.eofs.load(Ordering::SeqCst)
    }

    /// Every request frame received, with its connection index
    pub fn requests(&self) -> Vec<(usize, RequestFrame)> {
        self.state.requests.lock().clone()
    }

    /// Request frames of one kind
    pub fn requests_of(&self, id: RequestId) -> Vec<RequestFrame> {
        self.requests()
            .into_iter()
            .filter(|(_, frame)| frame.header.request_id == id)
            .map(|(_, frame)| frame)
            .collect()
    }

    /// Raw bytes received on a bound data path
    pub fn path_data(&self, path: u8) -> Vec<u8> {
        self.state
            .path_data
            .lock()
            .get(&path)
            .cloned()
            .unwrap_or_default()
    }

    /// Drop connection `index` from the server side
    pub fn close_conn(&self, index: usize) {
        if let Some(conn) = self.state.conns.lock().get(&index) {
            conn.close();
        }
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
        for conn in self.state.conns.lock().values() {
            conn.close();
        }
    }
}

/// Whether a write's body follows its header on this connection
fn body_inline(header: RequestHeader) -> bool {
    header.request_id != RequestId::WRITE || header.params[12] == 0
}

async fn serve(
    mut stream: TcpStream,
    index: usize,
    state: Arc<State>,
    script: Arc<Script>,
    handler: Handler,
) {
    let mut greeting = [0u8; HANDSHAKE_SIZE];
    if stream.read_exact(&mut greeting).await.is_err() || !is_handshake(&greeting) {
        return;
    }
    let reply = HandshakeReply {
        protocol_version: 0x520,
        server_type: ServerType::DataServer,
    };
    let mut buf = BytesMut::new();
    ResponseFrame::new(StreamId::ZERO, ResponseStatus::Ok, reply.encode().to_vec()).encode(&mut buf);
    if stream.write_all(&buf).await.is_err() {
        return;
    }

    let (mut reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let conn = Conn {
        index,
        tx,
        cancel: cancel.clone(),
    };
    state.conns.lock().insert(index, conn.clone());

    tokio::spawn(async move {
        while let Some(out) = rx.recv().await {
            match out {
                Outgoing::Bytes(bytes) => {
                    if writer.write_all(&bytes).await.is_err() {
                        break;
                    }
                }
                Outgoing::Close => {
                    let _ = writer.shutdown().await;
                    break;
                }
            }
        }
    });

    let mut codec = RequestCodec::header_only(body_inline);
    let mut buf = BytesMut::new();
    let mut bound: Option<u8> = None;

    loop {
        if let Some(path) = bound {
            if !buf.is_empty() {
                let chunk = buf.split();
                state.path_data.lock().entry(path).or_default().extend_from_slice(&chunk);
            }
        } else {
            loop {
                let frame = match codec.decode(&mut buf) {
                    Ok(Some(frame)) => frame,
                    Ok(None) => break,
                    Err(_) => return,
                };
                state.requests.lock().push((index, frame.clone()));

                if frame.header.request_id == RequestId::BIND {
                    let path = state.next_path.fetch_add(1, Ordering::SeqCst);
                    conn.reply(frame.header.stream_id, ResponseStatus::Ok, vec![path]);
                    bound = Some(path);
                    break;
                }
                if !standard(&script, &conn, &frame) {
                    handler(&conn, &frame);
                }
            }
            if bound.is_some() {
                continue;
            }
        }

        let read = tokio::select! {
            _ = cancel.cancelled() => return,
            read = reader.read_buf(&mut buf) => read,
        };
        match read {
            Ok(0) | Err(_) => {
                state.eofs.fetch_add(1, Ordering::SeqCst);
                return;
            }
            Ok(_) => {}
        }
    }
}

/// Answer login, protocol and auth unless the test overrides them.
///
/// Returns false for anything else.
fn standard(script: &Script, conn: &Conn, frame: &RequestFrame) -> bool {
    match frame.header.request_id {
        RequestId::LOGIN => {
            let stream_id = frame.header.stream_id;
            match &script.login {
                LoginScript::Accept => conn.reply(
                    stream_id,
                    ResponseStatus::Ok,
                    login_reply(conn.index, &script.security_info),
                ),
                LoginScript::Fail(code, message) => {
                    conn.reply(stream_id, ResponseStatus::Error, error_payload(*code, message))
                }
                LoginScript::Drop => conn.close(),
                LoginScript::Ignore => {}
            }
            true
        }
        RequestId::PROTOCOL => {
            conn.reply(frame.header.stream_id, ResponseStatus::Ok, protocol_reply(&script.security));
            true
        }
        RequestId::AUTH => {
            conn.reply(frame.header.stream_id, ResponseStatus::Ok, Bytes::new());
            true
        }
        _ => false,
    }
}

pub fn login_reply(index: usize, security_info: &[u8]) -> Bytes {
    let mut out = BytesMut::new();
    out.put_slice(&[index as u8; 16]);
    out.put_slice(security_info);
    out.freeze()
}

pub fn protocol_reply(security: &Option<(SecurityLevel, Vec<SecurityOverride>)>) -> Bytes {
    let mut out = BytesMut::new();
    out.put_i32(0x520);
    out.put_u32(1);
    if let Some((level, overrides)) = security {
        out.put_slice(b"S");
        out.put_slice(&[0, 0, 0]);
        out.put_u8(*level as u8);
        out.put_u8(overrides.len() as u8);
        for o in overrides {
            out.put_u8(o.request_index);
            out.put_u8(o.level as u8);
        }
    }
    out.freeze()
}

pub fn error_payload(code: i32, message: &str) -> Bytes {
    let mut out = BytesMut::new();
    out.put_i32(code);
    out.put_slice(message.as_bytes());
    out.put_u8(0);
    out.freeze()
}

pub fn wait_payload(seconds: i32) -> Bytes {
    let mut out = BytesMut::new();
    out.put_i32(seconds);
    out.freeze()
}

pub fn redirect_payload(port: i32, target: &str) -> Bytes {
    let mut out = BytesMut::new();
    out.put_i32(port);
    out.put_slice(target.as_bytes());
    out.freeze()
}

/// Offset field of a read or write request
pub fn offset_of(frame: &RequestFrame) -> i64 {
    i64::from_be_bytes(frame.header.params[4..12].try_into().unwrap())
}

pub fn test_config() -> ClientConfig {
    ClientConfig {
        username: "alice".into(),
        connect_timeout: Duration::from_secs(5),
        ..ClientConfig::default()
    }
}

pub fn creds() -> Credentials {
    Credentials::new("alice")
}

/// Poll `cond` until it holds or two seconds pass
pub async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
