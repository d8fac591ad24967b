//! Per-server multiplexed session
//!
//! A [`Session`] owns one control connection to a server. Any number of
//! tasks may call [`Session::send`] concurrently: each request claims a
//! stream id from the shared [`Mux`], is written to the control socket and
//! then waits for the reader task to route the response frames back.
//!
//! Requests that carry bulk data may have their body written to a
//! sub-session instead: an extra connection bound to the same login that
//! acts as a data path. Sub-sessions are created lazily, pooled, and
//! closed together with their parent.

mod connect;
mod consumer;
mod dispatch;
mod pool;

use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::{Arc, OnceLock, Weak};

use dashmap::DashMap;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio_util::sync::CancellationToken;

use xrd_core::{AuthProvider, ClientConfig, Credentials, SessionError, UnixAuth};
use xrd_protocol::{
    HandshakeReply, LoginId, PathId, Redirection, Request, SecurityLevel, ServerType,
    SigningRequirements, StreamId,
};

use crate::mux::Mux;

pub(crate) use dispatch::PendingRequest;

/// How this session came to exist
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    /// The first session a client opened
    Initial,
    /// Opened after a redirection; on failure its requests are sent back to
    /// `initial_addr`
    Redirected {
        /// Address of the initial session
        initial_addr: String,
    },
}

/// Result of a request that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The server answered
    Response(T),
    /// The request must be reissued elsewhere
    Redirect(Redirection),
}

impl<T> Outcome<T> {
    /// The decoded response, if the server answered
    pub fn into_response(self) -> Option<T> {
        match self {
            Self::Response(value) => Some(value),
            Self::Redirect(_) => None,
        }
    }

    /// The redirection, if any
    pub fn redirect(&self) -> Option<&Redirection> {
        match self {
            Self::Response(_) => None,
            Self::Redirect(redirect) => Some(redirect),
        }
    }
}

/// What protocol negotiation established
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    /// Protocol version reported by the server
    pub protocol_version: i32,
    /// Server flags
    pub flags: u32,
    /// Negotiated signing level
    pub security_level: SecurityLevel,
}

/// State shared by a session, its reader task and its sub-sessions
pub(crate) struct Inner {
    addr: String,
    config: ClientConfig,
    role: Role,
    /// Set for sub-sessions
    parent: Option<Weak<Inner>>,
    /// Data path this connection serves; control for top-level sessions
    path_id: OnceLock<PathId>,
    handshake: HandshakeReply,

    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    cancel: CancellationToken,
    closing: AtomicBool,
    mux: Arc<Mux>,

    pending: DashMap<StreamId, PendingRequest>,
    subs: DashMap<PathId, Arc<Inner>>,
    free_paths: Mutex<Vec<PathId>>,
    sub_create: tokio::sync::Mutex<()>,

    seq: AtomicU64,
    login_id: OnceLock<LoginId>,
    signing: OnceLock<SigningRequirements>,
    server: OnceLock<ServerInfo>,
    failure: Mutex<Option<String>>,
}

impl Inner {
    fn parent(&self) -> Option<Arc<Inner>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    fn is_sub(&self) -> bool {
        self.parent.is_some()
    }

    fn path_id(&self) -> PathId {
        self.path_id.get().copied().unwrap_or(PathId::CONTROL)
    }

    fn signing(&self) -> Option<&SigningRequirements> {
        self.signing.get()
    }

    /// Write `bytes` to this session's socket as one contiguous chunk
    async fn write_all(&self, bytes: &[u8]) -> Result<(), SessionError> {
        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(SessionError::Closed)?;
        writer.write_all(bytes).await?;
        Ok(())
    }

    /// Shut the session down together with every sub-session.
    ///
    /// Idempotent; only the first call does any work.
    fn close(self: &Arc<Self>) -> BoxFuture<'_, Result<(), SessionError>> {
        Box::pin(async move {
            self.cancel.cancel();
            if self.closing.swap(true, std::sync::atomic::Ordering::SeqCst) {
                return Ok(());
            }

            let mut errors = Vec::new();

            let subs: Vec<Arc<Inner>> = self.subs.iter().map(|e| Arc::clone(e.value())).collect();
            self.subs.clear();
            self.free_paths.lock().clear();
            for sub in subs {
                if let Err(e) = sub.close().await {
                    errors.push(format!("{}: {}", sub.path_id(), e));
                }
            }

            if !self.is_sub() {
                self.mux.close();
            }

            let writer = self.writer.lock().await.take();
            if let Some(mut writer) = writer {
                if let Err(e) = writer.shutdown().await {
                    if e.kind() != std::io::ErrorKind::NotConnected {
                        errors.push(format!("{}: {}", self.addr, e));
                    }
                }
            }

            tracing::debug!(addr = %self.addr, path_id = %self.path_id(), "session closed");

            if errors.is_empty() {
                Ok(())
            } else {
                Err(SessionError::Close(errors))
            }
        })
    }
}

/// A connection to one server carrying any number of concurrent requests
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    /// Open a session: dial, handshake, login, authenticate if asked to,
    /// and negotiate the protocol.
    ///
    /// `addr` may be `host`, `host:port` or `root://host[:port]`. The whole
    /// sequence is bounded by `config.connect_timeout`; on failure nothing
    /// is left running.
    pub async fn open(
        addr: &str,
        credentials: &Credentials,
        config: &ClientConfig,
        role: Role,
    ) -> Result<Self, SessionError> {
        let providers: Vec<Arc<dyn AuthProvider>> = vec![Arc::new(UnixAuth::default())];
        Self::open_with_providers(addr, credentials, config, role, &providers).await
    }

    /// Like [`Session::open`] with an explicit set of authentication providers
    pub async fn open_with_providers(
        addr: &str,
        credentials: &Credentials,
        config: &ClientConfig,
        role: Role,
        providers: &[Arc<dyn AuthProvider>],
    ) -> Result<Self, SessionError> {
        let inner = connect::open(addr, credentials, config, role, providers).await?;
        Ok(Self { inner })
    }

    /// Send a request and wait for its outcome
    pub async fn send<R: Request>(&self, request: R) -> Result<Outcome<R::Response>, SessionError> {
        self.inner.send(request, None).await
    }

    /// Send a request; cancelling `cancel` abandons the wait without
    /// affecting the session or the request on the server
    pub async fn send_with_cancel<R: Request>(
        &self,
        request: R,
        cancel: &CancellationToken,
    ) -> Result<Outcome<R::Response>, SessionError> {
        self.inner.send(request, Some(cancel)).await
    }

    /// Close the session and every sub-session. Later sends fail with
    /// [`SessionError::Closed`].
    pub async fn close(&self) -> Result<(), SessionError> {
        self.inner.close().await
    }

    /// Resolves once the session has shut down, for whatever reason
    pub async fn closed(&self) {
        self.inner.cancel.cancelled().await
    }

    /// Whether the session has shut down
    pub fn is_closed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Why the session failed, if its connection broke
    pub fn failure(&self) -> Option<SessionError> {
        self.inner
            .failure
            .lock()
            .clone()
            .map(SessionError::ConnectionLost)
    }

    /// Normalised `host:port` of the server
    pub fn addr(&self) -> &str {
        &self.inner.addr
    }

    pub fn role(&self) -> &Role {
        &self.inner.role
    }

    /// Login identity assigned by the server
    pub fn login_id(&self) -> Option<LoginId> {
        self.inner.login_id.get().copied()
    }

    pub fn server_type(&self) -> ServerType {
        self.inner.handshake.server_type
    }

    /// What protocol negotiation established
    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.inner.server.get()
    }

    /// Which requests this session signs
    pub fn signing_requirements(&self) -> Option<&SigningRequirements> {
        self.inner.signing()
    }

    /// Number of live data-path sub-sessions
    pub fn live_subsessions(&self) -> usize {
        self.inner.subs.len()
    }

    /// Number of requests sent and not yet terminated
    pub fn in_flight(&self) -> usize {
        self.inner.pending.len()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("addr", &self.inner.addr)
            .field("role", &self.inner.role)
            .field("login_id", &self.inner.login_id.get())
            .field("in_flight", &self.inner.pending.len())
            .finish()
    }
}
