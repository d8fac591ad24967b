//! Session construction: dial, handshake, login, auth and negotiation

use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::{Arc, OnceLock};

use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use xrd_core::{
    normalize_addr, select_provider, AuthProvider, ClientConfig, Credentials, SessionError,
};
use xrd_protocol::handshake::{handshake_bytes, HANDSHAKE_REPLY_SIZE};
use xrd_protocol::request::{Auth, Bind, Login, Protocol};
use xrd_protocol::{
    HandshakeReply, ResponseHeader, ResponseStatus, ServerError, SigningRequirements,
    RESPONSE_HEADER_SIZE,
};

use super::{consumer, Inner, Outcome, Role, ServerInfo};
use crate::mux::Mux;

/// Dial `addr` and exchange the handshake
async fn dial(addr: &str) -> Result<(TcpStream, HandshakeReply), SessionError> {
    let mut stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    stream.write_all(&handshake_bytes()).await?;

    let mut raw = [0u8; RESPONSE_HEADER_SIZE];
    stream.read_exact(&mut raw).await?;
    let mut buf = BytesMut::from(&raw[..]);
    let header = ResponseHeader::decode(&mut buf)?
        .ok_or_else(|| SessionError::Handshake("short handshake reply".into()))?;

    let mut payload = vec![0u8; header.payload_length as usize];
    stream.read_exact(&mut payload).await?;

    match header.status {
        ResponseStatus::Ok if payload.len() == HANDSHAKE_REPLY_SIZE => {
            let reply = HandshakeReply::decode(&payload)?;
            Ok((stream, reply))
        }
        ResponseStatus::Ok => Err(SessionError::Handshake(format!(
            "unexpected reply length {}",
            payload.len()
        ))),
        ResponseStatus::Error => Err(ServerError::decode(Bytes::from(payload))?.into()),
        other => Err(SessionError::Handshake(format!(
            "unexpected reply status {:?}",
            other
        ))),
    }
}

fn deadline_exceeded(addr: &str, step: &str) -> SessionError {
    SessionError::Timeout(format!("{} while {}", addr, step))
}

fn expect_response<T>(outcome: Outcome<T>, step: &str) -> Result<T, SessionError> {
    match outcome {
        Outcome::Response(value) => Ok(value),
        Outcome::Redirect(redirect) => Err(SessionError::Handshake(format!(
            "{} redirected to {}",
            step, redirect
        ))),
    }
}

impl Inner {
    /// Wrap a handshaken connection and start its reader task
    #[allow(clippy::too_many_arguments)]
    fn start(
        stream: TcpStream,
        addr: String,
        config: ClientConfig,
        role: Role,
        parent: Option<&Arc<Inner>>,
        handshake: HandshakeReply,
        mux: Arc<Mux>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let (reader, writer) = stream.into_split();
        let inner = Arc::new(Self {
            addr,
            config,
            role,
            parent: parent.map(Arc::downgrade),
            path_id: OnceLock::new(),
            handshake,
            writer: tokio::sync::Mutex::new(Some(writer)),
            cancel,
            closing: AtomicBool::new(false),
            mux,
            pending: DashMap::new(),
            subs: DashMap::new(),
            free_paths: Mutex::new(Vec::new()),
            sub_create: tokio::sync::Mutex::new(()),
            seq: AtomicU64::new(0),
            login_id: OnceLock::new(),
            signing: OnceLock::new(),
            server: OnceLock::new(),
            failure: Mutex::new(None),
        });
        tokio::spawn(consumer::run(Arc::clone(&inner), reader));
        inner
    }

    /// Login, optional authentication and protocol negotiation
    async fn establish(
        self: &Arc<Self>,
        credentials: &Credentials,
        providers: &[Arc<dyn AuthProvider>],
    ) -> Result<(), SessionError> {
        let login = Login::new(credentials.username.clone(), credentials.token.clone());
        let login = expect_response(self.send(login, None).await?, "login")?;
        let _ = self.login_id.set(login.login_id);
        tracing::debug!(addr = %self.addr, login_id = %login.login_id, "logged in");

        if !login.security_info.is_empty() {
            let offered = login.security_protocols();
            let provider = select_provider(providers, &offered).ok_or_else(|| {
                SessionError::Auth(format!("no provider for offered protocols {:?}", offered))
            })?;
            let proof = provider
                .credentials(credentials, &login.security_info)
                .await?;
            let auth = Auth::new(provider.protocol(), proof);
            expect_response(self.send(auth, None).await?, "auth")?;
            tracing::debug!(addr = %self.addr, protocol = provider.protocol(), "authenticated");
        }

        let protocol = Protocol::new(self.config.protocol_version);
        let negotiated = expect_response(self.send(protocol, None).await?, "protocol")?;
        let _ = self.signing.set(SigningRequirements::new(
            negotiated.security_level,
            &negotiated.security_overrides,
        ));
        let _ = self.server.set(ServerInfo {
            protocol_version: negotiated.version,
            flags: negotiated.flags,
            security_level: negotiated.security_level,
        });

        Ok(())
    }

    /// Open a data-path connection bound to this session's login
    pub(super) async fn open_sub(self: &Arc<Self>) -> Result<Arc<Inner>, SessionError> {
        let login_id = *self
            .login_id
            .get()
            .ok_or_else(|| SessionError::Handshake("bind before login".into()))?;
        let deadline = Instant::now() + self.config.connect_timeout;

        let (stream, handshake) = tokio::time::timeout_at(deadline, dial(&self.addr))
            .await
            .map_err(|_| deadline_exceeded(&self.addr, "dialing a data path"))??;

        let sub = Inner::start(
            stream,
            self.addr.clone(),
            self.config.clone(),
            self.role.clone(),
            Some(self),
            handshake,
            Arc::clone(&self.mux),
            self.cancel.child_token(),
        );

        let bound = tokio::time::timeout_at(deadline, sub.send(Bind { login_id }, None))
            .await
            .map_err(|_| deadline_exceeded(&self.addr, "binding a data path"))
            .and_then(|result| result)
            .and_then(|outcome| expect_response(outcome, "bind"));

        match bound {
            Ok(response) => {
                let _ = sub.path_id.set(response.path_id);
                tracing::debug!(addr = %self.addr, path_id = %response.path_id, "data path bound");
                Ok(sub)
            }
            Err(e) => {
                if let Err(close_err) = sub.close().await {
                    tracing::debug!("closing failed data path: {}", close_err);
                }
                Err(e)
            }
        }
    }
}

/// Build a top-level session
pub(super) async fn open(
    addr: &str,
    credentials: &Credentials,
    config: &ClientConfig,
    role: Role,
    providers: &[Arc<dyn AuthProvider>],
) -> Result<Arc<Inner>, SessionError> {
    let addr = normalize_addr(addr, config.default_port);
    let deadline = Instant::now() + config.connect_timeout;
    tracing::debug!(addr = %addr, ?role, "opening session");

    let (stream, handshake) = tokio::time::timeout_at(deadline, dial(&addr))
        .await
        .map_err(|_| deadline_exceeded(&addr, "connecting"))??;
    tracing::debug!(
        addr = %addr,
        protocol_version = handshake.protocol_version,
        server_type = ?handshake.server_type,
        "handshake complete"
    );

    let inner = Inner::start(
        stream,
        addr.clone(),
        config.clone(),
        role,
        None,
        handshake,
        Arc::new(Mux::new(config.max_streams)),
        CancellationToken::new(),
    );

    let established = tokio::time::timeout_at(deadline, inner.establish(credentials, providers))
        .await
        .map_err(|_| deadline_exceeded(&addr, "logging in"))
        .and_then(|result| result);

    match established {
        Ok(()) => {
            tracing::info!(addr = %addr, "session established");
            Ok(inner)
        }
        Err(e) => {
            tracing::warn!(addr = %addr, "session setup failed: {}", e);
            if let Err(close_err) = inner.close().await {
                tracing::debug!("closing failed session: {}", close_err);
            }
            Err(e)
        }
    }
}
