//! Request dispatch: stream claim, data path, signing, write and wait

use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio_util::sync::CancellationToken;

use xrd_core::SessionError;
use xrd_protocol::{encode_request, signing, PathId, Request, Response, StreamId};

use super::{Inner, Outcome};
use crate::mux::{Delivery, DeliveryRx};

/// A request that has been written and not yet terminated
#[derive(Debug, Clone)]
pub(crate) struct PendingRequest {
    /// Bytes for the control socket: optional signature envelope, header and,
    /// on path 0, the body
    pub header: Bytes,
    /// Body bytes for the data path; empty on path 0
    pub body: Bytes,
    pub path_id: PathId,
    /// Set once a `WaitResp` has triggered a re-send
    pub wait_resent: bool,
}

/// Why a request write failed, and whether the server saw its header
#[derive(Debug)]
pub(super) enum WriteFailure {
    /// Nothing usable reached the server; the stream id may be reused
    Unsent(SessionError),
    /// The header went out on the control socket but the body was lost on
    /// the data path. The server will still answer on the stream id.
    BodyLost(SessionError),
}

/// Releases a claimed stream id unless the request made it onto the wire
struct StreamGuard<'a> {
    inner: &'a Inner,
    stream_id: StreamId,
    armed: bool,
}

impl StreamGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for StreamGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.pending.remove(&self.stream_id);
            self.inner.mux.unclaim(self.stream_id);
        }
    }
}

enum Reply {
    Data(Bytes),
    Redirect(xrd_protocol::Redirection),
}

async fn cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

impl Inner {
    pub(super) async fn send<R: Request>(
        self: &Arc<Self>,
        mut request: R,
        cancel: Option<&CancellationToken>,
    ) -> Result<Outcome<R::Response>, SessionError> {
        if self.cancel.is_cancelled() {
            return Err(SessionError::Closed);
        }

        let (stream_id, mut rx) = self.mux.claim()?;
        let guard = StreamGuard {
            inner: self,
            stream_id,
            armed: true,
        };

        // Held until the exchange ends; dropping it returns the path to the pool
        let path = if request.supports_data_path() && !self.is_sub() {
            match self.claim_path().await {
                Ok(claim) => Some(claim),
                Err(e) => {
                    tracing::debug!(stream_id = %stream_id, "using control socket for data: {}", e);
                    None
                }
            }
        } else {
            None
        };
        let path_id = path.as_ref().map_or(PathId::CONTROL, |claim| claim.path_id());
        request.set_path_id(path_id);

        let encoded = encode_request(stream_id, &request);
        let mut header = encoded.header;
        let mut body = encoded.body;
        if path_id.is_control() {
            header.extend_from_slice(&body);
            body = Bytes::new();
        }

        let needs_signature = self
            .signing()
            .map_or(false, |reqs| reqs.needed(request.kind()));
        if needs_signature {
            header = self.sign(stream_id, R::ID, &header, !body.is_empty())?;
        }

        let pending = PendingRequest {
            header: header.freeze(),
            body,
            path_id,
            wait_resent: false,
        };
        self.pending.insert(stream_id, pending.clone());

        tracing::trace!(stream_id = %stream_id, request = %R::ID, path_id = %path_id, "sending request");
        match self.write_request(&pending).await {
            // From here on the reader owns the stream id
            Ok(()) => guard.disarm(),
            Err(WriteFailure::Unsent(e)) => return Err(e),
            Err(WriteFailure::BodyLost(e)) => {
                // Held until the server terminates the half-sent request
                guard.disarm();
                return Err(e);
            }
        }

        let reply = self.await_reply(&mut rx, cancel).await;
        drop(path);

        match reply? {
            Reply::Data(payload) => Ok(Outcome::Response(R::Response::decode(payload)?)),
            Reply::Redirect(redirect) => Ok(Outcome::Redirect(redirect)),
        }
    }

    /// Write a pending request: control bytes here, body on its data path.
    ///
    /// A data path whose write fails is dropped from the pool and closed.
    pub(super) async fn write_request(&self, pending: &PendingRequest) -> Result<(), WriteFailure> {
        let data_path = if pending.path_id.is_control() {
            None
        } else {
            let sub = self
                .subs
                .get(&pending.path_id)
                .map(|entry| Arc::clone(entry.value()))
                .ok_or(WriteFailure::Unsent(SessionError::UnknownPath(pending.path_id.0)))?;
            Some(sub)
        };

        // A failed control write means the session itself is going down
        self.write_all(&pending.header)
            .await
            .map_err(WriteFailure::Unsent)?;

        if let Some(sub) = data_path {
            if !pending.body.is_empty() {
                if let Err(e) = sub.write_all(&pending.body).await {
                    tracing::warn!(path_id = %pending.path_id, "data path write failed: {}", e);
                    self.forget_sub(pending.path_id);
                    if let Err(close_err) = sub.close().await {
                        tracing::debug!(path_id = %pending.path_id, "closing data path: {}", close_err);
                    }
                    return Err(WriteFailure::BodyLost(e));
                }
            }
        }
        Ok(())
    }

    async fn await_reply(
        &self,
        rx: &mut DeliveryRx,
        cancel: Option<&CancellationToken>,
    ) -> Result<Reply, SessionError> {
        let mut data = BytesMut::new();
        let mut received = false;

        loop {
            let delivery = tokio::select! {
                biased;
                delivery = rx.recv() => delivery,
                _ = cancelled(cancel) => return Err(SessionError::Cancelled),
                _ = self.cancel.cancelled() => return Err(SessionError::Closed),
            };

            match delivery {
                Some(Delivery::Data(chunk)) => {
                    received = true;
                    data.extend_from_slice(&chunk);
                }
                Some(Delivery::Redirect(redirect)) => return Ok(Reply::Redirect(redirect)),
                Some(Delivery::Error(e)) => return Err(e),
                None if received => return Ok(Reply::Data(data.freeze())),
                None => return Err(SessionError::Closed),
            }
        }
    }

    /// Prefix `payload` with a `sigver` envelope under the next sequence number.
    ///
    /// Sequence numbers are never reused, so an exhausted counter fails the
    /// request instead of wrapping.
    fn sign(
        &self,
        stream_id: StreamId,
        request_id: xrd_protocol::RequestId,
        payload: &[u8],
        detached_body: bool,
    ) -> Result<BytesMut, SessionError> {
        let previous = self
            .seq
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |seq| seq.checked_add(1))
            .map_err(|_| SessionError::Signing("sequence numbers exhausted".into()))?;
        let seqno = previous + 1;
        tracing::trace!(stream_id = %stream_id, seqno, "signing request");
        Ok(signing::envelope(stream_id, request_id, seqno, payload, detached_body))
    }
}
