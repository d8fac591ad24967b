//! Response reader: one task per connection
//!
//! Frames are classified by status and routed to the caller holding the
//! stream id. `Wait` and `WaitResp` re-send the stored request after the
//! server-chosen delay. A read failure ends the task and fails or
//! redirects whatever was outstanding.

use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio_util::codec::FramedRead;

use xrd_core::SessionError;
use xrd_protocol::{
    AttnAction, AttnResponse, ProtocolError, Redirection, ResponseCodec, ResponseFrame,
    ResponseStatus, ServerError, StreamId, WaitResponse,
};

use super::dispatch::WriteFailure;
use super::{Inner, Role};
use crate::mux::{Delivery, MuxError};

/// Read frames until the session is cancelled or the connection fails
pub(super) async fn run(inner: Arc<Inner>, reader: OwnedReadHalf) {
    let mut frames = FramedRead::new(reader, ResponseCodec::new());

    loop {
        let next = tokio::select! {
            biased;
            _ = inner.cancel.cancelled() => break,
            next = frames.next() => next,
        };

        match next {
            Some(Ok(frame)) => inner.handle_frame(frame),
            Some(Err(e)) => {
                inner.on_read_failure(e.to_string()).await;
                break;
            }
            None => {
                inner.on_read_failure("connection closed by server".to_string()).await;
                break;
            }
        }
    }

    tracing::trace!(addr = %inner.addr, path_id = %inner.path_id(), "reader stopped");
}

impl Inner {
    fn handle_frame(self: &Arc<Self>, frame: ResponseFrame) {
        let ResponseFrame {
            stream_id,
            status,
            payload,
        } = frame;
        tracing::debug!(stream_id = %stream_id, ?status, len = payload.len(), "response");

        match status {
            ResponseStatus::Ok => {
                self.forward(stream_id, Delivery::Data(payload));
                self.finish(stream_id);
            }
            ResponseStatus::OkSoFar => self.forward(stream_id, Delivery::Data(payload)),
            ResponseStatus::Error => {
                let err = match ServerError::decode(payload) {
                    Ok(err) => SessionError::from(err),
                    Err(e) => SessionError::Protocol(e),
                };
                self.forward(stream_id, Delivery::Error(err));
                self.finish(stream_id);
            }
            ResponseStatus::Redirect => {
                let delivery = match Redirection::decode(payload) {
                    Ok(redirect) => Delivery::Redirect(redirect),
                    Err(e) => Delivery::Error(SessionError::Protocol(e)),
                };
                self.forward(stream_id, delivery);
                self.finish(stream_id);
            }
            ResponseStatus::Wait => self.handle_wait(stream_id, payload, false),
            ResponseStatus::WaitResp => self.handle_wait(stream_id, payload, true),
            ResponseStatus::Attn => self.handle_attn(stream_id, payload),
        }
    }

    fn handle_attn(self: &Arc<Self>, stream_id: StreamId, payload: Bytes) {
        let attn = match AttnResponse::decode(payload) {
            Ok(attn) => attn,
            Err(e) => {
                let target = match &e {
                    ProtocolError::NestedAsyncResponse(embedded) => *embedded,
                    _ => stream_id,
                };
                if self.pending_owner(target).is_some() {
                    self.forward(target, Delivery::Error(SessionError::Protocol(e)));
                    self.finish(target);
                } else {
                    tracing::warn!(stream_id = %target, "undecodable attn: {}", e);
                }
                return;
            }
        };

        match attn.action {
            AttnAction::AsyncResponse(embedded) => {
                tracing::debug!(stream_id = %embedded.stream_id, "async response");
                self.handle_frame(embedded);
            }
            AttnAction::Message(message) => {
                tracing::info!(addr = %self.addr, "server message: {}", message);
            }
            other => {
                tracing::debug!(addr = %self.addr, action = other.code(), "ignoring attn action");
            }
        }
    }

    fn handle_wait(self: &Arc<Self>, stream_id: StreamId, payload: Bytes, once: bool) {
        let wait = match WaitResponse::decode(payload) {
            Ok(wait) => wait,
            Err(e) => {
                self.forward(stream_id, Delivery::Error(SessionError::Protocol(e)));
                self.finish(stream_id);
                return;
            }
        };

        let Some(owner) = self.pending_owner(stream_id) else {
            tracing::warn!(stream_id = %stream_id, "wait for unknown request");
            return;
        };

        let request = {
            let Some(mut entry) = owner.pending.get_mut(&stream_id) else {
                return;
            };
            if once {
                if entry.wait_resent {
                    tracing::debug!(stream_id = %stream_id, "already re-sent; waiting for async response");
                    return;
                }
                entry.wait_resent = true;
            }
            entry.value().clone()
        };

        tracing::debug!(
            stream_id = %stream_id,
            delay = ?wait.delay,
            message = %wait.message,
            "server asked to wait"
        );

        tokio::spawn(async move {
            tokio::select! {
                _ = owner.cancel.cancelled() => return,
                _ = tokio::time::sleep(wait.delay) => {}
            }
            match owner.write_request(&request).await {
                Ok(()) => {}
                Err(WriteFailure::Unsent(e)) => {
                    tracing::warn!(stream_id = %stream_id, "re-send after wait failed: {}", e);
                    owner.forward(stream_id, Delivery::Error(e));
                    owner.finish(stream_id);
                }
                Err(WriteFailure::BodyLost(e)) => {
                    // The server saw the header again; it still owns the stream id
                    tracing::warn!(stream_id = %stream_id, "re-send lost its body: {}", e);
                    owner.forward(stream_id, Delivery::Error(e));
                }
            }
        });
    }

    /// The session holding the pending entry for `stream_id`: this one, or
    /// the parent when a data path carries the parent's response
    fn pending_owner(self: &Arc<Self>, stream_id: StreamId) -> Option<Arc<Inner>> {
        if self.pending.contains_key(&stream_id) {
            return Some(Arc::clone(self));
        }
        self.parent()
            .filter(|parent| parent.pending.contains_key(&stream_id))
    }

    fn forward(&self, stream_id: StreamId, delivery: Delivery) {
        match self.mux.deliver(stream_id, delivery) {
            Ok(()) => {}
            Err(MuxError::Unclaimed(id)) => {
                tracing::warn!(stream_id = %id, "dropping response for unclaimed stream");
            }
            Err(MuxError::ReceiverGone(id)) => {
                tracing::debug!(stream_id = %id, "caller stopped waiting");
            }
        }
    }

    /// Terminate the exchange on `stream_id`
    fn finish(&self, stream_id: StreamId) {
        if self.pending.remove(&stream_id).is_none() {
            if let Some(parent) = self.parent() {
                parent.pending.remove(&stream_id);
            }
        }
        self.mux.unclaim(stream_id);
    }

    async fn on_read_failure(self: &Arc<Self>, reason: String) {
        if self.cancel.is_cancelled() {
            return;
        }

        if self.is_sub() {
            let path_id = self.path_id();
            tracing::warn!(addr = %self.addr, path_id = %path_id, "data path failed: {}", reason);

            // Requests sent on this connection (the bind) get no answer now
            let own: Vec<StreamId> = self.pending.iter().map(|e| *e.key()).collect();
            for stream_id in own {
                self.forward(
                    stream_id,
                    Delivery::Error(SessionError::ConnectionLost(reason.clone())),
                );
                self.finish(stream_id);
            }

            // The parent's headers already went out on its control socket, so
            // the server still answers those ids; only the callers are told
            if let Some(parent) = self.parent().filter(|_| !path_id.is_control()) {
                parent.forget_sub(path_id);
                let bound: Vec<StreamId> = parent
                    .pending
                    .iter()
                    .filter(|e| e.value().path_id == path_id)
                    .map(|e| *e.key())
                    .collect();
                for stream_id in bound {
                    parent.forward(
                        stream_id,
                        Delivery::Error(SessionError::ConnectionLost(reason.clone())),
                    );
                }
            }
        } else {
            let outstanding: Vec<StreamId> = self.pending.iter().map(|e| *e.key()).collect();
            match &self.role {
                Role::Initial => {
                    tracing::error!(
                        addr = %self.addr,
                        outstanding = outstanding.len(),
                        "session failed: {}",
                        reason
                    );
                    *self.failure.lock() = Some(reason.clone());
                    for stream_id in outstanding {
                        self.forward(
                            stream_id,
                            Delivery::Error(SessionError::ConnectionLost(reason.clone())),
                        );
                        self.finish(stream_id);
                    }
                }
                Role::Redirected { initial_addr } => {
                    tracing::warn!(
                        addr = %self.addr,
                        initial = %initial_addr,
                        outstanding = outstanding.len(),
                        "redirected session failed, returning requests: {}",
                        reason
                    );
                    let redirect = Redirection::to_addr(initial_addr);
                    for stream_id in outstanding {
                        self.forward(stream_id, Delivery::Redirect(redirect.clone()));
                        self.finish(stream_id);
                    }
                }
            }
        }

        if let Err(e) = self.close().await {
            tracing::debug!(addr = %self.addr, "close after failure: {}", e);
        }
    }
}
