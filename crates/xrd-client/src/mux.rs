//! Stream-id multiplexing over a single connection
//!
//! Every outstanding request owns one [`StreamId`]. The reader task looks
//! the id of each response frame up here and forwards the frame to the
//! waiting caller. Stream id 0 is reserved for the handshake and never
//! handed out.

use std::collections::HashMap;

use bytes::Bytes;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;

use xrd_core::SessionError;
use xrd_protocol::{Redirection, StreamId};

/// What the reader hands to a waiting caller
#[derive(Debug)]
pub enum Delivery {
    /// Partial or final payload; the exchange ends when the channel closes
    Data(Bytes),
    /// Terminal: reissue the request elsewhere
    Redirect(Redirection),
    /// Terminal: the request failed
    Error(SessionError),
}

/// Receiving end handed out with a claimed stream id
pub type DeliveryRx = mpsc::UnboundedReceiver<Delivery>;

/// Delivery failures
#[derive(Error, Debug)]
pub enum MuxError {
    /// No caller holds this stream id
    #[error("stream {0} is not claimed")]
    Unclaimed(StreamId),

    /// The caller stopped listening
    #[error("receiver for stream {0} is gone")]
    ReceiverGone(StreamId),
}

struct MuxState {
    streams: HashMap<StreamId, mpsc::UnboundedSender<Delivery>>,
    free: Vec<StreamId>,
    next: u32,
    closed: bool,
}

/// Allocator and router for stream ids
pub struct Mux {
    max_streams: u16,
    state: Mutex<MuxState>,
}

impl Mux {
    /// Create a mux handing out ids `1..=max_streams`
    pub fn new(max_streams: u16) -> Self {
        Self {
            max_streams,
            state: Mutex::new(MuxState {
                streams: HashMap::new(),
                free: Vec::new(),
                next: 1,
                closed: false,
            }),
        }
    }

    /// Claim a free stream id together with the channel its responses arrive on
    pub fn claim(&self) -> Result<(StreamId, DeliveryRx), SessionError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(SessionError::Closed);
        }

        let id = match state.free.pop() {
            Some(id) => id,
            None if state.next <= self.max_streams as u32 => {
                let id = StreamId::new(state.next as u16);
                state.next += 1;
                id
            }
            None => return Err(SessionError::StreamsExhausted),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        state.streams.insert(id, tx);
        Ok((id, rx))
    }

    /// Forward a delivery to the holder of `id`
    pub fn deliver(&self, id: StreamId, delivery: Delivery) -> Result<(), MuxError> {
        let state = self.state.lock();
        let tx = state.streams.get(&id).ok_or(MuxError::Unclaimed(id))?;
        tx.send(delivery).map_err(|_| MuxError::ReceiverGone(id))
    }

    /// Release `id`. The holder's channel closes once drained.
    pub fn unclaim(&self, id: StreamId) {
        let mut state = self.state.lock();
        if state.streams.remove(&id).is_some() && !state.closed {
            state.free.push(id);
        }
    }

    /// Number of ids currently held
    pub fn claimed(&self) -> usize {
        self.state.lock().streams.len()
    }

    /// Fail every holder with [`SessionError::Closed`] and refuse new claims
    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        state.free.clear();
        for (id, tx) in state.streams.drain() {
            if tx.send(Delivery::Error(SessionError::Closed)).is_err() {
                tracing::trace!(stream_id = %id, "holder already gone at close");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_start_at_one() {
        let mux = Mux::new(4);
        let (a, _ra) = mux.claim().unwrap();
        let (b, _rb) = mux.claim().unwrap();
        assert_eq!(a, StreamId::new(1));
        assert_eq!(b, StreamId::new(2));
        assert_eq!(mux.claimed(), 2);
    }

    #[test]
    fn test_exhaustion_and_reuse() {
        let mux = Mux::new(2);
        let (a, _ra) = mux.claim().unwrap();
        let (_b, _rb) = mux.claim().unwrap();
        assert!(matches!(mux.claim(), Err(SessionError::StreamsExhausted)));

        mux.unclaim(a);
        let (c, _rc) = mux.claim().unwrap();
        assert_eq!(c, a);
    }

    #[tokio::test]
    async fn test_channel_closes_after_unclaim() {
        let mux = Mux::new(8);
        let (id, mut rx) = mux.claim().unwrap();

        mux.deliver(id, Delivery::Data(Bytes::from_static(b"ab"))).unwrap();
        mux.deliver(id, Delivery::Data(Bytes::from_static(b"cd"))).unwrap();
        mux.unclaim(id);

        assert!(matches!(rx.recv().await, Some(Delivery::Data(d)) if d.as_ref() == b"ab"));
        assert!(matches!(rx.recv().await, Some(Delivery::Data(d)) if d.as_ref() == b"cd"));
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_deliver_to_unclaimed() {
        let mux = Mux::new(8);
        let err = mux
            .deliver(StreamId::new(7), Delivery::Data(Bytes::new()))
            .unwrap_err();
        assert!(matches!(err, MuxError::Unclaimed(id) if id == StreamId::new(7)));
    }

    #[tokio::test]
    async fn test_close_fails_holders() {
        let mux = Mux::new(8);
        let (_id, mut rx) = mux.claim().unwrap();
        mux.close();

        assert!(matches!(
            rx.recv().await,
            Some(Delivery::Error(SessionError::Closed))
        ));
        assert!(rx.recv().await.is_none());
        assert!(matches!(mux.claim(), Err(SessionError::Closed)));
    }
}
