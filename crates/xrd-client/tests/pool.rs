//! Data-path sub-session pooling

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::join_all;
use parking_lot::Mutex;

use xrd_client::{Outcome, Role, Session};
use xrd_core::{ClientConfig, SessionError};
use xrd_protocol::request::{Read, Write};
use xrd_protocol::{RequestId, ResponseStatus, StreamId};

use common::{creds, eventually, test_config, wait_payload, MockServer};

fn ack_writes() -> impl Fn(&common::Conn, &xrd_protocol::RequestFrame) + Send + Sync + 'static {
    |conn, frame| {
        if frame.header.request_id == RequestId::WRITE {
            conn.reply(frame.header.stream_id, ResponseStatus::Ok, Bytes::new());
        }
    }
}

fn write_path(frame: &xrd_protocol::RequestFrame) -> u8 {
    frame.header.params[12]
}

#[tokio::test]
async fn test_pool_is_bounded_and_falls_back_to_control() {
    const WRITES: usize = 3;
    let held = Arc::new(Mutex::new(Vec::new()));
    let server_held = Arc::clone(&held);
    let server = MockServer::start(move |conn, frame| {
        if frame.header.request_id != RequestId::WRITE {
            return;
        }
        let mut held = server_held.lock();
        held.push((conn.clone(), frame.header.stream_id));
        if held.len() == WRITES {
            for (conn, stream_id) in held.drain(..) {
                conn.reply(stream_id, ResponseStatus::Ok, Bytes::new());
            }
        }
    })
    .await;
    let config = ClientConfig {
        max_subsessions: 2,
        ..test_config()
    };
    let session = Session::open(&server.addr, &creds(), &config, Role::Initial)
        .await
        .unwrap();

    let writes = (0..WRITES as i64).map(|i| session.send(Write::new([0, 0, 0, 7], i * 8, vec![i as u8; 8])));
    for result in join_all(writes).await {
        assert_eq!(result.unwrap(), Outcome::Response(()));
    }

    assert_eq!(server.accepts(), 3, "one control connection and two data paths");
    assert_eq!(session.live_subsessions(), 2);

    let writes = server.requests_of(RequestId::WRITE);
    let inline: Vec<_> = writes.iter().filter(|f| write_path(f) == 0).collect();
    assert_eq!(inline.len(), 1);
    assert_eq!(inline[0].body.len(), 8);

    assert!(eventually(|| server.path_data(1).len() == 8 && server.path_data(2).len() == 8).await);
}

#[tokio::test]
async fn test_idle_data_path_is_reused() {
    let server = MockServer::start(ack_writes()).await;
    let session = Session::open(&server.addr, &creds(), &test_config(), Role::Initial)
        .await
        .unwrap();

    for i in 0..4i64 {
        session
            .send(Write::new([0, 0, 0, 1], i * 4, &b"abcd"[..]))
            .await
            .unwrap();
    }

    assert_eq!(server.accepts(), 2);
    assert_eq!(session.live_subsessions(), 1);
    assert!(server.requests_of(RequestId::WRITE).iter().all(|f| write_path(f) == 1));
    assert!(eventually(|| server.path_data(1) == b"abcd".repeat(4)).await);
}

#[tokio::test]
async fn test_failed_data_path_is_replaced() {
    let server = MockServer::start(ack_writes()).await;
    let session = Session::open(&server.addr, &creds(), &test_config(), Role::Initial)
        .await
        .unwrap();

    session.send(Write::new([0; 4], 0, &b"one"[..])).await.unwrap();
    assert_eq!(session.live_subsessions(), 1);

    // Connection 1 is the first data path
    server.close_conn(1);
    assert!(eventually(|| session.live_subsessions() == 0).await);
    assert!(!session.is_closed(), "a data path failure leaves the session up");

    session.send(Write::new([0; 4], 3, &b"two"[..])).await.unwrap();
    assert_eq!(server.accepts(), 3);
    assert_eq!(session.live_subsessions(), 1);
    assert!(eventually(|| server.path_data(2) == b"two").await);
}

#[tokio::test]
async fn test_close_shuts_down_data_paths() {
    let server = MockServer::start(ack_writes()).await;
    let session = Session::open(&server.addr, &creds(), &test_config(), Role::Initial)
        .await
        .unwrap();

    session.send(Write::new([0; 4], 0, &b"x"[..])).await.unwrap();
    session.close().await.unwrap();

    assert_eq!(session.live_subsessions(), 0);
    assert!(eventually(|| server.eofs() == 2).await);
}

#[tokio::test]
async fn test_close_with_several_data_paths() {
    const WRITES: usize = 2;
    let held = Arc::new(Mutex::new(Vec::new()));
    let server_held = Arc::clone(&held);
    let server = MockServer::start(move |conn, frame| {
        if frame.header.request_id != RequestId::WRITE {
            return;
        }
        let mut held = server_held.lock();
        held.push((conn.clone(), frame.header.stream_id));
        if held.len() == WRITES {
            for (conn, stream_id) in held.drain(..) {
                conn.reply(stream_id, ResponseStatus::Ok, Bytes::new());
            }
        }
    })
    .await;
    let session = Session::open(&server.addr, &creds(), &test_config(), Role::Initial)
        .await
        .unwrap();

    let writes = (0..WRITES as i64).map(|i| session.send(Write::new([0; 4], i, vec![1u8])));
    for result in join_all(writes).await {
        result.unwrap();
    }
    assert_eq!(session.live_subsessions(), 2);

    session.close().await.unwrap();
    session.close().await.unwrap();
    assert_eq!(session.live_subsessions(), 0);
    assert!(eventually(|| server.eofs() == 3).await, "control and both data paths closed");
}

#[tokio::test]
async fn test_lost_data_path_keeps_stream_reserved() {
    let held = Arc::new(Mutex::new(None));
    let server_held = Arc::clone(&held);
    let server = MockServer::start(move |conn, frame| {
        let id = frame.header.stream_id;
        if frame.header.request_id == RequestId::WRITE {
            *server_held.lock() = Some((conn.clone(), id));
        } else if frame.header.request_id == RequestId::READ {
            conn.reply_after(Duration::from_millis(300), id, ResponseStatus::Ok, "fresh");
        }
    })
    .await;
    let session = Arc::new(
        Session::open(&server.addr, &creds(), &test_config(), Role::Initial)
            .await
            .unwrap(),
    );

    let sender = Arc::clone(&session);
    let write = tokio::spawn(async move { sender.send(Write::new([0; 4], 0, &b"data"[..])).await });
    assert!(eventually(|| held.lock().is_some() && server.path_data(1) == b"data").await);

    server.close_conn(1);
    let err = write.await.unwrap().unwrap_err();
    assert!(matches!(err, SessionError::ConnectionLost(_)), "got {:?}", err);
    // The server saw the write header and may still answer it
    assert_eq!(session.in_flight(), 1);

    let sender = Arc::clone(&session);
    let read = tokio::spawn(async move {
        sender
            .send(Read {
                handle: [0; 4],
                offset: 0,
                length: 5,
            })
            .await
    });
    assert!(eventually(|| server.requests_of(RequestId::READ).len() == 1).await);

    let (conn, write_id) = held.lock().take().unwrap();
    let read_id: StreamId = server.requests_of(RequestId::READ)[0].header.stream_id;
    assert_ne!(read_id, write_id);
    conn.reply(write_id, ResponseStatus::Ok, "stale");

    let data = read.await.unwrap().unwrap().into_response().unwrap();
    assert_eq!(data.as_ref(), b"fresh");
    assert!(eventually(|| session.in_flight() == 0).await);
}

#[tokio::test]
async fn test_wait_resend_on_lost_data_path_releases_stream() {
    let writes = Arc::new(AtomicUsize::new(0));
    let server_writes = Arc::clone(&writes);
    let server = MockServer::start(move |conn, frame| {
        if frame.header.request_id != RequestId::WRITE {
            return;
        }
        let id = frame.header.stream_id;
        if server_writes.fetch_add(1, Ordering::SeqCst) == 0 {
            conn.reply(id, ResponseStatus::Wait, wait_payload(1));
        } else {
            conn.reply(id, ResponseStatus::Ok, Bytes::new());
        }
    })
    .await;
    let session = Arc::new(
        Session::open(&server.addr, &creds(), &test_config(), Role::Initial)
            .await
            .unwrap(),
    );

    let sender = Arc::clone(&session);
    let write = tokio::spawn(async move { sender.send(Write::new([0; 4], 0, &b"data"[..])).await });
    assert!(eventually(|| server.path_data(1) == b"data").await);

    // Gone before the wait expires
    server.close_conn(1);
    assert!(write.await.unwrap().is_err());

    // The re-send finds no data path, writes nothing and releases the id
    assert!(eventually(|| session.in_flight() == 0).await);
    assert_eq!(server.requests_of(RequestId::WRITE).len(), 1);
    assert!(!session.is_closed());

    let outcome = session.send(Write::new([0; 4], 4, &b"more"[..])).await.unwrap();
    assert_eq!(outcome, Outcome::Response(()));
    assert_eq!(server.accepts(), 3);
}
