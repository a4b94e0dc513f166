//! Integration tests for `ServerConnection`.
//!
//! Each test drives a connection over an in-memory duplex pipe. The test
//! plays the server: it writes encoded frames into its end and reads back
//! whatever the client sends.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use kelimelik_client::{ClientError, ConnectionConfig, ServerConnection, Topic};
use kelimelik_protocol::{Packet, Value};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::time::{Instant, timeout};

const WAIT: Duration = Duration::from_secs(1);

fn config() -> ConnectionConfig {
    ConnectionConfig::default().keepalive_interval(Duration::ZERO)
}

fn connect_with(config: ConnectionConfig) -> (ServerConnection, DuplexStream) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    (ServerConnection::from_stream(client, config), server)
}

fn connect() -> (ServerConnection, DuplexStream) {
    connect_with(config())
}

async fn push(server: &mut DuplexStream, packet: &Packet) {
    let frame = packet.encode().expect("packet should encode");
    server.write_all(&frame).await.expect("write should succeed");
}

/// Reads one frame the client wrote and returns its raw bytes.
async fn read_frame(server: &mut DuplexStream) -> Vec<u8> {
    let mut size = [0u8; 4];
    server.read_exact(&mut size).await.expect("size field");
    let mut frame = size.to_vec();
    frame.resize(4 + u32::from_be_bytes(size) as usize, 0);
    server.read_exact(&mut frame[4..]).await.expect("frame body");
    frame
}

/// A frame whose root count promises a value that never comes.
fn corrupt_frame() -> Vec<u8> {
    let mut frame = Packet::new("GameModule_broken").encode().unwrap().to_vec();
    *frame.last_mut().unwrap() = 1;
    frame
}

#[tokio::test]
async fn test_expect_resolves_with_matching_packet() {
    let (conn, mut server) = connect();
    let reply = conn.expect(["GameModule_playerStats"]);
    assert_eq!(conn.pending_count(), 1);

    push(&mut server, &Packet::new("GameModule_playerStats").value(12).value("alice")).await;

    let packet = timeout(WAIT, reply).await.expect("in time").expect("resolved");
    assert_eq!(packet.header, "GameModule_playerStats");
    assert_eq!(
        packet.values,
        vec![Value::Int32(12), Value::Text("alice".into())]
    );
    assert_eq!(conn.pending_count(), 0);
}

#[tokio::test]
async fn test_one_packet_completes_every_matching_expectation() {
    let (conn, mut server) = connect();
    let first = conn.expect(["GameModule_x"]);
    let second = conn.expect(["GameModule_x"]);
    let other = conn.expect(["GameModule_y"]);

    push(&mut server, &Packet::new("GameModule_x").value(1)).await;

    let a = timeout(WAIT, first).await.unwrap().unwrap();
    let b = timeout(WAIT, second).await.unwrap().unwrap();
    assert_eq!(a, b);
    assert_eq!(conn.pending_count(), 1);
    assert_eq!(conn.pending_for("GameModule_y"), 1);
    drop(other);
    assert_eq!(conn.pending_count(), 0);
}

#[tokio::test]
async fn test_mixed_header_sets_share_a_reply() {
    let (conn, mut server) = connect();
    let either = conn.expect(["GameModule_loginOk", "GameModule_loginFailed"]);
    let failed = conn.expect(["GameModule_loginFailed"]);
    assert_eq!(conn.pending_for("GameModule_loginFailed"), 2);
    assert_eq!(conn.pending_for("GameModule_loginOk"), 1);

    push(&mut server, &Packet::new("GameModule_loginFailed").value(3)).await;

    let a = timeout(WAIT, either).await.unwrap().unwrap();
    let b = timeout(WAIT, failed).await.unwrap().unwrap();
    assert_eq!(a.header, "GameModule_loginFailed");
    assert_eq!(b.header, "GameModule_loginFailed");
    assert_eq!(conn.pending_count(), 0);
}

#[tokio::test]
async fn test_packets_outside_module_prefix_are_ignored() {
    let (conn, mut server) = connect();
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    conn.observe(Topic::All, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let foreign = conn.expect(["Lobby_welcome"]);
    let marker = conn.expect(["GameModule_marker"]);

    push(&mut server, &Packet::new("Lobby_welcome")).await;
    push(&mut server, &Packet::new("GameModule_marker")).await;

    // Frames dispatch in order, so the foreign one was handled first.
    timeout(WAIT, marker).await.unwrap().unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert_eq!(conn.pending_for("Lobby_welcome"), 1);
    drop(foreign);
}

#[tokio::test]
async fn test_observers_run_before_expectations_resolve() {
    let (conn, mut server) = connect();
    let log = Arc::new(Mutex::new(Vec::new()));

    // Header observer registered first still runs after the `All` one.
    let header_log = Arc::clone(&log);
    let observed = conn.clone();
    conn.observe(Topic::header("GameModule_turn"), move |_| {
        let pending = observed.pending_for("GameModule_turn");
        header_log.lock().push(format!("header pending={pending}"));
    });
    let all_log = Arc::clone(&log);
    conn.observe(Topic::All, move |packet| {
        all_log.lock().push(format!("all {}", packet.header));
    });

    let reply = conn.expect(["GameModule_turn"]);
    push(&mut server, &Packet::new("GameModule_turn").value(true)).await;
    let packet = timeout(WAIT, reply).await.unwrap().unwrap();
    assert_eq!(packet.get(0).and_then(Value::as_bool), Some(true));

    assert_eq!(
        *log.lock(),
        vec!["all GameModule_turn".to_string(), "header pending=1".to_string()]
    );
    // The header observer holds a clone; close explicitly.
    conn.close().await;
}

#[tokio::test]
async fn test_unobserved_handler_stops_receiving() {
    let (conn, mut server) = connect();
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    let id = conn.observe(Topic::header("GameModule_chat"), move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let first = conn.expect(["GameModule_chat"]);
    push(&mut server, &Packet::new("GameModule_chat")).await;
    timeout(WAIT, first).await.unwrap().unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    assert!(conn.unobserve(id));
    assert!(!conn.unobserve(id));

    let second = conn.expect(["GameModule_chat"]);
    push(&mut server, &Packet::new("GameModule_chat")).await;
    timeout(WAIT, second).await.unwrap().unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_send_writes_frame_and_notifies_outgoing_observers() {
    let (conn, mut server) = connect();
    let sent = Arc::new(Mutex::new(Vec::new()));
    let record = Arc::clone(&sent);
    conn.observe(Topic::Outgoing, move |packet| {
        record.lock().push(packet.header.clone());
    });

    let packet = Packet::new("GameModule_move").value(7).value(vec![1, 2, 3]);
    conn.send(&packet).await.expect("send should succeed");

    let frame = read_frame(&mut server).await;
    assert_eq!(frame, packet.encode().unwrap().to_vec());
    assert_eq!(*sent.lock(), vec!["GameModule_move".to_string()]);
}

#[tokio::test]
async fn test_send_rejects_unencodable_packet_without_writing() {
    let (conn, _server) = connect();
    let sent = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&sent);
    conn.observe(Topic::Outgoing, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let mixed = Packet::new("GameModule_bad").value(Value::List(vec![
        Value::Int32(1),
        Value::Text("two".into()),
    ]));
    let err = conn.send(&mixed).await.unwrap_err();
    assert!(matches!(err, ClientError::Protocol(_)));
    assert_eq!(sent.load(Ordering::SeqCst), 0);
    assert!(!conn.is_closed());
}

#[tokio::test]
async fn test_request_registers_before_sending() {
    let (conn, mut server) = connect();

    let responder = tokio::spawn(async move {
        let frame = read_frame(&mut server).await;
        let request = Packet::decode(&frame).expect("client frame decodes");
        assert_eq!(request.header, "GameModule_login");
        // Reply the instant the request lands.
        push(&mut server, &Packet::new("GameModule_loginOk").value(99)).await;
        server
    });

    let login = Packet::new("GameModule_login").value("alice").value("secret");
    let reply = timeout(
        WAIT,
        conn.request(&login, ["GameModule_loginOk", "GameModule_loginFailed"]),
    )
    .await
    .expect("in time")
    .expect("resolved");

    assert_eq!(reply.header, "GameModule_loginOk");
    assert_eq!(reply.get(0).and_then(Value::as_i32), Some(99));
    let _server = responder.await.unwrap();
}

#[tokio::test]
async fn test_close_rejects_pending_and_runs_close_handlers_once() {
    let (conn, _server) = connect();
    let closes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&closes);
    conn.on_close(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let pending = conn.expect(["GameModule_never"]);

    conn.close().await;
    conn.close().await;

    assert!(conn.is_closed());
    assert!(matches!(
        timeout(WAIT, pending).await.unwrap(),
        Err(ClientError::ConnectionClosed)
    ));
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert_eq!(conn.pending_count(), 0);

    // Registered after the fact: runs straight away.
    let counter = Arc::clone(&closes);
    conn.on_close(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(closes.load(Ordering::SeqCst), 2);

    let err = conn.send(&Packet::new("GameModule_late")).await.unwrap_err();
    assert!(matches!(err, ClientError::ConnectionClosed));
}

#[tokio::test]
async fn test_expect_after_close_is_rejected_immediately() {
    let (conn, _server) = connect();
    conn.close().await;

    let reply = conn.expect(["GameModule_x"]);
    assert_eq!(conn.pending_count(), 0);
    assert!(matches!(
        timeout(WAIT, reply).await.unwrap(),
        Err(ClientError::ConnectionClosed)
    ));
}

#[tokio::test]
async fn test_peer_close_closes_connection() {
    let (conn, server) = connect();
    let pending = conn.expect(["GameModule_x"]);

    drop(server);

    timeout(WAIT, conn.closed()).await.expect("should observe close");
    assert!(conn.is_closed());
    assert!(matches!(
        timeout(WAIT, pending).await.unwrap(),
        Err(ClientError::ConnectionClosed)
    ));
}

#[tokio::test]
async fn test_timed_out_expectation_is_deregistered() {
    let (conn, _server) = connect();

    let outcome = timeout(Duration::from_millis(20), conn.expect(["GameModule_slow"])).await;
    assert!(outcome.is_err());
    assert_eq!(conn.pending_count(), 0);
    assert_eq!(conn.pending_for("GameModule_slow"), 0);
}

#[tokio::test]
async fn test_corrupt_frame_is_skipped() {
    let (conn, mut server) = connect();
    let reply = conn.expect(["GameModule_after"]);

    server.write_all(&corrupt_frame()).await.unwrap();
    push(&mut server, &Packet::new("GameModule_after").value(5)).await;

    let packet = timeout(WAIT, reply).await.unwrap().unwrap();
    assert_eq!(packet.get(0).and_then(Value::as_i32), Some(5));
    assert!(!conn.is_closed());
}

#[tokio::test]
async fn test_too_many_corrupt_frames_close_connection() {
    let (conn, mut server) = connect_with(config().max_corrupt_frames(2));
    let pending = conn.expect(["GameModule_x"]);

    for _ in 0..3 {
        server.write_all(&corrupt_frame()).await.unwrap();
    }

    timeout(WAIT, conn.closed()).await.expect("should close");
    assert!(matches!(
        timeout(WAIT, pending).await.unwrap(),
        Err(ClientError::ConnectionClosed)
    ));
}

#[tokio::test]
async fn test_handler_may_close_connection() {
    let (conn, mut server) = connect();
    let closer = conn.clone();
    conn.observe(Topic::header("GameModule_kick"), move |_| {
        let closer = closer.clone();
        tokio::spawn(async move { closer.close().await });
    });

    push(&mut server, &Packet::new("GameModule_kick")).await;
    timeout(WAIT, conn.closed()).await.expect("should close");
}

#[tokio::test(start_paused = true)]
async fn test_keepalive_pings_every_interval() {
    let start = Instant::now();
    let (conn, mut server) =
        connect_with(config().keepalive_interval(Duration::from_secs(60)));

    let frame = read_frame(&mut server).await;
    let ping = Packet::decode(&frame).expect("ping decodes");
    assert_eq!(ping.header, "GameModule_requestPing");
    assert!(ping.values.is_empty());
    assert_eq!(Instant::now() - start, Duration::from_secs(60));

    read_frame(&mut server).await;
    assert_eq!(Instant::now() - start, Duration::from_secs(120));

    conn.close().await;
}

#[tokio::test]
async fn test_dropping_last_handle_closes_connection() {
    let (conn, mut server) = connect();
    let closes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&closes);
    conn.on_close(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let clone = conn.clone();
    drop(conn);
    assert_eq!(closes.load(Ordering::SeqCst), 0);
    drop(clone);
    assert_eq!(closes.load(Ordering::SeqCst), 1);

    // The reader task exits and drops the client end of the pipe.
    let mut buf = [0u8; 1];
    let read = timeout(WAIT, server.read(&mut buf)).await.unwrap().unwrap();
    assert_eq!(read, 0);
}

#[tokio::test]
async fn test_cancelled_send_still_writes_whole_frame() {
    let (client, mut server) = tokio::io::duplex(64);
    let conn = ServerConnection::from_stream(client, config());
    let big = Packet::new("GameModule_big").value("x".repeat(4096));

    // Nobody reads yet, so the write stalls and the caller gives up.
    assert!(timeout(Duration::from_millis(50), conn.send(&big)).await.is_err());

    let reader = tokio::spawn(async move {
        let first = Packet::decode(&read_frame(&mut server).await).expect("first frame");
        let second = Packet::decode(&read_frame(&mut server).await).expect("second frame");
        (first, second)
    });

    let small = Packet::new("GameModule_small").value(1);
    timeout(WAIT, conn.send(&small)).await.expect("in time").expect("sent");

    let (first, second) = timeout(WAIT, reader).await.expect("in time").expect("reader");
    assert_eq!(first, big);
    assert_eq!(second, small);
}

#[tokio::test]
async fn test_close_does_not_wait_for_stalled_write() {
    let (client, _server) = tokio::io::duplex(64);
    let conn = ServerConnection::from_stream(client, config());

    let stuck = {
        let conn = conn.clone();
        tokio::spawn(async move {
            conn.send(&Packet::new("GameModule_big").value("x".repeat(4096)))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    timeout(WAIT, conn.close()).await.expect("close should not hang");
    assert!(conn.is_closed());

    let result = timeout(WAIT, stuck).await.expect("in time").expect("send task");
    assert!(matches!(result, Err(ClientError::ConnectionClosed)));
}
