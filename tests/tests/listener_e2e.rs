//! End-to-end tests for connection intake.
//!
//! Real sockets against a real listener and append log:
//! TCP client → Listener → EventFramer → AppendLog

use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use integration_tests::fixtures::{self, EventKind};
use integration_tests::setup::{TestContext, TestOptions};
use listener::{ListenerConfig, RateLimitConfig};

/// True once the server has closed `stream`.
async fn closed_by_server(stream: &mut TcpStream) -> bool {
    let mut buf = [0u8; 16];
    matches!(
        tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf)).await,
        Ok(Ok(0)) | Ok(Err(_))
    )
}

fn options(listener: ListenerConfig) -> TestOptions {
    TestOptions {
        listener: ListenerConfig {
            bind_host: "127.0.0.1".to_string(),
            port: 0,
            ..listener
        },
        ..Default::default()
    }
}

#[tokio::test]
async fn test_declarations_are_stripped_before_append() {
    let ctx = TestContext::new().await;
    let records = fixtures::events(3);

    let payload: String = records.iter().map(|r| fixtures::with_declaration(r)).collect();
    ctx.send(payload.as_bytes()).await;
    ctx.wait_for_events(3).await;

    let contents = ctx.log_contents().await;
    assert!(!contents.contains("<?xml"));
    assert_eq!(contents, format!("{}\n", records.join("\n")));

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_record_split_across_writes() {
    let ctx = TestContext::new().await;
    let record = fixtures::event(EventKind::Alarm, 1);
    let bytes = record.as_bytes();

    let mut stream = ctx.connect().await;
    for part in [&bytes[..10], &bytes[10..bytes.len() - 3], &bytes[bytes.len() - 3..]] {
        stream.write_all(part).await.unwrap();
        stream.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    ctx.wait_for_events(1).await;
    assert_eq!(ctx.log_contents().await, format!("{record}\n"));

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_interleaved_connections_never_mix_records() {
    let ctx = TestContext::new().await;
    let a = fixtures::event(EventKind::AccessGranted, 1);
    let b = fixtures::event(EventKind::AccessDenied, 2);
    let (a_head, a_tail) = a.split_at(a.len() / 2);
    let (b_head, b_tail) = b.split_at(b.len() / 2);

    let mut conn_a = ctx.connect().await;
    let mut conn_b = ctx.connect().await;

    conn_a.write_all(a_head.as_bytes()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    conn_b.write_all(b_head.as_bytes()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    conn_a.write_all(a_tail.as_bytes()).await.unwrap();
    conn_b.write_all(b_tail.as_bytes()).await.unwrap();

    ctx.wait_for_events(2).await;

    // Records are multi-line, so compare whole-log orderings.
    let contents = ctx.log_contents().await;
    assert!(
        contents == format!("{a}\n{b}\n") || contents == format!("{b}\n{a}\n"),
        "unexpected log contents: {contents}"
    );

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_connection_pool_bound() {
    let ctx = TestContext::with_options(options(ListenerConfig {
        max_connections: 1,
        ..Default::default()
    }))
    .await;

    let mut first = ctx.connect().await;
    first.write_all(b"<EVENT>").await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut second = ctx.connect().await;
    assert!(closed_by_server(&mut second).await);

    // Finishing the first connection frees its slot.
    first
        .write_all(b"<cn>1</cn></EVENT>")
        .await
        .unwrap();
    ctx.wait_for_events(1).await;
    drop(first);
    tokio::time::sleep(Duration::from_millis(200)).await;

    ctx.send(fixtures::event(EventKind::Alarm, 2).as_bytes()).await;
    ctx.wait_for_events(2).await;

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_oversize_connection_closed_without_losing_earlier_records() {
    let ctx = TestContext::with_options(options(ListenerConfig {
        max_message_size: 256,
        ..Default::default()
    }))
    .await;

    let mut stream = ctx.connect().await;
    stream
        .write_all(fixtures::sized_event(100).as_bytes())
        .await
        .unwrap();
    ctx.wait_for_events(1).await;

    stream.write_all(&[b'x'; 300]).await.unwrap();
    assert!(closed_by_server(&mut stream).await);
    assert_eq!(ctx.log.event_count(), 1);

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_rate_limited_source_is_refused() {
    let ctx = TestContext::with_options(options(ListenerConfig {
        rate_limit: RateLimitConfig {
            max_events: 2,
            window: Duration::from_secs(60),
            trust_loopback: false,
            ..Default::default()
        },
        ..Default::default()
    }))
    .await;

    let payload: String = fixtures::events(2).concat();
    ctx.send(payload.as_bytes()).await;
    ctx.wait_for_events(2).await;

    let mut refused = ctx.connect().await;
    assert!(closed_by_server(&mut refused).await);
    let _ = refused
        .write_all(fixtures::event(EventKind::Alarm, 9).as_bytes())
        .await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(ctx.log.event_count(), 2);

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_loopback_is_trusted_by_default() {
    let ctx = TestContext::with_options(options(ListenerConfig {
        rate_limit: RateLimitConfig {
            max_events: 1,
            ..Default::default()
        },
        ..Default::default()
    }))
    .await;

    for i in 0..3 {
        ctx.send(fixtures::event(EventKind::Alarm, i).as_bytes()).await;
        ctx.wait_for_events(i as u64 + 1).await;
    }

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_stops_accepting() {
    let ctx = TestContext::new().await;
    let addr = ctx.addr;
    ctx.shutdown().await;

    assert!(TcpStream::connect(addr).await.is_err());
}
