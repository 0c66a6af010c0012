//! End-to-end tests against real listeners on loopback.
//!
//! Each test starts its own server on `127.0.0.1:0` and talks to it with
//! `lifo-client` or a raw `TcpStream`.

use lifo::server::{self, RunningServer};
use lifo::shutdown::ShutdownReason;
use lifo::Config;
use lifo_client::{ClientConfig, ClientError, StackClient, fetch_diagnostics};
use lifo_core::DiagnosticSnapshot;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const WAIT_LIMIT: Duration = Duration::from_secs(5);

fn test_config(max_connections: usize, max_stack_size: usize, stale_secs: u64) -> Config {
    let mut config = Config::default();
    config.listen_addr = "127.0.0.1:0".parse().unwrap();
    config.diagnostic_addr = "127.0.0.1:0".parse().unwrap();
    config.limits.max_connections = max_connections;
    config.limits.max_stack_size = max_stack_size;
    config.limits.stale_connection_period_secs = stale_secs;
    config
}

async fn start(max_connections: usize, max_stack_size: usize, stale_secs: u64) -> RunningServer {
    server::start(&test_config(max_connections, max_stack_size, stale_secs))
        .await
        .unwrap()
}

fn client(server: &RunningServer) -> StackClient {
    StackClient::new(ClientConfig::new(server.app_addr()))
}

/// Poll server state until `pred` holds.
async fn wait_for(server: &RunningServer, pred: impl Fn(&DiagnosticSnapshot) -> bool) {
    let deadline = Instant::now() + WAIT_LIMIT;
    loop {
        let snapshot = server.state().snapshot();
        if pred(&snapshot) {
            return;
        }
        assert!(Instant::now() < deadline, "condition not reached: {:?}", snapshot);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Send raw request bytes and collect everything the server writes back.
async fn exchange(server: &RunningServer, request: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(server.app_addr()).await.unwrap();
    stream.write_all(request).await.unwrap();
    let mut response = Vec::new();
    tokio::time::timeout(WAIT_LIMIT, stream.read_to_end(&mut response))
        .await
        .unwrap()
        .unwrap();
    response
}

#[tokio::test]
async fn test_concrete_scenario_raw_bytes() {
    let server = start(8, 2, 10).await;

    assert_eq!(exchange(&server, &[0x02, b'A', b'B']).await, vec![0x00]);
    assert_eq!(exchange(&server, &[0x02, b'C', b'D']).await, vec![0x00]);
    assert_eq!(exchange(&server, &[0x80]).await, vec![0x02, b'C', b'D']);
    assert_eq!(exchange(&server, &[0x80]).await, vec![0x02, b'A', b'B']);

    // Third pop waits for a push
    let pending = {
        let client = client(&server);
        tokio::spawn(async move { client.pop().await })
    };
    wait_for(&server, |s| s.live_connections == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!pending.is_finished());

    client(&server).push(&b"EF"[..]).await.unwrap();
    let popped = tokio::time::timeout(WAIT_LIMIT, pending).await.unwrap().unwrap().unwrap();
    assert_eq!(&popped[..], b"EF");

    server.shutdown(ShutdownReason::Signal).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_lifo_order() {
    let server = start(8, 16, 10).await;
    let client = client(&server);

    for i in 0u8..10 {
        client.push(vec![i; usize::from(i)]).await.unwrap();
    }
    for i in (0u8..10).rev() {
        let payload = client.pop().await.unwrap();
        assert_eq!(&payload[..], vec![i; usize::from(i)].as_slice());
    }

    assert_eq!(server.state().snapshot().stack_depth, 0);
    server.shutdown(ShutdownReason::Signal).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_push_blocks_while_full() {
    let server = start(8, 2, 10).await;
    let client = client(&server);

    client.push(&b"A"[..]).await.unwrap();
    client.push(&b"B"[..]).await.unwrap();

    let blocked = {
        let client = client.clone();
        tokio::spawn(async move { client.push(&b"C"[..]).await })
    };
    wait_for(&server, |s| s.live_connections == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!blocked.is_finished());
    assert_eq!(server.state().snapshot().stack_depth, 2);

    assert_eq!(&client.pop().await.unwrap()[..], b"B");
    tokio::time::timeout(WAIT_LIMIT, blocked).await.unwrap().unwrap().unwrap();

    assert_eq!(server.state().snapshot().stack_depth, 2);
    assert_eq!(&client.pop().await.unwrap()[..], b"C");
    assert_eq!(&client.pop().await.unwrap()[..], b"A");

    server.shutdown(ShutdownReason::Signal).await;
}

#[tokio::test]
async fn test_push_one_byte_at_a_time() {
    let server = start(8, 4, 10).await;

    let mut stream = TcpStream::connect(server.app_addr()).await.unwrap();
    stream.set_nodelay(true).unwrap();
    for byte in [0x03, b'x', b'y', b'z'] {
        stream.write_all(&[byte]).await.unwrap();
        stream.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    assert_eq!(response, vec![0x00]);

    assert_eq!(exchange(&server, &[0x80]).await, vec![0x03, b'x', b'y', b'z']);
    server.shutdown(ShutdownReason::Signal).await;
}

#[tokio::test]
async fn test_max_length_and_empty_payloads() {
    let server = start(8, 4, 10).await;
    let client = client(&server);

    let largest = vec![0xAB; 127];
    client.push(largest.clone()).await.unwrap();
    client.push(Vec::new()).await.unwrap();

    assert!(client.pop().await.unwrap().is_empty());
    assert_eq!(&client.pop().await.unwrap()[..], largest.as_slice());

    let err = client.push(vec![0u8; 128]).await.unwrap_err();
    assert!(matches!(err, ClientError::PayloadTooLarge(128)));

    server.shutdown(ShutdownReason::Signal).await;
}

#[tokio::test]
async fn test_reject_when_oldest_is_fresh() {
    let server = start(1, 4, 60).await;

    // Occupies the only slot
    let mut holder = TcpStream::connect(server.app_addr()).await.unwrap();
    holder.write_all(&[0x80]).await.unwrap();
    wait_for(&server, |s| s.live_connections == 1).await;

    let mut newcomer = TcpStream::connect(server.app_addr()).await.unwrap();
    let mut response = Vec::new();
    tokio::time::timeout(WAIT_LIMIT, newcomer.read_to_end(&mut response))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response, vec![0xFF]);

    wait_for(&server, |s| s.live_connections == 1).await;
    assert_eq!(server.state().snapshot().total_connections_ever_accepted, 2);

    // Slot frees once the holder leaves
    drop(holder);
    wait_for(&server, |s| s.live_connections == 0).await;
    client(&server).push(&b"ok"[..]).await.unwrap();
    assert_eq!(server.state().snapshot().stack_depth, 1);

    server.shutdown(ShutdownReason::Signal).await;
}

#[tokio::test]
async fn test_stale_oldest_is_evicted() {
    let server = start(1, 4, 0).await;

    let mut victim = TcpStream::connect(server.app_addr()).await.unwrap();
    victim.write_all(&[0x80]).await.unwrap();
    wait_for(&server, |s| s.live_connections == 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    client(&server).push(&b"new"[..]).await.unwrap();

    let mut response = Vec::new();
    tokio::time::timeout(WAIT_LIMIT, victim.read_to_end(&mut response))
        .await
        .unwrap()
        .unwrap();
    assert!(response.is_empty(), "evicted connection got {:?}", response);

    wait_for(&server, |s| s.live_connections == 0).await;
    let snapshot = server.state().snapshot();
    assert_eq!(snapshot.stack_depth, 1);
    assert_eq!(snapshot.total_connections_ever_accepted, 2);

    server.shutdown(ShutdownReason::Signal).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_overflow_burst_stays_within_limit() {
    let server = start(1, 4, 0).await;

    let mut first = TcpStream::connect(server.app_addr()).await.unwrap();
    first.write_all(&[0x80]).await.unwrap();
    wait_for(&server, |s| s.live_connections == 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Arrive back to back, before any victim's task has torn down
    let mut burst = Vec::new();
    for _ in 0..3 {
        let mut stream = TcpStream::connect(server.app_addr()).await.unwrap();
        stream.write_all(&[0x80]).await.unwrap();
        burst.push(stream);
    }

    wait_for(&server, |s| s.total_connections_ever_accepted == 4).await;
    wait_for(&server, |s| s.live_connections == 1).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.state().snapshot().live_connections, 1);

    // Every connection but the newest was closed without a response
    let survivor = burst.pop().unwrap();
    for mut evicted in std::iter::once(first).chain(burst) {
        let mut response = Vec::new();
        tokio::time::timeout(WAIT_LIMIT, evicted.read_to_end(&mut response))
            .await
            .unwrap()
            .unwrap();
        assert!(response.is_empty(), "evicted connection got {:?}", response);
    }

    drop(survivor);
    wait_for(&server, |s| s.live_connections == 0).await;
    server.shutdown(ShutdownReason::Signal).await;
}

#[tokio::test]
async fn test_diagnostic_endpoint() {
    let server = start(8, 4, 10).await;
    let client = client(&server);

    client.push(&b"one"[..]).await.unwrap();
    client.push(&b"two"[..]).await.unwrap();

    let snapshot = fetch_diagnostics(server.diagnostic_addr(), WAIT_LIMIT)
        .await
        .unwrap();
    assert_eq!(snapshot.stack_depth, 2);
    assert_eq!(snapshot.total_connections_ever_accepted, 2);
    assert_eq!(snapshot.live_connections, 0);

    // Raw body uses the camelCase wire names
    let mut stream = TcpStream::connect(server.diagnostic_addr()).await.unwrap();
    let mut body = String::new();
    stream.read_to_string(&mut body).await.unwrap();
    assert!(body.contains("\"liveConnections\":0"));
    assert!(body.contains("\"stackDepth\":2"));
    assert!(body.contains("\"totalConnectionsEverAccepted\":2"));
    assert!(body.ends_with('\n'));

    server.shutdown(ShutdownReason::Signal).await;
}

#[tokio::test]
async fn test_shutdown_abandons_blocked_pop() {
    let server = start(8, 4, 10).await;
    let app_addr = server.app_addr();

    let mut waiter = TcpStream::connect(app_addr).await.unwrap();
    waiter.write_all(&[0x80]).await.unwrap();
    wait_for(&server, |s| s.live_connections == 1).await;

    let clean = server.shutdown(ShutdownReason::Signal).await;
    assert!(clean);

    let mut response = Vec::new();
    tokio::time::timeout(WAIT_LIMIT, waiter.read_to_end(&mut response))
        .await
        .unwrap()
        .unwrap();
    assert!(response.is_empty());

    assert!(TcpStream::connect(app_addr).await.is_err());
}

#[tokio::test]
async fn test_bind_conflict_fails_startup() {
    let first = start(8, 4, 10).await;

    let mut config = test_config(8, 4, 10);
    config.listen_addr = first.app_addr();
    assert!(server::start(&config).await.is_err());

    first.shutdown(ShutdownReason::Signal).await;
}
