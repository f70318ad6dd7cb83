//! Coverage of `TCP_CONNECT` admission control: connects beyond the fast-fail threshold
//! must be rejected immediately rather than queued, without waiting on the admission or
//! connect timeouts.

use std::sync::Arc;
use std::time::Duration;

use axum_test::TestServer;
use clap::Parser as _;
use jstorrentd::config::IoDaemonConfig;
use jstorrentd::types::{Opcode, PairingTriple};
use jstorrentd::IoDaemonBuilder;
use jstorrentd_test_support::{frame_client as fc, InMemoryRootStore, InMemoryTokenStore, InMemoryUserInteraction};
use tokio_util::sync::CancellationToken;

// An admission capacity of zero means the semaphore behind `ConnectAdmission` never grants
// a permit, so every `TCP_CONNECT` blocks deterministically at the admission-wait step
// (never reaching the network) until `admission_wait_timeout` elapses. This keeps a
// connect "pending" for as long as the test needs without depending on any real network
// reachability.
const ANY_HOST: &str = "127.0.0.1";

#[tokio::test]
async fn connect_beyond_fast_fail_threshold_is_rejected_immediately() {
    let triple = PairingTriple::new("admission-token", "ext-id-0123456789", "install-xyz");
    let token_store = Arc::new(InMemoryTokenStore::paired(triple.clone()));
    let config = IoDaemonConfig::parse_from([
        "jstorrentd",
        "--admission-capacity",
        "0",
        "--admission-fast-fail-threshold",
        "4",
        "--admission-wait-timeout",
        "30s",
        "--connect-timeout",
        "30s",
    ]);
    let router = IoDaemonBuilder::init(
        config,
        token_store,
        Arc::new(InMemoryRootStore::new()),
        Arc::new(InMemoryUserInteraction::approving()),
        CancellationToken::new(),
    )
    .build();
    let server = TestServer::builder()
        .http_transport()
        .build(router)
        .expect("can build test server");

    let mut ws = server.get_websocket("/io").await.into_websocket().await;
    ws.send_bytes(fc::client_hello(1).to_vec()).await;
    let _ = fc::decode(&ws.receive_bytes().await);
    ws.send_bytes(fc::auth(2, &triple).to_vec()).await;
    let reply = fc::decode(&ws.receive_bytes().await);
    fc::expect_opcode(&reply, Opcode::AuthResult);
    assert_eq!(reply.payload[0], 0);

    // Saturate the fast-fail threshold (4) with connects that block forever on admission.
    for sid in 1..=4u32 {
        ws.send_bytes(fc::tcp_connect(0, sid, 4, ANY_HOST).to_vec())
            .await;
    }

    // The 5th connect must fast-fail inline, before any of the four pending connects have
    // had a chance to time out (their 30s deadlines dwarf this test's own timeout).
    ws.send_bytes(fc::tcp_connect(0, 5, 4, ANY_HOST).to_vec())
        .await;

    let reply = tokio::time::timeout(Duration::from_secs(5), async { fc::decode(&ws.receive_bytes().await) })
        .await
        .expect("fast-fail reply must arrive well within the connect timeout");
    fc::expect_opcode(&reply, Opcode::TcpConnected);
    assert_eq!(fc::payload_sid(&reply), 5, "the 5th, over-threshold connect is the one that fast-fails");
    assert_eq!(reply.payload[4], 1, "a fast-failed connect must report failure");
}

#[tokio::test]
async fn connect_with_empty_hostname_fails_fast_without_touching_admission() {
    let triple = PairingTriple::new("admission-token-2", "ext-id-0123456789", "install-xyz");
    let token_store = Arc::new(InMemoryTokenStore::paired(triple.clone()));
    let config = IoDaemonConfig::parse_from(["jstorrentd"]);
    let router = IoDaemonBuilder::init(
        config,
        token_store,
        Arc::new(InMemoryRootStore::new()),
        Arc::new(InMemoryUserInteraction::approving()),
        CancellationToken::new(),
    )
    .build();
    let server = TestServer::builder()
        .http_transport()
        .build(router)
        .expect("can build test server");

    let mut ws = server.get_websocket("/io").await.into_websocket().await;
    ws.send_bytes(fc::client_hello(1).to_vec()).await;
    let _ = fc::decode(&ws.receive_bytes().await);
    ws.send_bytes(fc::auth(2, &triple).to_vec()).await;
    let _ = fc::decode(&ws.receive_bytes().await);

    ws.send_bytes(fc::tcp_connect(0, 1, 4, "").to_vec()).await;
    let reply = tokio::time::timeout(Duration::from_secs(2), async { fc::decode(&ws.receive_bytes().await) })
        .await
        .expect("empty-hostname connect must fail immediately");
    fc::expect_opcode(&reply, Opcode::TcpConnected);
    assert_eq!(reply.payload[4], 1);
}
