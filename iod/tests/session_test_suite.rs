//! End-to-end coverage of a single `/io` session (auth, connect, echo, close) and of
//! `/control` broadcast fan-out, driven over real WebSocket connections via `axum-test`.

use std::sync::Arc;

use axum_test::TestServer;
use clap::Parser as _;
use jstorrentd::config::IoDaemonConfig;
use jstorrentd::types::{EventPayload, Opcode, PairingTriple};
use jstorrentd::IoDaemonBuilder;
use jstorrentd_test_support::{frame_client as fc, InMemoryRootStore, InMemoryTokenStore, InMemoryUserInteraction};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

fn triple() -> PairingTriple {
    PairingTriple::new("test-token", "abcdefghijklmnop", "install-1")
}

fn test_server(token_store: Arc<InMemoryTokenStore>) -> TestServer {
    let config = IoDaemonConfig::parse_from(["jstorrentd"]);
    let root_store = Arc::new(InMemoryRootStore::new());
    let user_interaction = Arc::new(InMemoryUserInteraction::approving());
    let router = IoDaemonBuilder::init(
        config,
        token_store,
        root_store,
        user_interaction,
        CancellationToken::new(),
    )
    .build();
    TestServer::builder()
        .http_transport()
        .build(router)
        .expect("can build test server")
}

/// Spawns a one-shot loopback TCP echo listener and returns the port it bound to.
async fn spawn_echo_listener() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let Ok((mut stream, _)) = listener.accept().await else {
            return;
        };
        let (mut reader, mut writer) = stream.split();
        let _ = tokio::io::copy(&mut reader, &mut writer).await;
    });
    port
}

#[tokio::test]
async fn auth_connect_echo_close_round_trip() {
    let server = test_server(Arc::new(InMemoryTokenStore::paired(triple())));
    let echo_port = spawn_echo_listener().await;

    let mut ws = server.get_websocket("/io").await.into_websocket().await;

    ws.send_bytes(fc::client_hello(1).to_vec()).await;
    let reply = fc::decode(&ws.receive_bytes().await);
    fc::expect_opcode(&reply, Opcode::ServerHello);

    ws.send_bytes(fc::auth(2, &triple()).to_vec()).await;
    let reply = fc::decode(&ws.receive_bytes().await);
    fc::expect_opcode(&reply, Opcode::AuthResult);
    assert_eq!(reply.payload[0], 0, "auth must succeed against the matching triple");

    ws.send_bytes(fc::tcp_connect(3, 1, echo_port, "127.0.0.1").to_vec())
        .await;
    let reply = fc::decode(&ws.receive_bytes().await);
    fc::expect_opcode(&reply, Opcode::TcpConnected);
    assert_eq!(fc::payload_sid(&reply), 1);
    assert_eq!(reply.payload[4], 0, "connect to the echo listener must succeed");

    ws.send_bytes(fc::tcp_send(1, b"hello, jstorrentd").to_vec())
        .await;
    let reply = fc::decode(&ws.receive_bytes().await);
    fc::expect_opcode(&reply, Opcode::TcpRecv);
    assert_eq!(fc::payload_sid(&reply), 1);
    assert_eq!(&reply.payload[4..], b"hello, jstorrentd");

    // A client-initiated close against a live stream gets a confirming TCP_CLOSE back,
    // with reason 0 for "closed as requested".
    ws.send_bytes(fc::tcp_close(1).to_vec()).await;
    let reply = fc::decode(&ws.receive_bytes().await);
    fc::expect_opcode(&reply, Opcode::TcpClose);
    assert_eq!(fc::payload_sid(&reply), 1);
    assert_eq!(reply.payload[4], 0, "client-requested close reports reason 0");
}

#[tokio::test]
async fn mismatched_auth_triple_fails_and_closes() {
    let server = test_server(Arc::new(InMemoryTokenStore::paired(triple())));
    let mut ws = server.get_websocket("/io").await.into_websocket().await;

    ws.send_bytes(fc::client_hello(1).to_vec()).await;
    let _ = fc::decode(&ws.receive_bytes().await);

    let wrong = PairingTriple::new("wrong-token", "abcdefghijklmnop", "install-1");
    ws.send_bytes(fc::auth(2, &wrong).to_vec()).await;
    let reply = fc::decode(&ws.receive_bytes().await);
    fc::expect_opcode(&reply, Opcode::AuthResult);
    assert_eq!(reply.payload[0], 1, "a mismatched triple must fail AUTH_RESULT");
}

#[tokio::test]
async fn control_broadcast_reaches_both_authenticated_sessions() {
    let token_store = Arc::new(InMemoryTokenStore::paired(triple()));
    let config = IoDaemonConfig::parse_from(["jstorrentd"]);
    let root_store = Arc::new(InMemoryRootStore::new());
    let user_interaction = Arc::new(InMemoryUserInteraction::approving());
    let builder = IoDaemonBuilder::init(
        config,
        token_store,
        root_store,
        user_interaction,
        CancellationToken::new(),
    );
    let control_channel = builder.control_channel();
    let router = builder.build();
    let server = TestServer::builder()
        .http_transport()
        .build(router)
        .expect("can build test server");

    let mut ws_a = server.get_websocket("/control").await.into_websocket().await;
    ws_a.send_bytes(fc::client_hello(1).to_vec()).await;
    let _ = fc::decode(&ws_a.receive_bytes().await);
    ws_a.send_bytes(fc::auth(2, &triple()).to_vec()).await;
    let reply = fc::decode(&ws_a.receive_bytes().await);
    fc::expect_opcode(&reply, Opcode::AuthResult);
    assert_eq!(reply.payload[0], 0);

    let mut ws_b = server.get_websocket("/control").await.into_websocket().await;
    ws_b.send_bytes(fc::client_hello(1).to_vec()).await;
    let _ = fc::decode(&ws_b.receive_bytes().await);
    ws_b.send_bytes(fc::auth(2, &triple()).to_vec()).await;
    let reply = fc::decode(&ws_b.receive_bytes().await);
    fc::expect_opcode(&reply, Opcode::AuthResult);
    assert_eq!(reply.payload[0], 0);

    // Give both sessions a moment to finish registering with the control channel before
    // broadcasting, since registration happens just after the AUTH_RESULT reply is sent.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    control_channel.broadcast_event(&EventPayload {
        event: "torrent-added".into(),
        payload: serde_json::json!({ "infoHash": "deadbeef" }),
    });

    let event_a = fc::decode(&ws_a.receive_bytes().await);
    let event_b = fc::decode(&ws_b.receive_bytes().await);
    fc::expect_opcode(&event_a, Opcode::Event);
    fc::expect_opcode(&event_b, Opcode::Event);
    let payload_a: EventPayload = serde_json::from_slice(&event_a.payload).unwrap();
    assert_eq!(payload_a.event, "torrent-added");
}
