//! Coverage of the pre-daemon pairing-approval flow: pair once, authenticate many times
//! against the stored triple, and verify that a replaced pairing invalidates the old one.

use std::sync::Arc;

use axum_test::TestServer;
use clap::Parser as _;
use jstorrentd::api::pairing::approve_pairing;
use jstorrentd::config::IoDaemonConfig;
use jstorrentd::types::{Opcode, PairingTriple};
use jstorrentd::IoDaemonBuilder;
use jstorrentd_test_support::{frame_client as fc, InMemoryRootStore, InMemoryTokenStore, InMemoryUserInteraction};
use tokio_util::sync::CancellationToken;

fn router_over(token_store: Arc<InMemoryTokenStore>) -> TestServer {
    let config = IoDaemonConfig::parse_from(["jstorrentd"]);
    let router = IoDaemonBuilder::init(
        config,
        token_store,
        Arc::new(InMemoryRootStore::new()),
        Arc::new(InMemoryUserInteraction::approving()),
        CancellationToken::new(),
    )
    .build();
    TestServer::builder()
        .http_transport()
        .build(router)
        .expect("can build test server")
}

#[tokio::test]
async fn approved_pairing_is_persisted_and_authenticates_across_many_sessions() {
    let token_store = Arc::new(InMemoryTokenStore::new());
    let user_interaction = InMemoryUserInteraction::approving();
    let proposed = PairingTriple::new("shared-token", "ext-id-0123456789", "install-xyz");

    let approved = approve_pairing(proposed.clone(), token_store.as_ref(), &user_interaction)
        .await
        .unwrap();
    assert!(approved);

    let server = router_over(Arc::clone(&token_store));

    for request_id in 0..3u32 {
        let mut ws = server.get_websocket("/io").await.into_websocket().await;
        ws.send_bytes(fc::client_hello(request_id).to_vec()).await;
        let _ = fc::decode(&ws.receive_bytes().await);
        ws.send_bytes(fc::auth(request_id, &proposed).to_vec()).await;
        let reply = fc::decode(&ws.receive_bytes().await);
        fc::expect_opcode(&reply, Opcode::AuthResult);
        assert_eq!(
            reply.payload[0], 0,
            "session {request_id} must authenticate against the one persisted pairing"
        );
    }
}

#[tokio::test]
async fn denied_pairing_leaves_store_empty() {
    let token_store = InMemoryTokenStore::new();
    let user_interaction = InMemoryUserInteraction::denying();
    let proposed = PairingTriple::new("t", "e", "i");

    let approved = approve_pairing(proposed, &token_store, &user_interaction)
        .await
        .unwrap();
    assert!(!approved);
    assert!(current_triple(&token_store).await.is_none());
}

async fn current_triple(store: &InMemoryTokenStore) -> Option<PairingTriple> {
    use jstorrentd::types::TokenStore as _;
    store.current().await
}

#[tokio::test]
async fn replacing_the_pairing_invalidates_the_old_triple() {
    let token_store = Arc::new(InMemoryTokenStore::paired(PairingTriple::new(
        "old-token",
        "ext-id-0123456789",
        "install-xyz",
    )));
    let user_interaction = InMemoryUserInteraction::approving();
    let replacement = PairingTriple::new("new-token", "ext-id-0123456789", "install-xyz");
    let approved = approve_pairing(replacement.clone(), token_store.as_ref(), &user_interaction)
        .await
        .unwrap();
    assert!(approved);

    let server = router_over(Arc::clone(&token_store));
    let mut ws = server.get_websocket("/io").await.into_websocket().await;
    ws.send_bytes(fc::client_hello(1).to_vec()).await;
    let _ = fc::decode(&ws.receive_bytes().await);

    let old = PairingTriple::new("old-token", "ext-id-0123456789", "install-xyz");
    ws.send_bytes(fc::auth(2, &old).to_vec()).await;
    let reply = fc::decode(&ws.receive_bytes().await);
    fc::expect_opcode(&reply, Opcode::AuthResult);
    assert_eq!(reply.payload[0], 1, "the superseded triple must no longer authenticate");
}
