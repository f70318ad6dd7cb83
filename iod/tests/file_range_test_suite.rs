//! Coverage of the `/read/{rootKey}` and `/write/{rootKey}` byte-range endpoints: SHA-1
//! mismatch rejection, path-traversal rejection, and a plain round trip.

use std::sync::Arc;

use axum_test::TestServer;
use base64::Engine as _;
use clap::Parser as _;
use jstorrentd::config::IoDaemonConfig;
use jstorrentd::types::PairingTriple;
use jstorrentd::IoDaemonBuilder;
use jstorrentd_test_support::{InMemoryRootStore, InMemoryTokenStore, InMemoryUserInteraction};
use tokio_util::sync::CancellationToken;

const ORIGIN: &str = "chrome-extension://abcdefghijklmnopabcdefghijklmnop";

fn encode_path(path: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(path)
}

async fn test_server() -> (TestServer, tempfile::TempDir, PairingTriple) {
    let triple = PairingTriple::new("file-token", "ext-id-0123456789", "install-xyz");
    let token_store = Arc::new(InMemoryTokenStore::paired(triple.clone()));
    let root_store = Arc::new(InMemoryRootStore::new());
    let dir = tempfile::tempdir().unwrap();
    root_store.grant("downloads", dir.path().to_path_buf(), "Downloads");
    let config = IoDaemonConfig::parse_from(["jstorrentd"]);
    let router = IoDaemonBuilder::init(
        config,
        token_store,
        root_store,
        Arc::new(InMemoryUserInteraction::approving()),
        CancellationToken::new(),
    )
    .build();
    let server = TestServer::builder()
        .http_transport()
        .build(router)
        .expect("can build test server");
    (server, dir, triple)
}

#[tokio::test]
async fn write_then_read_round_trips_exact_bytes() {
    let (server, _dir, triple) = test_server().await;
    let body = b"some torrent piece bytes".to_vec();
    let sha1 = {
        use sha1::{Digest, Sha1};
        let digest = Sha1::digest(&body);
        digest.iter().map(|b| format!("{b:02x}")).collect::<String>()
    };

    let response = server
        .post("/write/downloads")
        .add_header("Origin", ORIGIN)
        .add_header("X-Path-Base64", encode_path("piece-0.bin"))
        .add_header("X-Offset", "0")
        .add_header("X-Expected-SHA1", sha1)
        .add_header("X-JST-Auth", triple.token.clone())
        .bytes(body.clone().into())
        .await;
    response.assert_status_ok();

    let response = server
        .get("/read/downloads")
        .add_header("Origin", ORIGIN)
        .add_header("X-Path-Base64", encode_path("piece-0.bin"))
        .add_header("X-Offset", "0")
        .add_header("X-Length", body.len().to_string())
        .add_header("X-JST-Auth", triple.token.clone())
        .await;
    response.assert_status_ok();
    assert_eq!(response.as_bytes().as_ref(), body.as_slice());
}

#[tokio::test]
async fn write_with_sha1_mismatch_is_rejected_with_conflict() {
    let (server, _dir, triple) = test_server().await;
    let response = server
        .post("/write/downloads")
        .add_header("Origin", ORIGIN)
        .add_header("X-Path-Base64", encode_path("piece-1.bin"))
        .add_header("X-Offset", "0")
        .add_header("X-Expected-SHA1", "0".repeat(40))
        .add_header("X-JST-Auth", triple.token.clone())
        .bytes(b"mismatched content".to_vec().into())
        .await;
    response.assert_status(axum::http::StatusCode::CONFLICT);
}

#[tokio::test]
async fn write_with_path_traversal_is_rejected_with_bad_request() {
    let (server, _dir, triple) = test_server().await;
    let response = server
        .post("/write/downloads")
        .add_header("Origin", ORIGIN)
        .add_header("X-Path-Base64", encode_path("../../etc/passwd"))
        .add_header("X-Offset", "0")
        .add_header("X-JST-Auth", triple.token.clone())
        .bytes(b"nope".to_vec().into())
        .await;
    response.assert_status(axum::http::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn request_without_approved_origin_is_rejected() {
    let (server, _dir, triple) = test_server().await;
    let response = server
        .get("/read/downloads")
        .add_header("Origin", "https://evil.example")
        .add_header("X-Path-Base64", encode_path("piece-0.bin"))
        .add_header("X-Length", "4")
        .add_header("X-JST-Auth", triple.token.clone())
        .await;
    response.assert_status(axum::http::StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn request_against_unknown_root_key_is_not_found() {
    let (server, _dir, triple) = test_server().await;
    let response = server
        .get("/read/no-such-root")
        .add_header("Origin", ORIGIN)
        .add_header("X-Path-Base64", encode_path("piece-0.bin"))
        .add_header("X-Length", "4")
        .add_header("X-JST-Auth", triple.token.clone())
        .await;
    response.assert_status(axum::http::StatusCode::NOT_FOUND);
}
