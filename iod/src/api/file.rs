//! The `GET /read/{rootKey}` and `POST /write/{rootKey}` byte-range file endpoints. See
//! `spec.md §4.7`.

use std::io::SeekFrom;
use std::path::{Component, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{DefaultBodyLimit, Path, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use base64::Engine as _;
use bytes::Bytes;
use jstorrentd_types::{RootKey, RootStore, RootStoreError, TokenStore};
use sha1::{Digest, Sha1};
use subtle::ConstantTimeEq as _;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::api::errors::Error;
use crate::config::IoDaemonConfig;
use crate::metrics::{METRICS_ID_FILE_REQUESTS, METRICS_ID_FILE_REQUEST_DURATION};

/// Shared state for the `/read` and `/write` routes.
#[derive(Clone)]
pub struct FileState {
    pub(crate) config: Arc<IoDaemonConfig>,
    pub(crate) token_store: Arc<dyn TokenStore>,
    pub(crate) root_store: Arc<dyn RootStore>,
}

impl FileState {
    /// Builds the state the file routes close over.
    pub fn new(
        config: Arc<IoDaemonConfig>,
        token_store: Arc<dyn TokenStore>,
        root_store: Arc<dyn RootStore>,
    ) -> Self {
        Self {
            config,
            token_store,
            root_store,
        }
    }
}

async fn read_file(
    State(state): State<FileState>,
    Path(root_key): Path<String>,
    headers: HeaderMap,
) -> Result<Response, Error> {
    let started = Instant::now();
    let result = read_file_inner(&state, &root_key, &headers).await;
    record_request("read", started, result.is_ok());
    result
}

async fn read_file_inner(
    state: &FileState,
    root_key: &str,
    headers: &HeaderMap,
) -> Result<Response, Error> {
    authenticate(state, headers).await?;
    let relative = decode_path_header(headers)?;
    let offset = header_u64(headers, "x-offset").unwrap_or(0);
    let length = header_u64(headers, "x-length")
        .ok_or_else(|| Error::Protocol("missing X-Length header".into()))?;

    let path = resolve_path(state, root_key, &relative).await?;
    let mut file = tokio::fs::File::open(&path).await?;
    file.seek(SeekFrom::Start(offset)).await?;

    let mut buf = vec![0u8; length as usize];
    if length > 0 {
        file.read_exact(&mut buf)
            .await
            .map_err(|err| Error::Internal(format!("short read: {err}")))?;
    }
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], buf).into_response())
}

async fn write_file(
    State(state): State<FileState>,
    Path(root_key): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, Error> {
    let started = Instant::now();
    let result = write_file_inner(&state, &root_key, &headers, body).await;
    record_request("write", started, result.is_ok());
    result
}

async fn write_file_inner(
    state: &FileState,
    root_key: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response, Error> {
    authenticate(state, headers).await?;
    let relative = decode_path_header(headers)?;
    let offset = header_u64(headers, "x-offset").unwrap_or(0);

    if let Some(expected) = headers.get("x-expected-sha1") {
        let expected = expected
            .to_str()
            .map_err(|_| Error::Protocol("X-Expected-SHA1 not ASCII".into()))?
            .to_ascii_lowercase();
        let actual = hex_lower(&Sha1::digest(&body));
        if actual != expected {
            return Err(Error::Conflict(format!(
                "sha1 mismatch: expected {expected}, got {actual}"
            )));
        }
    }

    let path = resolve_path(state, root_key, &relative).await?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)
        .await?;
    file.seek(SeekFrom::Start(offset)).await?;
    file.write_all(&body).await?;
    Ok(StatusCode::OK.into_response())
}

fn record_request(operation: &'static str, started: Instant, ok: bool) {
    metrics::counter!(METRICS_ID_FILE_REQUESTS, "operation" => operation, "outcome" => if ok { "ok" } else { "error" })
        .increment(1);
    metrics::histogram!(METRICS_ID_FILE_REQUEST_DURATION, "operation" => operation)
        .record(started.elapsed().as_millis() as f64);
}

async fn resolve_path(
    state: &FileState,
    root_key: &str,
    relative: &std::path::Path,
) -> Result<PathBuf, Error> {
    let handle = state
        .root_store
        .resolve_key(&RootKey::from(root_key))
        .await
        .map_err(root_store_error)?;
    handle.resolve(relative).map_err(root_store_error)
}

fn root_store_error(err: RootStoreError) -> Error {
    let message = err.to_string();
    match err {
        RootStoreError::UnknownKey(_) | RootStoreError::Unavailable(_) => Error::NotFound(message),
        RootStoreError::Other(_) => Error::Internal(message),
    }
}

async fn authenticate(state: &FileState, headers: &HeaderMap) -> Result<(), Error> {
    let stored = state
        .token_store
        .current()
        .await
        .ok_or_else(|| Error::Auth("no pairing established".into()))?;
    let presented = headers
        .get("x-jst-auth")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
        .or_else(|| {
            headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(str::to_owned)
        })
        .ok_or_else(|| Error::Auth("missing credentials".into()))?;

    let matches: bool = presented
        .as_bytes()
        .ct_eq(stored.token.as_bytes())
        .into();
    if matches {
        Ok(())
    } else {
        Err(Error::Auth("token mismatch".into()))
    }
}

fn decode_path_header(headers: &HeaderMap) -> Result<PathBuf, Error> {
    let encoded = headers
        .get("x-path-base64")
        .ok_or_else(|| Error::Protocol("missing X-Path-Base64 header".into()))?
        .to_str()
        .map_err(|_| Error::Protocol("X-Path-Base64 not ASCII".into()))?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| Error::Protocol("X-Path-Base64 is not valid base64".into()))?;
    let relative = String::from_utf8(decoded)
        .map_err(|_| Error::Protocol("decoded path is not UTF-8".into()))?;
    let path = PathBuf::from(relative);
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(Error::Protocol("path traversal rejected".into()));
    }
    Ok(path)
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.parse().ok()
}

fn hex_lower(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        write!(out, "{byte:02x}").expect("writing to a String never fails");
    }
    out
}

async fn require_approved_origin(
    State(state): State<FileState>,
    request: Request,
    next: Next,
) -> Result<Response, Error> {
    let origin = request
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok());
    match origin {
        Some(origin) if origin.starts_with(&state.config.approved_origin_prefix) => {
            Ok(next.run(request).await)
        }
        _ => Err(Error::Auth("origin not approved".into())),
    }
}

/// Builds the `/read/{rootKey}` and `/write/{rootKey}` routes.
pub fn routes(state: FileState) -> Router {
    let max_write_body_bytes = state.config.max_write_body_bytes;
    Router::new()
        .route("/read/{root_key}", get(read_file))
        .route(
            "/write/{root_key}",
            post(write_file).layer(DefaultBodyLimit::max(max_write_body_bytes)),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_approved_origin,
        ))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_parent_dir_segment() {
        let mut headers = HeaderMap::new();
        let encoded = base64::engine::general_purpose::STANDARD.encode("../etc/passwd");
        headers.insert("x-path-base64", encoded.parse().unwrap());
        assert!(matches!(
            decode_path_header(&headers),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn accepts_ordinary_relative_path() {
        let mut headers = HeaderMap::new();
        let encoded = base64::engine::general_purpose::STANDARD.encode("sub/file.bin");
        headers.insert("x-path-base64", encoded.parse().unwrap());
        let path = decode_path_header(&headers).unwrap();
        assert_eq!(path, PathBuf::from("sub/file.bin"));
    }

    #[test]
    fn hex_lower_matches_known_digest() {
        let digest = Sha1::digest(b"");
        assert_eq!(hex_lower(&digest), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
    }
}
