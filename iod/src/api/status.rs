//! `GET /status` — unauthenticated presence probe. See `spec.md §6`.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use jstorrentd_types::TokenStore;
use serde::Serialize;

/// Shared state for the `/status` route.
///
/// `bound_port` is a live cell rather than a plain `u16` because the configured port may be
/// `0` (ephemeral) — the builder fills in the actual bound port once the listener is up,
/// after this state has already been handed to the router.
#[derive(Clone)]
pub struct StatusState {
    pub(crate) bound_port: Arc<AtomicU16>,
    pub(crate) token_store: Arc<dyn TokenStore>,
}

impl StatusState {
    /// Builds the state the `/status` route closes over.
    pub fn new(bound_port: Arc<AtomicU16>, token_store: Arc<dyn TokenStore>) -> Self {
        Self {
            bound_port,
            token_store,
        }
    }
}

#[derive(Serialize)]
struct StatusResponse {
    port: u16,
    paired: bool,
}

async fn status(State(state): State<StatusState>) -> Json<StatusResponse> {
    let paired = state.token_store.current().await.is_some();
    Json(StatusResponse {
        port: state.bound_port.load(Ordering::Relaxed),
        paired,
    })
}

/// Builds the `/status` route.
pub fn routes(state: StatusState) -> Router {
    Router::new().route("/status", get(status)).with_state(state)
}
