//! The `/io` WebSocket endpoint: one session per connection, multiplexing virtual TCP/UDP
//! sockets over a single binary-framed WebSocket. See `spec.md §4.3`.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::any;
use axum::Router;
use futures::StreamExt;
use jstorrentd_types::{Frame, TokenStore};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::api::errors::Error;
use crate::api::pairing::{self, ReadOutcome};
use crate::config::IoDaemonConfig;
use crate::metrics::METRICS_ID_SESSIONS_OPEN;
use crate::session::IoSession;

/// Shared state for the `/io` route.
#[derive(Clone)]
pub struct IoState {
    pub(crate) config: Arc<IoDaemonConfig>,
    pub(crate) token_store: Arc<dyn TokenStore>,
    /// Cancelled on daemon shutdown; every session's cancellation token is a child of this.
    pub(crate) shutdown: CancellationToken,
}

impl IoState {
    /// Builds the state the `/io` route closes over.
    pub fn new(
        config: Arc<IoDaemonConfig>,
        token_store: Arc<dyn TokenStore>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            token_store,
            shutdown,
        }
    }
}

async fn upgrade(State(state): State<IoState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_failed_upgrade(|err| tracing::warn!("io websocket upgrade failed: {err:?}"))
        .on_upgrade(move |mut socket| async move {
            let close_frame = match run_session(&mut socket, state).await {
                Ok(()) => None,
                Err(err) => err.into_close_frame(),
            };
            if let Some(close_frame) = close_frame {
                let _ = socket.send(Message::Close(Some(close_frame))).await;
            }
        })
}

#[instrument(level = "debug", skip_all)]
async fn run_session(socket: &mut WebSocket, state: IoState) -> Result<(), Error> {
    let triple = pairing::handshake(socket, state.token_store.as_ref()).await?;
    tracing::info!(extension_id = %triple.extension_id, "io session authenticated");

    let (mut sink, mut stream) = socket.split();
    let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<Frame>(state.config.outbound_queue_capacity);
    let session_cancel = state.shutdown.child_token();
    let session = IoSession::new(Arc::clone(&state.config), outgoing_tx, session_cancel.clone());
    metrics::gauge!(METRICS_ID_SESSIONS_OPEN).increment(1.0);

    let result = loop {
        tokio::select! {
            biased;
            () = session_cancel.cancelled() => break Ok(()),
            outgoing = outgoing_rx.recv() => {
                match outgoing {
                    Some(frame) => {
                        if let Err(err) = pairing::send_frame(&mut sink, frame, state.config.slow_send_threshold).await {
                            break Err(err);
                        }
                    }
                    None => break Ok(()),
                }
            }
            incoming = pairing::read_frame(&mut stream) => {
                match incoming {
                    Ok(ReadOutcome::Frame(frame)) => {
                        session.dispatch_io(frame).await;
                        session.record_gauges();
                    }
                    Ok(ReadOutcome::DroppedVersion(request_id)) => {
                        session.enqueue(Frame::error(request_id, "unsupported frame version"));
                    }
                    Err(Error::ConnectionClosed) => break Ok(()),
                    Err(err) => break Err(err),
                }
            }
        }
    };

    session.shutdown();
    metrics::gauge!(METRICS_ID_SESSIONS_OPEN).decrement(1.0);
    result
}

/// Builds the `/io` route.
pub fn routes(state: IoState) -> Router {
    Router::new().route("/io", any(upgrade)).with_state(state)
}
