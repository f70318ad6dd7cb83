//! The `/control` WebSocket endpoint: broadcasts root-set changes and opaque application
//! events, and accepts `OPEN_FOLDER_PICKER` from the client. See `spec.md §4.9`.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::any;
use axum::Router;
use futures::StreamExt;
use jstorrentd_types::{Frame, Opcode, OpcodeSet, TokenStore, UserInteraction};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::api::errors::Error;
use crate::api::pairing::{self, ReadOutcome};
use crate::config::IoDaemonConfig;
use crate::metrics::METRICS_ID_SESSIONS_OPEN;
use crate::services::control_registry::ControlChannel;
use crate::session::IoSession;

/// Shared state for the `/control` route.
#[derive(Clone)]
pub struct ControlState {
    pub(crate) config: Arc<IoDaemonConfig>,
    pub(crate) token_store: Arc<dyn TokenStore>,
    pub(crate) user_interaction: Arc<dyn UserInteraction>,
    pub(crate) control_channel: ControlChannel,
    pub(crate) shutdown: CancellationToken,
}

impl ControlState {
    /// Builds the state the `/control` route closes over.
    pub fn new(
        config: Arc<IoDaemonConfig>,
        token_store: Arc<dyn TokenStore>,
        user_interaction: Arc<dyn UserInteraction>,
        control_channel: ControlChannel,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            token_store,
            user_interaction,
            control_channel,
            shutdown,
        }
    }
}

async fn upgrade(State(state): State<ControlState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_failed_upgrade(|err| tracing::warn!("control websocket upgrade failed: {err:?}"))
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
async fn run_session(socket: &mut WebSocket, state: ControlState) -> Result<(), Error> {
    let triple = pairing::handshake(socket, state.token_store.as_ref()).await?;
    tracing::info!(extension_id = %triple.extension_id, "control session authenticated");

    let (mut sink, mut stream) = socket.split();
    let (outgoing_tx, mut outgoing_rx) =
        mpsc::channel::<Frame>(state.config.outbound_queue_capacity);
    let session_cancel = state.shutdown.child_token();
    let session = IoSession::new(Arc::clone(&state.config), outgoing_tx, session_cancel.clone());
    let _registration = state.control_channel.register(Arc::clone(&session));
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
                        handle_control_frame(&session, &state, frame).await;
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

async fn handle_control_frame(session: &Arc<IoSession>, state: &ControlState, frame: Frame) {
    let Ok(opcode) = Opcode::try_from(frame.opcode) else {
        session.enqueue(Frame::error(frame.request_id, "unknown opcode"));
        return;
    };
    match opcode.set() {
        OpcodeSet::Handshake => {
            tracing::trace!(?opcode, "ignoring handshake opcode on authenticated session");
        }
        OpcodeSet::Control if opcode == Opcode::OpenFolderPicker => {
            state.user_interaction.open_folder_picker().await;
        }
        OpcodeSet::Control => {
            // ROOTS_CHANGED and EVENT are server-to-client only.
            session.enqueue(Frame::error(frame.request_id, "opcode not legal from client"));
        }
        OpcodeSet::Io => {
            session.enqueue(Frame::error(frame.request_id, "opcode not legal on /control"));
        }
    }
}

/// Builds the `/control` route.
pub fn routes(state: ControlState) -> Router {
    Router::new()
        .route("/control", any(upgrade))
        .with_state(state)
}
