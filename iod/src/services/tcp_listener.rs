//! The `TcpListener` virtual socket: `TCP_LISTEN` / `TCP_STOP_LISTEN`, and the accept loop
//! that spawns children into the session's `tcpStreams` table.

use std::sync::Arc;

use jstorrentd_types::{Frame, Opcode, SocketId};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::services::tcp_stream::activate_accepted;
use crate::session::IoSession;

/// A listening socket and the handle to its accept loop.
pub struct TcpListenerEntry {
    cancel: CancellationToken,
    accept_task: tokio::task::JoinHandle<()>,
}

impl TcpListenerEntry {
    /// Stops the accept loop. Accepted streams already installed in `tcpStreams` are
    /// unaffected.
    pub fn close(&self) {
        self.cancel.cancel();
        self.accept_task.abort();
    }
}

fn listen_result_frame(sid: SocketId, ok: bool, bound_port: u16, errno: u32) -> Frame {
    let mut payload = Vec::with_capacity(11);
    payload.extend_from_slice(&sid.0.to_le_bytes());
    payload.push(if ok { 0 } else { 1 });
    payload.extend_from_slice(&bound_port.to_le_bytes());
    payload.extend_from_slice(&errno.to_le_bytes());
    Frame::new(Opcode::TcpListenResult as u8, 0, payload)
}

fn accept_frame(listener_sid: SocketId, new_sid: SocketId, remote_port: u16, remote_addr: &str) -> Frame {
    let mut payload = Vec::with_capacity(10 + remote_addr.len());
    payload.extend_from_slice(&listener_sid.0.to_le_bytes());
    payload.extend_from_slice(&new_sid.0.to_le_bytes());
    payload.extend_from_slice(&remote_port.to_le_bytes());
    payload.extend_from_slice(remote_addr.as_bytes());
    Frame::new(Opcode::TcpAccept as u8, 0, payload)
}

/// Handles `TCP_LISTEN`. `bind_addr` is accepted but currently ignored: implementations
/// bind to all local interfaces, per the protocol table.
pub async fn handle_listen(session: Arc<IoSession>, sid: SocketId, port: u16) {
    let result = TcpListener::bind(("0.0.0.0", port)).await;
    let listener = match result {
        Ok(listener) => listener,
        Err(err) => {
            tracing::debug!(%sid, error = %err, "TCP_LISTEN bind failed");
            session.enqueue(listen_result_frame(
                sid,
                false,
                0,
                err.raw_os_error().map(|code| code as u32).unwrap_or(u32::MAX),
            ));
            return;
        }
    };

    let bound_port = match listener.local_addr() {
        Ok(addr) => addr.port(),
        Err(_) => port,
    };
    session.enqueue(listen_result_frame(sid, true, bound_port, 0));

    let cancel = session.cancellation.child_token();
    let accept_task = tokio::spawn(accept_loop(
        Arc::clone(&session),
        sid,
        listener,
        cancel.clone(),
    ));

    session
        .tcp_listeners
        .lock()
        .insert(sid, TcpListenerEntry { cancel, accept_task });
}

async fn accept_loop(
    session: Arc<IoSession>,
    listener_sid: SocketId,
    listener: TcpListener,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, remote_addr)) => {
                        let new_sid = session.sid_alloc.next();
                        session.enqueue(accept_frame(
                            listener_sid,
                            new_sid,
                            remote_addr.port(),
                            &remote_addr.ip().to_string(),
                        ));
                        activate_accepted(Arc::clone(&session), new_sid, stream);
                    }
                    Err(err) => {
                        tracing::debug!(%listener_sid, error = %err, "accept failed");
                    }
                }
            }
        }
    }
}

/// Handles `TCP_STOP_LISTEN`. Idempotent.
pub async fn handle_stop_listen(session: Arc<IoSession>, sid: SocketId) {
    if let Some(entry) = session.tcp_listeners.lock().remove(&sid) {
        entry.close();
    }
}
