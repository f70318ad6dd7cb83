//! The `TcpStream` virtual socket: outbound connect, activation, read/send pumps, and
//! close. See `spec.md §4.4` (restated in `SPEC_FULL.md §4`) for the full lifecycle.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use jstorrentd_types::{Frame, Opcode, SocketId};
use tokio::io::{AsyncRead, AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _, BufWriter};
use tokio::net::{TcpSocket, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::metrics::METRICS_ID_CONNECT_DURATION;
use crate::services::connect_admission::AdmissionError;
use crate::services::socket_options::configure_tcp_stream;
use crate::services::tls_upgrade;
use crate::session::IoSession;

/// A reader half, type-erased so plain and TLS-wrapped streams share one pump
/// implementation.
pub type BoxedReader = Pin<Box<dyn AsyncRead + Send>>;
/// A writer half, type-erased the same way.
pub type BoxedWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// A TCP stream that finished connecting (or was accepted) but has not yet been activated:
/// no read pump, no send pump, per the protocol's pending-activation design.
pub struct PendingTcpSocket {
    pub(crate) stream: TcpStream,
}

/// An activated TCP stream: pumps are running, bytes flow.
pub struct TcpStreamEntry {
    send_tx: mpsc::Sender<Bytes>,
    read_task: JoinHandle<()>,
    send_task: JoinHandle<()>,
    /// Whether this stream was promoted to TLS via `TCP_SECURE`.
    pub secure: bool,
}

impl TcpStreamEntry {
    /// Attempts a non-blocking enqueue of `data` onto the send-pump queue. Drops and logs
    /// on a full queue, per the protocol's non-blocking `send()` contract.
    pub fn send(&self, sid: SocketId, data: Bytes) {
        if self.send_tx.try_send(data).is_err() {
            tracing::warn!(%sid, "tcp stream send queue full, dropping frame");
        }
    }

    /// Aborts both pump tasks. Idempotent (aborting an already-finished task is a no-op).
    pub fn close(&self) {
        self.read_task.abort();
        self.send_task.abort();
    }
}

fn io_errno(err: &io::Error) -> u32 {
    err.raw_os_error().map(|code| code as u32).unwrap_or(u32::MAX)
}

/// Handles `TCP_CONNECT`: admission-controlled, asynchronous outbound connect.
pub async fn handle_connect(session: Arc<IoSession>, sid: SocketId, port: u16, hostname: String) {
    if session.pending_connects.lock().len() >= session.config.admission_fast_fail_threshold {
        tracing::debug!(%sid, "fast-failing TCP_CONNECT: too many pending connects");
        session.enqueue(connected_frame(sid, false, 0));
        return;
    }
    if hostname.is_empty() {
        session.enqueue(connected_frame(sid, false, 0));
        return;
    }

    let cancel = session.cancellation.child_token();
    session.pending_connects.lock().insert(sid, cancel.clone());
    crate::services::connect_admission::record_pending(session.pending_connects.lock().len());

    let session_for_task = Arc::clone(&session);
    tokio::spawn(async move {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            outcome = connect_with_admission(&session_for_task, port, &hostname) => Some(outcome),
        };

        session_for_task.pending_connects.lock().remove(&sid);
        crate::services::connect_admission::record_pending(
            session_for_task.pending_connects.lock().len(),
        );

        let Some(outcome) = outcome else {
            tracing::debug!(%sid, "TCP_CONNECT cancelled before completion");
            return;
        };

        match outcome {
            Ok(stream) => {
                session_for_task
                    .pending_tcp_sockets
                    .lock()
                    .insert(sid, PendingTcpSocket { stream });
                session_for_task.enqueue(connected_frame(sid, true, 0));
            }
            Err(err) => {
                tracing::debug!(%sid, error = %err, "TCP_CONNECT failed");
                session_for_task.enqueue(connected_frame(sid, false, io_errno(&err)));
            }
        }
    });
}

enum ConnectFailure {
    Timeout,
    Io(io::Error),
}

impl From<ConnectFailure> for io::Error {
    fn from(value: ConnectFailure) -> Self {
        match value {
            ConnectFailure::Timeout => io::Error::new(io::ErrorKind::TimedOut, "connect timeout"),
            ConnectFailure::Io(err) => err,
        }
    }
}

async fn connect_with_admission(
    session: &IoSession,
    port: u16,
    hostname: &str,
) -> Result<TcpStream, io::Error> {
    let _permit = session
        .admission
        .acquire(session.config.admission_wait_timeout)
        .await
        .map_err(|err| match err {
            AdmissionError::Timeout => {
                io::Error::new(io::ErrorKind::TimedOut, "admission wait timeout")
            }
            AdmissionError::Cancelled => {
                io::Error::new(io::ErrorKind::ConnectionAborted, "admission cancelled")
            }
        })?;

    let started = Instant::now();
    let result = tokio::time::timeout(session.config.connect_timeout, async {
        let addr = tokio::net::lookup_host((hostname, port))
            .await?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no address found"))?;
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        crate::services::socket_options::configure_tcp_socket(&socket)?;
        socket.connect(addr).await
    })
    .await;

    let stream = match result {
        Ok(Ok(stream)) => stream,
        Ok(Err(err)) => return Err(ConnectFailure::Io(err).into()),
        Err(_elapsed) => return Err(ConnectFailure::Timeout.into()),
    };

    configure_tcp_stream(&stream)?;
    metrics::histogram!(METRICS_ID_CONNECT_DURATION).record(started.elapsed().as_millis() as f64);
    Ok(stream)
}

fn connected_frame(sid: SocketId, ok: bool, errno: u32) -> Frame {
    let mut payload = Vec::with_capacity(9);
    payload.extend_from_slice(&sid.0.to_le_bytes());
    payload.push(if ok { 0 } else { 1 });
    payload.extend_from_slice(&errno.to_le_bytes());
    Frame::new(Opcode::TcpConnected as u8, 0, payload)
}

pub(crate) fn closed_frame(sid: SocketId, reason: u8, errno: u32) -> Frame {
    let mut payload = Vec::with_capacity(9);
    payload.extend_from_slice(&sid.0.to_le_bytes());
    payload.push(reason);
    payload.extend_from_slice(&errno.to_le_bytes());
    Frame::new(Opcode::TcpClose as u8, 0, payload)
}

fn recv_frame(sid: SocketId, data: &[u8]) -> Frame {
    let mut payload = Vec::with_capacity(4 + data.len());
    payload.extend_from_slice(&sid.0.to_le_bytes());
    payload.extend_from_slice(data);
    Frame::new(Opcode::TcpRecv as u8, 0, payload)
}

/// Handles `TCP_SEND`. Activates a pending stream on first send, or forwards to an
/// already-active one.
pub async fn handle_send(session: Arc<IoSession>, sid: SocketId, data: Bytes) {
    let already_active = session
        .tcp_streams
        .lock()
        .get(&sid)
        .map(|entry| entry.send_tx.clone());
    if let Some(send_tx) = already_active {
        if send_tx.try_send(data).is_err() {
            tracing::warn!(%sid, "tcp stream send queue full, dropping frame");
        }
        return;
    }

    let pending = session.pending_tcp_sockets.lock().remove(&sid);
    let Some(pending) = pending else {
        tracing::debug!(%sid, "TCP_SEND for unknown sid, dropping");
        return;
    };

    activate(Arc::clone(&session), sid, pending.stream, Some(data));
}

/// Handles `TCP_SECURE`: upgrades a pending stream to TLS, then activates it.
pub async fn handle_secure(session: Arc<IoSession>, sid: SocketId, flags: u8, hostname: String) {
    let pending = session.pending_tcp_sockets.lock().remove(&sid);
    let Some(pending) = pending else {
        tracing::debug!(%sid, "TCP_SECURE for non-pending sid");
        session.enqueue(secured_frame(sid, false));
        return;
    };

    match tls_upgrade::upgrade(pending.stream, &hostname, flags & 1 != 0).await {
        Ok(tls_stream) => {
            let (reader, writer) = tokio::io::split(tls_stream);
            let entry = spawn_pumps(Arc::clone(&session), sid, Box::pin(reader), Box::pin(writer), true);
            session.tcp_streams.lock().insert(sid, entry);
            session.enqueue(secured_frame(sid, true));
        }
        Err(err) => {
            tracing::debug!(%sid, error = %err, "TLS handshake failed");
            session.enqueue(secured_frame(sid, false));
        }
    }
}

fn secured_frame(sid: SocketId, ok: bool) -> Frame {
    let mut payload = Vec::with_capacity(5);
    payload.extend_from_slice(&sid.0.to_le_bytes());
    payload.push(if ok { 0 } else { 1 });
    Frame::new(Opcode::TcpSecured as u8, 0, payload)
}

fn activate(
    session: Arc<IoSession>,
    sid: SocketId,
    stream: TcpStream,
    first_payload: Option<Bytes>,
) {
    if let Err(err) = configure_tcp_stream(&stream) {
        tracing::warn!(%sid, error = %err, "failed to configure activated tcp stream");
    }
    let (reader, writer) = tokio::io::split(stream);
    let entry = spawn_pumps(Arc::clone(&session), sid, Box::pin(reader), Box::pin(writer), false);
    if let Some(data) = first_payload {
        entry.send(sid, data);
    }
    session.tcp_streams.lock().insert(sid, entry);
}

/// Activates an accepted connection directly into `tcpStreams` (accepted streams are never
/// pending, per `spec.md §4.5`).
pub fn activate_accepted(session: Arc<IoSession>, sid: SocketId, stream: TcpStream) {
    activate(session, sid, stream, None);
}

fn spawn_pumps(
    session: Arc<IoSession>,
    sid: SocketId,
    reader: BoxedReader,
    writer: BoxedWriter,
    secure: bool,
) -> TcpStreamEntry {
    let read_task = tokio::spawn(read_pump(Arc::clone(&session), sid, reader));

    let (send_tx, send_rx) = mpsc::channel(session.config.socket_send_queue_capacity);
    let send_task = tokio::spawn(send_pump(
        Arc::clone(&session),
        sid,
        writer,
        send_rx,
        session.config.send_flush_bytes_threshold,
        session.config.send_flush_small_item_bytes,
    ));

    TcpStreamEntry {
        send_tx,
        read_task,
        send_task,
        secure,
    }
}

async fn read_pump(session: Arc<IoSession>, sid: SocketId, mut reader: BoxedReader) {
    let mut buf = vec![0u8; 128 * 1024];
    let (reason, errno) = loop {
        match tokio::time::timeout(session.config.socket_read_timeout, reader.read(&mut buf)).await
        {
            Ok(Ok(0)) => break (0u8, 0u32),
            Ok(Ok(n)) => session.enqueue(recv_frame(sid, &buf[..n])),
            Ok(Err(err)) => break (1u8, io_errno(&err)),
            Err(_elapsed) => continue,
        }
    };

    session.enqueue(closed_frame(sid, reason, errno));
    if let Some(entry) = session.tcp_streams.lock().remove(&sid) {
        entry.close();
    }
}

async fn send_pump(
    session: Arc<IoSession>,
    sid: SocketId,
    writer: BoxedWriter,
    mut rx: mpsc::Receiver<Bytes>,
    flush_bytes_threshold: usize,
    flush_small_item_bytes: usize,
) {
    let mut buffered = BufWriter::with_capacity(flush_bytes_threshold, writer);
    let mut pending_bytes = 0usize;
    let failure = loop {
        let Some(data) = rx.recv().await else {
            break None;
        };
        let small = data.len() < flush_small_item_bytes;
        pending_bytes += data.len();
        if let Err(err) = buffered.write_all(&data).await {
            tracing::debug!(%sid, error = %err, "tcp send pump write failed");
            break Some(err);
        }
        if rx.is_empty() || pending_bytes >= flush_bytes_threshold || small {
            if let Err(err) = buffered.flush().await {
                tracing::debug!(%sid, error = %err, "tcp send pump flush failed");
                break Some(err);
            }
            pending_bytes = 0;
        }
    };

    // `rx` closing on its own (the stream's own read pump already tore it down, or the
    // session closed it) already emitted or will emit `TCP_CLOSE`; only a send-pump
    // failure discovered here needs to announce one itself, per spec.md §5.
    if let Some(err) = failure {
        session.enqueue(closed_frame(sid, 1, io_errno(&err)));
    }
    if let Some(entry) = session.tcp_streams.lock().remove(&sid) {
        entry.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connected_frame_encodes_status_and_errno() {
        let frame = connected_frame(SocketId(7), false, 42);
        assert_eq!(&frame.payload[0..4], &7u32.to_le_bytes());
        assert_eq!(frame.payload[4], 1);
        assert_eq!(&frame.payload[5..9], &42u32.to_le_bytes());
    }
}
