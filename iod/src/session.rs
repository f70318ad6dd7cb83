//! `SessionMux`: per-WebSocket session state, frame dispatch, and the socket tables frames
//! are routed through. See `spec.md §4.3`.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use jstorrentd_types::{Frame, Opcode, OpcodeSet, ServerSidAllocator, SocketId};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::IoDaemonConfig;
use crate::metrics::{
    METRICS_ID_OUTBOUND_FRAMES_DROPPED, METRICS_ID_TCP_LISTENERS_OPEN, METRICS_ID_TCP_STREAMS_OPEN,
    METRICS_ID_UDP_SOCKETS_OPEN,
};
use crate::services::connect_admission::ConnectAdmission;
use crate::services::tcp_listener::TcpListenerEntry;
use crate::services::tcp_stream::{closed_frame, PendingTcpSocket, TcpStreamEntry};
use crate::services::udp_socket::UdpSocketEntry;
use crate::services::{tcp_listener, tcp_stream, udp_socket};

/// The per-`/io`-session state machine: socket tables, outbound queue, and dispatch.
///
/// Owns every `TcpStream`, `TcpListener`, `UdpSocket`, and pending-connect task it
/// contains; nothing outside the session holds a reference after [`IoSession::shutdown`]
/// runs.
pub struct IoSession {
    pub(crate) config: Arc<IoDaemonConfig>,
    outgoing: mpsc::Sender<Frame>,
    drop_counter: AtomicU64,
    pub(crate) sid_alloc: ServerSidAllocator,
    pub(crate) admission: ConnectAdmission,
    pub(crate) tcp_streams: Mutex<HashMap<SocketId, TcpStreamEntry>>,
    pub(crate) tcp_listeners: Mutex<HashMap<SocketId, TcpListenerEntry>>,
    pub(crate) udp_sockets: Mutex<HashMap<SocketId, UdpSocketEntry>>,
    pub(crate) pending_tcp_sockets: Mutex<HashMap<SocketId, PendingTcpSocket>>,
    pub(crate) pending_connects: Mutex<HashMap<SocketId, CancellationToken>>,
    /// Cancelled on session end; every spawned task for this session derives a child of
    /// this token so it observes shutdown cooperatively.
    pub(crate) cancellation: CancellationToken,
}

impl IoSession {
    /// Creates a new session with an empty socket table set.
    pub fn new(
        config: Arc<IoDaemonConfig>,
        outgoing: mpsc::Sender<Frame>,
        cancellation: CancellationToken,
    ) -> Arc<Self> {
        let admission = ConnectAdmission::new(config.admission_capacity);
        Arc::new(Self {
            config,
            outgoing,
            drop_counter: AtomicU64::new(0),
            sid_alloc: ServerSidAllocator::default(),
            admission,
            tcp_streams: Mutex::new(HashMap::new()),
            tcp_listeners: Mutex::new(HashMap::new()),
            udp_sockets: Mutex::new(HashMap::new()),
            pending_tcp_sockets: Mutex::new(HashMap::new()),
            pending_connects: Mutex::new(HashMap::new()),
            cancellation,
        })
    }

    /// Non-blocking enqueue onto the outbound queue. Drops and counts on a full queue,
    /// per the protocol's non-blocking `send()` contract — this method never suspends the
    /// caller, so it is safe to call from the single-threaded inbound dispatch loop.
    pub fn enqueue(&self, frame: Frame) {
        if self.outgoing.try_send(frame).is_err() {
            let total = self.drop_counter.fetch_add(1, Ordering::Relaxed) + 1;
            metrics::counter!(METRICS_ID_OUTBOUND_FRAMES_DROPPED).increment(1);
            if total.is_power_of_two() {
                tracing::warn!(dropped_total = total, "outbound queue full, dropping frames");
            }
        }
    }

    /// Total frames dropped from the outbound queue over this session's lifetime.
    pub fn dropped_frame_count(&self) -> u64 {
        self.drop_counter.load(Ordering::Relaxed)
    }

    /// Dispatches a single decoded IO-set frame to the matching handler.
    ///
    /// Per `spec.md §4.3`, this must either complete quickly or spawn a background task —
    /// every branch below does the latter for anything that performs real I/O.
    pub async fn dispatch_io(self: &Arc<Self>, frame: Frame) {
        let Ok(opcode) = Opcode::try_from(frame.opcode) else {
            self.enqueue(Frame::error(frame.request_id, "unknown opcode"));
            return;
        };
        if opcode.set() != OpcodeSet::Io {
            if opcode.set() == OpcodeSet::Handshake {
                tracing::trace!(?opcode, "ignoring handshake opcode on authenticated session");
                return;
            }
            self.enqueue(Frame::error(frame.request_id, "opcode not legal on /io"));
            return;
        }

        match opcode {
            Opcode::TcpConnect => {
                let Some((sid, port, hostname)) = parse_tcp_connect(&frame.payload) else {
                    tracing::debug!("malformed TCP_CONNECT payload, dropping");
                    return;
                };
                tcp_stream::handle_connect(Arc::clone(self), sid, port, hostname).await;
            }
            Opcode::TcpSend => {
                let Some((sid, data)) = parse_sid_and_data(&frame.payload) else {
                    return;
                };
                tcp_stream::handle_send(Arc::clone(self), sid, data).await;
            }
            Opcode::TcpClose => {
                let Some(sid) = parse_sid(&frame.payload) else {
                    return;
                };
                self.close_tcp_stream(sid);
            }
            Opcode::TcpListen => {
                let Some((sid, port)) = parse_sid_and_port(&frame.payload) else {
                    return;
                };
                tcp_listener::handle_listen(Arc::clone(self), sid, port).await;
            }
            Opcode::TcpStopListen => {
                let Some(sid) = parse_sid(&frame.payload) else {
                    return;
                };
                tcp_listener::handle_stop_listen(Arc::clone(self), sid).await;
            }
            Opcode::TcpSecure => {
                let Some((sid, flags, hostname)) = parse_tcp_secure(&frame.payload) else {
                    return;
                };
                tcp_stream::handle_secure(Arc::clone(self), sid, flags, hostname).await;
            }
            Opcode::UdpBind => {
                let Some((sid, port)) = parse_sid_and_port(&frame.payload) else {
                    return;
                };
                udp_socket::handle_bind(Arc::clone(self), sid, port).await;
            }
            Opcode::UdpSend => {
                let Some((sid, dest)) = parse_udp_send(&frame.payload) else {
                    return;
                };
                let sockets = self.udp_sockets.lock();
                if let Some(entry) = sockets.get(&sid) {
                    entry.send(sid, dest.0, dest.1);
                }
            }
            Opcode::UdpClose => {
                let Some(sid) = parse_sid(&frame.payload) else {
                    return;
                };
                udp_socket::handle_close(Arc::clone(self), sid).await;
            }
            Opcode::UdpJoinMulticast => {
                let Some((sid, group)) = parse_sid_and_string(&frame.payload) else {
                    return;
                };
                udp_socket::handle_multicast(Arc::clone(self), sid, group, true).await;
            }
            Opcode::UdpLeaveMulticast => {
                let Some((sid, group)) = parse_sid_and_string(&frame.payload) else {
                    return;
                };
                udp_socket::handle_multicast(Arc::clone(self), sid, group, false).await;
            }
            _ => unreachable!("opcode.set() == Io guarantees one of the above"),
        }
    }

    fn close_tcp_stream(&self, sid: SocketId) {
        if let Some(cancel) = self.pending_connects.lock().remove(&sid) {
            cancel.cancel();
        }
        self.pending_tcp_sockets.lock().remove(&sid);
        if let Some(entry) = self.tcp_streams.lock().remove(&sid) {
            entry.close();
            // Confirm the client's own TCP_CLOSE against a live stream, per spec.md §8's
            // round-trip scenario: a reason of 0 here means "closed as requested", not an error.
            self.enqueue(closed_frame(sid, 0, 0));
        }
    }

    /// Publishes gauge readings for this session's socket tables. Called periodically or
    /// after significant table changes by the hosting router, not on every frame.
    pub fn record_gauges(&self) {
        metrics::gauge!(METRICS_ID_TCP_STREAMS_OPEN).set(self.tcp_streams.lock().len() as f64);
        metrics::gauge!(METRICS_ID_TCP_LISTENERS_OPEN)
            .set(self.tcp_listeners.lock().len() as f64);
        metrics::gauge!(METRICS_ID_UDP_SOCKETS_OPEN).set(self.udp_sockets.lock().len() as f64);
    }

    /// Tears down every owned resource: cancels pending connects, closes every virtual
    /// socket, and cancels the session's cancellation token so every spawned task observes
    /// shutdown. Idempotent.
    pub fn shutdown(&self) {
        for (_, cancel) in self.pending_connects.lock().drain() {
            cancel.cancel();
        }
        self.pending_tcp_sockets.lock().clear();
        for (_, entry) in self.tcp_streams.lock().drain() {
            entry.close();
        }
        for (_, entry) in self.tcp_listeners.lock().drain() {
            entry.close();
        }
        for (_, entry) in self.udp_sockets.lock().drain() {
            entry.close();
        }
        self.cancellation.cancel();
        self.record_gauges();
    }
}

fn parse_sid(payload: &[u8]) -> Option<SocketId> {
    (payload.len() >= 4).then(|| SocketId(u32::from_le_bytes(payload[0..4].try_into().unwrap())))
}

fn parse_sid_and_data(payload: &[u8]) -> Option<(SocketId, bytes::Bytes)> {
    if payload.len() < 4 {
        return None;
    }
    let sid = SocketId(u32::from_le_bytes(payload[0..4].try_into().unwrap()));
    Some((sid, bytes::Bytes::copy_from_slice(&payload[4..])))
}

fn parse_sid_and_port(payload: &[u8]) -> Option<(SocketId, u16)> {
    if payload.len() < 6 {
        return None;
    }
    let sid = SocketId(u32::from_le_bytes(payload[0..4].try_into().unwrap()));
    let port = u16::from_le_bytes(payload[4..6].try_into().unwrap());
    Some((sid, port))
}

fn parse_sid_and_string(payload: &[u8]) -> Option<(SocketId, String)> {
    if payload.len() < 4 {
        return None;
    }
    let sid = SocketId(u32::from_le_bytes(payload[0..4].try_into().unwrap()));
    let text = String::from_utf8_lossy(&payload[4..]).into_owned();
    Some((sid, text))
}

fn parse_tcp_connect(payload: &[u8]) -> Option<(SocketId, u16, String)> {
    if payload.len() < 6 {
        return None;
    }
    let sid = SocketId(u32::from_le_bytes(payload[0..4].try_into().unwrap()));
    let port = u16::from_le_bytes(payload[4..6].try_into().unwrap());
    let hostname = String::from_utf8_lossy(&payload[6..]).into_owned();
    Some((sid, port, hostname))
}

fn parse_tcp_secure(payload: &[u8]) -> Option<(SocketId, u8, String)> {
    if payload.len() < 5 {
        return None;
    }
    let sid = SocketId(u32::from_le_bytes(payload[0..4].try_into().unwrap()));
    let flags = payload[4];
    let hostname = String::from_utf8_lossy(&payload[5..]).into_owned();
    Some((sid, flags, hostname))
}

fn parse_udp_send(payload: &[u8]) -> Option<(SocketId, (std::net::SocketAddr, bytes::Bytes))> {
    if payload.len() < 8 {
        return None;
    }
    let sid = SocketId(u32::from_le_bytes(payload[0..4].try_into().unwrap()));
    let dest_port = u16::from_le_bytes(payload[4..6].try_into().unwrap());
    let addr_len = u16::from_le_bytes(payload[6..8].try_into().unwrap()) as usize;
    if payload.len() < 8 + addr_len {
        return None;
    }
    let addr_str = std::str::from_utf8(&payload[8..8 + addr_len]).ok()?;
    let ip: std::net::IpAddr = addr_str.parse().ok()?;
    let data = bytes::Bytes::copy_from_slice(&payload[8 + addr_len..]);
    Some((sid, ((ip, dest_port).into(), data)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser as _;

    fn session() -> (Arc<IoSession>, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(16);
        let config = Arc::new(IoDaemonConfig::parse_from(["jstorrentd"]));
        (IoSession::new(config, tx, CancellationToken::new()), rx)
    }

    #[test]
    fn parses_tcp_connect_payload() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&1u32.to_le_bytes());
        payload.extend_from_slice(&7u16.to_le_bytes());
        payload.extend_from_slice(b"127.0.0.1");
        let (sid, port, host) = parse_tcp_connect(&payload).unwrap();
        assert_eq!(sid, SocketId(1));
        assert_eq!(port, 7);
        assert_eq!(host, "127.0.0.1");
    }

    #[tokio::test]
    async fn tcp_connect_with_empty_hostname_fast_fails() {
        let (session, mut rx) = session();
        let mut payload = Vec::new();
        payload.extend_from_slice(&1u32.to_le_bytes());
        payload.extend_from_slice(&7u16.to_le_bytes());
        let frame = Frame::new(Opcode::TcpConnect as u8, 0, payload);
        session.dispatch_io(frame).await;
        let reply = rx.recv().await.unwrap();
        assert_eq!(reply.opcode, Opcode::TcpConnected as u8);
        assert_eq!(reply.payload[4], 1);
    }

    #[test]
    fn short_frame_is_dropped_not_errored() {
        assert!(parse_sid(&[1, 2, 3]).is_none());
    }
}
