//! The `UdpSocket` virtual socket: bind, receive/send pumps, multicast join/leave.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use bytes::Bytes;
use jstorrentd_types::{Frame, Opcode, SocketId};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket as TokioUdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::session::IoSession;

/// A datagram to be sent: destination plus payload.
pub struct OutgoingDatagram {
    pub dest: SocketAddr,
    pub data: Bytes,
}

/// A bound UDP socket with its receive and send pumps running.
pub struct UdpSocketEntry {
    send_tx: mpsc::Sender<OutgoingDatagram>,
    recv_task: JoinHandle<()>,
    send_task: JoinHandle<()>,
    socket: Arc<TokioUdpSocket>,
}

impl UdpSocketEntry {
    /// Non-blocking enqueue of an outbound datagram.
    pub fn send(&self, sid: SocketId, dest: SocketAddr, data: Bytes) {
        if self
            .send_tx
            .try_send(OutgoingDatagram { dest, data })
            .is_err()
        {
            tracing::warn!(%sid, "udp send queue full, dropping datagram");
        }
    }

    /// Best-effort multicast join.
    pub fn join_multicast(&self, group: IpAddr) -> std::io::Result<()> {
        match group {
            IpAddr::V4(group) => self.socket.join_multicast_v4(group, Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(group) => self.socket.join_multicast_v6(&group, 0),
        }
    }

    /// Best-effort multicast leave.
    pub fn leave_multicast(&self, group: IpAddr) -> std::io::Result<()> {
        match group {
            IpAddr::V4(group) => self.socket.leave_multicast_v4(group, Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(group) => self.socket.leave_multicast_v6(&group, 0),
        }
    }

    /// Stops both pumps.
    pub fn close(&self) {
        self.recv_task.abort();
        self.send_task.abort();
    }
}

fn bound_frame(sid: SocketId, ok: bool, bound_port: u16, errno: u32) -> Frame {
    let mut payload = Vec::with_capacity(11);
    payload.extend_from_slice(&sid.0.to_le_bytes());
    payload.push(if ok { 0 } else { 1 });
    payload.extend_from_slice(&bound_port.to_le_bytes());
    payload.extend_from_slice(&errno.to_le_bytes());
    Frame::new(Opcode::UdpBound as u8, 0, payload)
}

fn recv_datagram_frame(sid: SocketId, src: SocketAddr, data: &[u8]) -> Frame {
    let addr = src.ip().to_string();
    let mut payload = Vec::with_capacity(8 + addr.len() + data.len());
    payload.extend_from_slice(&sid.0.to_le_bytes());
    payload.extend_from_slice(&src.port().to_le_bytes());
    payload.extend_from_slice(&(addr.len() as u16).to_le_bytes());
    payload.extend_from_slice(addr.as_bytes());
    payload.extend_from_slice(data);
    Frame::new(Opcode::UdpRecv as u8, 0, payload)
}

/// Handles `UDP_BIND`. `bind_addr` is accepted but ignored, consistent with `TCP_LISTEN`:
/// implementations bind to all local interfaces.
pub async fn handle_bind(session: Arc<IoSession>, sid: SocketId, port: u16) {
    let socket = match bind_reuseable(port) {
        Ok(socket) => socket,
        Err(err) => {
            tracing::debug!(%sid, error = %err, "UDP_BIND failed");
            session.enqueue(bound_frame(
                sid,
                false,
                0,
                err.raw_os_error().map(|code| code as u32).unwrap_or(u32::MAX),
            ));
            return;
        }
    };

    let _ = socket.set_multicast_ttl_v4(1);
    let bound_port = socket.local_addr().map(|addr| addr.port()).unwrap_or(port);
    let socket = Arc::new(socket);

    // UDP_BOUND must reach the client before any UDP_RECV for this sid, so enqueue it
    // before the recv pump that could produce one is even spawned.
    session.enqueue(bound_frame(sid, true, bound_port, 0));

    let (send_tx, send_rx) = mpsc::channel(session.config.socket_send_queue_capacity);
    let recv_task = tokio::spawn(recv_pump(Arc::clone(&session), sid, Arc::clone(&socket)));
    let send_task = tokio::spawn(send_pump(Arc::clone(&socket), send_rx));

    session.udp_sockets.lock().insert(
        sid,
        UdpSocketEntry {
            send_tx,
            recv_task,
            send_task,
            socket,
        },
    );
}

fn bind_reuseable(port: u16) -> std::io::Result<TokioUdpSocket> {
    let domain = Domain::IPV4;
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    let addr: SocketAddr = (Ipv4Addr::UNSPECIFIED, port).into();
    socket.bind(&addr.into())?;
    socket.set_nonblocking(true)?;
    TokioUdpSocket::from_std(socket.into())
}

async fn recv_pump(session: Arc<IoSession>, sid: SocketId, socket: Arc<TokioUdpSocket>) {
    let mut buf = vec![0u8; 65_535];
    loop {
        match tokio::time::timeout(session.config.socket_read_timeout, socket.recv_from(&mut buf))
            .await
        {
            Ok(Ok((n, src))) => session.enqueue(recv_datagram_frame(sid, src, &buf[..n])),
            Ok(Err(err)) => {
                tracing::debug!(%sid, error = %err, "udp recv pump error, stopping");
                break;
            }
            Err(_elapsed) => continue,
        }
    }
    if let Some(entry) = session.udp_sockets.lock().remove(&sid) {
        entry.close();
    }
}

async fn send_pump(socket: Arc<TokioUdpSocket>, mut rx: mpsc::Receiver<OutgoingDatagram>) {
    while let Some(datagram) = rx.recv().await {
        if let Err(err) = socket.send_to(&datagram.data, datagram.dest).await {
            tracing::debug!(dest = %datagram.dest, error = %err, "udp send failed, continuing");
        }
    }
}

/// Handles `UDP_CLOSE`. Idempotent.
pub async fn handle_close(session: Arc<IoSession>, sid: SocketId) {
    if let Some(entry) = session.udp_sockets.lock().remove(&sid) {
        entry.close();
    }
}

/// Handles `UDP_JOIN_MULTICAST` / `UDP_LEAVE_MULTICAST`. Best-effort: failures are logged,
/// not reported to the peer.
pub async fn handle_multicast(session: Arc<IoSession>, sid: SocketId, group: String, join: bool) {
    let Ok(group_addr) = group.parse::<IpAddr>() else {
        tracing::debug!(%sid, %group, "invalid multicast group address");
        return;
    };
    let sockets = session.udp_sockets.lock();
    let Some(entry) = sockets.get(&sid) else {
        tracing::debug!(%sid, "multicast request for unknown udp socket");
        return;
    };
    let result = if join {
        entry.join_multicast(group_addr)
    } else {
        entry.leave_multicast(group_addr)
    };
    if let Err(err) = result {
        tracing::debug!(%sid, %group, error = %err, "multicast operation failed");
    }
}
