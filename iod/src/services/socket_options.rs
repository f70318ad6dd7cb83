//! Socket options applied uniformly to every activated TCP stream, whether connected
//! outbound, accepted on a listener, or wrapped in TLS.
//!
//! `tokio::net::TcpStream` does not expose receive-buffer sizing or keep-alive directly, so
//! this goes through `socket2`'s `SockRef`, the same idiom used by async runtimes and proxy
//! crates across the ecosystem to reach options `tokio` itself doesn't wrap.

use std::io;
use std::time::Duration;

use socket2::SockRef;
use tokio::net::TcpStream;

/// Receive buffer size applied to every activated TCP stream (256 KiB, per the protocol's
/// socket-option table).
pub const TCP_RECV_BUFFER_BYTES: usize = 256 * 1024;

/// Applies `tcpNoDelay=true`, a 256 KiB receive buffer, and TCP keep-alive to `stream`.
pub fn configure_tcp_stream(stream: &TcpStream) -> io::Result<()> {
    stream.set_nodelay(true)?;
    let sock_ref = SockRef::from(stream);
    sock_ref.set_recv_buffer_size(TCP_RECV_BUFFER_BYTES)?;
    sock_ref.set_keepalive(true)?;
    sock_ref.set_tcp_keepalive(&socket2::TcpKeepalive::new().with_time(Duration::from_secs(60)))?;
    Ok(())
}

/// Sets the receive buffer size on a not-yet-connected `tokio::net::TcpSocket`, so the
/// option is in effect before the first byte arrives.
pub fn configure_tcp_socket(socket: &tokio::net::TcpSocket) -> io::Result<()> {
    socket.set_recv_buffer_size(TCP_RECV_BUFFER_BYTES as u32)
}
