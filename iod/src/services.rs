//! Internal services composing the daemon core.
//!
//! - [`connect_admission`] – bounded admission for outbound TCP connects.
//! - [`socket_options`] – socket options shared by every activated TCP stream.
//! - [`tcp_stream`] – the `TcpStream` virtual socket.
//! - [`tcp_listener`] – the `TcpListener` virtual socket.
//! - [`udp_socket`] – the `UdpSocket` virtual socket.
//! - [`tls_upgrade`] – `TCP_SECURE`'s TLS wrap.
//! - [`control_registry`] – the `/control` broadcast registry.
//! - [`local_backends`] – filesystem-backed reference implementations of the external
//!   collaborator traits, behind the `local-backends` feature.

pub mod connect_admission;
pub mod control_registry;
#[cfg(feature = "local-backends")]
pub mod local_backends;
pub mod socket_options;
pub mod tcp_listener;
pub mod tcp_stream;
pub mod tls_upgrade;
pub mod udp_socket;
