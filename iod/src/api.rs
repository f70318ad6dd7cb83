//! HTTP and WebSocket surface of the daemon.
//!
//! - [`errors`] – the shared [`errors::Error`] type and its WebSocket-close/HTTP-response
//!   mappings.
//! - [`pairing`] – pre-daemon pairing approval and the in-band auth handshake shared by
//!   `/io` and `/control`.
//! - [`io`] – the `/io` multiplexing WebSocket route.
//! - [`control`] – the `/control` broadcast WebSocket route.
//! - [`file`] – the `/read/{rootKey}` and `/write/{rootKey}` byte-range file routes.
//! - [`status`] – the unauthenticated `/status` presence probe.

pub mod control;
pub mod errors;
pub mod file;
pub mod io;
pub mod pairing;
pub mod status;
