//! This module defines the [`Error`] a session or file request may encounter, and provides
//! methods to turn it into a WebSocket close frame or an HTTP response.

use axum::extract::ws::{CloseFrame, close_code};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::instrument;

/// All errors the daemon core can encounter while servicing a session or a file request.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed envelope or payload that is fatal to the connection (as opposed to the
    /// silently-dropped cases handled directly by the frame decoder).
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Missing, mismatched, or replayed credentials.
    #[error("authentication failed: {0}")]
    Auth(String),
    /// File or path unresolvable; also used for `TCP_CONNECT` DNS/network failures mapped
    /// into this kind at the API boundary.
    #[error("not found: {0}")]
    NotFound(String),
    /// Hash mismatch on write, or other content-validation failure.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Admission full, send queue full, outbound frame queue full, or disk full.
    #[error("exhausted: {0}")]
    Exhausted(String),
    /// Request body larger than the configured write-endpoint cap.
    #[error("payload too large: {0}")]
    TooLarge(String),
    /// Connect timeout or admission wait timeout.
    #[error("timeout: {0}")]
    Timeout(String),
    /// Cooperative cancellation (`TCP_CLOSE` during connect, session end). Propagates
    /// silently: callers must not emit a frame for this variant.
    #[error("cancelled")]
    Cancelled,
    /// The WebSocket peer closed the connection.
    #[error("connection closed by peer")]
    ConnectionClosed,
    /// A text frame or other unsupported message type was received; per the protocol, text
    /// frames MUST be ignored rather than answered with an error, but axum surfaces some
    /// unexpected variants (e.g. `Message::Ping` handled internally never reaches here, so
    /// this covers the rest) through this path.
    #[error("unexpected message")]
    UnexpectedMessage,
    #[error(transparent)]
    Axum(#[from] axum::Error),
    /// Anything unclassified.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Transforms the error into a [`CloseFrame`] for the `/io` and `/control` WebSocket
    /// endpoints, or `None` if no frame should be sent (cancellation, peer-initiated close).
    #[instrument(level = "debug", skip_all)]
    pub fn into_close_frame(self) -> Option<CloseFrame> {
        tracing::debug!("{self:?}");
        match self {
            Error::Cancelled | Error::ConnectionClosed => None,
            Error::Protocol(reason) => Some(CloseFrame {
                code: close_code::PROTOCOL,
                reason: reason.into(),
            }),
            Error::Auth(reason) => Some(CloseFrame {
                code: close_code::POLICY,
                reason: reason.into(),
            }),
            Error::UnexpectedMessage => Some(CloseFrame {
                code: close_code::UNSUPPORTED,
                reason: "unexpected message".into(),
            }),
            Error::Axum(err) => Some(CloseFrame {
                code: close_code::ERROR,
                reason: err.to_string().into(),
            }),
            Error::NotFound(reason)
            | Error::Conflict(reason)
            | Error::Exhausted(reason)
            | Error::TooLarge(reason) => Some(CloseFrame {
                code: close_code::ERROR,
                reason: reason.into(),
            }),
            Error::Timeout(reason) => Some(CloseFrame {
                code: close_code::ERROR,
                reason: reason.into(),
            }),
            Error::Internal(reason) => Some(CloseFrame {
                code: close_code::ERROR,
                reason: reason.into(),
            }),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        tracing::debug!("{self:?}");
        let status = match &self {
            Error::Protocol(_) => StatusCode::BAD_REQUEST,
            Error::Auth(_) => StatusCode::UNAUTHORIZED,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Exhausted(_) => StatusCode::INSUFFICIENT_STORAGE,
            Error::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::Cancelled => StatusCode::INTERNAL_SERVER_ERROR,
            Error::ConnectionClosed | Error::UnexpectedMessage | Error::Axum(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound => Error::NotFound(err.to_string()),
            _ if err.raw_os_error() == Some(libc_enospc()) => Error::Exhausted(err.to_string()),
            ErrorKind::TimedOut => Error::Timeout(err.to_string()),
            _ => Error::Internal(err.to_string()),
        }
    }
}

/// `ENOSPC` on the platforms this daemon targets. Kept as a tiny local helper rather than a
/// dependency on `libc` for a single constant.
const fn libc_enospc() -> i32 {
    28
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_produces_no_close_frame() {
        assert!(Error::Cancelled.into_close_frame().is_none());
    }

    #[test]
    fn not_found_io_error_maps_to_not_found() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "nope");
        assert!(matches!(Error::from(io_err), Error::NotFound(_)));
    }
}
