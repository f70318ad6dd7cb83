//! Pairing (pre-daemon, one-shot approval) and in-band auth handshake (every new session).
//! See `spec.md §4.2`.

use std::time::{Duration, Instant};

use axum::extract::ws::{self, WebSocket};
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use jstorrentd_types::{Frame, FrameDecodeError, Opcode, PairingTriple, TokenStore};

use crate::api::errors::Error;
use crate::metrics::METRICS_ID_SLOW_SENDS;

/// The result of reading one frame off a split WebSocket stream, post-handshake.
pub(crate) enum ReadOutcome {
    /// A well-formed frame.
    Frame(Frame),
    /// A frame with an unsupported version was dropped; the caller should enqueue an
    /// `ERROR` frame referencing this `request_id` rather than reply directly (the stream
    /// half has no write capability once split).
    DroppedVersion(u32),
}

/// Asks the external collaborator to approve a proposed pairing triple and, on approval,
/// persists it. Returns whether the pairing was approved. Denial or dismissal leaves the
/// stored triple unchanged.
pub async fn approve_pairing(
    proposed: PairingTriple,
    token_store: &dyn TokenStore,
    user_interaction: &dyn jstorrentd_types::UserInteraction,
) -> Result<bool, Error> {
    let is_replace = token_store.current().await.is_some();
    if !user_interaction
        .show_pairing_approval(&proposed, is_replace)
        .await
    {
        return Ok(false);
    }
    token_store
        .replace(proposed)
        .await
        .map_err(|err| Error::Internal(err.to_string()))?;
    Ok(true)
}

/// Runs the in-band handshake required on every new `/io` or `/control` WebSocket: waits
/// for `CLIENT_HELLO`, replies `SERVER_HELLO`, requires an `AUTH` frame whose triple matches
/// `TokenStore.current()`. Returns the authenticated triple on success.
pub(crate) async fn handshake(
    socket: &mut WebSocket,
    token_store: &dyn TokenStore,
) -> Result<PairingTriple, Error> {
    let hello = read_handshake_frame(socket).await?;
    if Opcode::try_from(hello.opcode) != Ok(Opcode::ClientHello) {
        return Err(Error::Protocol("expected CLIENT_HELLO".into()));
    }
    send_handshake_frame(
        socket,
        Frame::new(Opcode::ServerHello as u8, hello.request_id, Bytes::new()),
    )
    .await?;

    let auth = read_handshake_frame(socket).await?;
    if Opcode::try_from(auth.opcode) != Ok(Opcode::Auth) {
        return Err(Error::Protocol("expected AUTH".into()));
    }
    let Some(presented) = parse_auth_payload(&auth.payload) else {
        send_handshake_frame(
            socket,
            auth_result(auth.request_id, false, "malformed AUTH payload"),
        )
        .await?;
        return Err(Error::Auth("malformed AUTH payload".into()));
    };

    let stored = token_store.current().await;
    let authenticated = stored.as_ref().is_some_and(|stored| stored.matches(&presented));
    if authenticated {
        send_handshake_frame(socket, auth_result(auth.request_id, true, "")).await?;
        Ok(presented)
    } else {
        send_handshake_frame(
            socket,
            auth_result(auth.request_id, false, "pairing mismatch"),
        )
        .await?;
        Err(Error::Auth("pairing mismatch".into()))
    }
}

fn auth_result(request_id: u32, ok: bool, reason: &str) -> Frame {
    let mut payload = vec![u8::from(!ok)];
    if !ok {
        payload.extend_from_slice(reason.as_bytes());
    }
    Frame::new(Opcode::AuthResult as u8, request_id, payload)
}

fn parse_auth_payload(payload: &[u8]) -> Option<PairingTriple> {
    let rest = payload.get(1..)?;
    let mut parts = rest.splitn(3, |&b| b == 0);
    let token = parts.next()?;
    let extension_id = parts.next()?;
    let install_id = parts.next()?;
    Some(PairingTriple::new(
        String::from_utf8_lossy(token).into_owned(),
        String::from_utf8_lossy(extension_id).into_owned(),
        String::from_utf8_lossy(install_id).into_owned(),
    ))
}

/// Reads the next frame off `socket`, silently skipping text frames (must be ignored per the
/// protocol) and replying with an `ERROR` frame (then continuing) on a wrong-version frame.
/// Used only during the handshake, before the socket is split.
async fn read_handshake_frame(socket: &mut WebSocket) -> Result<Frame, Error> {
    loop {
        match socket.recv().await.ok_or(Error::ConnectionClosed)?? {
            ws::Message::Binary(bytes) => match Frame::decode(&bytes) {
                Ok(frame) => return Ok(frame),
                Err(FrameDecodeError::TooShort) => continue,
                Err(FrameDecodeError::UnsupportedVersion { request_id }) => {
                    send_handshake_frame(
                        socket,
                        Frame::error(request_id, "unsupported frame version"),
                    )
                    .await?;
                    continue;
                }
            },
            ws::Message::Close(_) => return Err(Error::ConnectionClosed),
            // Text frames must be ignored; Ping/Pong are handled internally by axum.
            _ => continue,
        }
    }
}

/// Encodes and sends a single frame over the unsplit handshake socket.
async fn send_handshake_frame(socket: &mut WebSocket, frame: Frame) -> Result<(), Error> {
    socket
        .send(ws::Message::Binary(frame.encode().freeze()))
        .await?;
    Ok(())
}

/// Reads the next frame off a split post-handshake stream. Silently skips text frames and
/// anything shorter than the header; reports a version mismatch via [`ReadOutcome`] rather
/// than replying directly, since the caller (holding the session's outbound queue) is the
/// only thing with write access once the socket is split into independent halves.
pub(crate) async fn read_frame<S>(stream: &mut S) -> Result<ReadOutcome, Error>
where
    S: Stream<Item = Result<ws::Message, axum::Error>> + Unpin,
{
    loop {
        match stream.next().await.ok_or(Error::ConnectionClosed)?? {
            ws::Message::Binary(bytes) => match Frame::decode(&bytes) {
                Ok(frame) => return Ok(ReadOutcome::Frame(frame)),
                Err(FrameDecodeError::TooShort) => continue,
                Err(FrameDecodeError::UnsupportedVersion { request_id }) => {
                    return Ok(ReadOutcome::DroppedVersion(request_id));
                }
            },
            ws::Message::Close(_) => return Err(Error::ConnectionClosed),
            _ => continue,
        }
    }
}

/// Encodes and sends a single frame over a split sink half. A send that takes longer than
/// `slow_send_threshold` is logged with the frame's opcode and encoded size, per
/// `spec.md §4.3`.
pub(crate) async fn send_frame<K>(
    sink: &mut K,
    frame: Frame,
    slow_send_threshold: Duration,
) -> Result<(), Error>
where
    K: Sink<ws::Message, Error = axum::Error> + Unpin,
{
    let opcode = frame.opcode;
    let encoded = frame.encode().freeze();
    let size = encoded.len();

    let started = Instant::now();
    sink.send(ws::Message::Binary(encoded)).await?;
    let elapsed = started.elapsed();

    if elapsed > slow_send_threshold {
        metrics::counter!(METRICS_ID_SLOW_SENDS).increment(1);
        tracing::warn!(opcode, size, elapsed_ms = elapsed.as_millis(), "slow outbound send");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_auth_payload() {
        let mut payload = vec![0u8];
        payload.extend_from_slice(b"T\0E\0I");
        let triple = parse_auth_payload(&payload).unwrap();
        assert_eq!(triple.token, "T");
        assert_eq!(triple.extension_id, "E");
        assert_eq!(triple.install_id, "I");
    }

    #[test]
    fn rejects_payload_missing_separators() {
        let payload = vec![0u8, b'T'];
        assert!(parse_auth_payload(&payload).is_none());
    }

    #[test]
    fn auth_result_success_has_single_status_byte() {
        let frame = auth_result(5, true, "");
        assert_eq!(frame.payload.as_ref(), &[0u8]);
    }

    #[test]
    fn auth_result_failure_carries_reason() {
        let frame = auth_result(5, false, "nope");
        assert_eq!(frame.payload[0], 1);
        assert_eq!(&frame.payload[1..], b"nope");
    }
}
