//! Raw-frame encoding helpers for driving `/io` and `/control` from a test, playing the
//! part a real JavaScript BitTorrent engine would: build the handshake and opcode payloads
//! by hand, the same binary layout `jstorrentd_types::frame` decodes on the server side.

use bytes::Bytes;
use jstorrentd_types::{Frame, Opcode, PairingTriple};

/// Encodes a `CLIENT_HELLO` frame.
pub fn client_hello(request_id: u32) -> Bytes {
    Frame::new(Opcode::ClientHello as u8, request_id, Bytes::new())
        .encode()
        .freeze()
}

/// Encodes an `AUTH` frame carrying `triple`, `authType = 0`.
pub fn auth(request_id: u32, triple: &PairingTriple) -> Bytes {
    let mut payload = vec![0u8];
    payload.extend_from_slice(triple.token.as_bytes());
    payload.push(0);
    payload.extend_from_slice(triple.extension_id.as_bytes());
    payload.push(0);
    payload.extend_from_slice(triple.install_id.as_bytes());
    Frame::new(Opcode::Auth as u8, request_id, payload).encode().freeze()
}

/// Encodes a `TCP_CONNECT` frame.
pub fn tcp_connect(request_id: u32, sid: u32, port: u16, hostname: &str) -> Bytes {
    let mut payload = Vec::with_capacity(6 + hostname.len());
    payload.extend_from_slice(&sid.to_le_bytes());
    payload.extend_from_slice(&port.to_le_bytes());
    payload.extend_from_slice(hostname.as_bytes());
    Frame::new(Opcode::TcpConnect as u8, request_id, payload).encode().freeze()
}

/// Encodes a `TCP_SEND` frame.
pub fn tcp_send(sid: u32, data: &[u8]) -> Bytes {
    let mut payload = Vec::with_capacity(4 + data.len());
    payload.extend_from_slice(&sid.to_le_bytes());
    payload.extend_from_slice(data);
    Frame::new(Opcode::TcpSend as u8, 0, payload).encode().freeze()
}

/// Encodes a `TCP_CLOSE` frame.
pub fn tcp_close(sid: u32) -> Bytes {
    let mut payload = Vec::with_capacity(9);
    payload.extend_from_slice(&sid.to_le_bytes());
    payload.push(0);
    payload.extend_from_slice(&0u32.to_le_bytes());
    Frame::new(Opcode::TcpClose as u8, 0, payload).encode().freeze()
}

/// Encodes an `OPEN_FOLDER_PICKER` frame.
pub fn open_folder_picker(request_id: u32) -> Bytes {
    Frame::new(Opcode::OpenFolderPicker as u8, request_id, Bytes::new())
        .encode()
        .freeze()
}

/// Decodes a frame, panicking on malformed input — test frames coming back from the daemon
/// are always expected to be well-formed.
pub fn decode(bytes: &[u8]) -> Frame {
    Frame::decode(bytes).expect("frame from the daemon under test is always well-formed")
}

/// Asserts `frame` carries the given opcode.
pub fn expect_opcode(frame: &Frame, opcode: Opcode) {
    assert_eq!(
        frame.opcode,
        opcode as u8,
        "expected opcode {opcode:?}, got raw byte {:#04x}",
        frame.opcode
    );
}

/// Extracts the `sid` from the first 4 bytes of a frame payload, the layout shared by every
/// opcode that starts with `sid(4)`.
pub fn payload_sid(frame: &Frame) -> u32 {
    u32::from_le_bytes(frame.payload[0..4].try_into().expect("payload carries a sid"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_frame_round_trips_through_decode() {
        let triple = PairingTriple::new("T", "E", "I");
        let encoded = auth(2, &triple);
        let frame = decode(&encoded);
        expect_opcode(&frame, Opcode::Auth);
        assert_eq!(frame.request_id, 2);
    }

    #[test]
    fn tcp_connect_frame_carries_sid_port_host() {
        let encoded = tcp_connect(3, 1, 7, "127.0.0.1");
        let frame = decode(&encoded);
        assert_eq!(payload_sid(&frame), 1);
    }
}
