//! The binary frame envelope and opcode taxonomy.
//!
//! Every message exchanged on `/io` or `/control` begins with the fixed 8-byte,
//! little-endian envelope described by the protocol: `version(1) ∥ opcode(1) ∥ flags(2) ∥
//! requestId(4)`, followed by an opcode-specific payload. `flags` is reserved as `0` in all
//! observed traffic; unrecognized bits are preserved on decode and ignored by dispatch
//! rather than rejected, leaving room for future extensions.

use bytes::{Bytes, BytesMut};

/// Length in bytes of the fixed frame header.
pub const HEADER_LEN: usize = 8;

/// The only protocol version this implementation understands.
pub const PROTOCOL_VERSION: u8 = 1;

/// A decoded frame: header fields plus the opcode-specific payload.
///
/// `version` is intentionally not retained past [`decode`] — every frame this process
/// constructs is stamped with [`PROTOCOL_VERSION`], and every frame it accepts already
/// passed the version check during decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Raw opcode byte. Kept raw (rather than a parsed [`Opcode`]) so that dispatch can
    /// distinguish "unknown opcode" from "known opcode on the wrong endpoint" and reply
    /// with an `ERROR` frame referencing the same `request_id` in both cases.
    pub opcode: u8,
    /// Reserved flag bits. Always `0` on frames this process sends.
    pub flags: u16,
    /// Correlates a request with its response. `0` means unsolicited/streaming.
    pub request_id: u32,
    /// Opcode-specific payload, everything after the header.
    pub payload: Bytes,
}

/// Why a byte buffer could not be turned into a [`Frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FrameDecodeError {
    /// Fewer than [`HEADER_LEN`] bytes were available — no `request_id` could be
    /// extracted, so per the protocol this must be dropped silently, not answered with an
    /// `ERROR` frame.
    #[error("frame shorter than the {HEADER_LEN}-byte header")]
    TooShort,
    /// The `version` byte did not match [`PROTOCOL_VERSION`]. `request_id` was still
    /// extractable, so the caller can reply with an `ERROR` frame referencing it.
    #[error("unsupported frame version (request_id={request_id})")]
    UnsupportedVersion {
        /// The `request_id` of the offending frame.
        request_id: u32,
    },
}

impl Frame {
    /// Builds a frame with the given opcode, `request_id`, and payload. `flags` is always
    /// `0` for frames this process originates.
    pub fn new(opcode: u8, request_id: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            opcode,
            flags: 0,
            request_id,
            payload: payload.into(),
        }
    }

    /// Builds an `ERROR` frame (opcode [`Opcode::Error`]) referencing `request_id`, with a
    /// UTF-8 reason as payload.
    pub fn error(request_id: u32, reason: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Error as u8, request_id, reason)
    }

    /// Decodes a frame from a byte slice, validating the header but not the payload shape
    /// (payload validation is opcode-specific and happens in the caller's handler).
    pub fn decode(buf: &[u8]) -> Result<Self, FrameDecodeError> {
        if buf.len() < HEADER_LEN {
            return Err(FrameDecodeError::TooShort);
        }
        let version = buf[0];
        let opcode = buf[1];
        let flags = u16::from_le_bytes([buf[2], buf[3]]);
        let request_id = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        if version != PROTOCOL_VERSION {
            return Err(FrameDecodeError::UnsupportedVersion { request_id });
        }
        Ok(Self {
            opcode,
            flags,
            request_id,
            payload: Bytes::copy_from_slice(&buf[HEADER_LEN..]),
        })
    }

    /// Encodes this frame into a fresh buffer, header first.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        buf.extend_from_slice(&[PROTOCOL_VERSION, self.opcode]);
        buf.extend_from_slice(&self.flags.to_le_bytes());
        buf.extend_from_slice(&self.request_id.to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }
}

/// Which of the three disjoint opcode sets an opcode belongs to, and therefore which
/// endpoint(s) it is legal on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpcodeSet {
    /// Legal on both `/io` and `/control`.
    Handshake,
    /// Legal only on `/io`.
    Io,
    /// Legal only on `/control`.
    Control,
}

/// The full opcode taxonomy, split into the handshake set (legal on both endpoints), the
/// IO set (`/io` only), and the control set (`/control` only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    // Handshake set.
    /// Client → server, opens the in-band handshake.
    ClientHello = 0x01,
    /// Server → client, acknowledges [`Opcode::ClientHello`].
    ServerHello = 0x02,
    /// Client → server, carries the pairing triple.
    Auth = 0x03,
    /// Server → client, reports whether [`Opcode::Auth`] succeeded.
    AuthResult = 0x04,
    /// Either direction, reports a protocol-level error referencing a `request_id`.
    Error = 0x7F,

    // IO set: TCP client.
    /// Client → server, opens an outbound TCP connection.
    TcpConnect = 0x10,
    /// Server → client, reports the outcome of [`Opcode::TcpConnect`].
    TcpConnected = 0x11,
    /// Client → server, bytes to send on a TCP stream.
    TcpSend = 0x12,
    /// Server → client, bytes received on a TCP stream.
    TcpRecv = 0x13,
    /// Either direction, closes a TCP stream.
    TcpClose = 0x14,

    // IO set: TCP server.
    /// Client → server, opens a TCP listener.
    TcpListen = 0x15,
    /// Server → client, reports the outcome of [`Opcode::TcpListen`].
    TcpListenResult = 0x16,
    /// Server → client, reports an accepted connection on a listener.
    TcpAccept = 0x17,
    /// Client → server, stops a listener.
    TcpStopListen = 0x18,

    // IO set: TLS.
    /// Client → server, upgrades a pending TCP stream to TLS.
    TcpSecure = 0x19,
    /// Server → client, reports the outcome of [`Opcode::TcpSecure`].
    TcpSecured = 0x1A,

    // IO set: UDP.
    /// Client → server, binds a UDP socket.
    UdpBind = 0x20,
    /// Server → client, reports the outcome of [`Opcode::UdpBind`].
    UdpBound = 0x21,
    /// Client → server, a datagram to send.
    UdpSend = 0x22,
    /// Server → client, a received datagram.
    UdpRecv = 0x23,
    /// Either direction, closes a UDP socket.
    UdpClose = 0x24,
    /// Client → server, joins a multicast group.
    UdpJoinMulticast = 0x25,
    /// Client → server, leaves a multicast group.
    UdpLeaveMulticast = 0x26,

    // Control set.
    /// Server → client, broadcasts the current root set.
    RootsChanged = 0xE0,
    /// Server → client, broadcasts an opaque application event.
    Event = 0xE1,
    /// Client → server, requests that the host open a folder picker.
    OpenFolderPicker = 0xE2,
}

impl Opcode {
    /// Classifies this opcode into the set that gates which endpoint it is legal on.
    pub fn set(self) -> OpcodeSet {
        use Opcode::*;
        match self {
            ClientHello | ServerHello | Auth | AuthResult | Error => OpcodeSet::Handshake,
            TcpConnect | TcpConnected | TcpSend | TcpRecv | TcpClose | TcpListen
            | TcpListenResult | TcpAccept | TcpStopListen | TcpSecure | TcpSecured | UdpBind
            | UdpBound | UdpSend | UdpRecv | UdpClose | UdpJoinMulticast | UdpLeaveMulticast => {
                OpcodeSet::Io
            }
            RootsChanged | Event | OpenFolderPicker => OpcodeSet::Control,
        }
    }
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use Opcode::*;
        Ok(match value {
            0x01 => ClientHello,
            0x02 => ServerHello,
            0x03 => Auth,
            0x04 => AuthResult,
            0x7F => Error,
            0x10 => TcpConnect,
            0x11 => TcpConnected,
            0x12 => TcpSend,
            0x13 => TcpRecv,
            0x14 => TcpClose,
            0x15 => TcpListen,
            0x16 => TcpListenResult,
            0x17 => TcpAccept,
            0x18 => TcpStopListen,
            0x19 => TcpSecure,
            0x1A => TcpSecured,
            0x20 => UdpBind,
            0x21 => UdpBound,
            0x22 => UdpSend,
            0x23 => UdpRecv,
            0x24 => UdpClose,
            0x25 => UdpJoinMulticast,
            0x26 => UdpLeaveMulticast,
            0xE0 => RootsChanged,
            0xE1 => Event,
            0xE2 => OpenFolderPicker,
            other => return Err(other),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_header_and_payload() {
        let frame = Frame::new(Opcode::TcpSend as u8, 42, Bytes::from_static(b"hello"));
        let encoded = frame.encode();
        let decoded = Frame::decode(&encoded).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn rejects_short_buffers_silently() {
        let buf = [1u8, 2, 3];
        assert_eq!(Frame::decode(&buf), Err(FrameDecodeError::TooShort));
    }

    #[test]
    fn rejects_wrong_version_with_request_id() {
        let mut buf = Frame::new(Opcode::ClientHello as u8, 7, Bytes::new()).encode();
        buf[0] = 2;
        assert_eq!(
            Frame::decode(&buf),
            Err(FrameDecodeError::UnsupportedVersion { request_id: 7 })
        );
    }

    #[test]
    fn unknown_opcode_roundtrips_as_raw_byte() {
        let frame = Frame::new(0xAA, 1, Bytes::new());
        let decoded = Frame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded.opcode, 0xAA);
        assert!(Opcode::try_from(decoded.opcode).is_err());
    }

    #[test]
    fn opcode_sets_partition_the_taxonomy() {
        assert_eq!(Opcode::Auth.set(), OpcodeSet::Handshake);
        assert_eq!(Opcode::TcpConnect.set(), OpcodeSet::Io);
        assert_eq!(Opcode::RootsChanged.set(), OpcodeSet::Control);
    }
}
