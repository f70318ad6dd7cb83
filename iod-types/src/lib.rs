#![deny(missing_docs)]
//! Shared wire types for the `jstorrentd` loopback I/O daemon.
//!
//! This crate groups together the values that cross the process boundary between the
//! daemon core (`iod`) and its callers, without pulling in any actual I/O:
//!
//! * The binary frame envelope and opcode taxonomy used on both WebSocket endpoints (see
//!   [`frame`]).
//! * The virtual-socket identifier convention shared between client- and server-assigned
//!   sockets (see [`sid`]).
//! * The pairing credential exchanged during authentication (see [`pairing`]).
//! * The JSON payloads broadcast on the control channel (see [`control`]).
//! * The traits through which the daemon core consults its external collaborators —
//!   `UserInteraction`, `RootStore`, `TokenStore` — and the errors they can report (see
//!   [`external`]).

pub mod control;
pub mod external;
pub mod frame;
pub mod pairing;
pub mod sid;

pub use control::{EventPayload, RootDescriptor};
pub use external::{
    RootHandle, RootKey, RootStore, RootStoreError, TokenStore, TokenStoreError, UserInteraction,
};
pub use frame::{Frame, FrameDecodeError, Opcode, OpcodeSet};
pub use pairing::PairingTriple;
pub use sid::{ServerSidAllocator, SocketId};
