//! Test-only helpers shared across `jstorrentd`'s integration test suites: in-memory
//! stand-ins for the three external-collaborator traits, and a raw-frame client for driving
//! `/io` and `/control` over a real WebSocket without a JavaScript peer.

pub mod backends;
pub mod frame_client;

pub use backends::{InMemoryRootStore, InMemoryTokenStore, InMemoryUserInteraction};
