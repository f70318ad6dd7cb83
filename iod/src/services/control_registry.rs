//! `ControlChannel`: a registry of authenticated `/control` sessions, used to broadcast
//! root-set changes and opaque application events.
//!
//! A `parking_lot`-guarded collection shared by `Clone`, with insertion returning a guard
//! that deregisters on drop.

use std::collections::HashMap;
use std::sync::Arc;

use jstorrentd_types::{EventPayload, Frame, Opcode, RootDescriptor};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::session::IoSession;

/// Registry of authenticated control sessions, indexed by a session id minted at
/// registration time.
#[derive(Clone, Default)]
pub struct ControlChannel(Arc<Mutex<HashMap<Uuid, Arc<IoSession>>>>);

/// Deregisters a control session from its [`ControlChannel`] when dropped.
#[must_use]
pub struct ControlRegistration {
    id: Uuid,
    channel: ControlChannel,
}

impl Drop for ControlRegistration {
    fn drop(&mut self) {
        self.channel.0.lock().remove(&self.id);
    }
}

impl ControlChannel {
    /// Registers `session` for broadcasts. The returned guard must be held for the
    /// session's lifetime; dropping it deregisters.
    pub fn register(&self, session: Arc<IoSession>) -> ControlRegistration {
        let id = Uuid::new_v4();
        self.0.lock().insert(id, session);
        ControlRegistration {
            id,
            channel: self.clone(),
        }
    }

    /// Broadcasts the current root set to every registered session.
    pub fn broadcast_roots_changed(&self, roots: &[RootDescriptor]) {
        let payload = serde_json::to_vec(roots).expect("RootDescriptor list always serializes");
        self.broadcast(Frame::new(Opcode::RootsChanged as u8, 0, payload));
    }

    /// Broadcasts an opaque application event to every registered session.
    pub fn broadcast_event(&self, event: &EventPayload) {
        let payload = serde_json::to_vec(event).expect("EventPayload always serializes");
        self.broadcast(Frame::new(Opcode::Event as u8, 0, payload));
    }

    fn broadcast(&self, frame: Frame) {
        for session in self.0.lock().values() {
            session.enqueue(frame.clone());
        }
    }

    /// Number of currently registered control sessions.
    pub fn registered_count(&self) -> usize {
        self.0.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IoDaemonConfig;
    use clap::Parser as _;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn test_session() -> (Arc<IoSession>, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(16);
        let config = Arc::new(IoDaemonConfig::parse_from(["jstorrentd"]));
        (IoSession::new(config, tx, CancellationToken::new()), rx)
    }

    #[tokio::test]
    async fn broadcast_reaches_all_registered_sessions() {
        let channel = ControlChannel::default();
        let (session_a, mut rx_a) = test_session();
        let (session_b, mut rx_b) = test_session();
        let _guard_a = channel.register(session_a);
        let _guard_b = channel.register(session_b);

        let roots = vec![RootDescriptor {
            key: "k1".into(),
            uri: "file:///tmp".into(),
            display_name: "tmp".into(),
            removable: false,
            last_stat_ok: true,
            last_checked: 0,
        }];
        channel.broadcast_roots_changed(&roots);

        let frame_a = rx_a.recv().await.unwrap();
        let frame_b = rx_b.recv().await.unwrap();
        assert_eq!(frame_a.opcode, Opcode::RootsChanged as u8);
        assert_eq!(frame_b.opcode, Opcode::RootsChanged as u8);
    }

    #[tokio::test]
    async fn dropping_guard_deregisters() {
        let channel = ControlChannel::default();
        let (session, _rx) = test_session();
        let guard = channel.register(session);
        assert_eq!(channel.registered_count(), 1);
        drop(guard);
        assert_eq!(channel.registered_count(), 0);
    }
}
