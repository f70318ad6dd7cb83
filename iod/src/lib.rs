#![deny(missing_docs)]
//! Core of the loopback I/O daemon: a multiplexing virtual-socket server, the pairing and
//! in-band auth handshake, the byte-range file endpoint, and the control broadcast channel.
//!
//! The crate's main entry point is [`IoDaemonBuilder`]. A hosting binary constructs the
//! three external collaborators described by `jstorrentd_types` — a [`TokenStore`], a
//! [`RootStore`], and a [`UserInteraction`] — and hands them to [`IoDaemonBuilder::init`].
//! [`IoDaemonBuilder::build`] then returns an `axum::Router` serving every endpoint
//! (`/io`, `/control`, `/read/{rootKey}`, `/write/{rootKey}`, `/status`) that the hosting
//! binary merges into its own server and serves with `axum::serve`.
//!
//! If an internal service encounters a fatal error, the `CancellationToken` passed to
//! [`IoDaemonBuilder::init`] is cancelled, signalling every session to wind down; the token
//! can also be cancelled externally by the hosting binary to request a graceful shutdown.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use jstorrentd_types::{RootDescriptor, RootStore, TokenStore, UserInteraction};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::api::control::ControlState;
use crate::api::file::FileState;
use crate::api::io::IoState;
use crate::api::status::StatusState;
use crate::config::IoDaemonConfig;
use crate::services::control_registry::ControlChannel;

pub mod api;
pub mod config;
pub mod metrics;
pub mod services;
pub mod session;

/// Re-exported for hosting binaries that need the wire types (`PairingTriple`, `RootStore`,
/// etc.) without depending on `jstorrentd-types` directly.
pub use jstorrentd_types as types;

/// How often [`IoDaemonBuilder::build`]'s background task re-checks root availability and
/// broadcasts `ROOTS_CHANGED` if it observes a change (e.g. a removable volume going away).
const ROOT_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Builds the daemon's `axum::Router` from its external collaborators.
///
/// An `init` constructor wires background services, and `build` hands back the composed
/// router for the caller to serve.
pub struct IoDaemonBuilder {
    config: Arc<IoDaemonConfig>,
    token_store: Arc<dyn TokenStore>,
    root_store: Arc<dyn RootStore>,
    user_interaction: Arc<dyn UserInteraction>,
    cancellation: CancellationToken,
    control_channel: ControlChannel,
    bound_port: Arc<AtomicU16>,
}

impl IoDaemonBuilder {
    /// Initializes the builder from the daemon's external collaborators.
    ///
    /// `cancellation` is the root token for the whole daemon: cancelling it tears down every
    /// session and stops the root-refresh background task.
    pub fn init(
        config: IoDaemonConfig,
        token_store: Arc<dyn TokenStore>,
        root_store: Arc<dyn RootStore>,
        user_interaction: Arc<dyn UserInteraction>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            config: Arc::new(config),
            token_store,
            root_store,
            user_interaction,
            cancellation,
            control_channel: ControlChannel::default(),
            bound_port: Arc::new(AtomicU16::new(0)),
        }
    }

    /// Records the port the listener actually bound to, for `/status` to report. The
    /// configured port may be `0` (ephemeral); call this once the real bound port is known,
    /// before serving.
    pub fn with_bound_port(self, port: u16) -> Self {
        self.bound_port.store(port, Ordering::Relaxed);
        self
    }

    /// A handle to the control-broadcast registry, for a hosting binary that wants to send
    /// its own `EVENT` frames (`ControlChannel::broadcast_event`) alongside the daemon's own
    /// `ROOTS_CHANGED` broadcasts.
    pub fn control_channel(&self) -> ControlChannel {
        self.control_channel.clone()
    }

    fn spawn_root_refresh(&self) {
        let root_store = Arc::clone(&self.root_store);
        let control_channel = self.control_channel.clone();
        let cancellation = self.cancellation.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(ROOT_REFRESH_INTERVAL);
            let mut last_keys = availability_fingerprint(&root_store.list_roots().await);
            loop {
                tokio::select! {
                    () = cancellation.cancelled() => break,
                    _ = interval.tick() => {
                        root_store.refresh_availability().await;
                        let current = root_store.list_roots().await;
                        let keys = availability_fingerprint(&current);
                        if keys != last_keys {
                            control_channel.broadcast_roots_changed(&current);
                            last_keys = keys;
                        }
                    }
                }
            }
        });
    }

    /// Builds the `axum::Router` serving every endpoint: `/io`, `/control`,
    /// `/read/{rootKey}`, `/write/{rootKey}`, `/status`.
    pub fn build(self) -> Router {
        self.spawn_root_refresh();

        let io_state = IoState::new(
            Arc::clone(&self.config),
            Arc::clone(&self.token_store),
            self.cancellation.clone(),
        );
        let control_state = ControlState::new(
            Arc::clone(&self.config),
            Arc::clone(&self.token_store),
            Arc::clone(&self.user_interaction),
            self.control_channel.clone(),
            self.cancellation.clone(),
        );
        let file_state = FileState::new(
            Arc::clone(&self.config),
            Arc::clone(&self.token_store),
            Arc::clone(&self.root_store),
        );
        let status_state = StatusState::new(Arc::clone(&self.bound_port), Arc::clone(&self.token_store));

        api::io::routes(io_state)
            .merge(api::control::routes(control_state))
            .merge(api::file::routes(file_state))
            .merge(api::status::routes(status_state))
            .layer(TraceLayer::new_for_http())
    }
}

/// A comparison key over the root set that ignores `last_checked` (which changes on every
/// refresh tick regardless of outcome) so the background task only broadcasts when
/// availability actually changes.
fn availability_fingerprint(roots: &[RootDescriptor]) -> Vec<(String, bool)> {
    roots
        .iter()
        .map(|root| (root.key.clone(), root.last_stat_ok))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_ignores_last_checked() {
        let a = vec![RootDescriptor {
            key: "k".into(),
            uri: "file:///tmp".into(),
            display_name: "tmp".into(),
            removable: false,
            last_stat_ok: true,
            last_checked: 1,
        }];
        let b = vec![RootDescriptor {
            last_checked: 2,
            ..a[0].clone()
        }];
        assert_eq!(availability_fingerprint(&a), availability_fingerprint(&b));
    }
}
