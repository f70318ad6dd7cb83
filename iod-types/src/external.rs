//! Traits through which the daemon core consults its external collaborators.
//!
//! The GUI, the root-granting subsystem, and the pairing credential store are out of
//! scope for this crate — each is specified only by the interface it presents. These
//! traits are that interface. `iod` depends only on them; concrete implementations (a
//! real GUI bridge, a real root-granting subsystem, a real secure key-value store) are
//! supplied by whatever hosts the daemon, each a choice of backend implemented outside
//! the protocol logic.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::control::RootDescriptor;
use crate::pairing::PairingTriple;

/// Stable key identifying a granted storage root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RootKey(pub String);

impl std::fmt::Display for RootKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RootKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RootKey {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// An opaque handle to a granted storage root, obtained from
/// [`RootStore::resolve_key`].
///
/// The daemon core never interprets the handle's internals; it only ever asks the handle
/// to resolve a relative, already path-safety-checked path into an absolute filesystem
/// path for its own byte-range I/O.
pub trait RootHandle: Send + Sync {
    /// Resolves `relative` (already checked to contain no `..` segment) to an absolute
    /// path under this root.
    fn resolve(&self, relative: &Path) -> Result<PathBuf, RootStoreError>;
}

/// Errors a [`RootStore`] can report.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RootStoreError {
    /// No root is granted under this key.
    #[error("no root granted for key {0}")]
    UnknownKey(RootKey),
    /// The root is known but currently unavailable (e.g. a removable volume that is
    /// unplugged).
    #[error("root {0} is currently unavailable")]
    Unavailable(RootKey),
    /// Any other resolution failure, carried as a message since the concrete cause is
    /// backend-specific.
    #[error("{0}")]
    Other(String),
}

/// The root-granting subsystem, consulted through this interface.
///
/// Persists nothing in the daemon core's process — implementations own the durable
/// storage-root grants; the core only ever lists, resolves, and asks for a refresh.
#[async_trait]
pub trait RootStore: Send + Sync {
    /// Lists every currently granted root.
    async fn list_roots(&self) -> Vec<RootDescriptor>;

    /// Resolves `key` to an opaque handle, or an error if no such root is granted.
    async fn resolve_key(&self, key: &RootKey) -> Result<Box<dyn RootHandle>, RootStoreError>;

    /// Re-checks availability of every granted root (e.g. re-statting removable volumes)
    /// and updates what a subsequent [`RootStore::list_roots`] reports.
    async fn refresh_availability(&self);
}

/// Errors a [`TokenStore`] can report.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TokenStoreError {
    /// The store could not persist the new pairing record.
    #[error("could not persist pairing record: {0}")]
    PersistFailed(String),
}

/// The credential store for the pairing triple, consulted through this interface.
///
/// A singleton record per daemon; `replace` is expected to be atomic with respect to
/// concurrent `current` reads (no reader observes a half-written record).
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Returns the currently stored pairing triple, if any pairing has ever succeeded.
    async fn current(&self) -> Option<PairingTriple>;

    /// Atomically replaces the stored pairing triple.
    async fn replace(&self, triple: PairingTriple) -> Result<(), TokenStoreError>;
}

/// The GUI collaborator, consulted through this interface.
///
/// Renders the pairing-approval dialog and the folder picker; results arrive back through
/// these same async calls rather than a separate callback channel, since both flows are
/// one-shot user decisions the daemon can simply await.
#[async_trait]
pub trait UserInteraction: Send + Sync {
    /// Shows a pairing-approval dialog for `proposed`. `is_replace` indicates whether a
    /// pairing already exists and would be replaced on approval. Resolves to whether the
    /// user approved.
    async fn show_pairing_approval(&self, proposed: &PairingTriple, is_replace: bool) -> bool;

    /// Opens a folder picker. The external collaborator is expected to cause a later
    /// `RootStore` change (and a corresponding `ROOTS_CHANGED` broadcast) once the user
    /// has granted a new root, or to do nothing if the user cancels.
    async fn open_folder_picker(&self);
}
