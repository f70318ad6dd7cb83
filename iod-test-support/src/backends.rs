//! In-memory implementations of `TokenStore`, `RootStore`, and `UserInteraction` for tests.
//!
//! These play the same role in test code that `jstorrentd`'s own `local_backends` (the
//! filesystem-backed reference implementations) play for a standalone binary: a concrete
//! stand-in for collaborators the daemon core only ever sees through a trait. Tests prefer
//! these over the filesystem-backed ones so assertions can inspect in-process state (call
//! counts, granted roots) without touching disk beyond the temp directories a test grants.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use jstorrentd_types::{
    PairingTriple, RootDescriptor, RootHandle, RootKey, RootStore, RootStoreError, TokenStore,
    TokenStoreError, UserInteraction,
};
use parking_lot::{Mutex, RwLock};

/// An in-memory `TokenStore`: holds at most one pairing triple, replaced wholesale on every
/// `replace` call.
#[derive(Default)]
pub struct InMemoryTokenStore {
    current: RwLock<Option<PairingTriple>>,
}

impl InMemoryTokenStore {
    /// An empty store — no pairing has happened yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-seeded with `triple`, for tests that only care about authenticated-session
    /// behavior rather than the pairing-approval flow itself.
    pub fn paired(triple: PairingTriple) -> Self {
        Self {
            current: RwLock::new(Some(triple)),
        }
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn current(&self) -> Option<PairingTriple> {
        self.current.read().clone()
    }

    async fn replace(&self, triple: PairingTriple) -> Result<(), TokenStoreError> {
        *self.current.write() = Some(triple);
        Ok(())
    }
}

struct RootEntry {
    descriptor: RootDescriptor,
    base_path: PathBuf,
}

struct InMemoryRootHandle {
    base_path: PathBuf,
}

impl RootHandle for InMemoryRootHandle {
    fn resolve(&self, relative: &Path) -> Result<PathBuf, RootStoreError> {
        Ok(self.base_path.join(relative))
    }
}

/// An in-memory `RootStore`: roots are granted directly against a real filesystem path
/// (typically a `tempfile::TempDir` the test owns), bypassing any real grant UI.
#[derive(Default)]
pub struct InMemoryRootStore {
    roots: RwLock<HashMap<String, RootEntry>>,
}

impl InMemoryRootStore {
    /// An empty store — no roots granted yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Grants a root under `key`, resolving to `base_path`.
    pub fn grant(&self, key: impl Into<String>, base_path: impl Into<PathBuf>, display_name: impl Into<String>) {
        let key = key.into();
        let base_path = base_path.into();
        self.roots.write().insert(
            key.clone(),
            RootEntry {
                descriptor: RootDescriptor {
                    key,
                    uri: format!("file://{}", base_path.display()),
                    display_name: display_name.into(),
                    removable: false,
                    last_stat_ok: true,
                    last_checked: 0,
                },
                base_path,
            },
        );
    }

    /// Revokes a previously granted root.
    pub fn revoke(&self, key: &str) {
        self.roots.write().remove(key);
    }
}

#[async_trait]
impl RootStore for InMemoryRootStore {
    async fn list_roots(&self) -> Vec<RootDescriptor> {
        self.roots.read().values().map(|entry| entry.descriptor.clone()).collect()
    }

    async fn resolve_key(&self, key: &RootKey) -> Result<Box<dyn RootHandle>, RootStoreError> {
        let roots = self.roots.read();
        let entry = roots
            .get(&key.0)
            .ok_or_else(|| RootStoreError::UnknownKey(key.clone()))?;
        Ok(Box::new(InMemoryRootHandle {
            base_path: entry.base_path.clone(),
        }))
    }

    async fn refresh_availability(&self) {}
}

/// An in-memory `UserInteraction`: resolves every pairing-approval request the same fixed
/// way and records every folder-picker request it receives, rather than showing anything.
pub struct InMemoryUserInteraction {
    approve: bool,
    folder_picker_calls: Mutex<usize>,
}

impl InMemoryUserInteraction {
    /// Approves every pairing request it is asked about.
    pub fn approving() -> Self {
        Self {
            approve: true,
            folder_picker_calls: Mutex::new(0),
        }
    }

    /// Denies every pairing request it is asked about.
    pub fn denying() -> Self {
        Self {
            approve: false,
            folder_picker_calls: Mutex::new(0),
        }
    }

    /// How many times `open_folder_picker` has been called.
    pub fn folder_picker_calls(&self) -> usize {
        *self.folder_picker_calls.lock()
    }
}

#[async_trait]
impl UserInteraction for InMemoryUserInteraction {
    async fn show_pairing_approval(&self, _proposed: &PairingTriple, _is_replace: bool) -> bool {
        self.approve
    }

    async fn open_folder_picker(&self) {
        *self.folder_picker_calls.lock() += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn token_store_round_trips() {
        let store = InMemoryTokenStore::new();
        assert!(store.current().await.is_none());
        store.replace(PairingTriple::new("t", "e", "i")).await.unwrap();
        assert_eq!(store.current().await.unwrap().token, "t");
    }

    #[tokio::test]
    async fn root_store_resolves_granted_root() {
        let store = InMemoryRootStore::new();
        let dir = tempfile::tempdir().unwrap();
        store.grant("k1", dir.path().to_path_buf(), "Downloads");
        let handle = store.resolve_key(&RootKey::from("k1")).await.unwrap();
        assert_eq!(
            handle.resolve(Path::new("a/b.bin")).unwrap(),
            dir.path().join("a/b.bin")
        );
    }

    #[tokio::test]
    async fn root_store_unknown_key_errors() {
        let store = InMemoryRootStore::new();
        let err = store.resolve_key(&RootKey::from("missing")).await.unwrap_err();
        assert!(matches!(err, RootStoreError::UnknownKey(_)));
    }

    #[tokio::test]
    async fn user_interaction_counts_folder_picker_calls() {
        let ui = InMemoryUserInteraction::approving();
        ui.open_folder_picker().await;
        ui.open_folder_picker().await;
        assert_eq!(ui.folder_picker_calls(), 2);
    }
}
