//! `FsTokenStore`: persists the pairing triple as JSON under a data directory, replacing it
//! atomically (write-to-temp + rename) on every successful pairing.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use jstorrentd_types::{PairingTriple, TokenStore, TokenStoreError};
use parking_lot::RwLock;

/// A [`TokenStore`] backed by a single JSON file.
pub struct FsTokenStore {
    path: PathBuf,
    cached: RwLock<Option<PairingTriple>>,
}

impl FsTokenStore {
    /// Opens (or prepares to create) the pairing record at `data_dir/pairing.json`.
    pub fn new(data_dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = data_dir.as_ref().join("pairing.json");
        let cached = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).ok(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => return Err(err),
        };
        Ok(Self {
            path,
            cached: RwLock::new(cached),
        })
    }
}

#[async_trait]
impl TokenStore for FsTokenStore {
    async fn current(&self) -> Option<PairingTriple> {
        self.cached.read().clone()
    }

    async fn replace(&self, triple: PairingTriple) -> Result<(), TokenStoreError> {
        let json = serde_json::to_vec_pretty(&triple)
            .map_err(|err| TokenStoreError::PersistFailed(err.to_string()))?;

        let dir = self
            .path
            .parent()
            .ok_or_else(|| TokenStoreError::PersistFailed("pairing path has no parent".into()))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|err| TokenStoreError::PersistFailed(err.to_string()))?;
        use std::io::Write as _;
        tmp.write_all(&json)
            .map_err(|err| TokenStoreError::PersistFailed(err.to_string()))?;
        tmp.persist(&self.path)
            .map_err(|err| TokenStoreError::PersistFailed(err.to_string()))?;

        *self.cached.write() = Some(triple);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsTokenStore::new(dir.path()).unwrap();
        assert!(store.current().await.is_none());

        let triple = PairingTriple::new("t", "e", "i");
        store.replace(triple).await.unwrap();
        assert!(store.current().await.is_some());

        let reopened = FsTokenStore::new(dir.path()).unwrap();
        let reloaded = reopened.current().await.unwrap();
        assert_eq!(reloaded.token, "t");
    }
}
