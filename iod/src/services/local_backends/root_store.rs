//! `FsRootStore`: persists granted storage roots as JSON under a data directory. The
//! "opaque handle" `RootStore::resolve_key` returns is, for this reference backend, the
//! root's canonicalized base directory — the daemon core still performs its own file I/O
//! through it, it just never sees how the handle was produced.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use jstorrentd_types::{RootDescriptor, RootHandle, RootKey, RootStore, RootStoreError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RootRecord {
    descriptor: RootDescriptor,
    base_path: PathBuf,
}

/// A [`RootStore`] backed by a JSON manifest plus ordinary directories on disk.
pub struct FsRootStore {
    manifest_path: PathBuf,
    records: RwLock<Vec<RootRecord>>,
}

impl FsRootStore {
    /// Opens (or prepares to create) the manifest at `data_dir/roots.json`.
    pub fn new(data_dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let manifest_path = data_dir.as_ref().join("roots.json");
        let records = match std::fs::read(&manifest_path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err),
        };
        Ok(Self {
            manifest_path,
            records: RwLock::new(records),
        })
    }

    fn persist(&self) -> std::io::Result<()> {
        let json = serde_json::to_vec_pretty(&*self.records.read())?;
        std::fs::write(&self.manifest_path, json)
    }

    /// Grants a new root, the local reference stand-in for whatever a host's real
    /// root-granting subsystem does after the user picks a folder (see
    /// `UserInteraction::open_folder_picker`).
    pub fn grant_root(
        &self,
        key: impl Into<String>,
        base_path: PathBuf,
        display_name: impl Into<String>,
        removable: bool,
    ) -> std::io::Result<()> {
        let key = key.into();
        let now_ms = now_unix_millis();
        let descriptor = RootDescriptor {
            key: key.clone(),
            uri: format!("file://{}", base_path.display()),
            display_name: display_name.into(),
            removable,
            last_stat_ok: base_path.is_dir(),
            last_checked: now_ms,
        };
        let mut records = self.records.write();
        records.retain(|record| record.descriptor.key != key);
        records.push(RootRecord {
            descriptor,
            base_path,
        });
        drop(records);
        self.persist()
    }

    /// Revokes a previously granted root.
    pub fn revoke_root(&self, key: &str) -> std::io::Result<()> {
        self.records.write().retain(|record| record.descriptor.key != key);
        self.persist()
    }
}

fn now_unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

struct FsRootHandle {
    base_path: PathBuf,
}

impl RootHandle for FsRootHandle {
    fn resolve(&self, relative: &Path) -> Result<PathBuf, RootStoreError> {
        Ok(self.base_path.join(relative))
    }
}

#[async_trait]
impl RootStore for FsRootStore {
    async fn list_roots(&self) -> Vec<RootDescriptor> {
        self.records
            .read()
            .iter()
            .map(|record| record.descriptor.clone())
            .collect()
    }

    async fn resolve_key(&self, key: &RootKey) -> Result<Box<dyn RootHandle>, RootStoreError> {
        let records = self.records.read();
        let record = records
            .iter()
            .find(|record| record.descriptor.key == key.0)
            .ok_or_else(|| RootStoreError::UnknownKey(key.clone()))?;
        if !record.descriptor.last_stat_ok {
            return Err(RootStoreError::Unavailable(key.clone()));
        }
        Ok(Box::new(FsRootHandle {
            base_path: record.base_path.clone(),
        }))
    }

    async fn refresh_availability(&self) {
        let now_ms = now_unix_millis();
        let mut records = self.records.write();
        for record in records.iter_mut() {
            record.descriptor.last_stat_ok = record.base_path.is_dir();
            record.descriptor.last_checked = now_ms;
        }
        drop(records);
        if let Err(err) = self.persist() {
            tracing::warn!(error = %err, "failed to persist root availability refresh");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn grant_then_resolve() {
        let data_dir = tempfile::tempdir().unwrap();
        let root_dir = tempfile::tempdir().unwrap();
        let store = FsRootStore::new(data_dir.path()).unwrap();
        store
            .grant_root("k1", root_dir.path().to_path_buf(), "Downloads", false)
            .unwrap();

        let roots = store.list_roots().await;
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].key, "k1");

        let handle = store.resolve_key(&RootKey::from("k1")).await.unwrap();
        let resolved = handle.resolve(Path::new("sub/file.bin")).unwrap();
        assert_eq!(resolved, root_dir.path().join("sub/file.bin"));
    }

    #[tokio::test]
    async fn unknown_key_errors() {
        let data_dir = tempfile::tempdir().unwrap();
        let store = FsRootStore::new(data_dir.path()).unwrap();
        let err = store.resolve_key(&RootKey::from("missing")).await.unwrap_err();
        assert!(matches!(err, RootStoreError::UnknownKey(_)));
    }
}
