//! In-memory store backend for testing.

use crate::backend::{validate_name, StoreBackend};
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// An in-memory store backend.
///
/// Mirrors the [`DirectoryBackend`](super::DirectoryBackend) contract
/// without touching the filesystem. Backups are named snapshots held
/// in memory, addressed by a synthetic `memory:` path.
///
/// Useful for unit tests and ephemeral databases; all data is lost
/// when the backend is dropped.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
    snapshots: RwLock<HashMap<PathBuf, Vec<(String, Vec<u8>)>>>,
    backup_counter: AtomicU64,
}

impl MemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn next_backup_path(&self) -> PathBuf {
        let n = self.backup_counter.fetch_add(1, Ordering::Relaxed);
        PathBuf::from(format!("memory:backup-{n}"))
    }
}

impl StoreBackend for MemoryBackend {
    fn load(&self, name: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_name(name)?;
        Ok(self.blobs.read().get(name).cloned())
    }

    fn store(&self, name: &str, data: &[u8]) -> StorageResult<()> {
        validate_name(name)?;
        self.blobs.write().insert(name.to_string(), data.to_vec());
        Ok(())
    }

    fn remove(&self, name: &str) -> StorageResult<bool> {
        validate_name(name)?;
        if !self.blobs.read().contains_key(name) {
            return Ok(false);
        }
        self.backup(Some(name))?;
        Ok(self.blobs.write().remove(name).is_some())
    }

    fn exists(&self, name: &str) -> StorageResult<bool> {
        validate_name(name)?;
        Ok(self.blobs.read().contains_key(name))
    }

    fn list(&self) -> StorageResult<Vec<String>> {
        let mut names: Vec<String> = self.blobs.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn backup(&self, name: Option<&str>) -> StorageResult<PathBuf> {
        let blobs = self.blobs.read();
        let members = match name {
            Some(name) => {
                validate_name(name)?;
                let data = blobs
                    .get(name)
                    .ok_or_else(|| StorageError::backup_not_found(format!("memory:{name}")))?;
                vec![(name.to_string(), data.clone())]
            }
            None => {
                let mut all: Vec<_> = blobs.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                all.sort_by(|a, b| a.0.cmp(&b.0));
                all
            }
        };
        drop(blobs);

        let path = self.next_backup_path();
        self.snapshots.write().insert(path.clone(), members);
        Ok(path)
    }

    fn restore(&self, path: &Path) -> StorageResult<Vec<String>> {
        let snapshots = self.snapshots.read();
        let members = snapshots
            .get(path)
            .ok_or_else(|| StorageError::backup_not_found(path))?
            .clone();
        drop(snapshots);

        let mut blobs = self.blobs.write();
        let mut restored = Vec::with_capacity(members.len());
        for (name, data) in members {
            blobs.insert(name.clone(), data);
            restored.push(name);
        }
        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_load_remove() {
        let backend = MemoryBackend::new();

        backend.store("users", b"data").unwrap();
        assert!(backend.exists("users").unwrap());
        assert_eq!(backend.load("users").unwrap().unwrap(), b"data");

        assert!(backend.remove("users").unwrap());
        assert!(backend.load("users").unwrap().is_none());
        assert!(!backend.remove("users").unwrap());
    }

    #[test]
    fn validates_names() {
        let backend = MemoryBackend::new();
        assert!(backend.store("no/slashes", b"x").is_err());
    }

    #[test]
    fn backup_restore_roundtrip() {
        let backend = MemoryBackend::new();
        backend.store("users", b"v1").unwrap();
        backend.store("posts", b"p").unwrap();

        let snapshot = backend.backup(None).unwrap();
        backend.store("users", b"v2").unwrap();

        let mut restored = backend.restore(&snapshot).unwrap();
        restored.sort();
        assert_eq!(restored, vec!["posts", "users"]);
        assert_eq!(backend.load("users").unwrap().unwrap(), b"v1");
    }

    #[test]
    fn restore_unknown_snapshot_fails() {
        let backend = MemoryBackend::new();
        assert!(matches!(
            backend.restore(Path::new("memory:backup-99")),
            Err(StorageError::BackupNotFound { .. })
        ));
    }
}
