//! Directory-backed persistent store.
//!
//! This module handles the file system layout for a shelfdb data
//! directory:
//!
//! ```text
//! <data_dir>/
//! ├─ LOCK              # Advisory lock for single-owner access
//! ├─ <name>.json       # One file per collection
//! ├─ .scratch/         # Temp files for atomic replacement
//! └─ backups/
//!    └─ backup-<ts>/   # Timestamped backup sets (+ manifest.json)
//! ```
//!
//! The LOCK file ensures only one process owns the data directory at a
//! time. Atomic rename protects file integrity, not cross-process cache
//! coherence.

use crate::backend::{validate_name, StoreBackend};
use crate::error::{StorageError, StorageResult};
use chrono::Utc;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

const LOCK_FILE: &str = "LOCK";
const SCRATCH_DIR: &str = ".scratch";
const BACKUPS_DIR: &str = "backups";
const MANIFEST_FILE: &str = "manifest.json";
const FILE_EXT: &str = "json";

/// Manifest written alongside a full backup, naming its members.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BackupManifest {
    created_at: String,
    files: Vec<String>,
}

/// A persistent store keeping one file per collection.
///
/// All replacement writes go through a scratch file followed by a
/// rename, so a crash at any point leaves either the old file or the
/// new file intact - never a partial one. Leftover scratch artifacts
/// from interrupted writes are cleaned up on open.
///
/// # Example
///
/// ```no_run
/// use shelfdb_store::{StoreBackend, DirectoryBackend};
/// use std::path::Path;
///
/// let backend = DirectoryBackend::open(Path::new("data")).unwrap();
/// backend.store("users", b"{}").unwrap();
/// ```
#[derive(Debug)]
pub struct DirectoryBackend {
    root: PathBuf,
    /// Lock file handle (held for exclusive access).
    _lock_file: File,
}

impl DirectoryBackend {
    /// Opens or creates a data directory, acquiring its exclusive lock.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::DirectoryLocked`] if another process
    /// holds the lock, or an I/O error if the directory cannot be
    /// created.
    pub fn open(root: &Path) -> StorageResult<Self> {
        fs::create_dir_all(root)?;

        let lock_path = root.join(LOCK_FILE);
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::DirectoryLocked);
        }

        let backend = Self {
            root: root.to_path_buf(),
            _lock_file: lock_file,
        };
        backend.clean_scratch()?;
        Ok(backend)
    }

    /// Returns the root data directory path.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.{FILE_EXT}"))
    }

    fn scratch_dir(&self) -> PathBuf {
        self.root.join(SCRATCH_DIR)
    }

    fn backups_dir(&self) -> PathBuf {
        self.root.join(BACKUPS_DIR)
    }

    /// Removes leftover temp files from interrupted writes.
    fn clean_scratch(&self) -> StorageResult<()> {
        let scratch = self.scratch_dir();
        if !scratch.exists() {
            return Ok(());
        }
        for entry in fs::read_dir(&scratch)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                debug!(path = %entry.path().display(), "removing leftover scratch file");
                let _ = fs::remove_file(entry.path());
            }
        }
        Ok(())
    }

    /// Writes `data` to a scratch file and renames it onto `target`.
    ///
    /// The rename is the only externally visible state change.
    fn write_atomic(&self, name: &str, target: &Path, data: &[u8]) -> StorageResult<()> {
        let scratch = self.scratch_dir();
        fs::create_dir_all(&scratch)?;

        let temp_path = scratch.join(format!("{name}-{}.tmp", Uuid::new_v4()));
        let result = (|| -> StorageResult<()> {
            let mut temp = File::create(&temp_path)?;
            temp.write_all(data)?;
            temp.sync_all()?;
            fs::rename(&temp_path, target)?;
            Ok(())
        })();

        if result.is_err() {
            let _ = fs::remove_file(&temp_path);
        }
        result
    }

    fn new_backup_dir(&self) -> StorageResult<PathBuf> {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        let short = Uuid::new_v4().simple().to_string();
        let dir = self
            .backups_dir()
            .join(format!("backup-{stamp}-{}", &short[..8]));
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

impl StoreBackend for DirectoryBackend {
    fn load(&self, name: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_name(name)?;
        match fs::read(self.file_path(name)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn store(&self, name: &str, data: &[u8]) -> StorageResult<()> {
        validate_name(name)?;
        self.write_atomic(name, &self.file_path(name), data)
    }

    fn remove(&self, name: &str) -> StorageResult<bool> {
        validate_name(name)?;
        let path = self.file_path(name);
        if !path.exists() {
            return Ok(false);
        }
        self.backup(Some(name))?;
        fs::remove_file(&path)?;
        Ok(true)
    }

    fn exists(&self, name: &str) -> StorageResult<bool> {
        validate_name(name)?;
        Ok(self.file_path(name).exists())
    }

    fn list(&self) -> StorageResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(FILE_EXT) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if validate_name(stem).is_ok() {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn backup(&self, name: Option<&str>) -> StorageResult<PathBuf> {
        match name {
            Some(name) => {
                validate_name(name)?;
                let source = self.file_path(name);
                if !source.exists() {
                    return Err(StorageError::backup_not_found(source));
                }
                let dir = self.new_backup_dir()?;
                let dest = dir.join(format!("{name}.{FILE_EXT}"));
                fs::copy(&source, &dest)?;
                Ok(dest)
            }
            None => {
                let names = self.list()?;
                let dir = self.new_backup_dir()?;
                let mut files = Vec::with_capacity(names.len());
                for name in &names {
                    let file = format!("{name}.{FILE_EXT}");
                    fs::copy(self.file_path(name), dir.join(&file))?;
                    files.push(file);
                }
                let manifest = BackupManifest {
                    created_at: Utc::now().to_rfc3339(),
                    files,
                };
                let data = serde_json::to_vec_pretty(&manifest)
                    .map_err(|e| StorageError::corrupted(format!("manifest encode: {e}")))?;
                fs::write(dir.join(MANIFEST_FILE), data)?;
                Ok(dir)
            }
        }
    }

    fn restore(&self, path: &Path) -> StorageResult<Vec<String>> {
        if !path.exists() {
            return Err(StorageError::backup_not_found(path));
        }

        if path.is_file() {
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| StorageError::corrupted("backup file has no name"))?;
            validate_name(stem)?;
            let data = fs::read(path)?;
            self.store(stem, &data)?;
            return Ok(vec![stem.to_string()]);
        }

        let manifest_path = path.join(MANIFEST_FILE);
        if !manifest_path.exists() {
            return Err(StorageError::backup_not_found(manifest_path));
        }
        let manifest: BackupManifest = serde_json::from_slice(&fs::read(&manifest_path)?)
            .map_err(|e| StorageError::corrupted(format!("manifest decode: {e}")))?;

        let mut restored = Vec::with_capacity(manifest.files.len());
        for file in &manifest.files {
            let source = path.join(file);
            if !source.exists() {
                return Err(StorageError::backup_not_found(source));
            }
            let stem = Path::new(file)
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| StorageError::corrupted(format!("bad manifest entry: {file}")))?;
            validate_name(stem)?;
            let data = fs::read(&source)?;
            self.store(stem, &data)?;
            restored.push(stem.to_string());
        }
        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open(dir: &tempfile::TempDir) -> DirectoryBackend {
        DirectoryBackend::open(dir.path()).unwrap()
    }

    #[test]
    fn store_and_load() {
        let tmp = tempdir().unwrap();
        let backend = open(&tmp);

        backend.store("users", b"payload").unwrap();
        assert_eq!(backend.load("users").unwrap().unwrap(), b"payload");
    }

    #[test]
    fn load_missing_is_none() {
        let tmp = tempdir().unwrap();
        let backend = open(&tmp);
        assert!(backend.load("nothing").unwrap().is_none());
    }

    #[test]
    fn store_replaces_previous_content() {
        let tmp = tempdir().unwrap();
        let backend = open(&tmp);

        backend.store("users", b"v1").unwrap();
        backend.store("users", b"v2").unwrap();
        assert_eq!(backend.load("users").unwrap().unwrap(), b"v2");
    }

    #[test]
    fn invalid_name_never_touches_disk() {
        let tmp = tempdir().unwrap();
        let backend = open(&tmp);

        assert!(backend.store("../escape", b"x").is_err());
        assert!(backend.load("a/b").is_err());
        assert!(tmp.path().read_dir().unwrap().all(|e| {
            let name = e.unwrap().file_name();
            name == LOCK_FILE || name == SCRATCH_DIR
        }));
    }

    #[test]
    fn stray_scratch_file_leaves_real_file_intact() {
        let tmp = tempdir().unwrap();
        let backend = open(&tmp);

        backend.store("users", b"original").unwrap();

        // Simulate a crash between temp-write and rename.
        let scratch = tmp.path().join(SCRATCH_DIR);
        fs::create_dir_all(&scratch).unwrap();
        fs::write(scratch.join("users-dead.tmp"), b"half-written").unwrap();

        assert_eq!(backend.load("users").unwrap().unwrap(), b"original");

        // Reopening cleans the artifact up.
        drop(backend);
        let backend = open(&tmp);
        assert_eq!(backend.load("users").unwrap().unwrap(), b"original");
        assert!(fs::read_dir(&scratch).unwrap().next().is_none());
    }

    #[test]
    fn remove_backs_up_first() {
        let tmp = tempdir().unwrap();
        let backend = open(&tmp);

        backend.store("users", b"precious").unwrap();
        assert!(backend.remove("users").unwrap());
        assert!(!backend.exists("users").unwrap());

        // Exactly one backup set holding the removed file.
        let backups: Vec<_> = fs::read_dir(tmp.path().join(BACKUPS_DIR))
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(backups.len(), 1);
        let copy = backups[0].join("users.json");
        assert_eq!(fs::read(copy).unwrap(), b"precious");
    }

    #[test]
    fn remove_missing_is_false() {
        let tmp = tempdir().unwrap();
        let backend = open(&tmp);
        assert!(!backend.remove("ghost").unwrap());
    }

    #[test]
    fn list_skips_non_collection_files() {
        let tmp = tempdir().unwrap();
        let backend = open(&tmp);

        backend.store("users", b"{}").unwrap();
        backend.store("posts", b"{}").unwrap();
        fs::write(tmp.path().join("notes.txt"), b"x").unwrap();

        assert_eq!(backend.list().unwrap(), vec!["posts", "users"]);
    }

    #[test]
    fn full_backup_and_restore_roundtrip() {
        let tmp = tempdir().unwrap();
        let backend = open(&tmp);

        backend.store("users", b"u").unwrap();
        backend.store("posts", b"p").unwrap();

        let backup = backend.backup(None).unwrap();
        assert!(backup.join(MANIFEST_FILE).exists());

        backend.store("users", b"changed").unwrap();
        assert!(backend.remove("posts").unwrap());

        let mut restored = backend.restore(&backup).unwrap();
        restored.sort();
        assert_eq!(restored, vec!["posts", "users"]);
        assert_eq!(backend.load("users").unwrap().unwrap(), b"u");
        assert_eq!(backend.load("posts").unwrap().unwrap(), b"p");
    }

    #[test]
    fn single_backup_restores_one_collection() {
        let tmp = tempdir().unwrap();
        let backend = open(&tmp);

        backend.store("users", b"v1").unwrap();
        let backup = backend.backup(Some("users")).unwrap();
        backend.store("users", b"v2").unwrap();

        assert_eq!(backend.restore(&backup).unwrap(), vec!["users"]);
        assert_eq!(backend.load("users").unwrap().unwrap(), b"v1");
    }

    #[test]
    fn backup_of_missing_collection_fails() {
        let tmp = tempdir().unwrap();
        let backend = open(&tmp);
        assert!(matches!(
            backend.backup(Some("ghost")),
            Err(StorageError::BackupNotFound { .. })
        ));
    }

    #[test]
    fn restore_from_missing_path_fails() {
        let tmp = tempdir().unwrap();
        let backend = open(&tmp);
        assert!(matches!(
            backend.restore(Path::new("/nonexistent/backup")),
            Err(StorageError::BackupNotFound { .. })
        ));
    }

    #[test]
    fn second_open_is_locked_out() {
        let tmp = tempdir().unwrap();
        let _backend = open(&tmp);
        assert!(matches!(
            DirectoryBackend::open(tmp.path()),
            Err(StorageError::DirectoryLocked)
        ));
    }
}
