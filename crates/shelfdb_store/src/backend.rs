//! Store backend trait definition.

use crate::error::{StorageError, StorageResult};
use std::path::{Path, PathBuf};

/// Maximum length of a collection name.
pub const MAX_NAME_LEN: usize = 64;

/// A named blob store for shelfdb collections.
///
/// Store backends are **opaque blob stores**. They map validated
/// collection names to byte payloads. shelfdb owns all payload
/// interpretation - backends do not understand records, metadata,
/// or encryption envelopes.
///
/// # Invariants
///
/// - `store` is atomic: a reader never observes a partially written blob
/// - `load` returns exactly the bytes of the last completed `store`
/// - `remove` takes a safety backup before deleting
/// - Names are validated before any filesystem access
/// - Backends must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::MemoryBackend`] - For testing
/// - [`super::DirectoryBackend`] - For persistent storage
pub trait StoreBackend: Send + Sync {
    /// Loads the blob stored under `name`.
    ///
    /// Returns `None` when no blob exists under that name. An absent
    /// blob is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid or an I/O error occurs.
    fn load(&self, name: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Atomically replaces the blob stored under `name`.
    ///
    /// The previous content stays intact until the replacement is
    /// complete; a crash mid-write leaves the old blob untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid or an I/O error occurs.
    fn store(&self, name: &str, data: &[u8]) -> StorageResult<()>;

    /// Removes the blob stored under `name`, backing it up first.
    ///
    /// Returns `false` when no blob existed under that name.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid, the backup fails, or
    /// an I/O error occurs.
    fn remove(&self, name: &str) -> StorageResult<bool>;

    /// Checks whether a blob exists under `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid.
    fn exists(&self, name: &str) -> StorageResult<bool>;

    /// Lists the names of all stored blobs.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing fails.
    fn list(&self) -> StorageResult<Vec<String>>;

    /// Copies one blob (or all blobs) into a timestamped backup location.
    ///
    /// With `Some(name)`, copies that blob and returns the path of the
    /// copy. With `None`, copies every blob, writes a manifest naming
    /// the files produced, and returns the backup directory path.
    ///
    /// # Errors
    ///
    /// Returns an error if the named blob does not exist or an I/O
    /// error occurs.
    fn backup(&self, name: Option<&str>) -> StorageResult<PathBuf>;

    /// Restores blobs from a backup produced by [`backup`](Self::backup).
    ///
    /// Accepts either a single backup file or a full backup directory
    /// (resolved through its manifest). Returns the names restored.
    ///
    /// # Errors
    ///
    /// Returns an error if the backup source is missing or unreadable.
    fn restore(&self, path: &Path) -> StorageResult<Vec<String>>;
}

/// Validates a collection name against the safe-character allow-list.
///
/// Valid names are 1 to [`MAX_NAME_LEN`] characters drawn from
/// `[A-Za-z0-9_-]`. Everything else is rejected before it can touch
/// the filesystem.
///
/// # Errors
///
/// Returns [`StorageError::InvalidName`] for empty, oversized, or
/// unsafe names.
pub fn validate_name(name: &str) -> StorageResult<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(StorageError::invalid_name(name));
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return Err(StorageError::invalid_name(name));
    }
    Ok(())
}
