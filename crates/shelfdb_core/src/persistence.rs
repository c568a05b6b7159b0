//! Collection persistence over a store backend.
//!
//! This layer owns the on-disk interpretation of collection files:
//! JSON encoding/decoding, metadata bookkeeping on write, and the
//! optional encryption envelope around file content. The backend
//! underneath only sees opaque bytes and guarantees atomic
//! replacement.

use crate::collection::Collection;
use crate::crypto::{Cipher, Envelope};
use crate::error::{CoreError, CoreResult};
use chrono::Utc;
use serde_json::Value;
use shelfdb_store::StoreBackend;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Reads and writes collections through a store backend.
///
/// When a cipher is configured, the serialized collection JSON is
/// wrapped in an [`Envelope`] and the envelope is what hits the disk;
/// plaintext files written before encryption was enabled still read
/// back transparently.
pub struct Persistence {
    backend: Box<dyn StoreBackend>,
    cipher: Option<Cipher>,
    max_file_size: u64,
}

impl Persistence {
    /// Creates a persistence layer over a backend.
    #[must_use]
    pub fn new(backend: Box<dyn StoreBackend>, cipher: Option<Cipher>, max_file_size: u64) -> Self {
        Self {
            backend,
            cipher,
            max_file_size,
        }
    }

    /// Reads a collection by name.
    ///
    /// A missing file yields a fresh empty collection, never an error.
    /// A file that exists but cannot be parsed is a hard error - a
    /// corrupted collection is never silently treated as empty.
    ///
    /// # Errors
    ///
    /// Returns a filesystem error for I/O failures or malformed
    /// content, and an encryption error for envelope files when no or
    /// the wrong key is configured.
    pub fn read(&self, name: &str) -> CoreResult<Collection> {
        let Some(bytes) = self.backend.load(name)? else {
            return Ok(Collection::new(name));
        };

        let value: Value = serde_json::from_slice(&bytes)
            .map_err(|e| CoreError::malformed(name, e.to_string()))?;

        let value = if Envelope::is_envelope(&value) {
            let envelope: Envelope = serde_json::from_value(value)
                .map_err(|e| CoreError::malformed(name, format!("bad envelope: {e}")))?;
            let Some(cipher) = &self.cipher else {
                return Err(CoreError::encryption(format!(
                    "collection {name} is encrypted but encryption is not configured"
                )));
            };
            let plaintext = cipher.decrypt(&envelope)?;
            serde_json::from_str(&plaintext)
                .map_err(|e| CoreError::malformed(name, e.to_string()))?
        } else {
            value
        };

        serde_json::from_value(value).map_err(|e| CoreError::malformed(name, e.to_string()))
    }

    /// Atomically persists a collection.
    ///
    /// Recomputes `metadata.count` from the record array, bumps
    /// `metadata.version`, and refreshes `metadata.last_modified`;
    /// callers never set these. An oversized payload logs a warning
    /// and proceeds.
    ///
    /// # Errors
    ///
    /// Returns a filesystem error if serialization or the atomic
    /// store fails.
    pub fn write(&self, name: &str, collection: &mut Collection) -> CoreResult<()> {
        collection.metadata.count = collection.records.len();
        collection.metadata.version += 1;
        collection.metadata.last_modified = Utc::now();

        let json = serde_json::to_string_pretty(&collection)
            .map_err(|e| CoreError::malformed(name, e.to_string()))?;

        let payload = match &self.cipher {
            Some(cipher) => {
                let envelope = cipher.encrypt(&json)?;
                serde_json::to_string_pretty(&envelope)
                    .map_err(|e| CoreError::malformed(name, e.to_string()))?
            }
            None => json,
        };

        if payload.len() as u64 > self.max_file_size {
            warn!(
                collection = name,
                size = payload.len(),
                limit = self.max_file_size,
                "collection file exceeds the configured size limit"
            );
        }

        self.backend.store(name, payload.as_bytes())?;
        Ok(())
    }

    /// Deletes a collection file (after the backend's safety backup).
    ///
    /// Returns `false` when no file existed.
    ///
    /// # Errors
    ///
    /// Returns a filesystem error if the backup or delete fails.
    pub fn delete(&self, name: &str) -> CoreResult<bool> {
        Ok(self.backend.remove(name)?)
    }

    /// Checks whether a collection file exists.
    ///
    /// # Errors
    ///
    /// Returns a filesystem error for an invalid name.
    pub fn exists(&self, name: &str) -> CoreResult<bool> {
        Ok(self.backend.exists(name)?)
    }

    /// Lists all persisted collection names.
    ///
    /// # Errors
    ///
    /// Returns a filesystem error if the listing fails.
    pub fn list(&self) -> CoreResult<Vec<String>> {
        Ok(self.backend.list()?)
    }

    /// Copies one collection (or all) into a timestamped backup.
    ///
    /// # Errors
    ///
    /// Returns a filesystem error if the source is missing or the copy
    /// fails.
    pub fn backup(&self, name: Option<&str>) -> CoreResult<PathBuf> {
        Ok(self.backend.backup(name)?)
    }

    /// Restores collections from a backup path.
    ///
    /// Returns the names restored.
    ///
    /// # Errors
    ///
    /// Returns a filesystem error if the backup source is missing or
    /// unreadable.
    pub fn restore(&self, path: &Path) -> CoreResult<Vec<String>> {
        Ok(self.backend.restore(path)?)
    }
}

impl std::fmt::Debug for Persistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persistence")
            .field("encrypted", &self.cipher.is_some())
            .field("max_file_size", &self.max_file_size)
            .finish_non_exhaustive()
    }
}
