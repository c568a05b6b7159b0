//! Error types for store operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for store operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A collection name failed validation.
    #[error("invalid collection name: {name:?}")]
    InvalidName {
        /// The rejected name.
        name: String,
    },

    /// The stored payload is corrupted or unreadable.
    #[error("store corrupted: {0}")]
    Corrupted(String),

    /// A backup source does not exist.
    #[error("backup source not found: {path}")]
    BackupNotFound {
        /// The missing path.
        path: PathBuf,
    },

    /// The data directory is held by another process.
    #[error("data directory locked: another process has exclusive access")]
    DirectoryLocked,
}

impl StorageError {
    /// Creates an invalid name error.
    pub fn invalid_name(name: impl Into<String>) -> Self {
        Self::InvalidName { name: name.into() }
    }

    /// Creates a corrupted store error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted(message.into())
    }

    /// Creates a missing backup source error.
    pub fn backup_not_found(path: impl Into<PathBuf>) -> Self {
        Self::BackupNotFound { path: path.into() }
    }
}
