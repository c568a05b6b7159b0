//! # shelfdb Store
//!
//! File store backends for shelfdb.
//!
//! This crate provides the lowest-level storage abstraction for shelfdb.
//! Store backends are **named blob stores** - they map collection names
//! to opaque byte payloads and do not interpret the data they hold.
//!
//! ## Design Principles
//!
//! - Backends map validated names to opaque blobs (load, store, remove)
//! - Every `store` is atomic: write-temp-then-rename, never a partial file
//! - Deleting a blob always takes a safety backup first
//! - Must be `Send + Sync` for concurrent access
//! - shelfdb_core owns all payload interpretation
//!
//! ## Available Backends
//!
//! - [`MemoryBackend`] - For testing and ephemeral storage
//! - [`DirectoryBackend`] - For persistent one-file-per-collection storage
//!
//! ## Example
//!
//! ```rust
//! use shelfdb_store::{StoreBackend, MemoryBackend};
//!
//! let backend = MemoryBackend::new();
//! backend.store("users", b"{}").unwrap();
//! let data = backend.load("users").unwrap();
//! assert_eq!(data.as_deref(), Some(b"{}".as_slice()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod dir;
mod error;
mod memory;

pub use backend::{validate_name, StoreBackend, MAX_NAME_LEN};
pub use dir::DirectoryBackend;
pub use error::{StorageError, StorageResult};
pub use memory::MemoryBackend;
