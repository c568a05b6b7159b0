//! # shelfdb Core
//!
//! Embedded, file-backed JSON document store engine.
//!
//! shelfdb persists named collections of schemaless JSON records to
//! individual files, keeps a write-through in-memory cache of recently
//! used collections, answers MongoDB-style filter/sort/paginate queries
//! against the in-memory representation, maintains optional secondary
//! indexes for equality lookups, and supports at-rest encryption of
//! persisted content.
//!
//! This crate provides:
//! - Atomic one-file-per-collection persistence (via `shelfdb_store`)
//! - A dirty-tracking memory cache with TTL expiry and auto-save
//! - A filter/sort/paginate query engine
//! - Per-field secondary indexes for equality lookups
//! - An AES-256-GCM encryption envelope for at-rest content
//! - The [`Database`] coordinator tying them into consistent CRUD
//!
//! ## Quick Start
//!
//! ```no_run
//! use shelfdb_core::{Config, Database, QueryOptions};
//! use serde_json::json;
//!
//! let db = Database::open(Config::new("data")).unwrap();
//!
//! db.create("users", json!({"name": "Jane", "age": 30})).unwrap();
//!
//! let result = db
//!     .find("users", &QueryOptions::new().with_filter(json!({"age": {"$gte": 30}})))
//!     .unwrap();
//! assert_eq!(result.total_docs, 1);
//!
//! db.close().unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod collection;
mod config;
pub mod crypto;
mod database;
mod error;
mod events;
mod index;
mod locks;
mod persistence;
pub mod query;
mod record;
mod stats;

pub use cache::{Evicted, Lookup, MemoryCache};
pub use collection::{Collection, Metadata};
pub use config::{CacheConfig, Config, EncryptionConfig};
pub use crypto::{Cipher, Envelope};
pub use database::{Database, TransactionId, MIGRATIONS_COLLECTION};
pub use error::{CoreError, CoreResult};
pub use events::{EventBus, StoreEvent};
pub use index::IndexManager;
pub use persistence::Persistence;
pub use query::{QueryOptions, QueryResult, SortOrder};
pub use record::Record;
pub use stats::{DatabaseStats, StatsSnapshot};
