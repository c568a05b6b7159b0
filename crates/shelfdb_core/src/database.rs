//! The coordinator tying cache, persistence, queries, and indexes
//! into consistent CRUD operations.
//!
//! Every operation follows the same flow: validate inputs, load the
//! collection through the cache (reading from disk on a miss), apply
//! the operation in memory, mark the collection dirty when it mutated,
//! and record timing and hit/miss statistics. Durability comes from
//! the background auto-save cycle plus a final flush on close.
//!
//! Concurrent mutating calls against one collection are linearized by
//! a per-name mutex held for the duration of the operation; read-only
//! calls skip it and see the cache's already-consistent snapshot.

use crate::cache::{Evicted, Lookup, MemoryCache};
use crate::collection::Collection;
use crate::config::Config;
use crate::crypto::Cipher;
use crate::error::{CoreError, CoreResult};
use crate::events::{EventBus, StoreEvent};
use crate::index::IndexManager;
use crate::locks::CollectionLocks;
use crate::persistence::Persistence;
use crate::query::{self, QueryOptions, QueryResult, SortOrder};
use crate::record::Record;
use crate::stats::{DatabaseStats, StatsSnapshot};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Map, Value};
use shelfdb_store::{DirectoryBackend, StoreBackend};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Reserved collection holding the migration ledger.
pub const MIGRATIONS_COLLECTION: &str = "_migrations";

/// Opaque handle for an advisory transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId(Uuid);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// Shared engine state, reachable from both the public handle and the
/// background auto-save thread.
struct Engine {
    persistence: Persistence,
    cache: Mutex<MemoryCache>,
    indexes: Mutex<HashMap<String, IndexManager>>,
    stats: DatabaseStats,
    events: EventBus,
}

impl Engine {
    /// Makes sure a collection is cached, loading it on a miss.
    ///
    /// An expired entry is evicted first (flushing it when dirty, so
    /// no mutation is lost) and then re-read from disk, which is how
    /// external changes such as a restore become observable.
    fn ensure_loaded(&self, name: &str) -> CoreResult<()> {
        let outcome = {
            let mut cache = self.cache.lock();
            cache.lookup(name)
        };
        match outcome {
            Lookup::Hit => {
                self.stats.record_cache_hit();
                self.events.emit(StoreEvent::CacheHit {
                    collection: name.to_string(),
                });
                return Ok(());
            }
            Lookup::ExpiredDirty {
                mut collection,
                generation,
            } => {
                self.indexes.lock().remove(name);
                self.events.emit(StoreEvent::CacheEvicted {
                    collection: name.to_string(),
                });
                if let Err(e) = self.persistence.write(name, &mut collection) {
                    // Never drop unpersisted mutations.
                    self.cache.lock().reinstate(name, collection, Some(generation));
                    return Err(e);
                }
                self.stats.record_flush();
            }
            Lookup::ExpiredClean => {
                self.indexes.lock().remove(name);
                self.events.emit(StoreEvent::CacheEvicted {
                    collection: name.to_string(),
                });
            }
            Lookup::Miss => {}
        }

        self.stats.record_cache_miss();
        self.events.emit(StoreEvent::CacheMiss {
            collection: name.to_string(),
        });

        let collection = self.persistence.read(name)?;
        let mut manager = IndexManager::new();
        for field in &collection.metadata.indexes {
            manager.build(&collection.records, field);
        }

        let (inserted, evicted) = {
            let mut cache = self.cache.lock();
            cache.insert_if_absent(name, collection, false)
        };
        if inserted {
            self.indexes.lock().insert(name.to_string(), manager);
        }
        if let Some(evicted) = evicted {
            self.discard_evicted(evicted);
        }
        Ok(())
    }

    /// Runs a closure over the cached collection, read-only.
    fn with_collection<T>(
        &self,
        name: &str,
        mut f: impl FnMut(&Collection, Option<&IndexManager>) -> CoreResult<T>,
    ) -> CoreResult<T> {
        loop {
            self.ensure_loaded(name)?;
            let cache = self.cache.lock();
            let Some(collection) = cache.peek(name) else {
                // Evicted between load and borrow; reload.
                drop(cache);
                continue;
            };
            let indexes = self.indexes.lock();
            return f(collection, indexes.get(name));
        }
    }

    /// Runs a closure over the cached collection with its indexes,
    /// marking the collection dirty when the closure reports a
    /// mutation. The caller must hold the collection's write lock.
    fn with_collection_mut<T>(
        &self,
        name: &str,
        mut f: impl FnMut(&mut Collection, &mut IndexManager) -> CoreResult<(T, bool)>,
    ) -> CoreResult<T> {
        loop {
            self.ensure_loaded(name)?;
            let mut cache = self.cache.lock();
            let Some(collection) = cache.get_mut(name) else {
                drop(cache);
                continue;
            };
            let mut indexes = self.indexes.lock();
            let manager = indexes.entry(name.to_string()).or_default();
            let (out, mutated) = f(collection, manager)?;
            drop(indexes);
            if mutated {
                cache.mark_dirty(name);
            }
            return Ok(out);
        }
    }

    /// Persists one dirty collection and clears its flag, unless it
    /// was re-dirtied while the write was in flight.
    fn flush_one(&self, name: &str, generation: u64) -> CoreResult<()> {
        let snapshot = {
            let cache = self.cache.lock();
            cache.peek(name).cloned()
        };
        let Some(mut collection) = snapshot else {
            // Dropped from the cache since the snapshot was taken.
            self.cache.lock().mark_clean_if(name, generation);
            return Ok(());
        };
        self.persistence.write(name, &mut collection)?;
        let mut cache = self.cache.lock();
        cache.sync_metadata(name, &collection.metadata);
        cache.mark_clean_if(name, generation);
        self.stats.record_flush();
        Ok(())
    }

    /// Flushes every dirty collection, propagating the first failure.
    fn flush_dirty(&self) -> CoreResult<()> {
        let snapshot = {
            let cache = self.cache.lock();
            cache.dirty_snapshot()
        };
        for (name, generation) in snapshot {
            self.flush_one(&name, generation)?;
        }
        Ok(())
    }

    /// One background cycle: flush the dirty set, then sweep expired
    /// entries. Failures are reported and retried next cycle, never
    /// fatal.
    fn run_autosave_cycle(&self) {
        let snapshot = {
            let cache = self.cache.lock();
            cache.dirty_snapshot()
        };
        for (name, generation) in snapshot {
            if let Err(e) = self.flush_one(&name, generation) {
                self.stats.record_error();
                warn!(collection = %name, error = %e, "auto-save failed; retrying next cycle");
                self.events.emit(StoreEvent::AutoSaveError {
                    collection: name.clone(),
                    message: e.to_string(),
                });
            }
        }

        let swept = {
            let mut cache = self.cache.lock();
            cache.sweep_expired()
        };
        for evicted in swept {
            self.discard_evicted(evicted);
        }
    }

    /// Handles an entry pushed out of the cache: drop its indexes and
    /// flush it when dirty. A failed flush re-caches the entry so the
    /// mutations survive for the next cycle.
    fn discard_evicted(&self, evicted: Evicted) {
        let Evicted {
            name,
            mut collection,
            dirty_generation,
        } = evicted;
        self.indexes.lock().remove(&name);
        self.events.emit(StoreEvent::CacheEvicted {
            collection: name.clone(),
        });
        if dirty_generation.is_none() {
            return;
        }
        match self.persistence.write(&name, &mut collection) {
            Ok(()) => self.stats.record_flush(),
            Err(e) => {
                self.stats.record_error();
                warn!(collection = %name, error = %e, "flush of evicted collection failed; re-caching");
                self.events.emit(StoreEvent::AutoSaveError {
                    collection: name.clone(),
                    message: e.to_string(),
                });
                self.cache.lock().reinstate(&name, collection, dirty_generation);
            }
        }
    }
}

/// The embedded document store.
///
/// `Database` is the only mutator of cached collections; the index
/// manager and query engine only read. See the crate docs for an
/// end-to-end example.
///
/// # Transactions
///
/// Transactions are advisory. Operations "inside" one apply to the
/// cache immediately, with no isolation; `commit` merely discards the
/// handle, and `rollback` clears the **entire** cache, forcing every
/// collection to reload from its last durable state. This is a
/// documented, intentionally weak guarantee.
pub struct Database {
    config: Config,
    engine: Arc<Engine>,
    locks: CollectionLocks,
    transactions: Mutex<HashSet<TransactionId>>,
    is_open: RwLock<bool>,
    autosave_shutdown: Arc<AtomicBool>,
    autosave_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Database {
    /// Opens a database over a data directory.
    ///
    /// Creates the directory if needed, acquires its exclusive lock,
    /// and starts the auto-save thread (unless the interval is zero).
    ///
    /// # Errors
    ///
    /// Returns a validation error for a bad configuration, and a
    /// filesystem error if the directory cannot be opened or another
    /// process holds its lock.
    pub fn open(config: Config) -> CoreResult<Self> {
        config.validate()?;
        let backend = DirectoryBackend::open(&config.data_dir)?;
        Self::open_with_backend(config, Box::new(backend))
    }

    /// Opens a database over a caller-supplied store backend.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a bad configuration or
    /// encryption secret.
    pub fn open_with_backend(config: Config, backend: Box<dyn StoreBackend>) -> CoreResult<Self> {
        config.validate()?;
        let cipher = config
            .encryption
            .as_ref()
            .map(|e| Cipher::new(&e.secret))
            .transpose()?;

        let engine = Arc::new(Engine {
            persistence: Persistence::new(backend, cipher, config.max_file_size),
            cache: Mutex::new(MemoryCache::new(config.cache.max_entries, config.cache.ttl)),
            indexes: Mutex::new(HashMap::new()),
            stats: DatabaseStats::new(),
            events: EventBus::new(),
        });

        let autosave_shutdown = Arc::new(AtomicBool::new(false));
        let autosave_handle = if config.autosave_interval.is_zero() {
            None
        } else {
            let engine = Arc::clone(&engine);
            let shutdown = Arc::clone(&autosave_shutdown);
            let interval = config.autosave_interval;
            Some(thread::spawn(move || {
                while !shutdown.load(Ordering::Relaxed) {
                    thread::sleep(interval);
                    if shutdown.load(Ordering::Relaxed) {
                        break;
                    }
                    engine.run_autosave_cycle();
                }
            }))
        };

        debug!(data_dir = %config.data_dir.display(), "database opened");
        Ok(Self {
            config,
            engine,
            locks: CollectionLocks::new(),
            transactions: Mutex::new(HashSet::new()),
            is_open: RwLock::new(true),
            autosave_shutdown,
            autosave_handle: Mutex::new(autosave_handle),
        })
    }

    /// Opens a fresh in-memory database for testing.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a bad configuration.
    pub fn open_in_memory(config: Config) -> CoreResult<Self> {
        use shelfdb_store::MemoryBackend;
        Self::open_with_backend(config, Box::new(MemoryBackend::new()))
    }

    // ========================================================================
    // CRUD
    // ========================================================================

    /// Creates a record from a payload object.
    ///
    /// An `"id"` string in the payload is honored (and checked for
    /// uniqueness); otherwise a UUID is assigned. `createdAt` and
    /// `updatedAt` are always server-assigned.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a non-object payload or a
    /// duplicate id, and a filesystem error if the collection cannot
    /// be loaded.
    pub fn create(&self, collection: &str, data: Value) -> CoreResult<Record> {
        self.ensure_open()?;
        let started = Instant::now();
        let Value::Object(fields) = data else {
            return Err(CoreError::validation_for(
                collection,
                "record payload must be a JSON object",
            ));
        };
        let record = Record::new(fields);

        let lock = self.locks.acquire(collection);
        let _guard = lock.lock();
        let created = self.engine.with_collection_mut(collection, |col, idx| {
            if col.position(&record.id).is_some() {
                return Err(CoreError::validation_for(
                    collection,
                    format!("duplicate record id: {}", record.id),
                ));
            }
            idx.insert_record(&record);
            col.records.push(record.clone());
            Ok((record.clone(), true))
        })?;

        self.engine.stats.record_create(started.elapsed());
        self.engine.events.emit(StoreEvent::RecordCreated {
            collection: collection.to_string(),
            id: created.id.clone(),
        });
        Ok(created)
    }

    /// Filters, sorts, and paginates a collection.
    ///
    /// # Errors
    ///
    /// Returns a query error for invalid options or operators, and a
    /// filesystem error if the collection cannot be loaded.
    pub fn find(&self, collection: &str, options: &QueryOptions) -> CoreResult<QueryResult> {
        self.ensure_open()?;
        options.validate()?;
        let started = Instant::now();
        let result = self
            .engine
            .with_collection(collection, |col, _| query::process(&col.records, options))?;
        self.engine.stats.record_query(started.elapsed());
        Ok(result)
    }

    /// Finds a record by id.
    ///
    /// A missing id is a defined success outcome: `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns a filesystem error if the collection cannot be loaded.
    pub fn find_by_id(&self, collection: &str, id: &str) -> CoreResult<Option<Record>> {
        self.ensure_open()?;
        let started = Instant::now();
        let found = self
            .engine
            .with_collection(collection, |col, _| Ok(col.get(id).cloned()))?;
        self.engine.stats.record_query(started.elapsed());
        Ok(found)
    }

    /// Finds the first record matching a filter.
    ///
    /// Plain equality on an indexed field is served from the index;
    /// everything else scans. No match is `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns a query error for unsupported operators and a
    /// filesystem error if the collection cannot be loaded.
    pub fn find_one(&self, collection: &str, filter: &Value) -> CoreResult<Option<Record>> {
        self.ensure_open()?;
        let started = Instant::now();
        let found = self.engine.with_collection(collection, |col, idx| {
            if let Some(ids) = equality_candidates(idx, filter) {
                for id in &ids {
                    if let Some(record) = col.get(id) {
                        if query::matches(record, filter)? {
                            return Ok(Some(record.clone()));
                        }
                    }
                }
                return Ok(None);
            }
            for record in &col.records {
                if query::matches(record, filter)? {
                    return Ok(Some(record.clone()));
                }
            }
            Ok(None)
        })?;
        self.engine.stats.record_query(started.elapsed());
        Ok(found)
    }

    /// Merges a partial payload into a record.
    ///
    /// Stored `id` and `createdAt` can never change; `updatedAt`
    /// strictly advances. A missing id yields `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a non-object payload and a
    /// filesystem error if the collection cannot be loaded.
    pub fn update(&self, collection: &str, id: &str, partial: Value) -> CoreResult<Option<Record>> {
        self.ensure_open()?;
        let started = Instant::now();
        let Value::Object(partial) = partial else {
            return Err(CoreError::validation_for(
                collection,
                "update payload must be a JSON object",
            ));
        };

        let lock = self.locks.acquire(collection);
        let _guard = lock.lock();
        let updated = self.engine.with_collection_mut(collection, |col, idx| {
            let Some(pos) = col.position(id) else {
                return Ok((None, false));
            };
            let record = apply_partial(col, idx, pos, partial.clone());
            Ok((Some(record), true))
        })?;

        if let Some(record) = &updated {
            self.engine.stats.record_update(started.elapsed());
            self.engine.events.emit(StoreEvent::RecordUpdated {
                collection: collection.to_string(),
                id: record.id.clone(),
            });
        }
        Ok(updated)
    }

    /// Deletes a record by id.
    ///
    /// Returns `false` when the id does not exist; count decreases by
    /// exactly one otherwise.
    ///
    /// # Errors
    ///
    /// Returns a filesystem error if the collection cannot be loaded.
    pub fn delete(&self, collection: &str, id: &str) -> CoreResult<bool> {
        self.ensure_open()?;
        let started = Instant::now();

        let lock = self.locks.acquire(collection);
        let _guard = lock.lock();
        let removed = self.engine.with_collection_mut(collection, |col, idx| {
            let Some(pos) = col.position(id) else {
                return Ok((false, false));
            };
            idx.remove(id);
            col.records.remove(pos);
            Ok((true, true))
        })?;

        if removed {
            self.engine.stats.record_delete(started.elapsed());
            self.engine.events.emit(StoreEvent::RecordDeleted {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        Ok(removed)
    }

    /// Counts the records matching a filter (all records with `None`).
    ///
    /// # Errors
    ///
    /// Returns a query error for unsupported operators and a
    /// filesystem error if the collection cannot be loaded.
    pub fn count(&self, collection: &str, filter: Option<&Value>) -> CoreResult<usize> {
        self.ensure_open()?;
        let started = Instant::now();
        let count = self.engine.with_collection(collection, |col, idx| {
            let Some(filter) = filter else {
                return Ok(col.len());
            };
            if let Some(ids) = equality_candidates(idx, filter) {
                let mut n = 0;
                for id in &ids {
                    if let Some(record) = col.get(id) {
                        if query::matches(record, filter)? {
                            n += 1;
                        }
                    }
                }
                return Ok(n);
            }
            let mut n = 0;
            for record in &col.records {
                if query::matches(record, filter)? {
                    n += 1;
                }
            }
            Ok(n)
        })?;
        self.engine.stats.record_query(started.elapsed());
        Ok(count)
    }

    /// Updates the first record matching the filter, or creates one
    /// from the payload when nothing matches.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a non-object payload, a query
    /// error for unsupported operators, and a filesystem error if the
    /// collection cannot be loaded.
    pub fn upsert(&self, collection: &str, filter: &Value, data: Value) -> CoreResult<Record> {
        self.ensure_open()?;
        let started = Instant::now();
        let Value::Object(fields) = data else {
            return Err(CoreError::validation_for(
                collection,
                "upsert payload must be a JSON object",
            ));
        };

        let lock = self.locks.acquire(collection);
        let _guard = lock.lock();
        let (record, was_update) = self.engine.with_collection_mut(collection, |col, idx| {
            let mut existing = None;
            for record in &col.records {
                if query::matches(record, filter)? {
                    existing = Some(record.id.clone());
                    break;
                }
            }
            match existing.and_then(|id| col.position(&id)) {
                Some(pos) => {
                    let record = apply_partial(col, idx, pos, fields.clone());
                    Ok(((record, true), true))
                }
                None => {
                    let record = Record::new(fields.clone());
                    idx.insert_record(&record);
                    col.records.push(record.clone());
                    Ok(((record, false), true))
                }
            }
        })?;

        if was_update {
            self.engine.stats.record_update(started.elapsed());
            self.engine.events.emit(StoreEvent::RecordUpdated {
                collection: collection.to_string(),
                id: record.id.clone(),
            });
        } else {
            self.engine.stats.record_create(started.elapsed());
            self.engine.events.emit(StoreEvent::RecordCreated {
                collection: collection.to_string(),
                id: record.id.clone(),
            });
        }
        Ok(record)
    }

    // ========================================================================
    // Collections and indexes
    // ========================================================================

    /// Lists all persisted collection names.
    ///
    /// # Errors
    ///
    /// Returns a filesystem error if the listing fails.
    pub fn list_collections(&self) -> CoreResult<Vec<String>> {
        self.ensure_open()?;
        self.engine.persistence.list()
    }

    /// Destroys a collection: safety backup, then the file, cache
    /// entry, indexes, and per-collection write lock are purged.
    ///
    /// Returns `false` when neither a file nor a cache entry existed.
    ///
    /// # Errors
    ///
    /// Returns a filesystem error if the backup or delete fails.
    pub fn drop_collection(&self, name: &str) -> CoreResult<bool> {
        self.ensure_open()?;
        let lock = self.locks.acquire(name);
        let _guard = lock.lock();

        let file_existed = self.engine.persistence.delete(name)?;
        let cached = {
            let mut cache = self.engine.cache.lock();
            cache.remove(name).is_some()
        };
        self.engine.indexes.lock().remove(name);
        self.locks.discard(name);

        let existed = file_existed || cached;
        if existed {
            self.engine.events.emit(StoreEvent::CollectionDropped {
                collection: name.to_string(),
            });
        }
        Ok(existed)
    }

    /// Builds (or rebuilds) an equality index on a field and records
    /// it in the collection metadata.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty field name and a
    /// filesystem error if the collection cannot be loaded.
    pub fn register_index(&self, collection: &str, field: &str) -> CoreResult<()> {
        self.ensure_open()?;
        if field.is_empty() {
            return Err(CoreError::validation_for(collection, "index field must not be empty"));
        }
        let lock = self.locks.acquire(collection);
        let _guard = lock.lock();
        self.engine.with_collection_mut(collection, |col, idx| {
            idx.build(&col.records, field);
            if !col.metadata.indexes.iter().any(|f| f == field) {
                col.metadata.indexes.push(field.to_string());
            }
            Ok(((), true))
        })
    }

    // ========================================================================
    // Transactions (advisory)
    // ========================================================================

    /// Allocates an advisory transaction handle.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Closed`] after close.
    pub fn begin_transaction(&self) -> CoreResult<TransactionId> {
        self.ensure_open()?;
        let id = TransactionId(Uuid::new_v4());
        self.transactions.lock().insert(id);
        Ok(id)
    }

    /// Discards a transaction handle; the operations already applied.
    ///
    /// # Errors
    ///
    /// Returns a transaction error for an unknown handle.
    pub fn commit_transaction(&self, id: TransactionId) -> CoreResult<()> {
        self.ensure_open()?;
        if self.transactions.lock().remove(&id) {
            Ok(())
        } else {
            Err(CoreError::UnknownTransaction { id: id.to_string() })
        }
    }

    /// Discards a transaction handle and clears the **entire** cache,
    /// forcing every collection to reload from its last durable state.
    /// Unpersisted mutations - whoever made them - are dropped.
    ///
    /// # Errors
    ///
    /// Returns a transaction error for an unknown handle.
    pub fn rollback_transaction(&self, id: TransactionId) -> CoreResult<()> {
        self.ensure_open()?;
        if !self.transactions.lock().remove(&id) {
            return Err(CoreError::UnknownTransaction { id: id.to_string() });
        }
        self.clear_cache();
        Ok(())
    }

    /// Drops every cache entry, index, and statistic counter.
    pub fn clear_cache(&self) {
        self.engine.cache.lock().clear();
        self.engine.indexes.lock().clear();
        self.engine.stats.reset();
    }

    // ========================================================================
    // Globals, versions, migrations
    // ========================================================================

    /// Upserts the singleton record of a global document.
    ///
    /// Globals live in derived `globals_<slug>` collections holding
    /// exactly one record.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a non-object payload and a
    /// filesystem error if the collection cannot be loaded.
    pub fn set_global(&self, slug: &str, data: Value) -> CoreResult<Record> {
        self.ensure_open()?;
        let name = global_collection(slug);
        let Value::Object(fields) = data else {
            return Err(CoreError::validation_for(name, "global payload must be a JSON object"));
        };

        let lock = self.locks.acquire(&name);
        let _guard = lock.lock();
        self.engine.with_collection_mut(&name, |col, idx| {
            if col.is_empty() {
                let record = Record::new(fields.clone());
                idx.insert_record(&record);
                col.records.push(record.clone());
                Ok((record, true))
            } else {
                let record = apply_partial(col, idx, 0, fields.clone());
                Ok((record, true))
            }
        })
    }

    /// Reads the singleton record of a global document, if set.
    ///
    /// # Errors
    ///
    /// Returns a filesystem error if the collection cannot be loaded.
    pub fn get_global(&self, slug: &str) -> CoreResult<Option<Record>> {
        self.ensure_open()?;
        self.engine
            .with_collection(&global_collection(slug), |col, _| {
                Ok(col.records.first().cloned())
            })
    }

    /// Snapshots a document into its collection's version history.
    ///
    /// Versions are ordinary records in a derived
    /// `<collection>_versions` collection, carrying the parent id and
    /// the snapshot under `version`.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`create`](Self::create).
    pub fn create_version(
        &self,
        collection: &str,
        parent_id: &str,
        snapshot: Value,
    ) -> CoreResult<Record> {
        let mut fields = Map::new();
        fields.insert("parent".to_string(), Value::String(parent_id.to_string()));
        fields.insert("version".to_string(), snapshot);
        self.create(&versions_collection(collection), Value::Object(fields))
    }

    /// Queries a collection's version history.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`find`](Self::find).
    pub fn find_versions(
        &self,
        collection: &str,
        options: &QueryOptions,
    ) -> CoreResult<QueryResult> {
        self.find(&versions_collection(collection), options)
    }

    /// Appends an entry to the migration ledger.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`create`](Self::create).
    pub fn record_migration(&self, name: &str, batch: u64) -> CoreResult<Record> {
        self.create(MIGRATIONS_COLLECTION, json!({"name": name, "batch": batch}))
    }

    /// Reads the migration ledger, ordered by batch then name.
    ///
    /// # Errors
    ///
    /// Returns a filesystem error if the ledger cannot be loaded.
    pub fn migrations(&self) -> CoreResult<Vec<Record>> {
        let options = QueryOptions::new()
            .sort_by("batch", SortOrder::Asc)
            .sort_by("name", SortOrder::Asc);
        Ok(self.find(MIGRATIONS_COLLECTION, &options)?.docs)
    }

    // ========================================================================
    // Durability, backups, lifecycle
    // ========================================================================

    /// Synchronously persists every dirty collection.
    ///
    /// # Errors
    ///
    /// Propagates the first write failure.
    pub fn flush(&self) -> CoreResult<()> {
        self.ensure_open()?;
        self.engine.flush_dirty()
    }

    /// Flushes, then copies one collection (or all) into a
    /// timestamped backup. Returns the backup path.
    ///
    /// # Errors
    ///
    /// Returns a filesystem error if the flush or copy fails.
    pub fn backup(&self, name: Option<&str>) -> CoreResult<PathBuf> {
        self.ensure_open()?;
        self.engine.flush_dirty()?;
        self.engine.persistence.backup(name)
    }

    /// Restores collections from a backup path and purges their cache
    /// entries so subsequent reads observe the restored state.
    ///
    /// Returns the names restored.
    ///
    /// # Errors
    ///
    /// Returns a filesystem error if the backup source is missing or
    /// unreadable.
    pub fn restore(&self, path: &Path) -> CoreResult<Vec<String>> {
        self.ensure_open()?;
        let restored = self.engine.persistence.restore(path)?;
        let mut cache = self.engine.cache.lock();
        let mut indexes = self.engine.indexes.lock();
        for name in &restored {
            cache.remove(name);
            indexes.remove(name);
        }
        Ok(restored)
    }

    /// Subscribes to engine notifications.
    pub fn subscribe(&self) -> Receiver<StoreEvent> {
        self.engine.events.subscribe()
    }

    /// Takes a point-in-time statistics snapshot.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.engine.stats.snapshot()
    }

    /// Returns the configuration the database was opened with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Checks whether the database accepts calls.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.is_open.read()
    }

    /// Stops the auto-save thread, flushes every dirty collection,
    /// and rejects further public calls.
    ///
    /// Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Propagates the first failure of the final flush.
    pub fn close(&self) -> CoreResult<()> {
        {
            let mut open = self.is_open.write();
            if !*open {
                return Ok(());
            }
            *open = false;
        }
        self.autosave_shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.autosave_handle.lock().take() {
            let _ = handle.join();
        }
        self.engine.flush_dirty()
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if *self.is_open.read() {
            Ok(())
        } else {
            Err(CoreError::Closed)
        }
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("data_dir", &self.config.data_dir)
            .field("is_open", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Derived collection name for a global document.
fn global_collection(slug: &str) -> String {
    format!("globals_{slug}")
}

/// Derived collection name for a version history.
fn versions_collection(collection: &str) -> String {
    format!("{collection}_versions")
}

/// Merges a partial payload into one record, keeping every index on
/// the collection consistent with the change.
fn apply_partial(
    col: &mut Collection,
    idx: &mut IndexManager,
    pos: usize,
    partial: Map<String, Value>,
) -> Record {
    let id = col.records[pos].id.clone();
    let indexed: Vec<String> = idx.fields().iter().map(|f| (*f).to_string()).collect();
    let old: Vec<(String, Option<Value>)> = indexed
        .iter()
        .map(|field| (field.clone(), col.records[pos].value_at(field)))
        .collect();

    col.records[pos].apply(partial);

    for (field, old_value) in old {
        let new_value = col.records[pos].value_at(&field);
        idx.update(&field, &id, old_value.as_ref(), new_value.as_ref());
    }
    col.records[pos].clone()
}

/// Extracts an index-served candidate set for a filter.
///
/// The first top-level plain-equality (or single `$eq`) condition on
/// an indexed field narrows the scan to its bucket; the bucket is a
/// superset of the true matches for that field, so callers still
/// verify each candidate against the full filter.
fn equality_candidates(idx: Option<&IndexManager>, filter: &Value) -> Option<Vec<String>> {
    let idx = idx?;
    let fields = filter.as_object()?;
    for (path, condition) in fields {
        let value = match condition {
            Value::Object(ops) if ops.keys().any(|k| k.starts_with('$')) => {
                match (ops.len(), ops.get("$eq")) {
                    (1, Some(value)) => value,
                    _ => continue,
                }
            }
            other => other,
        };
        if idx.has_index(path) {
            return idx.lookup(path, value);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn open() -> Database {
        let config = Config::new("memory").autosave_interval(Duration::ZERO);
        Database::open_in_memory(config).unwrap()
    }

    #[test]
    fn create_and_find_by_id() {
        let db = open();
        let record = db.create("users", json!({"name": "Jane", "age": 30})).unwrap();

        let found = db.find_by_id("users", &record.id).unwrap().unwrap();
        assert_eq!(found.fields["name"], json!("Jane"));
        assert_eq!(found.id, record.id);
    }

    #[test]
    fn find_by_missing_id_is_none() {
        let db = open();
        assert!(db.find_by_id("users", "ghost").unwrap().is_none());
    }

    #[test]
    fn create_rejects_non_object_payload() {
        let db = open();
        let err = db.create("users", json!(["not", "an", "object"])).unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert_eq!(db.count("users", None).unwrap(), 0);
    }

    #[test]
    fn create_rejects_duplicate_id() {
        let db = open();
        db.create("users", json!({"id": "u1"})).unwrap();
        let err = db.create("users", json!({"id": "u1"})).unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert_eq!(db.count("users", None).unwrap(), 1);
    }

    #[test]
    fn update_preserves_id_and_created_at() {
        let db = open();
        let record = db.create("users", json!({"name": "Jane"})).unwrap();

        let updated = db
            .update("users", &record.id, json!({"id": "other", "name": "Janet"}))
            .unwrap()
            .unwrap();

        assert_eq!(updated.id, record.id);
        assert_eq!(updated.created_at, record.created_at);
        assert!(updated.updated_at > record.updated_at);
        assert_eq!(updated.fields["name"], json!("Janet"));
    }

    #[test]
    fn update_missing_id_is_none() {
        let db = open();
        assert!(db.update("users", "ghost", json!({"a": 1})).unwrap().is_none());
    }

    #[test]
    fn delete_then_find_is_none() {
        let db = open();
        let record = db.create("users", json!({"name": "Jane"})).unwrap();
        assert_eq!(db.count("users", None).unwrap(), 1);

        assert!(db.delete("users", &record.id).unwrap());
        assert!(db.find_by_id("users", &record.id).unwrap().is_none());
        assert_eq!(db.count("users", None).unwrap(), 0);
        assert!(!db.delete("users", &record.id).unwrap());
    }

    #[test]
    fn count_with_filter() {
        let db = open();
        for age in [25, 30, 35] {
            db.create("users", json!({"age": age})).unwrap();
        }
        assert_eq!(db.count("users", Some(&json!({"age": {"$gte": 30}}))).unwrap(), 2);
    }

    #[test]
    fn upsert_creates_then_updates() {
        let db = open();
        let filter = json!({"slug": "home"});

        let created = db
            .upsert("pages", &filter, json!({"slug": "home", "title": "Home"}))
            .unwrap();
        let updated = db
            .upsert("pages", &filter, json!({"title": "Welcome"}))
            .unwrap();

        assert_eq!(created.id, updated.id);
        assert_eq!(updated.fields["title"], json!("Welcome"));
        assert_eq!(db.count("pages", None).unwrap(), 1);
    }

    #[test]
    fn indexed_lookup_stays_correct_through_mutations() {
        let db = open();
        db.register_index("users", "email").unwrap();

        let a = db
            .create("users", json!({"email": "a@example.com"}))
            .unwrap();
        db.create("users", json!({"email": "b@example.com"})).unwrap();

        let found = db
            .find_one("users", &json!({"email": "a@example.com"}))
            .unwrap()
            .unwrap();
        assert_eq!(found.id, a.id);

        db.update("users", &a.id, json!({"email": "c@example.com"}))
            .unwrap();
        assert!(db
            .find_one("users", &json!({"email": "a@example.com"}))
            .unwrap()
            .is_none());
        let moved = db
            .find_one("users", &json!({"email": "c@example.com"}))
            .unwrap()
            .unwrap();
        assert_eq!(moved.id, a.id);

        db.delete("users", &a.id).unwrap();
        assert!(db
            .find_one("users", &json!({"email": "c@example.com"}))
            .unwrap()
            .is_none());
    }

    #[test]
    fn transactions_are_advisory() {
        let db = open();
        let tx = db.begin_transaction().unwrap();
        db.create("users", json!({"name": "Jane"})).unwrap();
        db.commit_transaction(tx).unwrap();
        assert_eq!(db.count("users", None).unwrap(), 1);

        let err = db.commit_transaction(tx).unwrap_err();
        assert_eq!(err.kind(), "transaction");
    }

    #[test]
    fn rollback_reloads_from_durable_state() {
        let db = open();
        db.create("users", json!({"name": "durable"})).unwrap();
        db.flush().unwrap();

        let tx = db.begin_transaction().unwrap();
        db.create("users", json!({"name": "speculative"})).unwrap();
        assert_eq!(db.count("users", None).unwrap(), 2);

        db.rollback_transaction(tx).unwrap();
        assert_eq!(db.count("users", None).unwrap(), 1);
    }

    #[test]
    fn globals_are_singletons() {
        let db = open();
        let first = db.set_global("site", json!({"title": "One"})).unwrap();
        let second = db.set_global("site", json!({"title": "Two"})).unwrap();

        assert_eq!(first.id, second.id);
        let current = db.get_global("site").unwrap().unwrap();
        assert_eq!(current.fields["title"], json!("Two"));
        assert!(db.get_global("other").unwrap().is_none());
    }

    #[test]
    fn versions_accumulate_per_parent() {
        let db = open();
        let page = db.create("pages", json!({"title": "v1"})).unwrap();
        db.create_version("pages", &page.id, json!({"title": "v1"})).unwrap();
        db.create_version("pages", &page.id, json!({"title": "v2"})).unwrap();

        let versions = db
            .find_versions("pages", &QueryOptions::new().with_filter(json!({"parent": page.id})))
            .unwrap();
        assert_eq!(versions.total_docs, 2);
    }

    #[test]
    fn migration_ledger_sorts_by_batch() {
        let db = open();
        db.record_migration("b_second", 2).unwrap();
        db.record_migration("a_first", 1).unwrap();

        let names: Vec<String> = db
            .migrations()
            .unwrap()
            .iter()
            .map(|r| r.fields["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a_first", "b_second"]);
    }

    #[test]
    fn stats_track_hits_and_misses() {
        let db = open();
        db.create("users", json!({"n": 1})).unwrap(); // miss (first load)
        db.count("users", None).unwrap(); // hit

        let snap = db.stats();
        assert_eq!(snap.cache_misses, 1);
        assert!(snap.cache_hits >= 1);
        assert_eq!(snap.creates, 1);
    }

    #[test]
    fn events_fire_for_mutations() {
        let db = open();
        let rx = db.subscribe();

        let record = db.create("users", json!({"n": 1})).unwrap();
        db.delete("users", &record.id).unwrap();

        let events: Vec<StoreEvent> = rx.try_iter().collect();
        assert!(events.contains(&StoreEvent::RecordCreated {
            collection: "users".to_string(),
            id: record.id.clone(),
        }));
        assert!(events.contains(&StoreEvent::RecordDeleted {
            collection: "users".to_string(),
            id: record.id.clone(),
        }));
    }

    #[test]
    fn closed_database_rejects_calls() {
        let db = open();
        db.close().unwrap();
        assert!(!db.is_open());

        let err = db.create("users", json!({"n": 1})).unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert!(matches!(err, CoreError::Closed));

        // Closing again is a no-op.
        db.close().unwrap();
    }

    #[test]
    fn drop_collection_purges_everything() {
        let db = open();
        db.create("users", json!({"n": 1})).unwrap();
        db.flush().unwrap();

        assert!(db.drop_collection("users").unwrap());
        assert_eq!(db.count("users", None).unwrap(), 0);
        assert!(!db.list_collections().unwrap().contains(&"users".to_string()));
        assert!(!db.drop_collection("users").unwrap());

        // The name is reusable with fresh per-collection state.
        db.create("users", json!({"n": 2})).unwrap();
        assert_eq!(db.count("users", None).unwrap(), 1);
    }

    #[test]
    fn unknown_rollback_handle_errors() {
        let db = open();
        let tx = db.begin_transaction().unwrap();
        db.rollback_transaction(tx).unwrap();
        let err = db.rollback_transaction(tx).unwrap_err();
        assert_eq!(err.kind(), "transaction");
    }
}
