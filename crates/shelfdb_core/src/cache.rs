//! Dirty-tracking memory cache for loaded collections.
//!
//! The cache owns the canonical in-process copy of every loaded
//! collection. Entries expire on a TTL measured from load time (not
//! last access), so even a hot entry eventually reloads from disk and
//! observes external changes such as a restore. A parallel dirty map
//! tracks unpersisted mutations by generation, kept separate from the
//! entries so marking dirty or clean never rewrites an entry - and so
//! a collection re-dirtied mid-flush is detected by generation
//! mismatch instead of being silently dropped.

use crate::collection::{Collection, Metadata};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// A cached collection plus its bookkeeping.
#[derive(Debug)]
struct CacheEntry {
    collection: Collection,
    loaded_at: Instant,
    last_access: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.loaded_at.elapsed() >= self.ttl
    }
}

/// Outcome of a cache lookup.
#[derive(Debug)]
pub enum Lookup {
    /// The entry is present and fresh; access time was refreshed.
    Hit,
    /// The entry had expired and was evicted; it carried unpersisted
    /// mutations the caller must flush (or re-insert on failure).
    ExpiredDirty {
        /// The evicted collection.
        collection: Collection,
        /// The dirty generation at eviction time.
        generation: u64,
    },
    /// The entry had expired and was evicted; nothing to flush.
    ExpiredClean,
    /// No entry under that name.
    Miss,
}

/// An entry pushed out of the cache.
#[derive(Debug)]
pub struct Evicted {
    /// Collection name.
    pub name: String,
    /// The evicted collection.
    pub collection: Collection,
    /// Dirty generation if the entry carried unpersisted mutations.
    pub dirty_generation: Option<u64>,
}

/// Bounded LRU cache of loaded collections with TTL expiry.
#[derive(Debug)]
pub struct MemoryCache {
    entries: HashMap<String, CacheEntry>,
    dirty: HashMap<String, u64>,
    max_entries: usize,
    default_ttl: Duration,
    next_generation: u64,
}

impl MemoryCache {
    /// Creates a cache bounded to `max_entries` with the given TTL.
    #[must_use]
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            dirty: HashMap::new(),
            max_entries: max_entries.max(1),
            default_ttl: ttl,
            next_generation: 0,
        }
    }

    /// Looks up an entry, evicting it if its TTL has passed.
    ///
    /// A hit refreshes the entry's last-access time. After a
    /// [`Lookup::Hit`], borrow the collection via [`get_mut`](Self::get_mut)
    /// or [`peek`](Self::peek).
    pub fn lookup(&mut self, name: &str) -> Lookup {
        let expired = match self.entries.get(name) {
            None => return Lookup::Miss,
            Some(entry) => entry.is_expired(),
        };
        if expired {
            let Some(entry) = self.entries.remove(name) else {
                return Lookup::Miss;
            };
            return match self.dirty.remove(name) {
                Some(generation) => Lookup::ExpiredDirty {
                    collection: entry.collection,
                    generation,
                },
                None => Lookup::ExpiredClean,
            };
        }
        if let Some(entry) = self.entries.get_mut(name) {
            entry.last_access = Instant::now();
        }
        Lookup::Hit
    }

    /// Borrows a cached collection mutably, without expiry checks.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Collection> {
        self.entries.get_mut(name).map(|e| &mut e.collection)
    }

    /// Borrows a cached collection without refreshing its access time.
    #[must_use]
    pub fn peek(&self, name: &str) -> Option<&Collection> {
        self.entries.get(name).map(|e| &e.collection)
    }

    /// Inserts (or replaces) an entry, evicting the least recently
    /// used entry when the bound is exceeded.
    ///
    /// Returns the evicted entry, if any, so the caller can flush it
    /// when it was dirty and discard its indexes.
    pub fn insert(&mut self, name: &str, collection: Collection, dirty: bool) -> Option<Evicted> {
        let evicted = if !self.entries.contains_key(name) && self.entries.len() >= self.max_entries
        {
            self.evict_lru()
        } else {
            None
        };

        let now = Instant::now();
        self.entries.insert(
            name.to_string(),
            CacheEntry {
                collection,
                loaded_at: now,
                last_access: now,
                ttl: self.default_ttl,
            },
        );
        if dirty {
            self.mark_dirty(name);
        }
        evicted
    }

    /// Inserts an entry only when the name is not already cached.
    ///
    /// Returns whether the insert happened, plus any evicted entry.
    /// Used by the load-on-miss path so a concurrent reader can never
    /// clobber an entry a mutator dirtied in the meantime.
    pub fn insert_if_absent(
        &mut self,
        name: &str,
        collection: Collection,
        dirty: bool,
    ) -> (bool, Option<Evicted>) {
        if self.entries.contains_key(name) {
            return (false, None);
        }
        let evicted = self.insert(name, collection, dirty);
        (true, evicted)
    }

    /// Re-caches an entry without enforcing the capacity bound,
    /// restoring its dirty generation.
    ///
    /// Used when flushing an evicted dirty entry failed: dropping it
    /// would lose mutations, so it goes back in (briefly overflowing
    /// the bound) and is retried next cycle.
    pub fn reinstate(&mut self, name: &str, collection: Collection, generation: Option<u64>) {
        let now = Instant::now();
        self.entries.insert(
            name.to_string(),
            CacheEntry {
                collection,
                loaded_at: now,
                last_access: now,
                ttl: self.default_ttl,
            },
        );
        if let Some(generation) = generation {
            self.dirty.insert(name.to_string(), generation);
        }
    }

    fn evict_lru(&mut self) -> Option<Evicted> {
        let name = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_access)
            .map(|(name, _)| name.clone())?;
        let entry = self.entries.remove(&name)?;
        let dirty_generation = self.dirty.remove(&name);
        Some(Evicted {
            name,
            collection: entry.collection,
            dirty_generation,
        })
    }

    /// Removes an entry and its dirty flag.
    pub fn remove(&mut self, name: &str) -> Option<Collection> {
        self.dirty.remove(name);
        self.entries.remove(name).map(|e| e.collection)
    }

    /// Checks for a non-expired entry without refreshing it.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.get(name).is_some_and(|e| !e.is_expired())
    }

    /// Drops every entry and dirty flag.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.dirty.clear();
    }

    /// Returns the number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Checks whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Flags a collection as carrying unpersisted mutations.
    ///
    /// Returns the new dirty generation; each call bumps it, which is
    /// how a flush detects a re-dirtied collection.
    pub fn mark_dirty(&mut self, name: &str) -> u64 {
        self.next_generation += 1;
        self.dirty.insert(name.to_string(), self.next_generation);
        self.next_generation
    }

    /// Unconditionally drops a collection's dirty flag.
    pub fn mark_clean(&mut self, name: &str) {
        self.dirty.remove(name);
    }

    /// Drops a dirty flag only if the generation is unchanged.
    ///
    /// A collection re-dirtied while mid-flush keeps its (newer) flag
    /// and is picked up again next cycle.
    pub fn mark_clean_if(&mut self, name: &str, generation: u64) {
        if self.dirty.get(name) == Some(&generation) {
            self.dirty.remove(name);
        }
    }

    /// Checks whether a collection is flagged dirty.
    #[must_use]
    pub fn is_dirty(&self, name: &str) -> bool {
        self.dirty.contains_key(name)
    }

    /// Snapshots the dirty set in FIFO (generation) order.
    #[must_use]
    pub fn dirty_snapshot(&self) -> Vec<(String, u64)> {
        let mut snapshot: Vec<_> = self
            .dirty
            .iter()
            .map(|(name, gen)| (name.clone(), *gen))
            .collect();
        snapshot.sort_by_key(|(_, gen)| *gen);
        snapshot
    }

    /// Evicts every expired entry, without requiring an access.
    ///
    /// Returns the evicted entries so the caller can flush the dirty
    /// ones and discard their indexes.
    pub fn sweep_expired(&mut self) -> Vec<Evicted> {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired())
            .map(|(name, _)| name.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|name| {
                let entry = self.entries.remove(&name)?;
                let dirty_generation = self.dirty.remove(&name);
                Some(Evicted {
                    name,
                    collection: entry.collection,
                    dirty_generation,
                })
            })
            .collect()
    }

    /// Copies persisted metadata back onto a cached entry after a
    /// flush, so the in-memory version counter tracks the disk.
    pub fn sync_metadata(&mut self, name: &str, metadata: &Metadata) {
        if let Some(entry) = self.entries.get_mut(name) {
            entry.collection.metadata.version = metadata.version;
            entry.collection.metadata.last_modified = metadata.last_modified;
        }
    }
}
