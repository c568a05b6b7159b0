//! Secondary indexes for equality lookups.
//!
//! Per (collection, field) the index is a hash multimap from
//! normalized field value to the ids of the records holding it.
//! Indexes are derived and rebuildable; they are never authoritative.
//! Staleness is prevented only by routing every mutation through the
//! coordinator's single choke-point - an unmaintained index is a
//! correctness bug, not a degraded mode.

use crate::record::Record;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Bucket key for null or missing values.
const NULL_SENTINEL: &str = "\u{0}null";

/// Normalizes a field value into a bucket key.
///
/// Strings index as-is, null/missing collapse to one sentinel, and
/// everything else uses its canonical JSON serialization - so
/// structurally equal values collide to one bucket.
#[must_use]
pub fn normalize_value(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => NULL_SENTINEL.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Per-collection manager of per-field equality indexes.
#[derive(Debug, Default)]
pub struct IndexManager {
    /// field -> normalized value -> record ids.
    indexes: HashMap<String, HashMap<String, HashSet<String>>>,
}

impl IndexManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks whether a field carries an index.
    #[must_use]
    pub fn has_index(&self, field: &str) -> bool {
        self.indexes.contains_key(field)
    }

    /// Returns the indexed fields.
    #[must_use]
    pub fn fields(&self) -> Vec<&str> {
        self.indexes.keys().map(String::as_str).collect()
    }

    /// Builds (or rebuilds) the index for one field from scratch.
    pub fn build(&mut self, records: &[Record], field: &str) {
        let mut buckets: HashMap<String, HashSet<String>> = HashMap::new();
        for record in records {
            let key = normalize_value(record.value_at(field).as_ref());
            buckets.entry(key).or_default().insert(record.id.clone());
        }
        self.indexes.insert(field.to_string(), buckets);
    }

    /// Looks up the ids of records whose field equals `value`.
    ///
    /// Returns `None` when the field carries no index - the caller
    /// falls back to a linear scan, never to an empty result.
    #[must_use]
    pub fn lookup(&self, field: &str, value: &Value) -> Option<Vec<String>> {
        let buckets = self.indexes.get(field)?;
        let key = normalize_value(Some(value));
        Some(
            buckets
                .get(&key)
                .map(|ids| {
                    let mut ids: Vec<String> = ids.iter().cloned().collect();
                    ids.sort();
                    ids
                })
                .unwrap_or_default(),
        )
    }

    /// Adds a record to every maintained index.
    pub fn insert_record(&mut self, record: &Record) {
        for (field, buckets) in &mut self.indexes {
            let key = normalize_value(record.value_at(field).as_ref());
            buckets.entry(key).or_default().insert(record.id.clone());
        }
    }

    /// Moves one record between buckets after a field change.
    pub fn update(&mut self, field: &str, id: &str, old: Option<&Value>, new: Option<&Value>) {
        let Some(buckets) = self.indexes.get_mut(field) else {
            return;
        };
        let old_key = normalize_value(old);
        let new_key = normalize_value(new);
        if old_key == new_key {
            return;
        }
        if let Some(ids) = buckets.get_mut(&old_key) {
            ids.remove(id);
            if ids.is_empty() {
                buckets.remove(&old_key);
            }
        }
        buckets.entry(new_key).or_default().insert(id.to_string());
    }

    /// Removes a record id from every bucket of every index.
    pub fn remove(&mut self, id: &str) {
        for buckets in self.indexes.values_mut() {
            buckets.retain(|_, ids| {
                ids.remove(id);
                !ids.is_empty()
            });
        }
    }

    /// Drops all indexes.
    pub fn clear(&mut self) {
        self.indexes.clear();
    }
}
