//! Collections and their metadata.

use crate::record::Record;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata persisted alongside a collection's records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Collection name.
    pub name: String,
    /// Record count; always `records.len()`, recomputed on every write.
    pub count: usize,
    /// Timestamp of the last persisted write.
    pub last_modified: DateTime<Utc>,
    /// Monotonically increasing counter, bumped on every persisted write.
    pub version: u64,
    /// Fields carrying a secondary index.
    #[serde(default)]
    pub indexes: Vec<String>,
}

impl Metadata {
    /// Creates metadata for a fresh empty collection.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            count: 0,
            last_modified: Utc::now(),
            version: 0,
            indexes: Vec::new(),
        }
    }
}

/// A named ordered sequence of records plus its metadata.
///
/// The collection is the unit of locking, caching, and persistence.
/// One collection maps to one file on disk and one cache slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    /// Collection metadata.
    pub metadata: Metadata,
    /// The records, in insertion order.
    pub records: Vec<Record>,
}

impl Collection {
    /// Creates a fresh empty collection.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            metadata: Metadata::new(name),
            records: Vec::new(),
        }
    }

    /// Returns the position of the record with the given id.
    #[must_use]
    pub fn position(&self, id: &str) -> Option<usize> {
        self.records.iter().position(|r| r.id == id)
    }

    /// Returns the record with the given id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Record> {
        self.records.iter().find(|r| r.id == id)
    }

    /// Returns the number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Checks whether the collection holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fresh_collection_is_empty() {
        let collection = Collection::new("users");
        assert!(collection.is_empty());
        assert_eq!(collection.metadata.name, "users");
        assert_eq!(collection.metadata.version, 0);
        assert_eq!(collection.metadata.count, 0);
    }

    #[test]
    fn position_and_get() {
        let mut collection = Collection::new("users");
        let record = Record::new(
            json!({"id": "u1", "name": "Jane"})
                .as_object()
                .cloned()
                .unwrap(),
        );
        collection.records.push(record);

        assert_eq!(collection.position("u1"), Some(0));
        assert_eq!(collection.get("u1").unwrap().id, "u1");
        assert!(collection.get("u2").is_none());
    }

    #[test]
    fn disk_shape_uses_camel_case() {
        let collection = Collection::new("users");
        let value = serde_json::to_value(&collection).unwrap();
        assert!(value["metadata"].get("lastModified").is_some());
        assert!(value["metadata"].get("indexes").is_some());
        assert!(value.get("records").is_some());
    }
}
