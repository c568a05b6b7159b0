//! Schemaless records and field-path resolution.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Field names reserved for the engine.
///
/// A mutation payload can never overwrite these; they are stripped
/// before any merge.
pub const RESERVED_FIELDS: [&str; 3] = ["id", "createdAt", "updatedAt"];

/// A single schemaless document.
///
/// A record is a mapping from field name to arbitrary JSON value plus
/// three engine-owned fields: `id` (immutable, unique per collection),
/// `created_at` (set once) and `updated_at` (refreshed on every
/// mutation). On disk the reserved fields appear flat, alongside the
/// user fields, as `id` / `createdAt` / `updatedAt`.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Unique identifier within the owning collection.
    pub id: String,
    /// Creation timestamp, set once.
    pub created_at: DateTime<Utc>,
    /// Last-mutation timestamp, strictly advancing.
    pub updated_at: DateTime<Utc>,
    /// All user fields.
    pub fields: Map<String, Value>,
}

impl Record {
    /// Creates a record from a payload object, assigning timestamps.
    ///
    /// A `"id"` string in the payload is honored as the record id;
    /// otherwise a fresh UUID is assigned. Reserved fields are stripped
    /// from the payload either way.
    #[must_use]
    pub fn new(mut fields: Map<String, Value>) -> Self {
        let id = match fields.remove("id") {
            Some(Value::String(s)) if !s.is_empty() => s,
            _ => Uuid::new_v4().to_string(),
        };
        strip_reserved(&mut fields);
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            updated_at: now,
            fields,
        }
    }

    /// Merges a partial payload into the record's fields.
    ///
    /// Top-level keys replace existing values; reserved fields in the
    /// payload are ignored so stored `id`/`createdAt` can never change.
    /// `updated_at` strictly advances even under sub-millisecond calls.
    pub fn apply(&mut self, mut partial: Map<String, Value>) {
        strip_reserved(&mut partial);
        for (key, value) in partial {
            self.fields.insert(key, value);
        }
        self.touch();
    }

    /// Advances `updated_at`, guaranteeing strict monotonicity.
    pub fn touch(&mut self) {
        let now = Utc::now();
        self.updated_at = if now > self.updated_at {
            now
        } else {
            self.updated_at + Duration::milliseconds(1)
        };
    }

    /// Resolves a dotted field path to a value.
    ///
    /// Reserved fields resolve to their JSON representations; user
    /// fields resolve by successive lookup through objects (and array
    /// indices). A missing segment yields `None`, never an error.
    #[must_use]
    pub fn value_at(&self, path: &str) -> Option<Value> {
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };
        match (head, rest) {
            ("id", None) => Some(Value::String(self.id.clone())),
            ("createdAt", None) => Some(Value::String(
                self.created_at.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            )),
            ("updatedAt", None) => Some(Value::String(
                self.updated_at.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            )),
            _ => {
                let root = self.fields.get(head)?;
                match rest {
                    None => Some(root.clone()),
                    Some(rest) => resolve_path(root, rest).cloned(),
                }
            }
        }
    }
}

/// Resolves a dotted path inside a JSON value by successive lookup.
///
/// Object segments look up keys; array segments accept numeric
/// indices. Any failed step yields `None`.
#[must_use]
pub fn resolve_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn strip_reserved(fields: &mut Map<String, Value>) {
    for key in RESERVED_FIELDS {
        fields.remove(key);
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len() + 3))?;
        map.serialize_entry("id", &self.id)?;
        map.serialize_entry("createdAt", &self.created_at)?;
        map.serialize_entry("updatedAt", &self.updated_at)?;
        for (key, value) in &self.fields {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Record {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut fields = Map::<String, Value>::deserialize(deserializer)?;

        let id = match fields.remove("id") {
            Some(Value::String(s)) if !s.is_empty() => s,
            Some(_) => return Err(D::Error::custom("record id must be a non-empty string")),
            None => return Err(D::Error::missing_field("id")),
        };
        let created_at = take_timestamp(&mut fields, "createdAt").map_err(D::Error::custom)?;
        let updated_at = take_timestamp(&mut fields, "updatedAt").map_err(D::Error::custom)?;

        Ok(Self {
            id,
            created_at,
            updated_at,
            fields,
        })
    }
}

fn take_timestamp(fields: &mut Map<String, Value>, key: &str) -> Result<DateTime<Utc>, String> {
    let value = fields
        .remove(key)
        .ok_or_else(|| format!("record is missing {key}"))?;
    serde_json::from_value(value).map_err(|e| format!("record has invalid {key}: {e}"))
}
