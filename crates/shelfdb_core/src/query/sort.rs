//! Total-order record comparison for multi-field sorts.

use super::SortOrder;
use crate::record::Record;
use chrono::DateTime;
use serde_json::Value;
use std::cmp::Ordering;

/// Compares two records over a multi-field sort specification.
///
/// Fields apply left to right, short-circuiting at the first non-zero
/// comparison.
#[must_use]
pub fn compare_records(a: &Record, b: &Record, sort: &[(String, SortOrder)]) -> Ordering {
    for (field, order) in sort {
        let ordering = compare_values(a.value_at(field).as_ref(), b.value_at(field).as_ref());
        let ordering = match order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Totally orders two optional JSON values; never panics.
///
/// Missing and null values sort lowest. Same-type values compare
/// naturally: numbers numerically, strings lexicographically (with
/// RFC3339 timestamps compared chronologically), booleans false-first.
/// Cross-type pairs and arrays/objects fall back to comparing their
/// serialized form, which keeps the order total.
#[must_use]
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => compare_present(a, b),
    }
}

fn compare_present(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => compare_strings(x, y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => serialized(a).cmp(&serialized(b)),
    }
}

/// Strings that both parse as RFC3339 timestamps compare
/// chronologically; everything else compares lexicographically.
fn compare_strings(a: &str, b: &str) -> Ordering {
    if let (Ok(x), Ok(y)) = (
        DateTime::parse_from_rfc3339(a),
        DateTime::parse_from_rfc3339(b),
    ) {
        return x.cmp(&y);
    }
    a.cmp(b)
}

fn serialized(value: &Value) -> String {
    value.to_string()
}
