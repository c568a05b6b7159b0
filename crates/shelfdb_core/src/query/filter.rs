//! MongoDB-style filter matching.

use crate::error::{CoreError, CoreResult};
use crate::record::{resolve_path, Record};
use regex::RegexBuilder;
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Checks whether a record satisfies a filter object.
///
/// Every top-level entry is a field path paired with either a plain
/// value (deep structural equality) or an operator object. Fields
/// combine with implicit AND. A missing path segment means "no match",
/// never an error; the only operator that can match absence is
/// `$exists: false`.
///
/// # Errors
///
/// Returns a query error for an unrecognized `$`-operator or a
/// malformed operator argument - never silently ignored.
pub fn matches(record: &Record, filter: &Value) -> CoreResult<bool> {
    let Some(fields) = filter.as_object() else {
        return Err(CoreError::validation("filter must be a JSON object"));
    };
    for (path, condition) in fields {
        let value = record.value_at(path);
        if !condition_matches(value.as_ref(), condition)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Applies one field condition to a resolved value.
fn condition_matches(value: Option<&Value>, condition: &Value) -> CoreResult<bool> {
    if let Some(ops) = condition.as_object() {
        if ops.keys().any(|k| k.starts_with('$')) {
            return operators_match(value, ops);
        }
    }
    Ok(value == Some(condition))
}

fn operators_match(value: Option<&Value>, ops: &Map<String, Value>) -> CoreResult<bool> {
    for (op, arg) in ops {
        let ok = match op.as_str() {
            "$eq" => value == Some(arg),
            "$ne" => value != Some(arg),
            "$gt" => order(value, arg) == Some(Ordering::Greater),
            "$gte" => matches!(order(value, arg), Some(Ordering::Greater | Ordering::Equal)),
            "$lt" => order(value, arg) == Some(Ordering::Less),
            "$lte" => matches!(order(value, arg), Some(Ordering::Less | Ordering::Equal)),
            "$in" => in_list(value, arg)?,
            "$nin" => !in_list(value, arg)?,
            "$exists" => {
                let wanted = arg
                    .as_bool()
                    .ok_or_else(|| CoreError::query("$exists requires a boolean"))?;
                is_present(value) == wanted
            }
            "$regex" => regex_matches(value, arg, ops.get("$options"))?,
            "$options" => {
                if !ops.contains_key("$regex") {
                    return Err(CoreError::query("$options requires $regex"));
                }
                true // consumed by $regex
            }
            "$size" => {
                let wanted = arg
                    .as_u64()
                    .ok_or_else(|| CoreError::query("$size requires a non-negative integer"))?;
                value
                    .and_then(Value::as_array)
                    .is_some_and(|items| items.len() as u64 == wanted)
            }
            "$all" => all_contained(value, arg)?,
            "$elemMatch" => elem_matches(value, arg)?,
            unknown if unknown.starts_with('$') => {
                return Err(CoreError::query(format!("unsupported operator: {unknown}")));
            }
            field => {
                return Err(CoreError::query(format!(
                    "cannot mix field {field:?} with operators"
                )));
            }
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

/// A field counts as present when it resolves to a non-null value;
/// `$exists: false` matches both absent and null fields.
fn is_present(value: Option<&Value>) -> bool {
    value.is_some_and(|v| !v.is_null())
}

/// Orders a resolved value against an operand for range operators.
///
/// Only same-type number and string pairs order; everything else
/// (including a missing value) yields `None`, which no range operator
/// matches.
fn order(value: Option<&Value>, operand: &Value) -> Option<Ordering> {
    match (value?, operand) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// `$in` membership: a scalar matches when listed; an array value
/// matches when any of its elements is listed.
fn in_list(value: Option<&Value>, arg: &Value) -> CoreResult<bool> {
    let list = arg
        .as_array()
        .ok_or_else(|| CoreError::query("$in/$nin require an array"))?;
    let Some(value) = value else {
        return Ok(false);
    };
    Ok(list.iter().any(|candidate| {
        candidate == value
            || value
                .as_array()
                .is_some_and(|items| items.contains(candidate))
    }))
}

fn regex_matches(
    value: Option<&Value>,
    pattern: &Value,
    options: Option<&Value>,
) -> CoreResult<bool> {
    let pattern = pattern
        .as_str()
        .ok_or_else(|| CoreError::query("$regex requires a string pattern"))?;
    let flags = match options {
        Some(v) => v
            .as_str()
            .ok_or_else(|| CoreError::query("$options requires a string"))?,
        None => "",
    };

    let mut builder = RegexBuilder::new(pattern);
    for flag in flags.chars() {
        match flag {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            's' => builder.dot_matches_new_line(true),
            'x' => builder.ignore_whitespace(true),
            other => {
                return Err(CoreError::query(format!(
                    "unsupported regex option: {other}"
                )))
            }
        };
    }
    let regex = builder
        .build()
        .map_err(|e| CoreError::query(format!("invalid regex: {e}")))?;

    Ok(value
        .and_then(Value::as_str)
        .is_some_and(|s| regex.is_match(s)))
}

fn all_contained(value: Option<&Value>, arg: &Value) -> CoreResult<bool> {
    let wanted = arg
        .as_array()
        .ok_or_else(|| CoreError::query("$all requires an array"))?;
    let Some(items) = value.and_then(Value::as_array) else {
        return Ok(false);
    };
    Ok(wanted.iter().all(|w| items.contains(w)))
}

/// `$elemMatch`: any array element satisfies the condition, which is
/// either an operator object applied to the element or a nested
/// filter over the element's fields.
fn elem_matches(value: Option<&Value>, condition: &Value) -> CoreResult<bool> {
    let Some(items) = value.and_then(Value::as_array) else {
        return Ok(false);
    };
    let fields = condition
        .as_object()
        .ok_or_else(|| CoreError::query("$elemMatch requires an object"))?;
    let operator_form = fields.keys().any(|k| k.starts_with('$'));

    for item in items {
        let ok = if operator_form {
            operators_match(Some(item), fields)?
        } else {
            let mut all = true;
            for (path, sub) in fields {
                let resolved = resolve_path(item, path);
                if !condition_matches(resolved, sub)? {
                    all = false;
                    break;
                }
            }
            all
        };
        if ok {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        Record::new(value.as_object().cloned().unwrap())
    }

    fn check(doc: Value, filter: Value) -> bool {
        matches(&record(doc), &filter).unwrap()
    }

    #[test]
    fn plain_values_use_deep_equality() {
        assert!(check(json!({"a": {"b": [1, 2]}}), json!({"a": {"b": [1, 2]}})));
        assert!(!check(json!({"a": {"b": [1, 2]}}), json!({"a": {"b": [2, 1]}})));
    }

    #[test]
    fn nested_paths_resolve() {
        let doc = json!({"profile": {"city": "Oslo"}});
        assert!(check(doc.clone(), json!({"profile.city": "Oslo"})));
        assert!(!check(doc, json!({"profile.country": "Norway"})));
    }

    #[test]
    fn multiple_fields_are_anded() {
        let doc = json!({"name": "Jane", "age": 30});
        assert!(check(doc.clone(), json!({"name": "Jane", "age": 30})));
        assert!(!check(doc, json!({"name": "Jane", "age": 31})));
    }

    #[test]
    fn range_operators_are_reflexive() {
        let doc = json!({"age": 30});
        assert!(check(doc.clone(), json!({"age": {"$gte": 30}})));
        assert!(check(doc.clone(), json!({"age": {"$lte": 30}})));
        assert!(!check(doc.clone(), json!({"age": {"$gt": 30}})));
        assert!(!check(doc, json!({"age": {"$lt": 30}})));
    }

    #[test]
    fn range_operators_never_match_across_types() {
        let doc = json!({"age": "30"});
        assert!(!check(doc, json!({"age": {"$gte": 30}})));
    }

    #[test]
    fn ne_matches_missing_fields() {
        assert!(check(json!({"a": 1}), json!({"b": {"$ne": 2}})));
        assert!(!check(json!({"b": 2}), json!({"b": {"$ne": 2}})));
    }

    #[test]
    fn empty_in_matches_nothing() {
        assert!(!check(json!({"age": 30}), json!({"age": {"$in": []}})));
    }

    #[test]
    fn in_and_nin_membership() {
        let doc = json!({"color": "red"});
        assert!(check(doc.clone(), json!({"color": {"$in": ["red", "blue"]}})));
        assert!(!check(doc.clone(), json!({"color": {"$nin": ["red"]}})));
        assert!(check(doc, json!({"color": {"$nin": ["green"]}})));
        // Array values match on any element.
        assert!(check(
            json!({"tags": ["a", "b"]}),
            json!({"tags": {"$in": ["b"]}})
        ));
    }

    #[test]
    fn exists_false_matches_absent_and_null() {
        assert!(check(json!({"a": 1}), json!({"b": {"$exists": false}})));
        assert!(check(json!({"b": null}), json!({"b": {"$exists": false}})));
        assert!(!check(json!({"b": 0}), json!({"b": {"$exists": false}})));
        assert!(check(json!({"b": 0}), json!({"b": {"$exists": true}})));
        assert!(!check(json!({"b": null}), json!({"b": {"$exists": true}})));
    }

    #[test]
    fn regex_with_options() {
        let doc = json!({"name": "Jane Doe"});
        assert!(check(doc.clone(), json!({"name": {"$regex": "^jane", "$options": "i"}})));
        assert!(!check(doc.clone(), json!({"name": {"$regex": "^jane"}})));
        assert!(matches(&record(doc), &json!({"name": {"$options": "i"}})).is_err());
    }

    #[test]
    fn size_all_and_elem_match() {
        let doc = json!({"tags": ["a", "b", "c"], "scores": [{"value": 7}, {"value": 9}]});
        assert!(check(doc.clone(), json!({"tags": {"$size": 3}})));
        assert!(!check(doc.clone(), json!({"tags": {"$size": 2}})));
        assert!(check(doc.clone(), json!({"tags": {"$all": ["a", "c"]}})));
        assert!(!check(doc.clone(), json!({"tags": {"$all": ["a", "z"]}})));
        assert!(check(
            doc.clone(),
            json!({"scores": {"$elemMatch": {"value": {"$gte": 9}}}})
        ));
        assert!(!check(doc, json!({"scores": {"$elemMatch": {"value": {"$gt": 9}}}})));
    }

    #[test]
    fn elem_match_operator_form() {
        let doc = json!({"scores": [3, 8, 12]});
        assert!(check(doc.clone(), json!({"scores": {"$elemMatch": {"$gt": 10}}})));
        assert!(!check(doc, json!({"scores": {"$elemMatch": {"$gt": 20}}})));
    }

    #[test]
    fn unknown_operator_is_an_error() {
        let err = matches(&record(json!({"a": 1})), &json!({"a": {"$near": 1}})).unwrap_err();
        assert_eq!(err.kind(), "query");
    }

    #[test]
    fn malformed_operator_arguments_error() {
        let doc = record(json!({"a": [1]}));
        assert!(matches(&doc, &json!({"a": {"$in": 5}})).is_err());
        assert!(matches(&doc, &json!({"a": {"$exists": "yes"}})).is_err());
        assert!(matches(&doc, &json!({"a": {"$size": "three"}})).is_err());
        assert!(matches(&doc, &json!({"a": {"$regex": 7}})).is_err());
    }

    #[test]
    fn reserved_fields_are_queryable() {
        let r = record(json!({"name": "Jane"}));
        assert!(matches(&r, &json!({"id": r.id.clone()})).unwrap());
        assert!(matches(&r, &json!({"createdAt": {"$exists": true}})).unwrap());
    }
}
