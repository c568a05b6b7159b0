//! Filter, sort, and paginate records in memory.
//!
//! The query engine is a pure function over a record slice: it never
//! touches the cache or the disk. Filters follow MongoDB's operator
//! vocabulary; fields combine with implicit AND and there is no other
//! boolean combinator.

mod filter;
mod sort;

pub use filter::matches;
pub use sort::{compare_records, compare_values};

use crate::error::{CoreError, CoreResult};
use crate::record::Record;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Hard ceiling on a page size.
pub const MAX_LIMIT: usize = 10_000;

/// Sort direction for one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

impl SortOrder {
    /// Parses a MongoDB-style direction: `1`/`-1` or `"asc"`/`"desc"`.
    ///
    /// # Errors
    ///
    /// Returns a query error for any other value.
    pub fn from_value(value: &Value) -> CoreResult<Self> {
        match value {
            Value::Number(n) if n.as_i64() == Some(1) => Ok(Self::Asc),
            Value::Number(n) if n.as_i64() == Some(-1) => Ok(Self::Desc),
            Value::String(s) if s.eq_ignore_ascii_case("asc") => Ok(Self::Asc),
            Value::String(s) if s.eq_ignore_ascii_case("desc") => Ok(Self::Desc),
            other => Err(CoreError::query(format!("invalid sort direction: {other}"))),
        }
    }
}

/// Options for one query.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// MongoDB-style filter; `None` matches everything.
    pub filter: Option<Value>,
    /// Sort fields, applied left to right.
    pub sort: Vec<(String, SortOrder)>,
    /// Page size; `None` or `Some(0)` disables pagination.
    pub limit: Option<usize>,
    /// 1-based page number; values below 1 clamp to 1.
    pub page: Option<usize>,
}

impl QueryOptions {
    /// Creates empty options matching everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the filter.
    #[must_use]
    pub fn with_filter(mut self, filter: Value) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Appends a sort field.
    #[must_use]
    pub fn sort_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort.push((field.into(), order));
        self
    }

    /// Sets the page size.
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the 1-based page number.
    #[must_use]
    pub const fn page(mut self, page: usize) -> Self {
        self.page = Some(page);
        self
    }

    /// Validates the options before any scan runs.
    ///
    /// # Errors
    ///
    /// Returns a query error when the limit exceeds [`MAX_LIMIT`] and
    /// a validation error when the filter is not an object.
    pub fn validate(&self) -> CoreResult<()> {
        if let Some(limit) = self.limit {
            if limit > MAX_LIMIT {
                return Err(CoreError::query(format!(
                    "limit {limit} exceeds the maximum of {MAX_LIMIT}"
                )));
            }
        }
        if let Some(filter) = &self.filter {
            if !filter.is_object() {
                return Err(CoreError::validation("filter must be a JSON object"));
            }
        }
        Ok(())
    }
}

/// A paginated query result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    /// The records on the requested page.
    pub docs: Vec<Record>,
    /// Post-filter, pre-pagination record count.
    pub total_docs: usize,
    /// Page size in effect; `None` when pagination was disabled.
    pub limit: Option<usize>,
    /// The page served (1-based).
    pub page: usize,
    /// Number of pages available.
    pub total_pages: usize,
    /// Whether a later page exists.
    pub has_next_page: bool,
    /// Whether an earlier page exists.
    pub has_prev_page: bool,
}

/// Filters, sorts, and paginates a record slice.
///
/// Options are validated before any scan. Without a limit (or with a
/// zero limit) pagination is disabled: the full filtered result comes
/// back as a single page.
///
/// # Errors
///
/// Returns a query error for invalid options or unsupported filter
/// operators.
pub fn process(records: &[Record], options: &QueryOptions) -> CoreResult<QueryResult> {
    options.validate()?;

    let mut matched: Vec<&Record> = Vec::new();
    for record in records {
        let keep = match &options.filter {
            Some(filter) => matches(record, filter)?,
            None => true,
        };
        if keep {
            matched.push(record);
        }
    }

    if !options.sort.is_empty() {
        matched.sort_by(|a, b| compare_records(a, b, &options.sort));
    }

    let total_docs = matched.len();
    let limit = options.limit.filter(|&l| l > 0);

    let (docs, page, total_pages) = match limit {
        None => (matched.into_iter().cloned().collect(), 1, 1),
        Some(limit) => {
            let page = options.page.unwrap_or(1).max(1);
            let total_pages = total_docs.div_ceil(limit).max(1);
            let start = (page - 1).saturating_mul(limit).min(total_docs);
            let end = page.saturating_mul(limit).min(total_docs);
            let docs = matched[start..end].iter().map(|r| (*r).clone()).collect();
            (docs, page, total_pages)
        }
    };

    Ok(QueryResult {
        docs,
        total_docs,
        limit,
        page,
        total_pages,
        has_next_page: page < total_pages,
        has_prev_page: page > 1 && total_docs > 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        Record::new(value.as_object().cloned().unwrap())
    }

    fn people() -> Vec<Record> {
        vec![
            record(json!({"name": "John", "age": 25})),
            record(json!({"name": "Jane", "age": 30})),
            record(json!({"name": "Bob", "age": 35})),
        ]
    }

    #[test]
    fn filter_gte_scenario() {
        let records = people();
        let options = QueryOptions::new().with_filter(json!({"age": {"$gte": 30}}));

        let result = process(&records, &options).unwrap();
        assert_eq!(result.total_docs, 2);
        let names: Vec<_> = result
            .docs
            .iter()
            .map(|r| r.fields["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["Jane", "Bob"]);
    }

    #[test]
    fn sort_desc_with_pagination_scenario() {
        let records = people();
        let options = QueryOptions::new()
            .sort_by("age", SortOrder::Desc)
            .limit(2)
            .page(1);

        let result = process(&records, &options).unwrap();
        assert_eq!(result.docs.len(), 2);
        assert_eq!(result.docs[0].fields["name"], json!("Bob"));
        assert_eq!(result.docs[1].fields["name"], json!("Jane"));
        assert!(result.has_next_page);
        assert!(!result.has_prev_page);
        assert_eq!(result.total_pages, 2);
    }

    #[test]
    fn no_limit_disables_pagination() {
        let records = people();
        let result = process(&records, &QueryOptions::new()).unwrap();
        assert_eq!(result.total_pages, 1);
        assert_eq!(result.docs.len(), 3);
        assert!(!result.has_next_page);
        assert!(!result.has_prev_page);

        let zero_limit = process(&records, &QueryOptions::new().limit(0)).unwrap();
        assert_eq!(zero_limit.docs.len(), 3);
        assert_eq!(zero_limit.limit, None);
    }

    #[test]
    fn page_clamps_to_one() {
        let records = people();
        let result = process(&records, &QueryOptions::new().limit(2).page(0)).unwrap();
        assert_eq!(result.page, 1);
        assert_eq!(result.docs.len(), 2);
    }

    #[test]
    fn page_past_the_end_is_empty() {
        let records = people();
        let result = process(&records, &QueryOptions::new().limit(2).page(9)).unwrap();
        assert!(result.docs.is_empty());
        assert_eq!(result.total_docs, 3);
        assert!(!result.has_next_page);
        assert!(result.has_prev_page);
    }

    #[test]
    fn pages_concatenate_without_loss() {
        let records: Vec<Record> = (0..23)
            .map(|i| record(json!({"n": i})))
            .collect();
        let limit = 5;
        let total_pages = 23usize.div_ceil(limit);

        let mut seen = Vec::new();
        for page in 1..=total_pages {
            let options = QueryOptions::new()
                .sort_by("n", SortOrder::Asc)
                .limit(limit)
                .page(page);
            let result = process(&records, &options).unwrap();
            assert_eq!(result.has_prev_page, page > 1);
            assert_eq!(result.has_next_page, page < total_pages);
            seen.extend(result.docs.iter().map(|r| r.fields["n"].as_i64().unwrap()));
        }

        assert_eq!(seen, (0..23).collect::<Vec<i64>>());
    }

    #[test]
    fn limit_ceiling_is_enforced_before_scanning() {
        let records = people();
        let err = process(&records, &QueryOptions::new().limit(MAX_LIMIT + 1)).unwrap_err();
        assert_eq!(err.kind(), "query");
    }

    #[test]
    fn non_object_filter_is_rejected() {
        let records = people();
        let err = process(&records, &QueryOptions::new().with_filter(json!("age"))).unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn sort_order_parses_mongo_directions() {
        assert_eq!(SortOrder::from_value(&json!(1)).unwrap(), SortOrder::Asc);
        assert_eq!(SortOrder::from_value(&json!(-1)).unwrap(), SortOrder::Desc);
        assert_eq!(SortOrder::from_value(&json!("desc")).unwrap(), SortOrder::Desc);
        assert!(SortOrder::from_value(&json!(2)).is_err());
        assert!(SortOrder::from_value(&json!("sideways")).is_err());
    }

    #[test]
    fn empty_input_yields_empty_single_page() {
        let result = process(&[], &QueryOptions::new().limit(10)).unwrap();
        assert_eq!(result.total_docs, 0);
        assert_eq!(result.total_pages, 1);
        assert!(result.docs.is_empty());
        assert!(!result.has_next_page);
    }
}
