//! Query model: filter tree plus sort / skip / limit / fields modifiers.
//!
//! The same `Query` is serialized into URL parameters for the backend and
//! evaluated locally against documents loaded from a persistence adapter.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;

use crate::error::{QueryError, QueryResult};
use crate::filter;
use crate::helpers::{compare_values, get_field_value};

/// Fields kept by a projection regardless of the requested field list.
const PROTECTED_FIELDS: &[&str] = &["_id", "_acl", "_kmd"];

/// Sort direction for a single field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    fn as_wire(self) -> i8 {
        match self {
            SortOrder::Ascending => 1,
            SortOrder::Descending => -1,
        }
    }
}

/// One entry of the sort specification. Earlier entries take precedence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortField {
    pub field: String,
    pub order: SortOrder,
}

/// A declarative query over a collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    #[serde(default)]
    filter: Map<String, Value>,
    #[serde(default)]
    sort: Vec<SortField>,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    skip: usize,
    #[serde(default)]
    fields: Vec<String>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a query from a raw MongoDB-style filter object.
    pub fn from_filter(filter: Value) -> QueryResult<Self> {
        match filter {
            Value::Null => Ok(Self::new()),
            Value::Object(filter) => Ok(Self {
                filter,
                ..Self::default()
            }),
            other => Err(QueryError::InvalidFilter(format!(
                "expected an object, got {}",
                other
            ))),
        }
    }

    // ==================== Accessors ====================

    pub fn filter(&self) -> Value {
        Value::Object(self.filter.clone())
    }

    pub fn sort_fields(&self) -> &[SortField] {
        &self.sort
    }

    pub fn limit_value(&self) -> Option<usize> {
        self.limit
    }

    pub fn skip_value(&self) -> usize {
        self.skip
    }

    pub fn field_list(&self) -> &[String] {
        &self.fields
    }

    /// True when the query carries sort, skip, limit or a projection.
    pub fn has_modifiers(&self) -> bool {
        !self.sort.is_empty() || self.limit.is_some() || self.skip > 0 || !self.fields.is_empty()
    }

    /// The same filter with every modifier removed.
    pub fn without_modifiers(&self) -> Self {
        Self {
            filter: self.filter.clone(),
            ..Self::default()
        }
    }

    // ==================== Filter builders ====================

    pub fn equal_to(mut self, field: &str, value: Value) -> Self {
        self.filter.insert(field.to_string(), value);
        self
    }

    pub fn not_equal_to(self, field: &str, value: Value) -> Self {
        self.add_condition(field, "$ne", value)
    }

    pub fn greater_than(self, field: &str, value: Value) -> Self {
        self.add_condition(field, "$gt", value)
    }

    pub fn greater_than_or_equal_to(self, field: &str, value: Value) -> Self {
        self.add_condition(field, "$gte", value)
    }

    pub fn less_than(self, field: &str, value: Value) -> Self {
        self.add_condition(field, "$lt", value)
    }

    pub fn less_than_or_equal_to(self, field: &str, value: Value) -> Self {
        self.add_condition(field, "$lte", value)
    }

    /// Field value (or one of its array elements) is one of `values`.
    pub fn contains(self, field: &str, values: Vec<Value>) -> Self {
        self.add_condition(field, "$in", Value::Array(values))
    }

    pub fn not_contained_in(self, field: &str, values: Vec<Value>) -> Self {
        self.add_condition(field, "$nin", Value::Array(values))
    }

    pub fn contains_all(self, field: &str, values: Vec<Value>) -> Self {
        self.add_condition(field, "$all", Value::Array(values))
    }

    pub fn exists(self, field: &str, flag: bool) -> Self {
        self.add_condition(field, "$exists", Value::Bool(flag))
    }

    pub fn size(self, field: &str, size: usize) -> Self {
        self.add_condition(field, "$size", Value::from(size))
    }

    /// Regular expression match. Only anchored patterns are accepted by the
    /// backend, so a leading `^` is added when missing.
    pub fn matches(self, field: &str, pattern: &str, options: Option<&str>) -> Self {
        let pattern = if pattern.starts_with('^') {
            pattern.to_string()
        } else {
            format!("^{}", pattern)
        };
        let query = self.add_condition(field, "$regex", Value::String(pattern));
        match options {
            Some(opts) if !opts.is_empty() => {
                query.add_condition(field, "$options", Value::String(opts.to_string()))
            }
            _ => query,
        }
    }

    /// Geo proximity. Backend only; local evaluation rejects it.
    pub fn near(self, field: &str, longitude: f64, latitude: f64, max_distance: Option<f64>) -> Self {
        let query = self.add_condition(field, "$nearSphere", serde_json::json!([longitude, latitude]));
        match max_distance {
            Some(distance) => query.add_condition(field, "$maxDistance", Value::from(distance)),
            None => query,
        }
    }

    /// Geo bounding box. Backend only; local evaluation rejects it.
    pub fn within_box(self, field: &str, bottom_left: [f64; 2], upper_right: [f64; 2]) -> Self {
        self.add_condition(
            field,
            "$within",
            serde_json::json!({ "$box": [bottom_left, upper_right] }),
        )
    }

    /// Combine with another query: both filters must match.
    pub fn and(self, other: Query) -> Self {
        self.join("$and", other)
    }

    /// Combine with another query: either filter may match.
    pub fn or(self, other: Query) -> Self {
        self.join("$or", other)
    }

    fn join(mut self, op: &str, other: Query) -> Self {
        let left = std::mem::take(&mut self.filter);
        let mut parts = Vec::new();
        match left.get(op) {
            Some(Value::Array(existing)) if left.len() == 1 => parts.extend(existing.clone()),
            _ if left.is_empty() => {}
            _ => parts.push(Value::Object(left)),
        }
        parts.push(Value::Object(other.filter));

        self.filter.insert(op.to_string(), Value::Array(parts));
        self
    }

    fn add_condition(mut self, field: &str, op: &str, value: Value) -> Self {
        let entry = self
            .filter
            .entry(field.to_string())
            .or_insert_with(|| Value::Object(Map::new()));

        match entry {
            Value::Object(ops) if ops.keys().all(|k| k.starts_with('$')) => {
                ops.insert(op.to_string(), value);
            }
            other => {
                // An earlier equality is replaced by the operator form.
                let mut ops = Map::new();
                ops.insert(op.to_string(), value);
                *other = Value::Object(ops);
            }
        }
        self
    }

    // ==================== Modifiers ====================

    pub fn ascending(mut self, field: &str) -> Self {
        self.set_sort(field, SortOrder::Ascending);
        self
    }

    pub fn descending(mut self, field: &str) -> Self {
        self.set_sort(field, SortOrder::Descending);
        self
    }

    fn set_sort(&mut self, field: &str, order: SortOrder) {
        self.sort.retain(|s| s.field != field);
        self.sort.push(SortField {
            field: field.to_string(),
            order,
        });
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    // ==================== Wire format ====================

    /// URL parameters understood by the backend: `query`, `sort`, `limit`,
    /// `skip` and `fields`. Empty parts are omitted.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();

        if !self.filter.is_empty() {
            params.push(("query".to_string(), self.filter().to_string()));
        }

        if !self.sort.is_empty() {
            // Built by hand so the key order of the sort object survives.
            let parts: Vec<String> = self
                .sort
                .iter()
                .map(|s| format!("{}:{}", Value::String(s.field.clone()), s.order.as_wire()))
                .collect();
            params.push(("sort".to_string(), format!("{{{}}}", parts.join(","))));
        }

        if let Some(limit) = self.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }

        if self.skip > 0 {
            params.push(("skip".to_string(), self.skip.to_string()));
        }

        if !self.fields.is_empty() {
            params.push(("fields".to_string(), self.fields.join(",")));
        }

        params
    }

    // ==================== Local evaluation ====================

    /// Whether a single document satisfies the filter.
    pub fn is_match(&self, doc: &Value) -> QueryResult<bool> {
        filter::matches(doc, &Value::Object(self.filter.clone()))
    }

    /// Apply only the filter, keeping input order.
    pub fn filter_docs(&self, docs: Vec<Value>) -> QueryResult<Vec<Value>> {
        let filter = Value::Object(self.filter.clone());
        filter::validate(&filter)?;

        let mut out = Vec::with_capacity(docs.len());
        for doc in docs {
            if filter::matches(&doc, &filter)? {
                out.push(doc);
            }
        }
        Ok(out)
    }

    /// Filter, then sort, skip, limit and project.
    pub fn process(&self, docs: Vec<Value>) -> QueryResult<Vec<Value>> {
        let mut docs = self.filter_docs(docs)?;

        if !self.sort.is_empty() {
            docs.sort_by(|a, b| self.compare_docs(a, b));
        }

        let docs = docs.into_iter().skip(self.skip);
        let docs: Vec<Value> = match self.limit {
            Some(limit) => docs.take(limit).collect(),
            None => docs.collect(),
        };

        if self.fields.is_empty() {
            return Ok(docs);
        }
        Ok(docs.iter().map(|doc| self.project(doc)).collect())
    }

    fn compare_docs(&self, a: &Value, b: &Value) -> Ordering {
        for sort in &self.sort {
            let ord = compare_values(
                &get_field_value(a, &sort.field),
                &get_field_value(b, &sort.field),
            );
            let ord = match sort.order {
                SortOrder::Ascending => ord,
                SortOrder::Descending => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    fn project(&self, doc: &Value) -> Value {
        let Value::Object(source) = doc else {
            return doc.clone();
        };

        let mut out = Map::new();
        for key in PROTECTED_FIELDS {
            if let Some(v) = source.get(*key) {
                out.insert(key.to_string(), v.clone());
            }
        }
        for field in &self.fields {
            let value = get_field_value(doc, field);
            if !value.is_null() || source.contains_key(field.as_str()) {
                set_path(&mut out, field, value);
            }
        }
        Value::Object(out)
    }
}

fn set_path(target: &mut Map<String, Value>, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            target.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let child = target
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            if let Value::Object(map) = child {
                set_path(map, rest, value);
            }
        }
    }
}
