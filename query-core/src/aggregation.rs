//! Client-side group / reduce.
//!
//! An aggregation groups matching documents by a set of key fields, starts
//! every group from the same initial accumulator and folds each document into
//! it with a reduce step. The built-in reducers also have a wire form that the
//! backend `_group` endpoint understands.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::{QueryError, QueryResult};
use crate::helpers::{get_field_value, number_from_f64, values_equal};
use crate::query::Query;

/// Custom reduce step: folds `doc` into the accumulator `out`.
pub type ReduceFn = Arc<dyn Fn(&Value, &mut Map<String, Value>) + Send + Sync>;

/// The reduce step of an aggregation.
#[derive(Clone)]
pub enum Reduce {
    /// `out.count += 1`
    Count,
    /// `out.sum += doc[field]`
    Sum(String),
    /// `out.min = min(out.min, doc[field])`
    Min(String),
    /// `out.max = max(out.max, doc[field])`
    Max(String),
    /// Running average in `out.average`, with `out.count`.
    Average(String),
    /// Local-only closure. Cannot be sent to the backend.
    Custom(ReduceFn),
}

impl fmt::Debug for Reduce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reduce::Count => write!(f, "Count"),
            Reduce::Sum(field) => write!(f, "Sum({})", field),
            Reduce::Min(field) => write!(f, "Min({})", field),
            Reduce::Max(field) => write!(f, "Max({})", field),
            Reduce::Average(field) => write!(f, "Average({})", field),
            Reduce::Custom(_) => write!(f, "Custom(<fn>)"),
        }
    }
}

impl Reduce {
    fn apply(&self, doc: &Value, out: &mut Map<String, Value>) {
        match self {
            Reduce::Count => {
                let count = out.get("count").and_then(Value::as_f64).unwrap_or(0.0);
                out.insert("count".into(), Value::Number(number_from_f64(count + 1.0)));
            }
            Reduce::Sum(field) => {
                let sum = out.get("sum").and_then(Value::as_f64).unwrap_or(0.0);
                let value = get_field_value(doc, field).as_f64().unwrap_or(0.0);
                out.insert("sum".into(), Value::Number(number_from_f64(sum + value)));
            }
            Reduce::Min(field) => fold_extreme(out, "min", doc, field, |v, cur| v < cur),
            Reduce::Max(field) => fold_extreme(out, "max", doc, field, |v, cur| v > cur),
            Reduce::Average(field) => {
                let Some(value) = get_field_value(doc, field).as_f64() else {
                    return;
                };
                let count = out.get("count").and_then(Value::as_f64).unwrap_or(0.0);
                let average = out.get("average").and_then(Value::as_f64).unwrap_or(0.0);
                let next = (average * count + value) / (count + 1.0);
                out.insert("count".into(), Value::Number(number_from_f64(count + 1.0)));
                out.insert("average".into(), Value::Number(number_from_f64(next)));
            }
            Reduce::Custom(f) => f(doc, out),
        }
    }

    fn wire_reduce(&self) -> QueryResult<String> {
        let body = match self {
            Reduce::Count => "out.count++;".to_string(),
            Reduce::Sum(field) => format!("out.sum += doc[\"{}\"];", field),
            Reduce::Min(field) => format!("out.min = Math.min(out.min, doc[\"{}\"]);", field),
            Reduce::Max(field) => format!("out.max = Math.max(out.max, doc[\"{}\"]);", field),
            Reduce::Average(field) => format!(
                "out.average = (out.average * out.count + doc[\"{}\"]) / (out.count + 1); out.count += 1;",
                field
            ),
            Reduce::Custom(_) => {
                return Err(QueryError::NotSerializable(
                    "custom reduce closures only run locally".into(),
                ))
            }
        };
        Ok(format!("function(doc, out) {{ {} }}", body))
    }
}

fn fold_extreme(
    out: &mut Map<String, Value>,
    slot: &str,
    doc: &Value,
    field: &str,
    better: fn(f64, f64) -> bool,
) {
    let Some(value) = get_field_value(doc, field).as_f64() else {
        return;
    };
    let replace = match out.get(slot).and_then(Value::as_f64) {
        Some(current) => better(value, current),
        None => true,
    };
    if replace {
        out.insert(slot.to_string(), Value::Number(number_from_f64(value)));
    }
}

/// A group / reduce request.
#[derive(Debug, Clone)]
pub struct Aggregation {
    key: Vec<String>,
    initial: Map<String, Value>,
    reduce: Reduce,
    query: Option<Query>,
}

impl Aggregation {
    pub fn new(reduce: Reduce, initial: Map<String, Value>) -> Self {
        Self {
            key: Vec::new(),
            initial,
            reduce,
            query: None,
        }
    }

    /// Count documents per distinct value of `field`.
    pub fn count(field: &str) -> Self {
        Self::new(Reduce::Count, accumulator(&[("count", Value::from(0))])).by(field)
    }

    pub fn sum(field: &str) -> Self {
        Self::new(
            Reduce::Sum(field.to_string()),
            accumulator(&[("sum", Value::from(0))]),
        )
    }

    pub fn min(field: &str) -> Self {
        Self::new(
            Reduce::Min(field.to_string()),
            accumulator(&[("min", Value::Null)]),
        )
    }

    pub fn max(field: &str) -> Self {
        Self::new(
            Reduce::Max(field.to_string()),
            accumulator(&[("max", Value::Null)]),
        )
    }

    pub fn average(field: &str) -> Self {
        Self::new(
            Reduce::Average(field.to_string()),
            accumulator(&[("count", Value::from(0)), ("average", Value::from(0))]),
        )
    }

    pub fn custom<F>(initial: Map<String, Value>, reduce: F) -> Self
    where
        F: Fn(&Value, &mut Map<String, Value>) + Send + Sync + 'static,
    {
        Self::new(Reduce::Custom(Arc::new(reduce)), initial)
    }

    /// Add a grouping key field.
    pub fn by(mut self, field: &str) -> Self {
        if !self.key.iter().any(|k| k == field) {
            self.key.push(field.to_string());
        }
        self
    }

    /// Restrict the aggregation to documents matching `query`.
    pub fn with_query(mut self, query: Query) -> Self {
        self.query = Some(query);
        self
    }

    pub fn key_fields(&self) -> &[String] {
        &self.key
    }

    pub fn query(&self) -> Option<&Query> {
        self.query.as_ref()
    }

    /// Run the aggregation over in-memory documents.
    ///
    /// Each result holds the key fields of its group followed by the final
    /// accumulator. Groups appear in order of first occurrence.
    pub fn group(&self, docs: Vec<Value>) -> QueryResult<Vec<Value>> {
        let docs = match &self.query {
            Some(query) => query.filter_docs(docs)?,
            None => docs,
        };

        let mut groups: Vec<(Map<String, Value>, Map<String, Value>)> = Vec::new();

        for doc in &docs {
            let key: Map<String, Value> = self
                .key
                .iter()
                .map(|field| (field.clone(), get_field_value(doc, field)))
                .collect();

            let slot = groups
                .iter()
                .position(|(k, _)| values_equal(&Value::Object(k.clone()), &Value::Object(key.clone())));
            let index = match slot {
                Some(index) => index,
                None => {
                    groups.push((key, self.initial.clone()));
                    groups.len() - 1
                }
            };

            self.reduce.apply(doc, &mut groups[index].1);
        }

        Ok(groups
            .into_iter()
            .map(|(mut key, acc)| {
                key.extend(acc);
                Value::Object(key)
            })
            .collect())
    }

    /// Request body for the backend `_group` endpoint.
    pub fn to_body(&self) -> QueryResult<Value> {
        let key: Map<String, Value> = self
            .key
            .iter()
            .map(|field| (field.clone(), Value::Bool(true)))
            .collect();

        let mut body = Map::new();
        body.insert("key".into(), Value::Object(key));
        body.insert("initial".into(), Value::Object(self.initial.clone()));
        body.insert("reduce".into(), Value::String(self.reduce.wire_reduce()?));
        if let Some(query) = &self.query {
            body.insert("condition".into(), query.filter());
        }
        Ok(Value::Object(body))
    }
}

fn accumulator(entries: &[(&str, Value)]) -> Map<String, Value> {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn orders() -> Vec<Value> {
        vec![
            json!({"_id": "1", "city": "Boston", "total": 10}),
            json!({"_id": "2", "city": "Austin", "total": 4}),
            json!({"_id": "3", "city": "Boston", "total": 6}),
            json!({"_id": "4", "city": "Austin", "total": 8.5}),
        ]
    }

    #[test]
    fn test_count_by_field() {
        let result = Aggregation::count("city").group(orders()).unwrap();
        assert_eq!(
            result,
            vec![
                json!({"city": "Boston", "count": 2}),
                json!({"city": "Austin", "count": 2}),
            ]
        );
    }

    #[test]
    fn test_sum_min_max_average() {
        let sum = Aggregation::sum("total").group(orders()).unwrap();
        assert_eq!(sum, vec![json!({"sum": 28.5})]);

        let min = Aggregation::min("total").by("city").group(orders()).unwrap();
        assert_eq!(min[0], json!({"city": "Boston", "min": 6}));
        assert_eq!(min[1], json!({"city": "Austin", "min": 4}));

        let max = Aggregation::max("total").group(orders()).unwrap();
        assert_eq!(max, vec![json!({"max": 10})]);

        let avg = Aggregation::average("total").by("city").group(orders()).unwrap();
        assert_eq!(avg[0], json!({"city": "Boston", "count": 2, "average": 8}));
    }

    #[test]
    fn test_group_applies_query_filter() {
        let agg = Aggregation::sum("total")
            .with_query(Query::new().equal_to("city", json!("Boston")).limit(1));
        assert_eq!(agg.group(orders()).unwrap(), vec![json!({"sum": 16})]);
    }

    #[test]
    fn test_custom_reduce_runs_locally_only() {
        let mut initial = Map::new();
        initial.insert("ids".into(), json!([]));
        let agg = Aggregation::custom(initial, |doc, out| {
            if let Some(Value::Array(ids)) = out.get_mut("ids") {
                ids.push(doc["_id"].clone());
            }
        })
        .by("city");

        let result = agg.group(orders()).unwrap();
        assert_eq!(result[1], json!({"city": "Austin", "ids": ["2", "4"]}));
        assert!(matches!(agg.to_body(), Err(QueryError::NotSerializable(_))));
    }

    #[test]
    fn test_wire_body() {
        let body = Aggregation::count("city")
            .with_query(Query::new().greater_than("total", json!(5)))
            .to_body()
            .unwrap();
        assert_eq!(body["key"], json!({"city": true}));
        assert_eq!(body["initial"], json!({"count": 0}));
        assert_eq!(body["reduce"], json!("function(doc, out) { out.count++; }"));
        assert_eq!(body["condition"], json!({"total": {"$gt": 5}}));
    }

    #[test]
    fn test_empty_input_yields_no_groups() {
        assert!(Aggregation::count("city").group(Vec::new()).unwrap().is_empty());
    }
}
