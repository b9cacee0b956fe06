//! Core evaluation helper functions for the local query evaluator.
//!
//! This module contains helper functions for filter evaluation:
//! - get_field_value: Extract nested field values from JSON
//! - resolve_path: Resolve a dotted path, fanning out over arrays
//! - values_equal: Compare two JSON values for equality
//! - compare_values: Compare two JSON values for ordering

use std::cmp::Ordering;

use regex::{Regex, RegexBuilder};
use serde_json::Value;

/// Maximum accepted length of a `$regex` pattern.
const MAX_PATTERN_LEN: usize = 1000;

/// Extract a nested field value from a JSON document.
///
/// # Arguments
/// * `value` - The JSON value to extract from
/// * `field_path` - Dot-separated field path (e.g., "address.city")
///
/// # Returns
/// The field value, or Value::Null if not found
#[inline]
pub fn get_field_value(value: &Value, field_path: &str) -> Value {
    let mut current = value;

    for part in field_path.split('.') {
        let next = match current {
            Value::Object(obj) => obj.get(part),
            Value::Array(arr) => part.parse::<usize>().ok().and_then(|i| arr.get(i)),
            _ => None,
        };
        match next {
            Some(val) => current = val,
            None => return Value::Null,
        }
    }

    current.clone()
}

/// Resolve every value reachable through a dotted path.
///
/// Arrays met on the way are traversed element by element unless the next
/// segment is a numeric index, so `items.name` reaches the `name` of each
/// entry of `items`. An empty result means the field does not exist.
pub fn resolve_path<'a>(value: &'a Value, field_path: &str) -> Vec<&'a Value> {
    let parts: Vec<&str> = field_path.split('.').collect();
    let mut out = Vec::new();
    collect_path(value, &parts, &mut out);
    out
}

fn collect_path<'a>(value: &'a Value, parts: &[&str], out: &mut Vec<&'a Value>) {
    let Some((head, rest)) = parts.split_first() else {
        out.push(value);
        return;
    };

    match value {
        Value::Object(obj) => {
            if let Some(next) = obj.get(*head) {
                collect_path(next, rest, out);
            }
        }
        Value::Array(arr) => {
            if let Ok(index) = head.parse::<usize>() {
                if let Some(next) = arr.get(index) {
                    collect_path(next, rest, out);
                }
            } else {
                for item in arr {
                    if item.is_object() {
                        collect_path(item, parts, out);
                    }
                }
            }
        }
        _ => {}
    }
}

/// Compare two JSON values for equality.
///
/// Numbers are compared by their f64 representation, recursively inside
/// arrays and objects, so `1` and `1.0` are equal.
#[inline]
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a
                    .iter()
                    .all(|(k, v)| b.get(k).map_or(false, |other| values_equal(v, other)))
        }
        _ => left == right,
    }
}

/// Create a serde_json::Number from an f64 value.
#[inline]
pub fn number_from_f64(n: f64) -> serde_json::Number {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        return serde_json::Number::from(n as i64);
    }
    serde_json::Number::from_f64(n).unwrap_or_else(|| serde_json::Number::from(0))
}

/// Rank used to order values of different JSON types.
fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Object(_) => 3,
        Value::Array(_) => 4,
        Value::Bool(_) => 5,
    }
}

/// Compare two JSON values for ordering.
///
/// Values of different types order as null < numbers < strings < objects <
/// arrays < booleans.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Number(a), Value::Number(b)) => {
            let a_f64 = a.as_f64().unwrap_or(0.0);
            let b_f64 = b.as_f64().unwrap_or(0.0);
            a_f64.partial_cmp(&b_f64).unwrap_or(Ordering::Equal)
        }
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Array(a), Value::Array(b)) => {
            for (x, y) in a.iter().zip(b) {
                let ord = compare_values(x, y);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            a.len().cmp(&b.len())
        }
        (Value::Object(a), Value::Object(b)) => a.len().cmp(&b.len()),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Whether two values belong to the same comparison bracket.
///
/// Range operators only match values of the same kind, so `{"$gt": 5}` never
/// matches a string.
#[inline]
pub fn comparable(a: &Value, b: &Value) -> bool {
    type_rank(a) == type_rank(b)
}

/// Safely compile a regex with size limits.
///
/// # Arguments
/// * `pattern` - The regex pattern to compile
/// * `options` - MongoDB style option letters (`i`, `m`, `s`, `x`)
pub fn safe_regex(pattern: &str, options: &str) -> Result<Regex, regex::Error> {
    if pattern.len() > MAX_PATTERN_LEN {
        return Err(regex::Error::Syntax(format!(
            "Pattern too long (max {} chars)",
            MAX_PATTERN_LEN
        )));
    }

    RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .dot_matches_new_line(options.contains('s'))
        .ignore_whitespace(options.contains('x'))
        .size_limit(1 << 20)
        .build()
}
