//! Local filter evaluation.
//!
//! A filter is a MongoDB-style JSON object. Top-level keys are either field
//! paths (matched against the document) or logical operators (`$and`, `$or`,
//! `$nor`). A field condition is either a plain value (implicit equality) or
//! an object made only of `$` operators.

use serde_json::{Map, Value};

use crate::error::{QueryError, QueryResult};
use crate::helpers::{comparable, compare_values, resolve_path, safe_regex, values_equal};
use std::cmp::Ordering;

/// Geo operators need a spatial index and are rejected instead of being
/// evaluated incorrectly.
const GEO_OPERATORS: &[&str] = &[
    "$near",
    "$nearSphere",
    "$geoWithin",
    "$geoIntersects",
    "$within",
    "$box",
    "$polygon",
    "$center",
    "$centerSphere",
    "$maxDistance",
];

/// Returns true if `doc` satisfies `filter`.
///
/// An empty or null filter matches every document.
pub fn matches(doc: &Value, filter: &Value) -> QueryResult<bool> {
    match filter {
        Value::Null => Ok(true),
        Value::Object(conditions) => matches_object(doc, conditions),
        other => Err(QueryError::InvalidFilter(format!(
            "expected an object, got {}",
            other
        ))),
    }
}

/// Check a filter for operators that cannot run offline without evaluating it.
pub fn validate(filter: &Value) -> QueryResult<()> {
    match filter {
        Value::Object(obj) => {
            for (key, value) in obj {
                if GEO_OPERATORS.contains(&key.as_str()) {
                    return Err(QueryError::UnsupportedOffline(key.clone()));
                }
                validate(value)?;
            }
            Ok(())
        }
        Value::Array(items) => items.iter().try_for_each(validate),
        _ => Ok(()),
    }
}

fn matches_object(doc: &Value, conditions: &Map<String, Value>) -> QueryResult<bool> {
    for (key, condition) in conditions {
        let matched = match key.as_str() {
            "$and" => {
                let mut all = true;
                for sub in logical_operands(key, condition)? {
                    if !matches(doc, sub)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let mut any = false;
                for sub in logical_operands(key, condition)? {
                    if matches(doc, sub)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            "$nor" => {
                let mut none = true;
                for sub in logical_operands(key, condition)? {
                    if matches(doc, sub)? {
                        none = false;
                        break;
                    }
                }
                none
            }
            op if GEO_OPERATORS.contains(&op) => {
                return Err(QueryError::UnsupportedOffline(op.to_string()))
            }
            op if op.starts_with('$') => {
                return Err(QueryError::UnsupportedOperator(op.to_string()))
            }
            field => field_matches(doc, field, condition)?,
        };

        if !matched {
            return Ok(false);
        }
    }

    Ok(true)
}

fn logical_operands<'a>(op: &str, value: &'a Value) -> QueryResult<&'a Vec<Value>> {
    value
        .as_array()
        .ok_or_else(|| QueryError::InvalidFilter(format!("{} expects an array", op)))
}

/// True when `value` is an object whose keys are all `$` operators.
fn is_operator_object(value: &Value) -> bool {
    match value {
        Value::Object(obj) => !obj.is_empty() && obj.keys().all(|k| k.starts_with('$')),
        _ => false,
    }
}

fn field_matches(doc: &Value, field: &str, condition: &Value) -> QueryResult<bool> {
    let candidates = resolve_path(doc, field);

    if is_operator_object(condition) {
        apply_operators(&candidates, condition)
    } else {
        Ok(equals_any(&candidates, condition))
    }
}

fn apply_operators(candidates: &[&Value], condition: &Value) -> QueryResult<bool> {
    let Some(ops) = condition.as_object() else {
        return Ok(equals_any(candidates, condition));
    };

    let options = ops.get("$options").and_then(|o| o.as_str()).unwrap_or("");

    for (op, arg) in ops {
        let matched = match op.as_str() {
            "$eq" => equals_any(candidates, arg),
            "$ne" => !equals_any(candidates, arg),
            "$gt" => compare_any(candidates, arg, |o| o == Ordering::Greater),
            "$gte" => compare_any(candidates, arg, |o| o != Ordering::Less),
            "$lt" => compare_any(candidates, arg, |o| o == Ordering::Less),
            "$lte" => compare_any(candidates, arg, |o| o != Ordering::Greater),
            "$in" => in_list(candidates, op, arg)?,
            "$nin" => !in_list(candidates, op, arg)?,
            "$exists" => {
                let wanted = match arg {
                    Value::Bool(b) => *b,
                    Value::Null => false,
                    Value::Number(n) => n.as_f64().map_or(false, |n| n != 0.0),
                    _ => true,
                };
                candidates.is_empty() != wanted
            }
            "$regex" => regex_any(candidates, arg, options)?,
            "$options" => true,
            "$all" => {
                let required = arg
                    .as_array()
                    .ok_or_else(|| QueryError::InvalidFilter("$all expects an array".into()))?;
                candidates.iter().any(|c| match c {
                    Value::Array(items) => required
                        .iter()
                        .all(|r| items.iter().any(|item| values_equal(item, r))),
                    single => required.len() == 1 && values_equal(single, &required[0]),
                })
            }
            "$size" => {
                let size = arg
                    .as_u64()
                    .ok_or_else(|| QueryError::InvalidFilter("$size expects a number".into()))?;
                candidates
                    .iter()
                    .any(|c| c.as_array().map_or(false, |a| a.len() as u64 == size))
            }
            "$elemMatch" => elem_match(candidates, arg)?,
            "$not" => {
                if arg.is_string() {
                    !regex_any(candidates, arg, options)?
                } else if is_operator_object(arg) {
                    !apply_operators(candidates, arg)?
                } else {
                    return Err(QueryError::InvalidFilter(
                        "$not expects an operator object or a pattern".into(),
                    ));
                }
            }
            "$mod" => {
                let parts = arg.as_array().filter(|a| a.len() == 2).ok_or_else(|| {
                    QueryError::InvalidFilter("$mod expects [divisor, remainder]".into())
                })?;
                let divisor = parts[0].as_i64().filter(|d| *d != 0).ok_or_else(|| {
                    QueryError::InvalidFilter("$mod divisor must be a non-zero integer".into())
                })?;
                let remainder = parts[1].as_i64().unwrap_or(0);
                candidates.iter().any(|c| {
                    let n = match c.as_i64() {
                        Some(n) => Some(n),
                        None => c.as_f64().map(|f| f.trunc() as i64),
                    };
                    // i64::MIN % -1 overflows; its remainder is 0
                    n.map_or(false, |n| n.wrapping_rem(divisor) == remainder)
                })
            }
            geo if GEO_OPERATORS.contains(&geo) => {
                return Err(QueryError::UnsupportedOffline(geo.to_string()))
            }
            other => return Err(QueryError::UnsupportedOperator(other.to_string())),
        };

        if !matched {
            return Ok(false);
        }
    }

    Ok(true)
}

/// Equality against a resolved field.
///
/// A missing field equals `null`. An array field equals a scalar it contains.
fn equals_any(candidates: &[&Value], target: &Value) -> bool {
    if candidates.is_empty() {
        return target.is_null();
    }

    candidates.iter().any(|c| {
        values_equal(c, target)
            || match c {
                Value::Array(items) => items.iter().any(|item| values_equal(item, target)),
                _ => false,
            }
    })
}

fn compare_any(candidates: &[&Value], target: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    let check = |v: &Value| comparable(v, target) && accept(compare_values(v, target));

    candidates.iter().any(|c| match c {
        Value::Array(items) if !target.is_array() => items.iter().any(|item| check(item)),
        single => check(single),
    })
}

fn in_list(candidates: &[&Value], op: &str, arg: &Value) -> QueryResult<bool> {
    let list = arg
        .as_array()
        .ok_or_else(|| QueryError::InvalidFilter(format!("{} expects an array", op)))?;
    Ok(list.iter().any(|item| equals_any(candidates, item)))
}

fn regex_any(candidates: &[&Value], pattern: &Value, options: &str) -> QueryResult<bool> {
    let pattern = pattern
        .as_str()
        .ok_or_else(|| QueryError::InvalidFilter("$regex expects a string".into()))?;
    let re = safe_regex(pattern, options).map_err(|e| QueryError::InvalidRegex(e.to_string()))?;

    let is_match = |v: &Value| v.as_str().map_or(false, |s| re.is_match(s));
    Ok(candidates.iter().any(|c| match c {
        Value::Array(items) => items.iter().any(|item| is_match(item)),
        single => is_match(single),
    }))
}

fn elem_match(candidates: &[&Value], condition: &Value) -> QueryResult<bool> {
    for candidate in candidates {
        let Some(items) = candidate.as_array() else {
            continue;
        };
        for item in items {
            let hit = if is_operator_object(condition) {
                apply_operators(&[item], condition)?
            } else {
                matches(item, condition)?
            };
            if hit {
                return Ok(true);
            }
        }
    }
    Ok(false)
}
