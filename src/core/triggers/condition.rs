//! Condition expressions evaluated against event payloads.
//!
//! An expression maps dot-notation payload paths to either a literal (equality)
//! or an operator object such as `{"$gt": 3}`. `$and` / `$or` take arrays of
//! sub-expressions. Unknown operators are ignored. Every branch is evaluated, so
//! an error anywhere makes the whole expression fail.

use regex::Regex;
use serde_json::{Map, Value};
use std::cmp::Ordering;

use crate::error::ConditionError;

/// Fail-closed wrapper: no condition, or an empty one, always matches; errors never do.
pub fn matches(condition: Option<&Value>, payload: &Value) -> bool {
    match condition {
        None | Some(Value::Null) => true,
        Some(Value::Object(map)) if map.is_empty() => true,
        Some(cond) => evaluate(cond, payload).unwrap_or(false),
    }
}

pub fn evaluate(condition: &Value, payload: &Value) -> Result<bool, ConditionError> {
    let map = condition.as_object().ok_or(ConditionError::NotAnObject)?;
    let mut all = true;
    for (key, expected) in map {
        let ok = match key.as_str() {
            "$and" => {
                let mut acc = true;
                for sub in sub_expressions("$and", expected)? {
                    acc &= evaluate(sub, payload)?;
                }
                acc
            }
            "$or" => {
                let mut acc = false;
                for sub in sub_expressions("$or", expected)? {
                    acc |= evaluate(sub, payload)?;
                }
                acc
            }
            op if op.starts_with('$') => true,
            path => {
                let actual = resolve(payload, path);
                match expected {
                    Value::Object(ops) if is_operator_object(ops) => apply_operators(actual, ops)?,
                    literal => actual.unwrap_or(&Value::Null) == literal,
                }
            }
        };
        all &= ok;
    }
    Ok(all)
}

fn sub_expressions<'a>(op: &'static str, value: &'a Value) -> Result<&'a Vec<Value>, ConditionError> {
    value.as_array().ok_or(ConditionError::BadOperand {
        op,
        expected: "an array of expressions",
    })
}

fn is_operator_object(map: &Map<String, Value>) -> bool {
    !map.is_empty() && map.keys().all(|k| k.starts_with('$'))
}

/// Walk `a.b.0.c` through objects and arrays.
pub fn resolve<'a>(payload: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(payload, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn apply_operators(actual: Option<&Value>, ops: &Map<String, Value>) -> Result<bool, ConditionError> {
    let value = actual.unwrap_or(&Value::Null);
    let mut all = true;
    for (op, operand) in ops {
        let ok = match op.as_str() {
            "$eq" => value == operand,
            "$ne" => value != operand,
            "$gt" => compare(value, operand).is_some_and(|o| o == Ordering::Greater),
            "$gte" => compare(value, operand).is_some_and(|o| o != Ordering::Less),
            "$lt" => compare(value, operand).is_some_and(|o| o == Ordering::Less),
            "$lte" => compare(value, operand).is_some_and(|o| o != Ordering::Greater),
            "$in" => in_list("$in", operand)?.contains(value),
            "$nin" => !in_list("$nin", operand)?.contains(value),
            "$contains" => contains(value, operand),
            "$regex" => regex_match(value, operand)?,
            _ => true,
        };
        all &= ok;
    }
    Ok(all)
}

/// Numbers compare with numbers and strings with strings; anything else is incomparable.
fn compare(actual: &Value, operand: &Value) -> Option<Ordering> {
    match (actual, operand) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn in_list<'a>(op: &'static str, operand: &'a Value) -> Result<&'a Vec<Value>, ConditionError> {
    operand.as_array().ok_or(ConditionError::BadOperand {
        op,
        expected: "an array",
    })
}

fn contains(actual: &Value, operand: &Value) -> bool {
    match (actual, operand) {
        (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
        (Value::Array(items), needle) => items.contains(needle),
        _ => false,
    }
}

fn regex_match(actual: &Value, operand: &Value) -> Result<bool, ConditionError> {
    let pattern = operand.as_str().ok_or(ConditionError::BadOperand {
        op: "$regex",
        expected: "a string pattern",
    })?;
    let re = Regex::new(pattern).map_err(|e| ConditionError::InvalidRegex {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })?;
    Ok(actual.as_str().is_some_and(|s| re.is_match(s)))
}
