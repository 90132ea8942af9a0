//! Evaluation of store-native filters against documents.
//!
//! Field keys are dotted paths. A numeric segment indexes into a list; any
//! other segment applied to a list fans out over the maps it holds. Literal
//! conditions match by equality or, against a list, by membership, and a
//! `null` literal also matches a missing field.

use std::cmp::Ordering;

use nodegraph_core::path::is_operator;
use nodegraph_core::{Path, PropertyTree, Value};

use crate::error::StorageError;

/// Every operator the evaluator understands, in canonical spelling.
pub const OPERATORS: &[&str] = &[
    "$eq", "$ne", "$gt", "$gte", "$lt", "$lte", "$in", "$nin", "$exists", "$elemMatch", "$all",
    "$size", "$not", "$and", "$or", "$nor",
];

/// Canonical spelling of an operator, matched case-insensitively.
pub fn canonical_operator(name: &str) -> Option<&'static str> {
    OPERATORS
        .iter()
        .copied()
        .find(|op| op.eq_ignore_ascii_case(name))
}

pub fn matches(document: &PropertyTree, filter: &PropertyTree) -> Result<bool, StorageError> {
    for (key, condition) in filter {
        let satisfied = if is_operator(key) {
            match_logical(document, key, condition)?
        } else {
            let path = Path::parse(key)?;
            let candidates = resolve(document, path.segments());
            match_condition(&candidates, condition)?
        };
        if !satisfied {
            return Ok(false);
        }
    }
    Ok(true)
}

fn match_logical(
    document: &PropertyTree,
    operator: &str,
    condition: &Value,
) -> Result<bool, StorageError> {
    let Value::List(clauses) = condition else {
        return Err(StorageError::InvalidQuery(format!(
            "'{operator}' expects a list of filters"
        )));
    };
    let results = clauses
        .iter()
        .map(|clause| match clause {
            Value::Map(filter) => matches(document, filter),
            other => Err(StorageError::InvalidQuery(format!(
                "'{operator}' clause must be a map, got {}",
                other.type_name()
            ))),
        })
        .collect::<Result<Vec<bool>, _>>()?;
    match operator {
        "$and" => Ok(results.iter().all(|r| *r)),
        "$or" => Ok(results.iter().any(|r| *r)),
        "$nor" => Ok(!results.iter().any(|r| *r)),
        other => Err(StorageError::InvalidQuery(format!(
            "unknown top-level operator '{other}'"
        ))),
    }
}

/// All values reachable from `document` along `segments`.
fn resolve<'a>(document: &'a PropertyTree, segments: &[String]) -> Vec<&'a Value> {
    let mut out = Vec::new();
    if let Some((first, rest)) = segments.split_first()
        && let Some(value) = document.get(first)
    {
        descend(value, rest, &mut out);
    }
    out
}

fn descend<'a>(value: &'a Value, segments: &[String], out: &mut Vec<&'a Value>) {
    let Some((head, rest)) = segments.split_first() else {
        out.push(value);
        return;
    };
    match value {
        Value::Map(map) => {
            if let Some(child) = map.get(head) {
                descend(child, rest, out);
            }
        }
        Value::List(items) => match head.parse::<usize>() {
            Ok(index) => {
                if let Some(item) = items.get(index) {
                    descend(item, rest, out);
                }
            }
            Err(_) => {
                for item in items {
                    if let Value::Map(map) = item
                        && let Some(child) = map.get(head)
                    {
                        descend(child, rest, out);
                    }
                }
            }
        },
        _ => {}
    }
}

fn is_operator_map(map: &PropertyTree) -> bool {
    !map.is_empty() && map.keys().all(|k| is_operator(k))
}

fn match_condition(candidates: &[&Value], condition: &Value) -> Result<bool, StorageError> {
    match condition {
        Value::Map(operators) if is_operator_map(operators) => {
            for (operator, argument) in operators {
                if !apply_operator(candidates, operator, argument)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        literal => Ok(equals_any(candidates, literal)),
    }
}

fn equals_any(candidates: &[&Value], expected: &Value) -> bool {
    if expected.is_null() && candidates.is_empty() {
        return true;
    }
    candidates.iter().any(|candidate| {
        *candidate == expected
            || matches!(candidate, Value::List(items) if items.contains(expected))
    })
}

/// A list candidate contributes its elements, anything else itself.
fn scalars<'a>(candidate: &'a Value) -> Box<dyn Iterator<Item = &'a Value> + 'a> {
    match candidate {
        Value::List(items) => Box::new(items.iter()),
        other => Box::new(std::iter::once(other)),
    }
}

fn apply_operator(
    candidates: &[&Value],
    operator: &str,
    argument: &Value,
) -> Result<bool, StorageError> {
    match operator {
        "$eq" => Ok(equals_any(candidates, argument)),
        "$ne" => Ok(!equals_any(candidates, argument)),
        "$gt" | "$gte" | "$lt" | "$lte" => Ok(candidates.iter().any(|candidate| {
            scalars(candidate).any(|value| {
                compare(value, argument).is_some_and(|ordering| match operator {
                    "$gt" => ordering == Ordering::Greater,
                    "$gte" => ordering != Ordering::Less,
                    "$lt" => ordering == Ordering::Less,
                    _ => ordering != Ordering::Greater,
                })
            })
        })),
        "$in" => Ok(list_argument(operator, argument)?
            .iter()
            .any(|expected| equals_any(candidates, expected))),
        "$nin" => Ok(!list_argument(operator, argument)?
            .iter()
            .any(|expected| equals_any(candidates, expected))),
        "$all" => Ok(list_argument(operator, argument)?
            .iter()
            .all(|expected| equals_any(candidates, expected))),
        "$exists" => Ok(!candidates.is_empty() == truthy(argument)),
        "$size" => {
            let size = argument.as_integer().ok_or_else(|| {
                StorageError::InvalidQuery("'$size' expects an integer".into())
            })?;
            Ok(candidates
                .iter()
                .any(|c| matches!(c, Value::List(items) if items.len() as i64 == size)))
        }
        "$elemMatch" => {
            let Value::Map(condition) = argument else {
                return Err(StorageError::InvalidQuery("'$elemMatch' expects a map".into()));
            };
            for candidate in candidates {
                if let Value::List(items) = candidate {
                    for item in items {
                        if element_matches(item, condition)? {
                            return Ok(true);
                        }
                    }
                }
            }
            Ok(false)
        }
        "$not" => Ok(!match_condition(candidates, argument)?),
        other => Err(StorageError::InvalidQuery(format!("unknown operator '{other}'"))),
    }
}

fn element_matches(item: &Value, condition: &PropertyTree) -> Result<bool, StorageError> {
    if is_operator_map(condition) {
        return match_condition(&[item], &Value::Map(condition.clone()));
    }
    match item {
        Value::Map(map) => matches(map, condition),
        _ => Ok(false),
    }
}

fn list_argument<'a>(operator: &str, argument: &'a Value) -> Result<&'a [Value], StorageError> {
    argument
        .as_list()
        .ok_or_else(|| StorageError::InvalidQuery(format!("'{operator}' expects a list")))
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Boolean(b) => *b,
        Value::Integer(n) => *n != 0,
        _ => true,
    }
}

/// Ordering between comparable scalars; `None` across unrelated types.
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => Some(x.cmp(y)),
        (Value::Text(x), Value::Text(y)) => Some(x.cmp(y)),
        (Value::Boolean(x), Value::Boolean(y)) => Some(x.cmp(y)),
        _ => match (a.as_float(), b.as_float()) {
            (Some(x), Some(y)) => x.partial_cmp(&y),
            _ => None,
        },
    }
}
