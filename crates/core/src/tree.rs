//! Manipulation of property trees as nested maps.
//!
//! A tree has two interchangeable shapes: *expanded* (nested maps keyed by
//! single segments) and *flat* (one level, dotted keys). Operator segments
//! (`$gt`, `$elemMatch`, ...) are never flattened past: a flat key always
//! stops before the operator, which stays as a one-entry nested map so that
//! store-native predicates remain addressable.
//!
//! Empty nested maps are leaves: they survive a flatten/expand round trip.

use crate::path::{Path, is_operator};
use crate::value::{PropertyTree, Value};
use crate::{CoreError, IntoPath};

/// Normalize any key form into a validated [`Path`].
pub fn expand_key<P: IntoPath>(key: P) -> Result<Path, CoreError> {
    key.into_path()
}

/// Insert `value` at `path`, creating intermediate maps as needed.
pub fn set(tree: &mut PropertyTree, path: &Path, value: Value) -> Result<(), CoreError> {
    set_in(tree, path.segments(), path, value)
}

fn set_in(
    tree: &mut PropertyTree,
    segments: &[String],
    path: &Path,
    value: Value,
) -> Result<(), CoreError> {
    match segments {
        [] => Err(CoreError::MalformedKey("empty key".into())),
        [leaf] => {
            tree.insert(leaf.clone(), value);
            Ok(())
        }
        [root, rest @ ..] => {
            let child = tree
                .entry(root.clone())
                .or_insert_with(|| Value::Map(PropertyTree::new()));
            match child {
                Value::Map(map) => set_in(map, rest, path, value),
                other => Err(CoreError::InvalidOperation(format!(
                    "cannot set '{path}': '{root}' holds a {} value, not a map",
                    other.type_name()
                ))),
            }
        }
    }
}

/// Read the value at `path`.
pub fn get<'a>(tree: &'a PropertyTree, path: &Path) -> Result<&'a Value, CoreError> {
    let mut node = tree;
    let (last, parents) = split_last(path)?;
    for segment in parents {
        node = match node.get(segment) {
            Some(Value::Map(map)) => map,
            _ => return Err(CoreError::NotFound(path.to_string())),
        };
    }
    node.get(last)
        .ok_or_else(|| CoreError::NotFound(path.to_string()))
}

/// Remove the value at `path` and prune ancestor maps left empty.
pub fn delete(tree: &mut PropertyTree, path: &Path) -> Result<Value, CoreError> {
    delete_in(tree, path.segments(), path)
}

fn delete_in(
    tree: &mut PropertyTree,
    segments: &[String],
    path: &Path,
) -> Result<Value, CoreError> {
    match segments {
        [] => Err(CoreError::MalformedKey("empty key".into())),
        [leaf] => tree
            .remove(leaf)
            .ok_or_else(|| CoreError::NotFound(path.to_string())),
        [root, rest @ ..] => {
            let child = match tree.get_mut(root) {
                Some(Value::Map(map)) => map,
                _ => return Err(CoreError::NotFound(path.to_string())),
            };
            let removed = delete_in(child, rest, path)?;
            if child.is_empty() {
                tree.remove(root);
            }
            Ok(removed)
        }
    }
}

pub fn contains(tree: &PropertyTree, path: &Path) -> bool {
    get(tree, path).is_ok()
}

fn split_last(path: &Path) -> Result<(&String, &[String]), CoreError> {
    path.segments()
        .split_last()
        .ok_or_else(|| CoreError::MalformedKey("empty key".into()))
}

/// Enumerate every leaf with its full path.
///
/// Dotted keys found inside the tree are split into their segments. The value
/// under an operator segment is a leaf even when it is a map.
pub fn items(tree: &PropertyTree) -> Result<Vec<(Path, Value)>, CoreError> {
    let mut out = Vec::new();
    walk(tree, &[], &mut out)?;
    Ok(out)
}

fn walk(
    node: &PropertyTree,
    prefix: &[String],
    out: &mut Vec<(Path, Value)>,
) -> Result<(), CoreError> {
    for (key, value) in node {
        let mut branch = prefix.to_vec();
        branch.extend(Path::parse(key)?.into_segments());
        let descend = match value {
            Value::Map(child) => !child.is_empty() && !branch.last().is_some_and(|s| is_operator(s)),
            _ => false,
        };
        match value {
            Value::Map(child) if descend => walk(child, &branch, out)?,
            _ => out.push((Path::from_segments(branch)?, value.clone())),
        }
    }
    Ok(())
}

/// Nested tree to dotted-key map.
pub fn flatten(tree: &PropertyTree) -> Result<PropertyTree, CoreError> {
    let mut flat = PropertyTree::new();
    for (path, value) in items(tree)? {
        match path.parent() {
            Some(parent) if path.ends_with_operator() => {
                let slot = flat
                    .entry(parent.to_string())
                    .or_insert_with(|| Value::Map(PropertyTree::new()));
                match slot {
                    Value::Map(operators) => {
                        operators.insert(path.last().to_string(), value);
                    }
                    other => {
                        return Err(CoreError::MalformedKey(format!(
                            "'{path}' conflicts with the {} value at '{parent}'",
                            other.type_name()
                        )));
                    }
                }
            }
            _ => {
                let key = path.to_string();
                if flat.contains_key(&key) {
                    return Err(CoreError::MalformedKey(format!("'{key}' is given more than once")));
                }
                flat.insert(key, value);
            }
        }
    }
    Ok(flat)
}

/// Dotted-key map to nested tree.
pub fn expand(flat: &PropertyTree) -> Result<PropertyTree, CoreError> {
    let mut tree = PropertyTree::new();
    for (key, value) in flat {
        set(&mut tree, &Path::parse(key)?, value.clone())?;
    }
    Ok(tree)
}

/// Rebuild a tree, rewriting the keys chosen by `selector` with
/// `key_modifier` and their non-map values with `value_modifier`.
///
/// Maps are always descended into, including maps held in lists.
pub fn traverse<S, K, V>(
    tree: &PropertyTree,
    selector: &S,
    key_modifier: &K,
    value_modifier: &mut V,
) -> PropertyTree
where
    S: Fn(&str) -> bool,
    K: Fn(&str) -> String,
    V: FnMut(&Value) -> Value,
{
    let mut out = PropertyTree::new();
    for (key, value) in tree {
        let selected = selector(key);
        let new_key = if selected { key_modifier(key) } else { key.clone() };
        let new_value = match value {
            Value::Map(child) => {
                Value::Map(traverse(child, selector, key_modifier, value_modifier))
            }
            Value::List(items) if items.iter().any(|v| matches!(v, Value::Map(_))) => {
                Value::List(
                    items
                        .iter()
                        .map(|item| match item {
                            Value::Map(child) => {
                                Value::Map(traverse(child, selector, key_modifier, value_modifier))
                            }
                            other => other.clone(),
                        })
                        .collect(),
                )
            }
            other if selected => value_modifier(other),
            other => other.clone(),
        };
        out.insert(new_key, new_value);
    }
    out
}

/// Build a flat tree from key/value pairs; keys may be dotted.
pub fn from_pairs<K, V, I>(pairs: I) -> PropertyTree
where
    K: Into<String>,
    V: Into<Value>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
