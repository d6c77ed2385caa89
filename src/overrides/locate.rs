//! Tree locator: finds and rewrites override targets.
//!
//! Two addressing modes:
//! - bare key (`batch_size`): every occurrence at any depth, including inside
//!   each mapping element of any sequence, is set
//! - dotted path (`dataset.a.b`): direct descent, fanning out across every
//!   element whenever the walk reaches a sequence
//!
//! Both return the display locations they wrote, e.g. `callbacks[1].patience`.

use serde_json::Value;

use crate::error::{ConfigError, Result};

/// Set every occurrence of `key` in `tree` to `value`.
///
/// Descent continues below a match, so a key shadowed at several depths is
/// set everywhere. Sequence elements that are not mappings are skipped.
/// Returns the written locations; empty means the key does not exist.
pub fn apply_by_key(tree: &mut Value, key: &str, value: &Value) -> Vec<String> {
    let mut written = Vec::new();
    visit_for_key(tree, key, value, "", &mut written);
    written
}

fn visit_for_key(node: &mut Value, key: &str, value: &Value, loc: &str, written: &mut Vec<String>) {
    match node {
        Value::Object(map) => {
            if let Some(slot) = map.get_mut(key) {
                *slot = value.clone();
                written.push(child_key(loc, key));
            }
            for (k, child) in map.iter_mut() {
                if child.is_object() || child.is_array() {
                    visit_for_key(child, key, value, &child_key(loc, k), written);
                }
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter_mut().enumerate() {
                if item.is_object() {
                    visit_for_key(item, key, value, &child_index(loc, i), written);
                }
            }
        }
        _ => {}
    }
}

/// Set `value` at a dotted `path`.
///
/// Intermediate segments must exist. When the walk reaches a sequence the
/// remaining segments are resolved against every element; a `*` segment
/// makes that explicit and an integer segment selects a single element.
/// The final segment is created on its mapping if absent.
pub fn apply_by_path(tree: &mut Value, path: &str, value: &Value) -> Result<Vec<String>> {
    let segments: Vec<&str> = path.split('.').collect();
    if let Some(empty) = segments.iter().find(|s| s.is_empty()) {
        return Err(unresolved(path, empty));
    }

    let mut written = Vec::new();
    walk_path(tree, &segments, value, path, "", &mut written)?;
    Ok(written)
}

fn walk_path(
    node: &mut Value,
    segments: &[&str],
    value: &Value,
    path: &str,
    loc: &str,
    written: &mut Vec<String>,
) -> Result<()> {
    let (segment, rest) = match segments.split_first() {
        Some(split) => split,
        None => return Ok(()),
    };

    match node {
        Value::Object(map) => {
            if rest.is_empty() {
                map.insert(segment.to_string(), value.clone());
                written.push(child_key(loc, segment));
                return Ok(());
            }
            let child = map.get_mut(*segment).ok_or_else(|| unresolved(path, segment))?;
            walk_path(child, rest, value, path, &child_key(loc, segment), written)
        }
        Value::Array(items) => {
            if *segment == "*" {
                if rest.is_empty() {
                    return Err(unresolved(path, segment));
                }
                for (i, item) in items.iter_mut().enumerate() {
                    walk_path(item, rest, value, path, &child_index(loc, i), written)?;
                }
                return Ok(());
            }

            if let Some(index) = parse_index(segment) {
                let item = items
                    .get_mut(index)
                    .ok_or_else(|| unresolved(path, segment))?;
                let item_loc = child_index(loc, index);
                if rest.is_empty() {
                    *item = value.clone();
                    written.push(item_loc);
                    return Ok(());
                }
                return walk_path(item, rest, value, path, &item_loc, written);
            }

            for (i, item) in items.iter_mut().enumerate() {
                walk_path(item, segments, value, path, &child_index(loc, i), written)?;
            }
            Ok(())
        }
        _ => Err(unresolved(path, segment)),
    }
}

fn parse_index(segment: &str) -> Option<usize> {
    if segment.chars().all(|c| c.is_ascii_digit()) {
        segment.parse().ok()
    } else {
        None
    }
}

fn unresolved(path: &str, segment: &str) -> ConfigError {
    ConfigError::UnresolvedPath {
        path: path.to_string(),
        segment: segment.to_string(),
    }
}

fn child_key(loc: &str, key: &str) -> String {
    if loc.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", loc, key)
    }
}

fn child_index(loc: &str, index: usize) -> String {
    format!("{}[{}]", loc, index)
}
