//! Operations on an in-memory JSON document tree.
//!
//! The database has no notion of empty objects or null leaves: writing
//! `null` deletes, and a parent left without children disappears. Both the
//! in-process store and the SSE cache keep their trees in that normal form.

use serde_json::{Map, Value};

/// Read the value at `segments` below `root`.
pub fn get<'a>(root: &'a Value, segments: &[String]) -> Option<&'a Value> {
    let mut node = root;
    for segment in segments {
        node = node.as_object()?.get(segment)?;
    }
    if node.is_null() {
        None
    } else {
        Some(node)
    }
}

/// Write `value` at `segments` below `root`, deleting on `null`.
pub fn set(root: &mut Value, segments: &[String], value: Value) {
    let value = normalize(value);

    let Some((last, parents)) = segments.split_last() else {
        *root = value;
        return;
    };

    if value.is_null() {
        remove(root, segments);
        return;
    }

    let mut node = root;
    for segment in parents {
        node = ensure_object(node)
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    ensure_object(node).insert(last.clone(), value);
}

/// Delete the value at `segments` and prune parents left empty.
pub fn remove(root: &mut Value, segments: &[String]) {
    let Some((first, rest)) = segments.split_first() else {
        *root = Value::Null;
        return;
    };
    let Some(map) = root.as_object_mut() else {
        return;
    };

    if rest.is_empty() {
        map.remove(first);
    } else if let Some(child) = map.get_mut(first) {
        remove(child, rest);
        if child.is_null() || child.as_object().is_some_and(Map::is_empty) {
            map.remove(first);
        }
    }

    if map.is_empty() {
        *root = Value::Null;
    }
}

/// Strip null members and empty objects, recursively.
pub fn normalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let cleaned: Map<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, normalize(v)))
                .filter(|(_, v)| !v.is_null())
                .collect();
            if cleaned.is_empty() {
                Value::Null
            } else {
                Value::Object(cleaned)
            }
        }
        other => other,
    }
}

fn ensure_object(node: &mut Value) -> &mut Map<String, Value> {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => map,
        _ => unreachable!("node was just replaced with an object"),
    }
}
