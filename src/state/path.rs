//! Dot-path parsing and traversal over a `serde_json::Value` tree

use serde_json::{Map, Value};

use super::StateError;
use crate::constants::events::CHANGED_SUFFIX;

/// Name of the event emitted when `path` is written
pub fn changed_event(path: &str) -> String {
    format!("{path}{CHANGED_SUFFIX}")
}

/// Split a dotted path into its segments
pub fn segments(path: &str) -> Result<Vec<&str>, StateError> {
    if path.is_empty() {
        return Err(StateError::EmptyPath);
    }
    let segs: Vec<&str> = path.split('.').collect();
    if segs.iter().any(|s| s.is_empty()) {
        return Err(StateError::EmptySegment(path.to_string()));
    }
    Ok(segs)
}

/// Walk `segs` down from `root`; arrays are indexed by numeric segments
pub fn lookup<'a>(root: &'a Value, segs: &[&str]) -> Option<&'a Value> {
    segs.iter().try_fold(root, |node, seg| match node {
        Value::Object(map) => map.get(*seg),
        Value::Array(items) => seg.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Assign `value` at `segs`, creating missing intermediate objects.
///
/// Returns the previous value at the leaf, if any. A `null` intermediate is
/// replaced with an empty object; any other scalar intermediate is an error.
pub fn assign(
    root: &mut Value,
    segs: &[&str],
    value: Value,
    display_path: &str,
) -> Result<Option<Value>, StateError> {
    let Some((leaf, parents)) = segs.split_last() else {
        return Err(StateError::EmptyPath);
    };

    let mut node = root;
    for seg in parents {
        if node.is_null() {
            *node = Value::Object(Map::new());
        }
        node = match node {
            Value::Object(map) => map
                .entry(seg.to_string())
                .or_insert_with(|| Value::Object(Map::new())),
            Value::Array(items) => {
                let idx = seg.parse::<usize>().ok().filter(|i| *i < items.len());
                match idx {
                    Some(i) => &mut items[i],
                    None => return Err(not_a_container(display_path, seg)),
                }
            }
            _ => return Err(not_a_container(display_path, seg)),
        };
    }

    if node.is_null() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => Ok(map.insert(leaf.to_string(), value)),
        Value::Array(items) => match leaf.parse::<usize>() {
            Ok(i) if i < items.len() => Ok(Some(std::mem::replace(&mut items[i], value))),
            Ok(i) if i == items.len() => {
                items.push(value);
                Ok(None)
            }
            _ => Err(not_a_container(display_path, leaf)),
        },
        _ => Err(not_a_container(display_path, leaf)),
    }
}

fn not_a_container(path: &str, segment: &str) -> StateError {
    StateError::NotAContainer {
        path: path.to_string(),
        segment: segment.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_segments_rejects_empty() {
        assert!(matches!(segments(""), Err(StateError::EmptyPath)));
        assert!(matches!(segments("ui..theme"), Err(StateError::EmptySegment(_))));
        assert_eq!(segments("ui.theme").unwrap(), vec!["ui", "theme"]);
    }

    #[test]
    fn test_lookup_through_objects_and_arrays() {
        let tree = json!({"a": {"b": [10, {"c": "deep"}]}});
        assert_eq!(lookup(&tree, &["a", "b", "0"]), Some(&json!(10)));
        assert_eq!(lookup(&tree, &["a", "b", "1", "c"]), Some(&json!("deep")));
        assert_eq!(lookup(&tree, &["a", "missing"]), None);
        assert_eq!(lookup(&tree, &["a", "b", "x"]), None);
    }

    #[test]
    fn test_assign_creates_intermediates() {
        let mut tree = json!({});
        let old = assign(&mut tree, &["x", "y", "z"], json!(1), "x.y.z").unwrap();
        assert_eq!(old, None);
        assert_eq!(tree, json!({"x": {"y": {"z": 1}}}));

        let old = assign(&mut tree, &["x", "y", "z"], json!(2), "x.y.z").unwrap();
        assert_eq!(old, Some(json!(1)));
    }

    #[test]
    fn test_assign_replaces_null_intermediate() {
        let mut tree = json!({"fitFile": {"rawData": null}});
        assign(&mut tree, &["fitFile", "rawData", "name"], json!("ride"), "p").unwrap();
        assert_eq!(tree["fitFile"]["rawData"]["name"], json!("ride"));
    }

    #[test]
    fn test_assign_into_scalar_fails() {
        let mut tree = json!({"a": 5});
        let err = assign(&mut tree, &["a", "b"], json!(1), "a.b").unwrap_err();
        assert!(matches!(err, StateError::NotAContainer { .. }));
        assert_eq!(tree, json!({"a": 5}));
    }

    #[test]
    fn test_assign_array_index_and_append() {
        let mut tree = json!({"list": [1, 2]});
        assign(&mut tree, &["list", "1"], json!(20), "list.1").unwrap();
        assign(&mut tree, &["list", "2"], json!(30), "list.2").unwrap();
        assert_eq!(tree["list"], json!([1, 20, 30]));
        assert!(assign(&mut tree, &["list", "9"], json!(0), "list.9").is_err());
    }
}
