//! Dot-path extraction of `indexedProps` into a `metaIndexed` projection.
//!
//! Paths are plain dot-separated segments (`"customer.tier"`); a trailing
//! `[]` on the final segment (`"tags[]"`) marks the value as an array to be
//! carried through unflattened rather than treated as a scalar.

use serde_json::{Map, Value};

/// One `indexedProps` entry split into its traversal path and whether it
/// names an array-valued leaf.
struct ParsedPath {
    segments: Vec<String>,
    is_array: bool,
}

fn parse_path(path: &str) -> ParsedPath {
    let (body, is_array) = match path.strip_suffix("[]") {
        Some(stripped) => (stripped, true),
        None => (path, false),
    };
    ParsedPath {
        segments: body.split('.').map(str::to_string).collect(),
        is_array,
    }
}

fn get_by_segments<'a>(value: &'a Value, segments: &[String]) -> Option<&'a Value> {
    segments.iter().try_fold(value, |current, segment| current.get(segment))
}

fn set_by_segments(target: &mut Map<String, Value>, segments: &[String], value: Value) {
    let (last, init) = match segments.split_last() {
        Some(pair) => pair,
        None => return,
    };
    let mut cursor = target;
    for segment in init {
        let entry = cursor
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        cursor = entry.as_object_mut().expect("just normalized to an object");
    }
    cursor.insert(last.clone(), value);
}

/// Extract `indexed_props` from `payload` into a nested `metaIndexed`
/// object, preserving the source's nesting so Mongo paths like
/// `metaIndexed.customer.tier` address the copied value directly.
pub fn extract_indexed(payload: &Value, indexed_props: &[String]) -> Value {
    let mut out = Map::new();
    for path in indexed_props {
        let parsed = parse_path(path);
        if let Some(found) = get_by_segments(payload, &parsed.segments) {
            if parsed.is_array && !found.is_array() {
                continue;
            }
            set_by_segments(&mut out, &parsed.segments, found.clone());
        }
    }
    Value::Object(out)
}

/// Check that every `required` dot-path resolved to a present value in
/// `meta_indexed` (the output of [`extract_indexed`]).
pub fn missing_required(meta_indexed: &Value, required: &[String]) -> Vec<String> {
    required
        .iter()
        .filter(|path| {
            let parsed = parse_path(path);
            get_by_segments(meta_indexed, &parsed.segments).is_none()
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_scalar_dot_path() {
        let payload = json!({"customer": {"tier": "gold", "id": "c1"}});
        let meta = extract_indexed(&payload, &["customer.tier".to_string()]);
        assert_eq!(meta, json!({"customer": {"tier": "gold"}}));
    }

    #[test]
    fn extracts_top_level_field() {
        let payload = json!({"status": "active", "other": 1});
        let meta = extract_indexed(&payload, &["status".to_string()]);
        assert_eq!(meta, json!({"status": "active"}));
    }

    #[test]
    fn array_suffix_keeps_array_value_intact() {
        let payload = json!({"tags": ["a", "b", "c"]});
        let meta = extract_indexed(&payload, &["tags[]".to_string()]);
        assert_eq!(meta, json!({"tags": ["a", "b", "c"]}));
    }

    #[test]
    fn array_suffix_skips_non_array_value() {
        let payload = json!({"tags": "not-an-array"});
        let meta = extract_indexed(&payload, &["tags[]".to_string()]);
        assert_eq!(meta, json!({}));
    }

    #[test]
    fn missing_path_is_simply_absent_not_null() {
        let payload = json!({"customer": {"id": "c1"}});
        let meta = extract_indexed(&payload, &["customer.tier".to_string()]);
        assert_eq!(meta, json!({"customer": {}}));
    }

    #[test]
    fn missing_required_reports_unresolved_paths() {
        let meta = json!({"customer": {"id": "c1"}});
        let missing = missing_required(&meta, &["customer.tier".to_string(), "customer.id".to_string()]);
        assert_eq!(missing, vec!["customer.tier".to_string()]);
    }

    #[test]
    fn nested_paths_compose_without_clobbering_siblings() {
        let payload = json!({"a": {"b": 1, "c": 2}});
        let meta = extract_indexed(&payload, &["a.b".to_string(), "a.c".to_string()]);
        assert_eq!(meta, json!({"a": {"b": 1, "c": 2}}));
    }
}
