//! Deep merge with array union, shared by the Enrich Engine and
//! the tiered resolver's `merge=true` mode.

use serde_json::Value;

/// Deep-merge `patch` into `target`, returning the result.
///
/// - Object + object recurses key by key.
/// - Array + array produces their union, preserving first-seen order;
///   element equality is JSON-canonical value equality.
/// - Anything else: `patch` replaces `target`.
pub fn deep_merge(target: &Value, patch: &Value) -> Value {
    match (target, patch) {
        (Value::Object(t), Value::Object(p)) => {
            let mut merged = t.clone();
            for (key, patch_value) in p {
                let next = match merged.get(key) {
                    Some(existing) => deep_merge(existing, patch_value),
                    None => patch_value.clone(),
                };
                merged.insert(key.clone(), next);
            }
            Value::Object(merged)
        }
        (Value::Array(t), Value::Array(p)) => Value::Array(array_union(t, p)),
        (_, patch_value) => patch_value.clone(),
    }
}

/// First-seen-order union of two arrays, using JSON-canonical equality.
fn array_union(a: &[Value], b: &[Value]) -> Vec<Value> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    for item in a.iter().chain(b.iter()) {
        if !out.iter().any(|existing| existing == item) {
            out.push(item.clone());
        }
    }
    out
}

/// Apply a sequence of patches to a target in order, as `batchEnrich` does
/// against the evolving in-memory value before a single commit.
pub fn apply_patches(target: &Value, patches: &[Value]) -> Value {
    patches
        .iter()
        .fold(target.clone(), |acc, patch| deep_merge(&acc, patch))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merges_objects_recursively() {
        let target = json!({"tags": ["u"], "meta": {"score": 10}});
        let patch = json!({"tags": ["vip"], "meta": {"level": 5}});
        let merged = deep_merge(&target, &patch);
        assert_eq!(
            merged,
            json!({"tags": ["u", "vip"], "meta": {"score": 10, "level": 5}})
        );
    }

    #[test]
    fn array_union_preserves_first_seen_order_and_dedupes() {
        let target = json!(["a", "b"]);
        let patch = json!(["b", "c"]);
        assert_eq!(deep_merge(&target, &patch), json!(["a", "b", "c"]));
    }

    #[test]
    fn scalar_patch_replaces_target() {
        assert_eq!(deep_merge(&json!(1), &json!(2)), json!(2));
        assert_eq!(deep_merge(&json!("x"), &json!(5)), json!(5));
    }

    #[test]
    fn empty_patch_is_a_no_op() {
        let target = json!({"a": 1, "b": [1, 2]});
        assert_eq!(deep_merge(&target, &json!({})), target);
    }

    #[test]
    fn enrich_is_associative_on_non_conflicting_fields() {
        let base = json!({"a": 1});
        let patch_a = json!({"b": 2});
        let patch_b = json!({"c": 3});

        let sequential = deep_merge(&deep_merge(&base, &patch_a), &patch_b);
        let combined_patch = deep_merge(&patch_a, &patch_b);
        let combined = deep_merge(&base, &combined_patch);

        assert_eq!(sequential, combined);
    }

    #[test]
    fn batch_enrich_folds_patches_in_order() {
        let target = json!({"tags": ["u"]});
        let patches = vec![json!({"tags": ["v"]}), json!({"tags": ["w"]})];
        assert_eq!(apply_patches(&target, &patches), json!({"tags": ["u", "v", "w"]}));
    }
}
