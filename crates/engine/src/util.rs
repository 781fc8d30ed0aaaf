//! Small helpers shared by the CRUD and Enrich engines.

use chronos_core::config::DevShadowConfig;
use serde_json::Value;

/// Return a copy of `payload` to embed as `HeadRecord::full_shadow`, if
/// dev-shadow is enabled and the payload fits under the configured cap.
pub fn full_shadow_for(dev_shadow: &DevShadowConfig, payload: &Value) -> Option<Value> {
    if !dev_shadow.enabled {
        return None;
    }
    let size = serde_json::to_vec(payload).map(|b| b.len() as u64).unwrap_or(u64::MAX);
    (size <= dev_shadow.max_bytes_per_doc).then(|| payload.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(enabled: bool, max_bytes: u64) -> DevShadowConfig {
        DevShadowConfig {
            enabled,
            ttl_hours: 24,
            max_bytes_per_doc: max_bytes,
        }
    }

    #[test]
    fn disabled_never_embeds() {
        assert_eq!(full_shadow_for(&config(false, 1_000_000), &json!({"a": 1})), None);
    }

    #[test]
    fn oversize_payload_is_not_embedded() {
        assert_eq!(full_shadow_for(&config(true, 4), &json!({"a": 1})), None);
    }

    #[test]
    fn undersize_payload_is_embedded() {
        let payload = json!({"a": 1});
        assert_eq!(full_shadow_for(&config(true, 1_000), &payload), Some(payload));
    }
}
