// SPDX-License-Identifier: MIT OR Apache-2.0
//! JSON merge and settings packing helpers.

use serde_json::{Map, Value};

/// Deep-merge `overlay` into `base`.
///
/// Objects merge key-by-key recursively; every other type (arrays included)
/// is replaced wholesale.  Inheritance resolution applies child settings over
/// the ancestor chain with exactly this function.
pub fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(slot) => deep_merge(slot, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base_slot, overlay) => {
            *base_slot = overlay.clone();
        }
    }
}

/// Split `data` into known keys kept at the top level and unknown keys moved
/// under `_custom`, merging into `target`.
pub(crate) fn pack_settings(target: &mut Value, data: Map<String, Value>, known_keys: &[&str]) {
    let mut custom = Map::new();
    let mut known = Map::new();
    for (key, value) in data {
        if known_keys.contains(&key.as_str()) {
            known.insert(key, value);
        } else {
            custom.insert(key, value);
        }
    }
    deep_merge(target, &Value::Object(known));
    if !custom.is_empty() {
        let slot = target
            .as_object_mut()
            .expect("settings are always an object")
            .entry("_custom")
            .or_insert_with(|| Value::Object(Map::new()));
        deep_merge(slot, &Value::Object(custom));
    }
}

/// Restore `_custom` keys to the top level for the read view.
pub(crate) fn unpack_settings(stored: &Value) -> Map<String, Value> {
    let mut out = stored.as_object().cloned().unwrap_or_default();
    if let Some(Value::Object(custom)) = out.remove("_custom") {
        for (key, value) in custom {
            out.insert(key, value);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn objects_merge_recursively() {
        let mut base = json!({"a": {"x": 1, "y": 2}, "keep": true});
        deep_merge(&mut base, &json!({"a": {"y": 3, "z": 4}, "new": "v"}));
        assert_eq!(
            base,
            json!({"a": {"x": 1, "y": 3, "z": 4}, "keep": true, "new": "v"})
        );
    }

    #[test]
    fn arrays_are_replaced_not_concatenated() {
        let mut base = json!({"tags": ["a", "b"]});
        deep_merge(&mut base, &json!({"tags": ["c"]}));
        assert_eq!(base, json!({"tags": ["c"]}));
    }

    #[test]
    fn scalar_overlay_replaces() {
        let mut base = json!({"v": 1});
        deep_merge(&mut base, &json!({"v": "now a string"}));
        assert_eq!(base["v"], json!("now a string"));
    }

    #[test]
    fn pack_routes_unknown_keys_to_custom() {
        let mut target = json!({});
        pack_settings(
            &mut target,
            json!({"team_preferences": {"standup": "9am"}, "exotic": 42})
                .as_object()
                .unwrap()
                .clone(),
            &["team_preferences"],
        );
        assert_eq!(target["team_preferences"]["standup"], json!("9am"));
        assert_eq!(target["_custom"]["exotic"], json!(42));
    }

    #[test]
    fn unpack_restores_custom_keys() {
        let stored = json!({"known": 1, "_custom": {"exotic": 42}});
        let view = unpack_settings(&stored);
        assert_eq!(view["known"], json!(1));
        assert_eq!(view["exotic"], json!(42));
        assert!(view.get("_custom").is_none());
    }

    #[test]
    fn pack_then_unpack_is_lossless() {
        let payload = json!({
            "team_preferences": {"standup": "9am"},
            "custom_a": {"deep": [1, 2, 3]},
            "custom_b": "scalar"
        });
        let mut stored = json!({});
        pack_settings(
            &mut stored,
            payload.as_object().unwrap().clone(),
            &["team_preferences"],
        );
        let view = unpack_settings(&stored);
        assert_eq!(Value::Object(view), payload);
    }
}
