//! Configuration merge logic
//!
//! Layers are merged with:
//! - Objects: deep-merge by key
//! - Arrays: REPLACE (last wins)
//! - Scalars: override (last wins)

use serde_json::Value;

/// Deep merge two JSON values.
///
/// Merge semantics:
/// - Objects: deep-merge by key (recursive)
/// - Arrays: REPLACE (second wins entirely)
/// - Scalars: override (second wins)
/// - Null: override (null can override any value)
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => overlay_value,
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        // Arrays are replaced whole, like scalars
        (_, overlay) => overlay,
    }
}

/// Merge multiple config layers in order (first is base, last has highest precedence)
pub fn merge_layers(layers: Vec<Value>) -> Value {
    layers.into_iter().fold(Value::Null, deep_merge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalar_override() {
        let base = json!({"ms_per_loop": 100});
        let overlay = json!({"ms_per_loop": 200});
        let result = deep_merge(base, overlay);
        assert_eq!(result["ms_per_loop"], 200);
    }

    #[test]
    fn test_object_deep_merge() {
        let base = json!({
            "callback": {
                "loops": 10,
                "ms_per_loop": 500
            }
        });
        let overlay = json!({
            "callback": {
                "loops": 40
            }
        });
        let result = deep_merge(base, overlay);

        assert_eq!(result["callback"]["loops"], 40);
        assert_eq!(result["callback"]["ms_per_loop"], 500);
    }

    #[test]
    fn test_array_replace() {
        let base = json!({
            "transport": {"args": ["-p", "22", "server"]}
        });
        let overlay = json!({
            "transport": {"args": ["server-b"]}
        });
        let result = deep_merge(base, overlay);

        let args = result["transport"]["args"].as_array().unwrap();
        assert_eq!(args.len(), 1);
        assert_eq!(args[0], "server-b");
    }

    #[test]
    fn test_add_new_key() {
        let base = json!({"a": 1});
        let overlay = json!({"b": 2});
        let result = deep_merge(base, overlay);

        assert_eq!(result["a"], 1);
        assert_eq!(result["b"], 2);
    }

    #[test]
    fn test_null_override() {
        let base = json!({"group": 3});
        let overlay = json!({"group": null});
        let result = deep_merge(base, overlay);

        assert!(result["group"].is_null());
    }

    #[test]
    fn test_merge_layers() {
        let builtin = json!({
            "callback": {"loops": 10},
            "logging": {"level": "info"}
        });
        let host = json!({
            "callback": {"loops": 20}
        });
        let repo = json!({
            "logging": {"level": "debug"}
        });
        let cli = json!({
            "callback": {"loops": 5}
        });

        let result = merge_layers(vec![builtin, host, repo, cli]);

        assert_eq!(result["callback"]["loops"], 5);
        assert_eq!(result["logging"]["level"], "debug");
    }

    #[test]
    fn test_nested_deep_merge() {
        let base = json!({
            "level1": {
                "level2": {
                    "a": 1,
                    "b": 2
                }
            }
        });
        let overlay = json!({
            "level1": {
                "level2": {
                    "b": 3,
                    "c": 4
                }
            }
        });
        let result = deep_merge(base, overlay);

        assert_eq!(result["level1"]["level2"]["a"], 1);
        assert_eq!(result["level1"]["level2"]["b"], 3);
        assert_eq!(result["level1"]["level2"]["c"], 4);
    }
}
