//! Secret scrubbing: the single construct permitted to mutate parameter
//! trees.

use serde_json::Value;

/// Exactly one key name is redacted: `kubeconfig`. Anywhere it occurs in the
/// tree, case-sensitively, its value is replaced with the literal
/// `"anonymized"`.
const SECRET_KEY: &str = "kubeconfig";
const REDACTION: &str = "anonymized";

/// Recursively walks `value`, replacing every value keyed `kubeconfig` at
/// any depth with the redaction marker. Mutates in place.
pub fn scrub_secrets(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                if key == SECRET_KEY {
                    *child = Value::String(REDACTION.to_string());
                } else {
                    scrub_secrets(child);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                scrub_secrets(item);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scrubs_nested_occurrences_at_every_depth() {
        let mut value = json!({
            "kubeconfig": "top-level-secret",
            "level1": {
                "kubeconfig": "nested-secret",
                "level2": {
                    "kubeconfig": "deep-secret",
                    "other": "kept"
                }
            },
            "list": [
                { "kubeconfig": "in-list-secret" },
                { "other": "also-kept" }
            ]
        });
        scrub_secrets(&mut value);
        assert_eq!(value["kubeconfig"], "anonymized");
        assert_eq!(value["level1"]["kubeconfig"], "anonymized");
        assert_eq!(value["level1"]["level2"]["kubeconfig"], "anonymized");
        assert_eq!(value["level1"]["level2"]["other"], "kept");
        assert_eq!(value["list"][0]["kubeconfig"], "anonymized");
        assert_eq!(value["list"][1]["other"], "also-kept");
    }

    #[test]
    fn leaves_other_keys_untouched() {
        let mut value = json!({"username": "alice", "password": "hunter2"});
        scrub_secrets(&mut value);
        assert_eq!(value["username"], "alice");
        assert_eq!(value["password"], "hunter2");
    }

    #[test]
    fn is_case_sensitive() {
        let mut value = json!({"KubeConfig": "not-touched"});
        scrub_secrets(&mut value);
        assert_eq!(value["KubeConfig"], "not-touched");
    }
}
