use serde_json::Value;
use sha2::{Digest, Sha256};

/// Deterministic cache key over (provider, mode, config). `serde_json::Map`
/// is a `BTreeMap` by default (the `preserve_order` feature is off in this
/// workspace), so `to_string` already serializes object keys in sorted
/// order — permuting a config's field order yields the same digest.
pub fn cache_key(provider: &str, mode: &str, config: &Value) -> String {
    let canonical = serde_json::json!({
        "provider": provider,
        "mode": mode,
        "config": config,
    });
    let serialized = canonical.to_string();
    let mut hasher = Sha256::new();
    hasher.update(serialized.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_stable_across_field_permutations() {
        let a = serde_json::json!({ "x": 1, "y": 2 });
        let b = serde_json::json!({ "y": 2, "x": 1 });
        assert_eq!(cache_key("openai", "tools", &a), cache_key("openai", "tools", &b));
    }

    #[test]
    fn key_differs_on_provider_or_mode() {
        let config = serde_json::json!({ "temperature": 0.7 });
        let k1 = cache_key("openai", "tools", &config);
        let k2 = cache_key("anthropic", "tools", &config);
        let k3 = cache_key("openai", "rag", &config);
        assert_ne!(k1, k2);
        assert_ne!(k1, k3);
    }
}
