use serde::Serialize;
use sha2::{Digest, Sha256};

/// Truncated SHA-256 hex digest used for every content hash in the core
/// (spec §4.7, §9: "SHA-256 truncated to 16 hex for short hashes"). Hashes
/// canonical JSON with `sha2` so the digest format matches the documented
/// contract exactly (see DESIGN.md for the `blake3`-vs-`sha2` tradeoff).
pub fn short_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let hex = digest.iter().map(|b| format!("{b:02x}")).collect::<String>();
    hex[..16].to_string()
}

/// Serializes `value` as canonical JSON: `serde_json::Value::Object` is
/// backed by a `BTreeMap` (the `preserve_order` feature is not enabled in
/// this crate), so object keys always come out sorted and the encoding is
/// stable across process runs and platforms.
pub fn canonical_json<T: Serialize>(value: &T) -> serde_json::Result<String> {
    let as_value = serde_json::to_value(value)?;
    serde_json::to_string(&as_value)
}

pub fn hash_value<T: Serialize>(value: &T) -> serde_json::Result<String> {
    Ok(short_hash(canonical_json(value)?.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Sample {
        b: i32,
        a: i32,
    }

    #[test]
    fn canonical_json_sorts_keys() {
        let json = canonical_json(&Sample { b: 2, a: 1 }).unwrap();
        assert_eq!(json, r#"{"a":1,"b":2}"#);
    }

    #[test]
    fn hash_is_sixteen_hex_chars_and_deterministic() {
        let h1 = hash_value(&Sample { b: 2, a: 1 }).unwrap();
        let h2 = hash_value(&Sample { a: 1, b: 2 }).unwrap();
        assert_eq!(h1.len(), 16);
        assert_eq!(h1, h2);
    }

    #[test]
    fn different_content_yields_different_hash() {
        let h1 = hash_value(&Sample { b: 2, a: 1 }).unwrap();
        let h2 = hash_value(&Sample { b: 3, a: 1 }).unwrap();
        assert_ne!(h1, h2);
    }
}
