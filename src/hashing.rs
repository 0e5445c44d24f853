//! Hashing System - SHA-256 for artifacts and derived ids
//!
//! Provides deterministic, reproducible hashes over canonical JSON.

use sha2::{Sha256, Digest};
use serde::Serialize;
use serde_json::{Value, to_string};

use crate::card::CardRecord;

/// Compute SHA-256 hash of bytes, return hex string
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Convert to canonical JSON (sorted keys, no whitespace)
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let v: Value = serde_json::to_value(value)?;
    to_string(&sort_value(&v))
}

fn sort_value(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut sorted: Vec<_> = map.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                sorted
                    .into_iter()
                    .map(|(k, v)| (k.clone(), sort_value(v)))
                    .collect(),
            )
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_value).collect()),
        _ => v.clone(),
    }
}

/// Hash of a sidecar (or any serializable record) over its canonical JSON.
pub fn compute_record_hash<T: Serialize>(record: &T) -> Result<String, serde_json::Error> {
    let canonical = canonical_json(record)?;
    Ok(sha256_hex(canonical.as_bytes()))
}

/// Stable id for a record that has none: `card-` plus 16 hex digits of the
/// hash of its wire form without id and timestamps.
pub fn derive_card_id(record: &CardRecord) -> Result<String, serde_json::Error> {
    let mut wire = record.to_wire();
    wire.id = None;
    wire.created_at = None;
    wire.updated_at = None;
    let hash = compute_record_hash(&wire)?;
    Ok(format!("card-{}", &hash[..16]))
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{:02x}", b)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::{CardVariant, Spell};
    use serde_json::json;

    #[test]
    fn test_canonical_json_sorted() {
        let obj = json!({"z": 1, "a": {"y": 2, "b": 3}});
        let canonical = canonical_json(&obj).unwrap();
        assert_eq!(canonical, r#"{"a":{"b":3,"y":2},"z":1}"#);
    }

    #[test]
    fn test_sha256_known_value() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_derived_id_ignores_timestamps() {
        let rec = CardRecord::new("Fireball", -1, "Deal X damage.", CardVariant::Spell(Spell { target_type: None }));
        let mut later = rec.clone();
        later.updated_at = Some(chrono::Utc::now());
        let a = derive_card_id(&rec).unwrap();
        assert_eq!(a, derive_card_id(&later).unwrap());
        assert!(a.starts_with("card-"));
        assert_eq!(a.len(), 21);

        let mut renamed = rec.clone();
        renamed.name = "Firebolt".into();
        assert_ne!(a, derive_card_id(&renamed).unwrap());
    }
}
