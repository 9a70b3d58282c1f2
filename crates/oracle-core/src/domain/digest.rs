//! Canonical JSON serialization and content hashing for evidence records.
//!
//! Object keys are sorted recursively (UTF-16 code unit order), integer-valued
//! floats collapse to integers and the output is compact. The evidence hash is
//! Keccak-256 over those bytes so the on-chain `bytes32` can be recomputed by
//! any Ethereum tooling from the persisted JSON.

use serde_json::{Map, Value};
use sha2::Sha256;
use sha3::{Digest, Keccak256};

use super::error::ValidationError;
use super::request::Bytes32;

fn sort_keys_utf16(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_by(|a, b| a.encode_utf16().cmp(b.encode_utf16()));

            let mut sorted = Map::new();
            for key in keys {
                if let Some(v) = map.get(key) {
                    sorted.insert(key.clone(), sort_keys_utf16(v));
                }
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys_utf16).collect()),
        other => other.clone(),
    }
}

fn normalize_value(value: &Value) -> Result<Value, ValidationError> {
    match value {
        Value::Object(map) => {
            let mut normalized = Map::new();
            for (k, v) in map {
                normalized.insert(k.clone(), normalize_value(v)?);
            }
            Ok(Value::Object(normalized))
        }
        Value::Array(items) => Ok(Value::Array(
            items
                .iter()
                .map(normalize_value)
                .collect::<Result<Vec<_>, _>>()?,
        )),
        Value::Number(n) if !(n.is_i64() || n.is_u64()) => match n.as_f64() {
            Some(f) if !f.is_finite() => Err(ValidationError::NonFiniteNumber(n.to_string())),
            Some(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => Ok(Value::from(f as i64)),
            _ => Ok(Value::Number(n.clone())),
        },
        other => Ok(other.clone()),
    }
}

/// Canonical compact JSON for `value`.
pub fn canonical_json(value: &Value) -> Result<String, ValidationError> {
    let normalized = normalize_value(value)?;
    let sorted = sort_keys_utf16(&normalized);
    // Serializing a `Value` cannot fail.
    Ok(sorted.to_string())
}

/// Keccak-256 of the canonical serialization of `value`.
pub fn keccak_digest(value: &Value) -> Result<Bytes32, ValidationError> {
    let canonical = canonical_json(value)?;
    Ok(keccak256(canonical.as_bytes()))
}

pub fn keccak256(data: &[u8]) -> Bytes32 {
    let hash = Keccak256::digest(data);
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&hash);
    Bytes32::new(bytes)
}

/// SHA-256 hex digest, used to fingerprint generated scripts.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
