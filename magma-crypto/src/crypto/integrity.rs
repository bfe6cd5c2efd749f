//! Content fingerprints. These digests are identifiers for change detection and
//! lookups, kept apart from password hashing and field encryption so the two
//! are never confused.
//!
//! Digests cover exact bytes. [`digest_json`] does not canonicalise, so two
//! serialisations of the same object with different key order hash
//! differently; use [`digest_canonical_json`] when semantic equality matters.

use std::collections::BTreeMap;

use serde::de::IgnoredAny;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DigestError {
    #[error("input is not a valid JSON document: {0}")]
    InvalidInput(String),
}

/// Produces a raw SHA-256 digest of the provided bytes.
pub fn sha256_digest(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Lowercase hex SHA-256 of `data`.
pub fn digest_bytes(data: &[u8]) -> String {
    hex::encode(sha256_digest(data))
}

/// Lowercase hex SHA-256 of the UTF-8 bytes of `input`.
pub fn digest_string(input: &str) -> String {
    digest_bytes(input.as_bytes())
}

/// Hashes a serialized JSON document exactly as given, after checking it parses.
pub fn digest_json(raw: &[u8]) -> Result<String, DigestError> {
    serde_json::from_slice::<IgnoredAny>(raw)
        .map_err(|e| DigestError::InvalidInput(format!("{e}")))?;
    Ok(digest_bytes(raw))
}

/// Hashes a JSON document after rewriting it with sorted object keys and no
/// insignificant whitespace, so reordered but equal documents share a digest.
pub fn digest_canonical_json(raw: &[u8]) -> Result<String, DigestError> {
    let value: Value =
        serde_json::from_slice(raw).map_err(|e| DigestError::InvalidInput(format!("{e}")))?;
    Ok(digest_value(&value))
}

/// Canonical digest of an already-parsed value.
pub fn digest_value(value: &Value) -> String {
    // Display writes the compact form.
    digest_string(&sort_keys(value).to_string())
}

/// Rebuilds `value` with every object's entries inserted in key order, so the
/// output is sorted whether or not `Map` keeps insertion order.
fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> =
                map.iter().map(|(key, inner)| (key, sort_keys(inner))).collect();
            Value::Object(
                sorted
                    .into_iter()
                    .map(|(key, inner)| (key.clone(), inner))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}
