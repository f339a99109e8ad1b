//! Canonical byte form of attestation records.
//!
//! Signatures and ledger hashes are computed over this exact byte string,
//! so the format is frozen per [`SCHEMA_VERSION`]: compact JSON, object keys
//! sorted lexicographically at every depth, excluded fields removed from the
//! top level only.

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Version of the persisted record schemas and their canonical form
pub const SCHEMA_VERSION: u32 = 1;

/// Field holding the embedded signature; never part of the signed bytes
pub const SIGNATURE_FIELD: &str = "signature";

/// Serialize `record` to its canonical bytes, dropping `excluded` top-level fields.
pub fn canonical_bytes<T: Serialize>(record: &T, excluded: &[&str]) -> Result<Vec<u8>> {
    let value = serde_json::to_value(record).context("Failed to encode record")?;

    let Value::Object(map) = value else {
        return Err(anyhow!("Only object records have a canonical form"));
    };

    let sorted: BTreeMap<String, Value> = map
        .into_iter()
        .filter(|(key, _)| !excluded.contains(&key.as_str()))
        .map(|(key, value)| (key, sort_keys(value)))
        .collect();

    serde_json::to_vec(&sorted).context("Failed to serialize canonical form")
}

// Key order must not depend on whether serde_json's preserve_order feature
// is enabled somewhere in the dependency graph.
fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .into_iter()
                .map(|(key, value)| (key, sort_keys(value)))
                .collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// Lowercase hex SHA-256 of `data`.
pub fn sha256_hex(data: impl AsRef<[u8]>) -> String {
    format!("{:x}", Sha256::digest(data.as_ref()))
}
