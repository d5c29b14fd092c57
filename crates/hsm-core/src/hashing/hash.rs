//! Hash helpers built on BLAKE3: the algorithm is encapsulated so it can
//! change without touching call sites.

use crate::hashing::to_canonical_json;
use blake3::Hasher;
use serde_json::Value;

/// Hashes a string and returns its hex digest.
pub fn hash_str(input: &str) -> String {
    let mut h = Hasher::new();
    h.update(input.as_bytes());
    h.finalize().to_hex().to_string()
}

/// Hashes a JSON value after canonicalizing it.
pub fn hash_value(v: &Value) -> String {
    hash_str(&to_canonical_json(v))
}
