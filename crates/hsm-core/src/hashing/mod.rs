//! Hashing and JSON canonicalization.
//!
//! Deterministic replay depends on stable serialization: `to_canonical_json`
//! guarantees a stable key order for JSON objects, and `hash_str`/`hash_value`
//! turn that canonical form into stable identifiers for definition hashes and
//! context diffs.

pub mod canonical_json;
pub mod hash;

pub use canonical_json::to_canonical_json;
pub use hash::{hash_str, hash_value};
