// crates/cmo-core/src/core/hashing.rs
// ============================================================================
// Module: Canonical Hashing
// Description: RFC 8785 canonical JSON encoding and SHA-256 digests.
// Purpose: Provide the single canonicalization used for state/input/output
//          hashing, activity request hashing, and envelope signing.
// Dependencies: serde, serde_json, serde_jcs, sha2
// ============================================================================

//! ## Overview
//! All hashes compared across a run — `stateHashBefore`/`stateHashAfter`,
//! `inputHash`/`outputHash`, activity `requestHash` — must agree byte-for-byte
//! on their JSON encoding. This module is the only place that encoding
//! happens: callers serialize through [`hash_canonical_json`] rather than
//! hand-rolling `serde_json::to_string` plus key sorting.
//!
//! Security posture: inputs may originate from untrusted nodes or activity
//! responses; canonicalization must fail closed on non-finite floats rather
//! than silently coercing them.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

// ============================================================================
// SECTION: Hash Algorithm
// ============================================================================

/// Supported digest algorithms.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    /// SHA-256.
    Sha256,
}

/// Default algorithm used across the engine unless a record says otherwise.
pub const DEFAULT_HASH_ALGORITHM: HashAlgorithm = HashAlgorithm::Sha256;

// ============================================================================
// SECTION: Hash Digest
// ============================================================================

/// A lowercase-hex digest tagged with the algorithm that produced it.
///
/// # Invariants
/// - `value` is lowercase hexadecimal with no separators.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HashDigest {
    /// Algorithm that produced this digest.
    pub algorithm: HashAlgorithm,
    /// Lowercase hex-encoded digest bytes.
    pub value: String,
}

impl HashDigest {
    /// Builds a digest from already-computed digest bytes.
    #[must_use]
    pub fn new(algorithm: HashAlgorithm, bytes: &[u8]) -> Self {
        Self {
            algorithm,
            value: hex_lower(bytes),
        }
    }
}

impl std::fmt::Display for HashDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.value.fmt(f)
    }
}

/// Encodes bytes as a lowercase hex string.
fn hex_lower(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

// ============================================================================
// SECTION: Hash Errors
// ============================================================================

/// Errors returned while canonicalizing or hashing a value.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum HashError {
    /// Canonical encoding failed (non-serializable or non-finite value).
    #[error("canonical json encoding failed: {0}")]
    Canonicalization(String),
    /// The canonical encoding exceeded a caller-supplied size limit.
    #[error("canonical json exceeds size limit ({actual} > {limit} bytes)")]
    SizeLimitExceeded {
        /// Maximum allowed bytes.
        limit: usize,
        /// Actual encoded size in bytes.
        actual: usize,
    },
}

// ============================================================================
// SECTION: Canonical Encoding
// ============================================================================

/// Encodes a value as RFC 8785 canonical JSON bytes.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when the value cannot be
/// serialized, including when it contains `NaN` or infinite floats.
pub fn canonical_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, HashError> {
    serde_jcs::to_string(value)
        .map(String::into_bytes)
        .map_err(|err| HashError::Canonicalization(err.to_string()))
}

/// Encodes a value as RFC 8785 canonical JSON bytes, enforcing a size limit.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] on encoding failure, or
/// [`HashError::SizeLimitExceeded`] when the encoded size exceeds `limit`.
pub fn canonical_json_bytes_with_limit<T: Serialize>(
    value: &T,
    limit: usize,
) -> Result<Vec<u8>, HashError> {
    let bytes = canonical_json_bytes(value)?;
    if bytes.len() > limit {
        return Err(HashError::SizeLimitExceeded {
            limit,
            actual: bytes.len(),
        });
    }
    Ok(bytes)
}

// ============================================================================
// SECTION: Hashing
// ============================================================================

/// Hashes raw bytes with the given algorithm.
#[must_use]
pub fn hash_bytes(algorithm: HashAlgorithm, bytes: &[u8]) -> HashDigest {
    match algorithm {
        HashAlgorithm::Sha256 => {
            let digest = Sha256::digest(bytes);
            HashDigest::new(algorithm, digest.as_slice())
        }
    }
}

/// Canonicalizes and hashes a value.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when the value cannot be
/// canonicalized.
pub fn hash_canonical_json<T: Serialize>(
    algorithm: HashAlgorithm,
    value: &T,
) -> Result<HashDigest, HashError> {
    let bytes = canonical_json_bytes(value)?;
    Ok(hash_bytes(algorithm, &bytes))
}

/// Canonicalizes and hashes a value, enforcing a size limit on the
/// canonical encoding before hashing.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] or [`HashError::SizeLimitExceeded`].
pub fn hash_canonical_json_with_limit<T: Serialize>(
    algorithm: HashAlgorithm,
    value: &T,
    limit: usize,
) -> Result<HashDigest, HashError> {
    let bytes = canonical_json_bytes_with_limit(value, limit)?;
    Ok(hash_bytes(algorithm, &bytes))
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    reason = "test-only assertions"
)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::Map;
    use serde_json::Value;
    use serde_json::json;

    use super::DEFAULT_HASH_ALGORITHM;
    use super::HashAlgorithm;
    use super::HashError;
    use super::canonical_json_bytes;
    use super::hash_bytes;
    use super::hash_canonical_json;
    use super::hash_canonical_json_with_limit;

    #[test]
    fn canonical_hash_is_order_independent_for_maps() {
        let mut map_a = Map::new();
        map_a.insert("b".to_string(), json!(2));
        map_a.insert("a".to_string(), json!(1));

        let mut map_b = Map::new();
        map_b.insert("a".to_string(), json!(1));
        map_b.insert("b".to_string(), json!(2));

        let hash_a = hash_canonical_json(HashAlgorithm::Sha256, &Value::Object(map_a)).unwrap();
        let hash_b = hash_canonical_json(HashAlgorithm::Sha256, &Value::Object(map_b)).unwrap();
        assert_eq!(hash_a, hash_b);
    }

    #[test]
    fn canonical_hash_normalizes_numeric_representation() {
        let hash_a = hash_canonical_json(HashAlgorithm::Sha256, &json!(1.0)).unwrap();
        let hash_b = hash_canonical_json(HashAlgorithm::Sha256, &json!(1)).unwrap();
        assert_eq!(hash_a, hash_b);
    }

    #[test]
    fn canonical_hash_rejects_nan() {
        let err = hash_canonical_json(DEFAULT_HASH_ALGORITHM, &f64::NAN).unwrap_err();
        assert!(matches!(err, HashError::Canonicalization(_)));
    }

    #[test]
    fn canonical_hash_rejects_infinity() {
        let err = hash_canonical_json(DEFAULT_HASH_ALGORITHM, &f64::INFINITY).unwrap_err();
        assert!(matches!(err, HashError::Canonicalization(_)));
    }

    #[test]
    fn canonical_hash_respects_size_limit() {
        let payload = BTreeMap::from([("data", "x".repeat(64))]);
        let err = hash_canonical_json_with_limit(HashAlgorithm::Sha256, &payload, 16).unwrap_err();
        assert!(matches!(err, HashError::SizeLimitExceeded { .. }));
    }

    #[test]
    fn size_limit_exact_boundary_passes() {
        let payload = BTreeMap::from([("d", "x".to_string())]);
        let bytes = canonical_json_bytes(&payload).unwrap();
        let exact_limit = bytes.len();
        let result = hash_canonical_json_with_limit(HashAlgorithm::Sha256, &payload, exact_limit);
        assert!(result.is_ok());
    }

    #[test]
    fn size_limit_one_byte_under_fails() {
        let payload = BTreeMap::from([("d", "x".to_string())]);
        let bytes = canonical_json_bytes(&payload).unwrap();
        let limit = bytes.len() - 1;
        let result = hash_canonical_json_with_limit(HashAlgorithm::Sha256, &payload, limit);
        assert!(matches!(result, Err(HashError::SizeLimitExceeded { .. })));
    }

    #[test]
    fn hash_consistency_across_calls() {
        let value = json!({"a": 1, "b": [1, 2, 3], "c": {"nested": true}});
        let hash1 = hash_canonical_json(HashAlgorithm::Sha256, &value).unwrap();
        let hash2 = hash_canonical_json(HashAlgorithm::Sha256, &value).unwrap();
        assert_eq!(hash1, hash2);
    }

    #[test]
    fn hash_digest_produces_lowercase_hex() {
        let bytes = [0xAB, 0xCD, 0xEF, 0x12];
        let digest = super::HashDigest::new(HashAlgorithm::Sha256, &bytes);
        assert_eq!(digest.value, "abcdef12");
        assert!(!digest.value.chars().any(|c| c.is_uppercase()));
    }

    #[test]
    fn golden_hash_empty_object() {
        let digest = hash_canonical_json(HashAlgorithm::Sha256, &json!({})).unwrap();
        assert_eq!(
            digest.value,
            "44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a"
        );
    }

    #[test]
    fn golden_hash_bytes_direct() {
        let digest = hash_bytes(HashAlgorithm::Sha256, b"test");
        assert_eq!(
            digest.value,
            "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08"
        );
    }
}
