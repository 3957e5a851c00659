//! Deterministic user bucketing hash

use sha2::{Digest, Sha256};

const U32_RANGE: f64 = 4_294_967_296.0;

/// Map a user and flag to a stable value in `[0, 1)`
///
/// SHA-256 of `"{distinct_id}:{flag_key}"`, first four bytes read as a
/// big-endian `u32`, divided by 2^32. No seed, so every process agrees.
pub fn bucket_hash(distinct_id: &str, flag_key: &str) -> f64 {
    let mut hasher = Sha256::new();
    hasher.update(distinct_id.as_bytes());
    hasher.update(b":");
    hasher.update(flag_key.as_bytes());
    let digest = hasher.finalize();

    let prefix = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    f64::from(prefix) / U32_RANGE
}
