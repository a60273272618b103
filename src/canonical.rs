//! Fingerprints of relation declarations.
//!
//! A fingerprint names the exact declaration a registry was built from, so
//! health checks, schema responses and logs can tell two deployments apart.
//! Hashed types keep their maps in `BTreeMap`s and their relation lists in
//! declaration order, which makes the JSON encoding order-stable.

use serde::Serialize;
use xxhash_rust::xxh64::xxh64;

/// Seed shared by every fingerprint; changing it invalidates all of them.
const FINGERPRINT_SEED: u64 = 0x7265_6c61_7469_6f6e;

/// Order-stable JSON bytes of a declaration.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(value)
}

/// 64-bit fingerprint of a declaration.
pub fn fingerprint<T: Serialize>(value: &T) -> Result<u64, serde_json::Error> {
    Ok(xxh64(&canonical_json(value)?, FINGERPRINT_SEED))
}

/// Fingerprint rendered as 16 hex digits.
pub fn fingerprint_hex<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    fingerprint(value).map(|hash| format!("{:016x}", hash))
}
