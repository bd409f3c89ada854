//! Double-SHA256 digest primitive for proof-of-work checks.
//!
//! The rest of the crate treats this as an opaque hash function: fixed-size
//! digest, deterministic, input-order-sensitive. Header assembly and target
//! comparison live elsewhere; this module only hashes bytes.

use bitcoin::hashes::{sha256d, Hash};

/// Digest size in bytes.
pub const DIGEST_SIZE: usize = 32;

/// Hash `bytes` with double SHA-256.
///
/// Returns the digest in internal (little-endian) byte order, matching the
/// order used in block headers and merkle nodes.
pub fn digest(bytes: &[u8]) -> [u8; DIGEST_SIZE] {
    sha256d::Hash::hash(bytes).to_byte_array()
}
