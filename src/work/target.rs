//! Share target arithmetic.
//!
//! Two targets constrain a share: the block target encoded in the job's
//! compact `bits` field, and the pool's share target derived from the
//! session difficulty. The effective target is the smaller of the two, so
//! difficulty can only narrow the search below what the block target alone
//! would require.

use bitcoin::{CompactTarget, Target};
use lazy_static::lazy_static;
use primitive_types::U256;

lazy_static! {
    /// Target corresponding to difficulty 1 (the pool maximum).
    static ref DIFFICULTY_1: U256 = U256::from_big_endian(&Target::MAX.to_be_bytes());
}

/// Fixed-point bits used to carry fractional difficulties through the
/// 256-bit division. Pools send values like 0.5 or 2.5; scaling by 2^16
/// keeps the relative error below 2^-16.
const DIFF_SCALE_BITS: usize = 16;

/// Expand a compact `bits` field (1 exponent byte + 3 mantissa bytes) into
/// a full 256-bit target.
pub fn from_bits(bits: CompactTarget) -> U256 {
    U256::from_big_endian(&Target::from(bits).to_be_bytes())
}

/// Target for the given pool difficulty: difficulty-1 target divided by
/// the difficulty.
///
/// Returns `None` for zero, negative, or non-finite difficulties.
pub fn from_difficulty(difficulty: f64) -> Option<U256> {
    if !difficulty.is_finite() || difficulty <= 0.0 {
        return None;
    }

    let scaled = (difficulty * f64::from(1u32 << DIFF_SCALE_BITS)).round() as u128;
    let scaled = scaled.max(1);

    // Target::MAX has 32 leading zero bits, so the shift cannot overflow.
    Some((*DIFFICULTY_1 << DIFF_SCALE_BITS) / U256::from(scaled))
}

/// Effective target for a `(bits, difficulty)` pair: the minimum of the
/// block target and the difficulty target.
///
/// An unusable difficulty falls back to the block target alone.
pub fn effective(bits: CompactTarget, difficulty: f64) -> U256 {
    let block_target = from_bits(bits);
    match from_difficulty(difficulty) {
        Some(share_target) => block_target.min(share_target),
        None => block_target,
    }
}

/// Whether a digest beats the target.
///
/// The digest arrives in internal (little-endian) byte order from the hash
/// primitive; numerically it must be strictly below the target to win.
pub fn digest_below(digest: &[u8; 32], target: &U256) -> bool {
    U256::from_little_endian(digest) < *target
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_bits_difficulty_one() {
        // 0x1d00ffff is the genesis difficulty-1 target
        let target = from_bits(CompactTarget::from_consensus(0x1d00ffff));
        assert_eq!(target, *DIFFICULTY_1);
    }

    #[test]
    fn test_from_bits_golden_expansion() {
        // mantissa 0x0404cb shifted by exponent 0x1b
        let target = from_bits(CompactTarget::from_consensus(0x1b0404cb));
        assert_eq!(
            hex::encode(target.to_big_endian()),
            "00000000000404cb000000000000000000000000000000000000000000000000"
        );
    }

    #[test]
    fn test_from_difficulty_one_is_pool_maximum() {
        assert_eq!(from_difficulty(1.0).unwrap(), *DIFFICULTY_1);
    }

    #[test]
    fn test_from_difficulty_scales_inversely() {
        let d2 = from_difficulty(2.0).unwrap();
        assert_eq!(d2, *DIFFICULTY_1 / U256::from(2u64));

        // fractional difficulties are supported
        let half = from_difficulty(0.5).unwrap();
        assert_eq!(half, *DIFFICULTY_1 * U256::from(2u64));

        let d25 = from_difficulty(2.5).unwrap();
        assert!(d25 < d2);
        assert!(d25 > from_difficulty(3.0).unwrap());
    }

    #[test]
    fn test_from_difficulty_rejects_unusable_values() {
        assert_eq!(from_difficulty(0.0), None);
        assert_eq!(from_difficulty(-1.0), None);
        assert_eq!(from_difficulty(f64::NAN), None);
        assert_eq!(from_difficulty(f64::INFINITY), None);
    }

    #[test]
    fn test_effective_is_minimum_of_both() {
        let bits = CompactTarget::from_consensus(0x1d00ffff);

        // difficulty 4 is narrower than the block target
        let eff = effective(bits, 4.0);
        assert_eq!(eff, from_difficulty(4.0).unwrap());
        assert!(eff < from_bits(bits));

        // difficulty 0.5 is wider, so the block target governs
        let eff = effective(bits, 0.5);
        assert_eq!(eff, from_bits(bits));

        // an invalid difficulty leaves the block target alone
        assert_eq!(effective(bits, 0.0), from_bits(bits));
    }

    #[test]
    fn test_digest_below_is_strict() {
        let target = U256::from(0x1000u64);

        let mut digest = [0u8; 32];
        digest[0] = 0xff;
        digest[1] = 0x0f; // 0x0fff little-endian
        assert!(digest_below(&digest, &target));

        digest[1] = 0x10; // exactly 0x1000
        assert!(!digest_below(&digest, &target));

        digest[1] = 0x11;
        assert!(!digest_below(&digest, &target));
    }
}
