//! Compact target encoding and proof-of-work checks
//!
//! A compact target packs a 256-bit threshold as `size << 24 | mantissa`, where
//! `size` is the byte length of the big-endian target and `mantissa` holds its
//! three most significant bytes.

use num_bigint::BigUint;
use num_traits::{One, ToPrimitive, Zero};

use crate::crypto::hash::Hash;

/// Expand a compact target into the full threshold
pub fn compact_to_target(compact: u32) -> BigUint {
    let size = compact >> 24;
    let mantissa = BigUint::from(compact & 0x00ff_ffff);

    if size >= 3 {
        mantissa << (8 * (size - 3) as usize)
    } else {
        mantissa >> (8 * (3 - size) as usize)
    }
}

/// Pack a threshold into compact form, truncating to three significant bytes
pub fn target_to_compact(target: &BigUint) -> u32 {
    let mut bytes = target.to_bytes_be();

    // Keep the mantissa positive in the bitcoin sense
    if bytes[0] > 0x7f {
        bytes.insert(0, 0);
    }

    let size = bytes.len() as u32;
    let mut compact = size << 24;
    for (i, byte) in bytes.iter().take(3).enumerate() {
        compact |= (*byte as u32) << ((2 - i) * 8);
    }
    compact
}

/// Lossy conversion used for work accounting
pub fn target_to_f64(target: &BigUint) -> f64 {
    target.to_f64().unwrap_or(f64::INFINITY)
}

/// Difficulty of `target` relative to the easiest allowed target
pub fn target_to_difficulty(target: &BigUint, max_target: &BigUint) -> f64 {
    if target.is_zero() {
        return f64::INFINITY;
    }
    target_to_f64(max_target) / target_to_f64(target)
}

/// Difficulty of a compact target relative to the easiest allowed target
pub fn compact_to_difficulty(compact: u32, max_target: &BigUint) -> f64 {
    target_to_difficulty(&compact_to_target(compact), max_target)
}

/// Whether `target` lies in `[1, max_target]`
pub fn is_valid_target(target: &BigUint, max_target: &BigUint) -> bool {
    *target >= BigUint::one() && target <= max_target
}

/// Whether a proof-of-work hash, read as a big-endian integer, meets `target`
pub fn is_proof_of_work(hash: &Hash, target: &BigUint) -> bool {
    BigUint::from_bytes_be(hash.as_bytes()) <= *target
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compact_to_target() {
        let target = compact_to_target(0x1f00ffff);
        // 0xffff followed by 28 zero bytes
        assert_eq!(target, BigUint::from(0xffffu32) << (8 * 28));

        assert_eq!(compact_to_target(0x03123456), BigUint::from(0x123456u32));
        assert_eq!(compact_to_target(0x02123456), BigUint::from(0x1234u32));
        assert_eq!(compact_to_target(0x01123456), BigUint::from(0x12u32));
    }

    #[test]
    fn test_target_to_compact_roundtrip() {
        for compact in [0x1f00ffffu32, 0x1d00ffff, 0x207fffff, 0x1c0a1b2c, 0x03123456] {
            assert_eq!(target_to_compact(&compact_to_target(compact)), compact);
        }
    }

    #[test]
    fn test_target_to_compact_sign_byte() {
        // A leading byte above 0x7f gets a zero byte prepended
        assert_eq!(target_to_compact(&BigUint::from(0x80u32)), 0x02008000);
        assert_eq!(target_to_compact(&BigUint::from(0x7fu32)), 0x017f0000);
        assert_eq!(target_to_compact(&BigUint::one()), 0x01010000);
    }

    #[test]
    fn test_difficulty() {
        let max_target = compact_to_target(0x1f00ffff);
        assert_eq!(compact_to_difficulty(0x1f00ffff, &max_target), 1.0);

        let harder = &max_target >> 4usize;
        assert_eq!(target_to_difficulty(&harder, &max_target), 16.0);
    }

    #[test]
    fn test_is_valid_target() {
        let max_target = compact_to_target(0x1f00ffff);
        assert!(is_valid_target(&max_target, &max_target));
        assert!(is_valid_target(&BigUint::one(), &max_target));
        assert!(!is_valid_target(&BigUint::zero(), &max_target));
        assert!(!is_valid_target(&(&max_target + 1u32), &max_target));
    }

    #[test]
    fn test_is_proof_of_work() {
        let target = compact_to_target(0x1f00ffff);

        let mut bytes = [0u8; 32];
        bytes[2] = 0xff;
        assert!(is_proof_of_work(&Hash::new(bytes), &target));

        bytes[1] = 0x01;
        assert!(!is_proof_of_work(&Hash::new(bytes), &target));

        assert!(is_proof_of_work(&Hash::zero(), &target));
    }
}
