use log::info;
use num_bigint::BigUint;
use num_traits::{One, Zero};

use crate::config::chain::ChainConfig;
use crate::consensus::target::{compact_to_target, target_to_compact};
use crate::core::block::Block;

/// Lower clamp of the adjustment factor, as a fraction of the expected time
const MIN_ADJUSTMENT_DIVISOR: u64 = 4;

/// Upper clamp of the adjustment factor
const MAX_ADJUSTMENT_FACTOR: u64 = 4;

/// Whether a chain of `height` recomputes its target for the next block
pub fn is_retarget_height(config: &ChainConfig, height: u32) -> bool {
    let interval = config.difficulty_adjustment_blocks.max(1);
    height % interval == 0
}

/// Scale `current` by `actual_time / expected_time`.
///
/// The factor is clamped to `[0.25, 4]` and the result to `[1, max_target]`.
/// All arithmetic is exact: the clamped time is kept in quarter seconds so no
/// precision is lost at the lower bound.
pub fn retarget(current: &BigUint, actual_time: u64, expected_time: u64, max_target: &BigUint) -> BigUint {
    let expected_quarters = expected_time.max(1) * MIN_ADJUSTMENT_DIVISOR;
    let actual_quarters = (actual_time * MIN_ADJUSTMENT_DIVISOR).clamp(
        expected_quarters / MIN_ADJUSTMENT_DIVISOR,
        expected_quarters * MAX_ADJUSTMENT_FACTOR,
    );

    let next = current * BigUint::from(actual_quarters) / BigUint::from(expected_quarters);
    if next > *max_target {
        max_target.clone()
    } else if next.is_zero() {
        BigUint::one()
    } else {
        next
    }
}

/// Adjustment factor as applied by `retarget`, for logging
pub fn adjustment_factor(actual_time: u64, expected_time: u64) -> f64 {
    let factor = actual_time as f64 / expected_time.max(1) as f64;
    factor.clamp(1.0 / MIN_ADJUSTMENT_DIVISOR as f64, MAX_ADJUSTMENT_FACTOR as f64)
}

/// Compact target for the block after `head`, given the block that opens the
/// adjustment window.
pub fn next_compact_target(config: &ChainConfig, head: &Block, window_start: &Block) -> u32 {
    let actual_time = head.timestamp().saturating_sub(window_start.timestamp()) as u64;
    let expected_time = config.difficulty_adjustment_blocks as u64 * config.block_time as u64;

    let current = compact_to_target(head.n_bits());
    let max_target = compact_to_target(config.max_target_compact);
    let next = retarget(&current, actual_time, expected_time, &max_target);
    let compact = target_to_compact(&next);

    info!(
        "Difficulty adjustment at height {}: {:#010x} -> {:#010x} (factor: {:.2})",
        head.height(),
        head.n_bits(),
        compact,
        adjustment_factor(actual_time, expected_time)
    );

    compact
}

#[cfg(test)]
mod tests {
    use super::*;

    fn max_target() -> BigUint {
        compact_to_target(0x1f00ffff)
    }

    #[test]
    fn test_retarget_on_schedule() {
        let current = compact_to_target(0x1e00ffff);
        assert_eq!(retarget(&current, 600, 600, &max_target()), current);
    }

    #[test]
    fn test_retarget_clamps_slow_window() {
        let current = compact_to_target(0x1d00ffff);
        let expected = &current * 4u32;
        assert_eq!(retarget(&current, 2400, 600, &max_target()), expected);
        // Slower than 4x is still clamped to 4x
        assert_eq!(retarget(&current, 100_000, 600, &max_target()), expected);
    }

    #[test]
    fn test_retarget_clamps_fast_window() {
        let current = compact_to_target(0x1d00ffff);
        let expected = &current / 4u32;
        assert_eq!(retarget(&current, 0, 600, &max_target()), expected);
        assert_eq!(retarget(&current, 150, 600, &max_target()), expected);
        assert_eq!(retarget(&current, 300, 600, &max_target()), &current / 2u32);
    }

    #[test]
    fn test_retarget_bounds() {
        let max = max_target();
        assert_eq!(retarget(&max, 2400, 600, &max), max);
        assert_eq!(retarget(&BigUint::one(), 0, 600, &max), BigUint::one());
    }

    #[test]
    fn test_adjustment_factor() {
        assert_eq!(adjustment_factor(600, 600), 1.0);
        assert_eq!(adjustment_factor(0, 600), 0.25);
        assert_eq!(adjustment_factor(6000, 600), 4.0);
    }

    #[test]
    fn test_retarget_height() {
        let config = ChainConfig::default().with_difficulty_adjustment_blocks(10);
        assert!(is_retarget_height(&config, 10));
        assert!(is_retarget_height(&config, 20));
        assert!(!is_retarget_height(&config, 11));
        assert!(!is_retarget_height(&config, 1));
    }
}
