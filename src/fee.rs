//! Block-based parking fee.
//!
//! Occupancy is billed in whole blocks (default 10 minutes); any started block
//! is billed in full and an active occupancy always costs at least one block.

use anyhow::{Result, bail};
use ordered_float::NotNan;

pub const DEFAULT_BLOCK_SECONDS: u64 = 600;
pub const DEFAULT_PRICE_PER_BLOCK: f64 = 15_000.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeePolicy {
    block_seconds: u64,
    price_per_block: NotNan<f64>,
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self {
            block_seconds: DEFAULT_BLOCK_SECONDS,
            price_per_block: NotNan::new(DEFAULT_PRICE_PER_BLOCK).unwrap_or_default(),
        }
    }
}

impl FeePolicy {
    /// # Errors
    ///
    /// Returns an error if the block is zero seconds long or the price is not a
    /// finite, non-negative number.
    pub fn new(block_seconds: u64, price_per_block: f64) -> Result<Self> {
        if block_seconds == 0 {
            bail!("block length must be at least one second");
        }
        let Ok(price) = NotNan::new(price_per_block) else {
            bail!("price per block must be a number");
        };
        if !price.is_finite() || *price < 0.0 {
            bail!("price per block must be finite and non-negative, got {price_per_block}");
        }
        Ok(Self {
            block_seconds,
            price_per_block: price,
        })
    }

    pub fn block_seconds(&self) -> u64 {
        self.block_seconds
    }

    pub fn price_per_block(&self) -> f64 {
        self.price_per_block.into_inner()
    }
}

/// Duration and cost of an occupancy at a point in time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Fee {
    pub duration_minutes: Option<f64>,
    pub blocks: Option<u64>,
    pub total_cost: f64,
}

impl Fee {
    pub const NONE: Fee = Fee {
        duration_minutes: None,
        blocks: None,
        total_cost: 0.0,
    };
}

/// Fee for an occupancy that started at `entry` (seconds), evaluated at `now` (seconds).
///
/// A `now` earlier than `entry` is treated as zero elapsed time.
#[allow(clippy::cast_precision_loss)]
pub fn compute(entry: Option<i64>, now: i64, policy: &FeePolicy) -> Fee {
    let Some(entry) = entry else {
        return Fee::NONE;
    };
    let elapsed = u64::try_from(now.saturating_sub(entry)).unwrap_or(0);
    let blocks = elapsed.div_ceil(policy.block_seconds).max(1);
    Fee {
        duration_minutes: Some(elapsed as f64 / 60.0),
        blocks: Some(blocks),
        total_cost: blocks as f64 * policy.price_per_block(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocks_at(elapsed: i64) -> u64 {
        compute(Some(1_000), 1_000 + elapsed, &FeePolicy::default()).blocks.unwrap()
    }

    #[test]
    fn block_boundaries() {
        assert_eq!(blocks_at(0), 1);
        assert_eq!(blocks_at(1), 1);
        assert_eq!(blocks_at(600), 1);
        assert_eq!(blocks_at(601), 2);
        assert_eq!(blocks_at(1200), 2);
        assert_eq!(blocks_at(1201), 3);
    }

    #[test]
    fn not_occupied_costs_nothing() {
        assert_eq!(compute(None, 5_000, &FeePolicy::default()), Fee::NONE);
    }

    #[test]
    fn cost_scales_with_blocks() {
        let policy = FeePolicy::new(600, 2.5).unwrap();
        let fee = compute(Some(0), 1_800, &policy);
        assert_eq!(fee.blocks, Some(3));
        assert_eq!(fee.total_cost, 7.5);
        assert_eq!(fee.duration_minutes, Some(30.0));
    }

    #[test]
    fn clock_skew_clamps_to_one_block() {
        let fee = compute(Some(2_000), 1_000, &FeePolicy::default());
        assert_eq!(fee.duration_minutes, Some(0.0));
        assert_eq!(fee.blocks, Some(1));
    }

    #[test]
    fn rejects_bad_policies() {
        assert!(FeePolicy::new(0, 1.0).is_err());
        assert!(FeePolicy::new(600, f64::NAN).is_err());
        assert!(FeePolicy::new(600, f64::INFINITY).is_err());
        assert!(FeePolicy::new(600, -1.0).is_err());
    }
}
