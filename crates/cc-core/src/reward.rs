//! Block reward schedule.
//!
//! Two regimes, switched by the `sawtooth.validator.update1` chain setting:
//! a flat 222 CTC per block before the update, and a geometrically decaying
//! amount afterwards. The decaying amount was historically computed through
//! an IEEE-754 double and fixed-notation text formatting; that exact
//! pipeline is reproduced here because every replica must derive the same
//! wei string from the same period, and the truncation points live in the
//! formatting.

use crate::BLOCKS_IN_PERIOD_UPDATE1;
use num_bigint::BigInt;
use num_traits::{ToPrimitive, Zero};
use std::sync::LazyLock;

/// Flat reward before the update1 formula change: 222 * 10^18.
pub const REWARD_AMOUNT_STRING: &str = "222000000000000000000";

static REWARD_AMOUNT: LazyLock<BigInt> =
    LazyLock::new(|| REWARD_AMOUNT_STRING.parse().unwrap_or_default());

/// Reward credited to the signer of `block_idx`.
///
/// New formula: period = block_idx / 2_500_000, then
/// 28 * wei(pow(19/20, period)) where wei() formats the double with fixed
/// 6-digit notation and splices the digits into an 18-digit zero-filled
/// fractional scale. A zero result means no wallet is credited.
pub fn block_reward(new_formula: bool, block_idx: &BigInt) -> BigInt {
    if !new_formula {
        return REWARD_AMOUNT.clone();
    }

    let period = (block_idx / BigInt::from(BLOCKS_IN_PERIOD_UPDATE1))
        .to_i32()
        .unwrap_or(i32::MAX);
    let fraction = (19.0f64 / 20.0).powi(period);
    let fraction_string = format!("{:.6}", fraction);
    let Some((int_part, frac_part)) = fraction_string.split_once('.') else {
        return BigInt::zero();
    };

    let fraction_in_wei = if !fraction_string.starts_with('0') {
        format!("{}{:0<18}", int_part, frac_part)
    } else {
        // Integer part is zero: drop "0." and any leading fractional zeros,
        // then left-justify into the remaining wei digits. `pos` indexes the
        // full "0.dddddd" string, matching the historical formatting.
        let digits = fraction_string.as_bytes();
        let mut pos = 2;
        while pos < digits.len() && digits[pos] == b'0' {
            pos += 1;
        }
        format!("{:0<width$}", &fraction_string[pos..], width = 20 - pos)
    };

    BigInt::from(28) * fraction_in_wei.parse::<BigInt>().unwrap_or_default()
}
