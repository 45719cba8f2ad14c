//! Compound interest.

use crate::INTEREST_MULTIPLIER;
use num_bigint::BigInt;
use num_traits::{One, Zero};

/// Compound `amount` over `ticks` periods at `interest` parts-per-million
/// per period.
///
/// The loop shape is consensus-critical: each tick adds
/// `total * interest / 10^6` with integer division applied per tick, so the
/// truncation happens `ticks` times. A closed-form power would round
/// differently and fork state between replicas.
pub fn calc_interest(amount: &BigInt, ticks: &BigInt, interest: &BigInt) -> BigInt {
    let multiplier = BigInt::from(INTEREST_MULTIPLIER);
    let mut total = amount.clone();
    let mut i = BigInt::zero();
    while &i < ticks {
        let compound = (&total * interest) / &multiplier;
        total += compound;
        i += BigInt::one();
    }
    total
}
