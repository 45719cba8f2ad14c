// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PROPERTY-BASED TESTS — cc-core
//
// Numeric parsing totality, interest monotonicity, reward-formula bounds.
// Run: cargo test -p cc-core --test prop_core
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use cc_core::interest::calc_interest;
use cc_core::num::{parse_bigint, parse_positive};
use cc_core::reward::block_reward;
use num_bigint::BigInt;
use num_traits::Zero;
use proptest::prelude::*;

proptest! {
    /// PROPERTY: parsing never panics and round-trips every decimal it
    /// accepts.
    #[test]
    fn prop_parse_total_and_round_trips(input in ".{0,40}") {
        if let Ok(value) = parse_bigint(&input, true) {
            let rendered = value.to_string();
            prop_assert_eq!(parse_bigint(&rendered, true).unwrap(), value);
        }
    }

    /// PROPERTY: a canonical non-negative decimal parses to itself.
    #[test]
    fn prop_canonical_decimals_accepted(digits in "[1-9][0-9]{0,30}") {
        prop_assert_eq!(parse_positive(&digits).unwrap().to_string(), digits);
    }

    /// PROPERTY: compounding never shrinks the principal and is monotonic in
    /// tick count (interest is non-negative).
    #[test]
    fn prop_interest_monotonic(
        amount in 0u64..=1_000_000_000,
        ticks in 0u64..=50,
        interest in 0u64..=2_000_000,
    ) {
        let amount = BigInt::from(amount);
        let interest = BigInt::from(interest);
        let now = calc_interest(&amount, &BigInt::from(ticks), &interest);
        let later = calc_interest(&amount, &BigInt::from(ticks + 1), &interest);
        prop_assert!(now >= amount);
        prop_assert!(later >= now);
    }

    /// PROPERTY: the decaying reward never exceeds the flat one and never
    /// goes negative.
    #[test]
    fn prop_reward_bounded(block_idx in 0u64..=300_000_000) {
        let block_idx = BigInt::from(block_idx);
        let flat = block_reward(false, &block_idx);
        let decaying = block_reward(true, &block_idx);
        prop_assert!(decaying >= BigInt::zero());
        prop_assert!(decaying <= flat);
    }

    /// PROPERTY: the reward is constant within one period.
    #[test]
    fn prop_reward_constant_within_period(period in 0u64..=40, offset in 0u64..2_500_000) {
        let base = BigInt::from(period * 2_500_000);
        let inside = BigInt::from(period * 2_500_000 + offset);
        prop_assert_eq!(block_reward(true, &base), block_reward(true, &inside));
    }
}
