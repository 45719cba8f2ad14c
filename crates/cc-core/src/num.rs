//! Decimal-string numerics.
//!
//! Every monetary amount and block index crosses the wire as a base-10
//! string and is handled in memory as a `BigInt`. Parsing failures are
//! always `InvalidTransaction`; a malformed number in a payload or a state
//! entry rejects the transaction, it never aborts the processor.

use crate::error::CcError;
use num_bigint::BigInt;
use num_traits::Zero;

/// Parse a decimal string into a big integer.
///
/// Negative values are rejected unless `allow_negative` is set (the only
/// signed quantity in the system is RegisterTransfer's `gain`).
pub fn parse_bigint(text: &str, allow_negative: bool) -> Result<BigInt, CcError> {
    let value: BigInt = text
        .parse()
        .map_err(|_| CcError::invalid("Invalid number format"))?;
    if !allow_negative && value < BigInt::zero() {
        return Err(CcError::invalid("Expecting a positive value"));
    }
    Ok(value)
}

/// Parse a non-negative decimal string.
pub fn parse_positive(text: &str) -> Result<BigInt, CcError> {
    parse_bigint(text, false)
}

/// Strict u64 parse for expiration block-count deltas.
pub fn parse_u64(text: &str) -> Result<u64, CcError> {
    text.parse().map_err(|_| CcError::invalid("Invalid number"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_decimals() {
        assert_eq!(parse_positive("0").unwrap(), BigInt::zero());
        assert_eq!(
            parse_positive("222000000000000000000").unwrap().to_string(),
            "222000000000000000000"
        );
    }

    #[test]
    fn rejects_garbage() {
        for bad in ["", "12abc", "1.5", "0x10", " 1"] {
            assert_eq!(
                parse_positive(bad),
                Err(CcError::invalid("Invalid number format")),
                "input: {bad}"
            );
        }
    }

    #[test]
    fn negative_needs_permission() {
        assert_eq!(
            parse_positive("-5"),
            Err(CcError::invalid("Expecting a positive value"))
        );
        assert_eq!(parse_bigint("-5", true).unwrap().to_string(), "-5");
    }

    #[test]
    fn u64_parse_is_strict() {
        assert_eq!(parse_u64("1000").unwrap(), 1000);
        assert!(parse_u64("-1").is_err());
        assert!(parse_u64("10 ").is_err());
        assert!(parse_u64("99999999999999999999999").is_err());
    }
}
