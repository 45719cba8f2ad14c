// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CREDITCOIN - CORE MODULE
//
// Protocol constants, the protobuf entity model, arbitrary-precision
// numerics, compound interest, and the block-reward formula.
// All monetary amounts are decimal strings in state and BigInt in memory;
// no fixed-width arithmetic, no floating-point (except where the historical
// reward formula demands a double, see reward.rs).
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use num_bigint::BigInt;
use std::sync::LazyLock;

pub mod error;
pub mod interest;
pub mod messages;
pub mod num;
pub mod reward;

pub use error::CcError;

/// Transaction family name registered with the host validator.
pub const TRANSACTION_FAMILY: &str = "CREDITCOIN";
/// Accepted family versions.
pub const FAMILY_VERSIONS: [&str; 8] = ["1.0", "1.1", "1.2", "1.3", "1.4", "1.5", "1.6", "1.7"];

/// Chain-wide settings live under this host-reserved namespace prefix.
pub const SETTINGS_NAMESPACE: &str = "000000";

// ─────────────────────────────────────────────────────────────────
// Entity kind prefixes (4 hex digits after the namespace)
// ─────────────────────────────────────────────────────────────────

pub const WALLET: &str = "0000";
pub const ADDR: &str = "1000";
pub const TRANSFER: &str = "2000";
pub const ASK_ORDER: &str = "3000";
pub const BID_ORDER: &str = "4000";
pub const DEAL_ORDER: &str = "5000";
pub const REPAYMENT_ORDER: &str = "6000";
pub const OFFER: &str = "7000";
pub const ERC20: &str = "8000";
pub const PROCESSED_BLOCK: &str = "9000";
pub const FEE: &str = "0100";

/// Singleton id of the processed-block marker (sixty zeros).
pub const PROCESSED_BLOCK_ID: &str =
    "000000000000000000000000000000000000000000000000000000000000";

// ─────────────────────────────────────────────────────────────────
// Economics
// ─────────────────────────────────────────────────────────────────

/// Interest rates are parts-per-million of the principal per maturity tick.
pub const INTEREST_MULTIPLIER: u64 = 1_000_000;

/// Blocks a reported block index must be buried under the tip before
/// housekeeping may process it.
pub const CONFIRMATION_COUNT: u64 = 30;

/// Fee receipts are refunded after one year of one-minute blocks.
pub const YEAR_OF_BLOCKS: u64 = 60 * 24 * 365;

/// Reward period length after the update1 formula change.
pub const BLOCKS_IN_PERIOD_UPDATE1: u64 = 2_500_000;

/// Blocks rewarded per idle housekeeping pass.
pub const BLOCK_REWARD_PROCESSING_COUNT: u64 = 10;

/// Flat per-transaction fee: 10^16 (0.01 CTC in 18-decimal wei).
pub const TX_FEE_STRING: &str = "10000000000000000";

static TX_FEE_BIG: LazyLock<BigInt> = LazyLock::new(|| {
    TX_FEE_STRING.parse().unwrap_or_default()
});

/// The per-transaction fee as a big integer.
pub fn tx_fee() -> &'static BigInt {
    &TX_FEE_BIG
}
