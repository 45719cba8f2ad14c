//! Protobuf entity messages.
//!
//! The wire schemas are a fixed interface shared with every other consumer
//! of the chain state, so the field tags below are load-bearing: changing a
//! tag forks the state encoding. Amounts, interest, maturity, fees and block
//! indices are decimal strings; `expiration` fields are block-count deltas
//! and travel as uint64.

use prost::Message;

/// Account balance, keyed by `0000` + owner sighash. Created on first
/// credit, never deleted.
#[derive(Clone, PartialEq, Message)]
pub struct Wallet {
    #[prost(string, tag = "1")]
    pub amount: String,
}

/// A registered foreign-chain address, keyed by
/// `1000` + sha512_id(blockchain + lower(value) + network). Immutable.
#[derive(Clone, PartialEq, Message)]
pub struct Address {
    #[prost(string, tag = "1")]
    pub blockchain: String,
    /// Original-case address string as submitted.
    #[prost(string, tag = "2")]
    pub value: String,
    #[prost(string, tag = "3")]
    pub network: String,
    #[prost(string, tag = "4")]
    pub sighash: String,
}

/// An attested foreign-chain transfer, keyed by
/// `2000` + sha512_id(blockchain + lower(txid) + network).
#[derive(Clone, PartialEq, Message)]
pub struct Transfer {
    #[prost(string, tag = "1")]
    pub blockchain: String,
    #[prost(string, tag = "2")]
    pub src_address: String,
    #[prost(string, tag = "3")]
    pub dst_address: String,
    /// The deal or repayment order this transfer settles.
    #[prost(string, tag = "4")]
    pub order: String,
    #[prost(string, tag = "5")]
    pub amount: String,
    /// Foreign-chain transaction id ("0" marks an off-chain exemption).
    #[prost(string, tag = "6")]
    pub tx: String,
    #[prost(string, tag = "7")]
    pub block: String,
    /// Write-once consumption flag.
    #[prost(bool, tag = "8")]
    pub processed: bool,
    #[prost(string, tag = "9")]
    pub sighash: String,
}

/// Investor-side order, keyed by `3000` + sha512_id(transaction nonce).
#[derive(Clone, PartialEq, Message)]
pub struct AskOrder {
    #[prost(string, tag = "1")]
    pub blockchain: String,
    #[prost(string, tag = "2")]
    pub address: String,
    #[prost(string, tag = "3")]
    pub amount: String,
    #[prost(string, tag = "4")]
    pub interest: String,
    #[prost(string, tag = "5")]
    pub maturity: String,
    #[prost(string, tag = "6")]
    pub fee: String,
    #[prost(uint64, tag = "7")]
    pub expiration: u64,
    #[prost(string, tag = "8")]
    pub block: String,
    #[prost(string, tag = "9")]
    pub sighash: String,
}

/// Fundraiser-side order, keyed by `4000` + sha512_id(transaction nonce).
#[derive(Clone, PartialEq, Message)]
pub struct BidOrder {
    #[prost(string, tag = "1")]
    pub blockchain: String,
    #[prost(string, tag = "2")]
    pub address: String,
    #[prost(string, tag = "3")]
    pub amount: String,
    #[prost(string, tag = "4")]
    pub interest: String,
    #[prost(string, tag = "5")]
    pub maturity: String,
    #[prost(string, tag = "6")]
    pub fee: String,
    #[prost(uint64, tag = "7")]
    pub expiration: u64,
    #[prost(string, tag = "8")]
    pub block: String,
    #[prost(string, tag = "9")]
    pub sighash: String,
}

/// An investor's offer matching an ask to a bid, keyed by
/// `7000` + sha512_id(askOrderId + bidOrderId).
#[derive(Clone, PartialEq, Message)]
pub struct Offer {
    #[prost(string, tag = "1")]
    pub blockchain: String,
    #[prost(string, tag = "2")]
    pub ask_order: String,
    #[prost(string, tag = "3")]
    pub bid_order: String,
    #[prost(uint64, tag = "4")]
    pub expiration: u64,
    #[prost(string, tag = "5")]
    pub block: String,
    #[prost(string, tag = "6")]
    pub sighash: String,
}

/// A struck deal, keyed by `5000` + sha512_id(offerId).
///
/// State machine: open (loan_transfer empty) → completed (loan_transfer
/// set) → locked (lock set) → closed (repayment_transfer set). Exempt jumps
/// completed → closed.
#[derive(Clone, PartialEq, Message)]
pub struct DealOrder {
    #[prost(string, tag = "1")]
    pub blockchain: String,
    #[prost(string, tag = "2")]
    pub src_address: String,
    #[prost(string, tag = "3")]
    pub dst_address: String,
    #[prost(string, tag = "4")]
    pub amount: String,
    #[prost(string, tag = "5")]
    pub interest: String,
    #[prost(string, tag = "6")]
    pub maturity: String,
    #[prost(string, tag = "7")]
    pub fee: String,
    #[prost(uint64, tag = "8")]
    pub expiration: u64,
    #[prost(string, tag = "9")]
    pub block: String,
    #[prost(string, tag = "10")]
    pub loan_transfer: String,
    /// Sighash currently holding the lock; empty when unlocked.
    #[prost(string, tag = "11")]
    pub lock: String,
    #[prost(string, tag = "12")]
    pub repayment_transfer: String,
    /// The fundraiser.
    #[prost(string, tag = "13")]
    pub sighash: String,
}

/// A collector's repayment order, keyed by
/// `6000` + sha512_id(transaction nonce).
#[derive(Clone, PartialEq, Message)]
pub struct RepaymentOrder {
    #[prost(string, tag = "1")]
    pub blockchain: String,
    #[prost(string, tag = "2")]
    pub src_address: String,
    #[prost(string, tag = "3")]
    pub dst_address: String,
    #[prost(string, tag = "4")]
    pub amount: String,
    #[prost(uint64, tag = "5")]
    pub expiration: u64,
    #[prost(string, tag = "6")]
    pub block: String,
    #[prost(string, tag = "7")]
    pub deal: String,
    #[prost(string, tag = "8")]
    pub sighash: String,
    /// Set by CompleteRepaymentOrder; guards housekeeping expiry.
    #[prost(string, tag = "9")]
    pub previous_owner: String,
    #[prost(string, tag = "10")]
    pub transfer: String,
}

/// A fee receipt, keyed by `0100` + sha512_id(transaction nonce). Records
/// one TX_FEE charge, refunded by housekeeping after a year of blocks.
#[derive(Clone, PartialEq, Message)]
pub struct Fee {
    #[prost(string, tag = "1")]
    pub sighash: String,
    #[prost(string, tag = "2")]
    pub block: String,
}

/// One on-chain settings entry under the host settings namespace.
#[derive(Clone, PartialEq, Message)]
pub struct SettingEntry {
    #[prost(string, tag = "1")]
    pub key: String,
    #[prost(string, tag = "2")]
    pub value: String,
}

/// A settings state value: a list of key/value entries.
#[derive(Clone, PartialEq, Message)]
pub struct Setting {
    #[prost(message, repeated, tag = "1")]
    pub entries: Vec<SettingEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wallet_round_trip() {
        let wallet = Wallet { amount: "10000000000000000".to_string() };
        let bytes = wallet.encode_to_vec();
        assert_eq!(Wallet::decode(bytes.as_slice()).unwrap(), wallet);
    }

    #[test]
    fn default_deal_order_is_open() {
        let deal = DealOrder::default();
        assert!(deal.loan_transfer.is_empty());
        assert!(deal.lock.is_empty());
        assert!(deal.repayment_transfer.is_empty());
    }

    #[test]
    fn setting_decodes_multiple_entries() {
        let setting = Setting {
            entries: vec![
                SettingEntry {
                    key: "sawtooth.gateway.sighash".to_string(),
                    value: "abc".to_string(),
                },
                SettingEntry {
                    key: "creditcoin.v2block".to_string(),
                    value: "500000".to_string(),
                },
            ],
        };
        let decoded = Setting::decode(setting.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded.entries.len(), 2);
        assert_eq!(decoded.entries[1].value, "500000");
    }
}
