// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PROPERTY-BASED TESTS — processor-wide invariants
//
// P-Conservation: verb sequences (minus mints and housekeeping credits)
// preserve wallets + outstanding fee receipts.
// P-Determinism: two processors fed the same stream agree byte-for-byte.
//
// Usage: cargo test --test prop_processor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use cc_core::messages::Wallet;
use cc_core::{CcError, FEE, WALLET};
use cc_crypto::namespace_prefix;
use cc_processor::cbor::encode_params;
use cc_processor::handler::{CreditcoinHandler, TxRequest};
use cc_processor::state::InMemoryStateStore;
use cc_processor::{Gateway, Runtime};
use num_bigint::BigInt;
use prost::Message;
use proptest::prelude::*;
use std::sync::Arc;

struct YesGateway;
impl Gateway for YesGateway {
    fn verify(&self, _command: &str) -> Result<(), CcError> {
        Ok(())
    }
}

fn key_of(tag: u8) -> String {
    format!("02{:02x}{}", tag, "99".repeat(31))
}

fn build() -> (InMemoryStateStore, CreditcoinHandler) {
    let store = InMemoryStateStore::new();
    let rt = Arc::new(Runtime::new(
        Arc::new(YesGateway),
        Arc::new(store.clone()),
    ));
    (store.clone(), CreditcoinHandler::new(rt))
}

fn fund(store: &InMemoryStateStore, sighash: &str, amount: &str) {
    let id = format!("{}{}{}", namespace_prefix(), WALLET, sighash);
    let wallet = Wallet {
        amount: amount.to_string(),
    };
    store.insert(&id, wallet.encode_to_vec());
}

fn apply(
    handler: &CreditcoinHandler,
    store: &InMemoryStateStore,
    key: &str,
    nonce: &str,
    verb: &str,
    params: &[&str],
) -> Result<(), CcError> {
    let request = TxRequest {
        payload: encode_params(verb, params),
        nonce: nonce.to_string(),
        signer_public_key: key.to_string(),
        family_version: "1.5".to_string(),
        block_signature: String::new(),
    };
    handler.apply(&request, store)
}

/// Sum of wallet balances plus one TX_FEE per outstanding fee receipt.
fn conserved_total(store: &InMemoryStateStore) -> BigInt {
    let wallet_prefix = format!("{}{}", namespace_prefix(), WALLET);
    let fee_prefix = format!("{}{}", namespace_prefix(), FEE);
    let tx_fee: BigInt = cc_core::TX_FEE_STRING.parse().unwrap();
    let mut total = BigInt::from(0u8);
    for (key, value) in store.entries() {
        if value.is_empty() {
            continue;
        }
        if key.starts_with(&wallet_prefix) {
            let wallet = Wallet::decode(value.as_slice()).unwrap();
            total += wallet.amount.parse::<BigInt>().unwrap();
        } else if key.starts_with(&fee_prefix) {
            total += &tx_fee;
        }
    }
    total
}

/// One step of the generated workload.
#[derive(Debug, Clone)]
enum Op {
    Send { from: u8, to: u8, amount: u64 },
    Register { who: u8, addr: String },
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..3, 0u8..3, 0u64..=2_000_000_000).prop_map(|(from, to, amount)| Op::Send {
            from,
            to,
            amount
        }),
        (0u8..3, "[a-z0-9]{6,20}").prop_map(|(who, addr)| Op::Register { who, addr }),
    ]
}

fn run_ops(ops: &[Op]) -> InMemoryStateStore {
    let (store, handler) = build();
    store.set_tip(5);
    for tag in 0..3 {
        fund(&store, &cc_crypto::sighash_from_public_key(&key_of(tag)).unwrap(),
            "1000000000000000000000");
    }
    for (i, op) in ops.iter().enumerate() {
        let nonce = format!("op{:04}", i);
        // Individual rejections are fine; rejected transactions must not
        // change state, which the conservation check below would catch.
        let _ = match op {
            Op::Send { from, to, amount } => {
                let dst = cc_crypto::sighash_from_public_key(&key_of(*to)).unwrap();
                apply(
                    &handler,
                    &store,
                    &key_of(*from),
                    &nonce,
                    "SendFunds",
                    &[&amount.to_string(), &dst],
                )
            }
            Op::Register { who, addr } => apply(
                &handler,
                &store,
                &key_of(*who),
                &nonce,
                "RegisterAddress",
                &["bitcoin", addr, "testnet"],
            ),
        };
    }
    store
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// PROPERTY: wallets + outstanding fee receipts are conserved across
    /// any fee-charging workload.
    #[test]
    fn prop_conservation(ops in proptest::collection::vec(arb_op(), 0..24)) {
        let store = run_ops(&ops);
        let expected: BigInt =
            "1000000000000000000000".parse::<BigInt>().unwrap() * BigInt::from(3u8);
        prop_assert_eq!(conserved_total(&store), expected);
    }

    /// PROPERTY: two processors fed the same ordered stream from empty
    /// state produce identical key sets and values.
    #[test]
    fn prop_determinism(ops in proptest::collection::vec(arb_op(), 0..24)) {
        let first = run_ops(&ops);
        let second = run_ops(&ops);
        prop_assert_eq!(first.entries(), second.entries());
    }
}
