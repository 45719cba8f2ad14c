// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// REPLAY ENGINE TESTS — frontier advance, layered reads, live write-through
//
// Run: cargo test -p cc-processor --test replay_tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

mod common;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use cc_core::messages::Wallet;
use cc_core::{PROCESSED_BLOCK, PROCESSED_BLOCK_ID, WALLET};
use cc_processor::cbor::encode_params;
use cc_processor::handler::{CreditcoinHandler, TxRequest};
use cc_processor::replay::ReplayEngine;
use cc_processor::state::{InMemoryStateStore, StateStore};
use cc_processor::Runtime;
use common::{sighash_of, signer, ApprovingGateway};
use prost::Message;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

struct LogTx {
    guid: String,
    signer_key: String,
    verb: String,
    params: Vec<String>,
}

fn tx(guid: &str, signer_key: &str, verb: &str, params: &[&str]) -> LogTx {
    LogTx {
        guid: guid.to_string(),
        signer_key: signer_key.to_string(),
        verb: verb.to_string(),
        params: params.iter().map(|p| p.to_string()).collect(),
    }
}

/// Render blocks into the migration-log text grammar:
/// blockIdx \n signer \n (guid \n sighash \n base64payload \n)* . \n
fn render_log(blocks: &[(u64, &str, Vec<LogTx>)]) -> String {
    let mut out = String::new();
    for (idx, block_signer, txs) in blocks {
        out.push_str(&format!("{}\n{}\n", idx, block_signer));
        for tx in txs {
            let params: Vec<&str> = tx.params.iter().map(String::as_str).collect();
            let payload = encode_params(&tx.verb, &params);
            out.push_str(&format!(
                "{}\n{}\n{}\n",
                tx.guid,
                sighash_of(&tx.signer_key),
                STANDARD.encode(&payload)
            ));
        }
        out.push_str(".\n");
    }
    out
}

struct ReplayHarness {
    store: InMemoryStateStore,
    rt: Arc<Runtime>,
    handler: CreditcoinHandler,
    _log_file: tempfile::NamedTempFile,
}

fn harness(log: &str) -> ReplayHarness {
    let mut log_file = tempfile::NamedTempFile::new().unwrap();
    log_file.write_all(log.as_bytes()).unwrap();
    let engine = ReplayEngine::load(log_file.path()).unwrap().unwrap();

    let store = InMemoryStateStore::new();
    let mut rt = Runtime::new(Arc::new(ApprovingGateway), Arc::new(store.clone()));
    rt.replay = Some(Arc::new(engine));
    let rt = Arc::new(rt);
    let handler = CreditcoinHandler::new(Arc::clone(&rt));
    ReplayHarness {
        store,
        rt,
        handler,
        _log_file: log_file,
    }
}

impl ReplayHarness {
    fn apply(&self, tx: &LogTx) {
        let params: Vec<&str> = tx.params.iter().map(String::as_str).collect();
        let request = TxRequest {
            payload: encode_params(&tx.verb, &params),
            nonce: tx.guid.clone(),
            signer_public_key: tx.signer_key.clone(),
            family_version: "1.7".to_string(),
            block_signature: String::new(),
        };
        self.handler.apply(&request, &self.store).unwrap();
    }

    /// The rebuilt chain state: committed layer with the tip layer folded
    /// over it, deletion markers masked.
    fn rebuilt_state(&self) -> BTreeMap<String, Vec<u8>> {
        let engine = self.rt.replay.as_ref().unwrap();
        let shared = engine.shared.lock().unwrap();
        let mut merged = shared.transitioning_state.clone();
        for (k, v) in &shared.tip_current_state {
            merged.insert(k.clone(), v.clone());
        }
        merged.retain(|_, v| !v.is_empty());
        merged
    }

    fn frontier(&self) -> (i64, i64) {
        let engine = self.rt.replay.as_ref().unwrap();
        let shared = engine.shared.lock().unwrap();
        (shared.updated_block_idx, shared.updated_tx_idx)
    }
}

fn wallet_id(sighash: &str) -> String {
    format!("{}{}{}", cc_crypto::namespace_prefix(), WALLET, sighash)
}

fn wallet_amount(map: &BTreeMap<String, Vec<u8>>, sighash: &str) -> Option<String> {
    map.get(&wallet_id(sighash))
        .map(|data| Wallet::decode(data.as_slice()).unwrap().amount)
}

/// The four-transaction lineage of the splice scenario, plus an extra block
/// that is never reached so the engine never schedules its own shutdown.
fn splice_blocks() -> Vec<(u64, &'static str, Vec<LogTx>)> {
    let s1 = signer(1);
    let s2 = signer(2);
    let dst = sighash_of(&s2);
    vec![
        (
            1,
            "blocksigner1",
            vec![
                tx("T1", &s1, "CollectCoins", &["0xabc", "100000000000000000000", "EthTx1"]),
                tx("T2", &s1, "RegisterAddress", &["bitcoin", "AddrOne", "testnet"]),
            ],
        ),
        (
            2,
            "blocksigner2",
            vec![
                tx("T3", &s1, "SendFunds", &["50000000000000000000", &dst]),
                tx("T4", &s2, "RegisterAddress", &["bitcoin", "AddrTwo", "testnet"]),
            ],
        ),
        (
            3,
            "blocksigner3",
            vec![tx("T5", &s1, "SendFunds", &["1", &dst])],
        ),
    ]
}

#[test]
fn splice_replays_the_gap_then_applies_live() {
    let blocks = splice_blocks();
    let h = harness(&render_log(&blocks));

    // T3 arrives first: the engine must replay T1 and T2 before it.
    h.apply(&blocks[1].2[0]);
    assert_eq!(h.frontier(), (2, 0));

    let s1 = sighash_of(&signer(1));
    let s2 = sighash_of(&signer(2));
    let rebuilt = h.rebuilt_state();
    // 100 minted, 1 fee for RegisterAddress, 50 + 1 fee for SendFunds.
    assert_eq!(
        wallet_amount(&rebuilt, &s1).as_deref(),
        Some("49980000000000000000")
    );
    assert_eq!(
        wallet_amount(&rebuilt, &s2).as_deref(),
        Some("50000000000000000000")
    );

    // Only the live transaction wrote through to the host store: T3's
    // wallets and fee receipt, but not T2's address registration.
    let host = h.store.entries();
    assert!(host.contains_key(&wallet_id(&s1)));
    assert!(host.contains_key(&wallet_id(&s2)));
    let address_id = cc_crypto::make_address(cc_core::ADDR, "bitcoinaddronetestnet");
    assert!(!host.contains_key(&address_id));
    assert!(rebuilt.contains_key(&address_id));

    // T4 arrives at (block 2, tx 1): the frontier is already at (2, 0), so
    // only T4 itself runs.
    h.apply(&blocks[1].2[1]);
    assert_eq!(h.frontier(), (2, 1));
    let rebuilt = h.rebuilt_state();
    let address_two = cc_crypto::make_address(cc_core::ADDR, "bitcoinaddrtwotestnet");
    assert!(rebuilt.contains_key(&address_two));
}

#[test]
fn spliced_state_matches_straight_application() {
    let blocks = splice_blocks();
    let h = harness(&render_log(&blocks));
    h.apply(&blocks[1].2[0]); // T3 (replays T1, T2)
    h.apply(&blocks[1].2[1]); // T4

    // Normal-mode reference: same four transactions, tips as recorded.
    let reference = common::TestChain::new();
    reference.store.set_tip(1);
    for tx in &blocks[0].2 {
        let params: Vec<&str> = tx.params.iter().map(String::as_str).collect();
        reference
            .apply_with_nonce(&tx.signer_key, &tx.guid, &tx.verb, &params)
            .unwrap();
    }
    reference.store.set_tip(2);
    for tx in &blocks[1].2 {
        let params: Vec<&str> = tx.params.iter().map(String::as_str).collect();
        reference
            .apply_with_nonce(&tx.signer_key, &tx.guid, &tx.verb, &params)
            .unwrap();
    }

    assert_eq!(h.rebuilt_state(), reference.store.entries());
}

#[test]
fn backing_up_inside_a_block_rebuilds_it() {
    let blocks = splice_blocks();
    let h = harness(&render_log(&blocks));
    h.apply(&blocks[1].2[0]); // T3
    h.apply(&blocks[1].2[1]); // T4
    // The validator revalidates T3: same block, earlier index. The tip
    // layer is discarded and rebuilt up to T3.
    h.apply(&blocks[1].2[0]);
    assert_eq!(h.frontier(), (2, 0));

    let rebuilt = h.rebuilt_state();
    let address_two = cc_crypto::make_address(cc_core::ADDR, "bitcoinaddrtwotestnet");
    assert!(
        !rebuilt.contains_key(&address_two),
        "T4's effects must be gone after backing up to T3"
    );
}

#[test]
fn housekeeping_rewards_replay_from_recorded_signers() {
    // 95 empty blocks, then a Housekeeping transaction in block 95 and an
    // unreached tail block.
    let gateway_key = signer(9);
    let mut blocks: Vec<(u64, &'static str, Vec<LogTx>)> = Vec::new();
    for idx in 1..95 {
        blocks.push((idx, "minerkey", vec![]));
    }
    blocks.push((95, "minerkey", vec![tx("HK", &gateway_key, "Housekeeping", &["62"])]));
    blocks.push((96, "minerkey", vec![tx("TAIL", &gateway_key, "Housekeeping", &["0"])]));

    let h = harness(&render_log(&blocks));
    h.apply(&blocks[94].2[0]);

    let rebuilt = h.rebuilt_state();
    // 62 blocks of flat reward to the recorded signer.
    let expected = ("222000000000000000000".parse::<num_bigint::BigInt>().unwrap()
        * num_bigint::BigInt::from(62))
    .to_string();
    assert_eq!(
        wallet_amount(&rebuilt, &cc_crypto::sha512_id("minerkey")).as_deref(),
        Some(expected.as_str())
    );

    // Live apply also wrote through to the host store, marker included.
    let marker = format!(
        "{}{}{}",
        cc_crypto::namespace_prefix(),
        PROCESSED_BLOCK,
        PROCESSED_BLOCK_ID
    );
    assert_eq!(h.store.get(&marker).unwrap(), Some(b"62".to_vec()));
}

#[test]
fn transition_file_constant_is_platform_fixed() {
    if cfg!(target_os = "linux") {
        assert_eq!(
            cc_processor::replay::TRANSITION_FILE,
            "/home/Creditcoin/cctt/data/transition.txt"
        );
    } else {
        assert!(Path::new(cc_processor::replay::TRANSITION_FILE)
            .to_string_lossy()
            .contains("transition.txt"));
    }
}
