// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TRANSACTION HANDLER — the sixteen verbs
//
// One Applicator per transaction. Every verb is an atomic state transition:
// it validates against current state, stages its writes, and either commits
// them all or rejects with InvalidTransaction and leaves state untouched
// (the host discards staged writes on rejection). During a migration the
// same verbs run against the replay engine's layered maps instead of the
// host store; the layering rules live in replay.rs, the read/write shims
// here honor them.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use crate::cbor::{self, CborParams};
use crate::replay::{ReplayEngine, ReplayShared, TxPos};
use crate::settings::{GATEWAY_SIGHASH_KEY, UPDATE1_KEY, V2BLOCK_KEY};
use crate::state::{scan_all, StateStore};
use crate::{safe_lock, Runtime};
use cc_core::interest::calc_interest;
use cc_core::messages::{
    Address, AskOrder, BidOrder, DealOrder, Fee, Offer, RepaymentOrder, Transfer, Wallet,
};
use cc_core::num::{parse_bigint, parse_positive};
use cc_core::reward::block_reward;
use cc_core::{
    CcError, ADDR, ASK_ORDER, BID_ORDER, BLOCK_REWARD_PROCESSING_COUNT, CONFIRMATION_COUNT,
    DEAL_ORDER, ERC20, FEE, OFFER, PROCESSED_BLOCK, PROCESSED_BLOCK_ID, REPAYMENT_ORDER,
    TRANSACTION_FAMILY, TRANSFER, WALLET, YEAR_OF_BLOCKS,
};
use cc_crypto::{make_address, namespace_prefix, sha512_id, sighash_from_public_key};
use num_bigint::BigInt;
use num_traits::{ToPrimitive, Zero};
use prost::Message;
use std::collections::BTreeMap;
use std::sync::Arc;

const RPC_FAILURE: &str = "Failed to process RPC response";

// The 2019 reward-formula rollout: validators observed two different values
// of sawtooth.validator.update1 depending on when they synced, and blocks
// 278890..=278904 were committed under the earlier one. Replays must pick
// the update block the chain actually used at that tip or the reward wallets
// diverge.
const AMBIGUOUS_UPDATE_TIP_FIRST: i64 = 278890;
const AMBIGUOUS_UPDATE_TIP_LAST: i64 = 278904;
const TRANSITION_UPDATE_BLOCK_EARLY: i64 = 277800;
const TRANSITION_UPDATE_BLOCK_LATE: i64 = 278910;

/// One transaction as delivered by the host validator.
#[derive(Debug, Clone, Default)]
pub struct TxRequest {
    pub payload: Vec<u8>,
    /// Transaction nonce; doubles as the guid keying nonce-derived ids.
    pub nonce: String,
    /// Hex signer public key, compressed or uncompressed.
    pub signer_public_key: String,
    pub family_version: String,
    /// Signature of the block being validated, when the host knows it;
    /// enables the batched reward-signer lookup.
    pub block_signature: String,
}

/// Per-transaction context. `tip` and the staged map only carry meaning in
/// transitioning mode; live transactions read the tip from the host.
struct Ctx {
    sighash: String,
    guid: String,
    tip: i64,
    replaying: bool,
    transitioning: bool,
    current_state: BTreeMap<String, Vec<u8>>,
}

impl Ctx {
    fn new(transitioning: bool) -> Self {
        Ctx {
            sighash: String::new(),
            guid: String::new(),
            tip: 0,
            replaying: false,
            transitioning,
            current_state: BTreeMap::new(),
        }
    }
}

fn decode<M: Message + Default>(data: &[u8]) -> Result<M, CcError> {
    M::decode(data).map_err(|_| CcError::invalid("Failed to parse state entry"))
}

fn add_state(states: &mut Vec<(String, Vec<u8>)>, id: &str, message: &impl Message) {
    states.push((id.to_string(), message.encode_to_vec()));
}

fn wallet_id_of(sighash: &str) -> String {
    format!("{}{}{}", namespace_prefix(), WALLET, sighash)
}

/// The registered transaction handler: family metadata plus the apply
/// entry point the host drives.
pub struct CreditcoinHandler {
    rt: Arc<Runtime>,
}

impl CreditcoinHandler {
    pub fn new(rt: Arc<Runtime>) -> Self {
        CreditcoinHandler { rt }
    }

    pub fn family_name(&self) -> &'static str {
        TRANSACTION_FAMILY
    }

    pub fn family_versions(&self) -> Vec<String> {
        cc_core::FAMILY_VERSIONS.iter().map(|v| v.to_string()).collect()
    }

    pub fn namespaces(&self) -> Vec<String> {
        vec![namespace_prefix().to_string()]
    }

    /// Apply one transaction against the given state handle.
    pub fn apply(&self, request: &TxRequest, state: &dyn StateStore) -> Result<(), CcError> {
        let (cmd, query) = cbor::command_and_params(&request.payload)?;
        let guid = request.nonce.clone();
        let sighash = sighash_from_public_key(&request.signer_public_key)?;

        if let Some(engine) = &self.rt.replay {
            let Some(pos) = engine.position(&guid) else {
                // A transaction outside the recorded lineage means the
                // validator has moved past the migration log.
                engine.cleanup();
            };
            let finished = {
                let mut shared = safe_lock(&engine.shared);
                let mut app = Applicator::new(
                    &self.rt,
                    state,
                    request,
                    Some(engine.as_ref()),
                    Some(&mut shared),
                );
                app.apply_at(pos, &cmd, &query, &guid, &sighash)?;
                engine.at_end(&shared)
            };
            if finished {
                println!("Revalidated last block, terminating in a minute");
                engine.schedule_cleanup();
            }
            engine.touch();
            Ok(())
        } else {
            let mut app = Applicator::new(&self.rt, state, request, None, None);
            app.dispatch(&cmd, &query)
        }
    }
}

struct Applicator<'a> {
    rt: &'a Runtime,
    state: &'a dyn StateStore,
    request: &'a TxRequest,
    engine: Option<&'a ReplayEngine>,
    shared: Option<&'a mut ReplayShared>,
    ctx: Ctx,
}

impl<'a> Applicator<'a> {
    fn new(
        rt: &'a Runtime,
        state: &'a dyn StateStore,
        request: &'a TxRequest,
        engine: Option<&'a ReplayEngine>,
        shared: Option<&'a mut ReplayShared>,
    ) -> Self {
        let transitioning = shared.is_some();
        Applicator {
            rt,
            state,
            request,
            engine,
            shared,
            ctx: Ctx::new(transitioning),
        }
    }

    // ─────────────────────────────────────────────────────────────────
    // Replay frontier
    // ─────────────────────────────────────────────────────────────────

    /// Advance the frontier to just before `pos`, replaying every recorded
    /// transaction in between, then run the live transaction.
    fn apply_at(
        &mut self,
        pos: TxPos,
        cmd: &str,
        query: &CborParams,
        guid: &str,
        sighash: &str,
    ) -> Result<(), CcError> {
        let tip = pos.block;
        let current_block_idx = tip + 1;
        let tx_idx = pos.tx_idx;

        let (updated_block_idx, updated_tx_idx) = {
            let shared = self.shared_ref()?;
            (shared.updated_block_idx, shared.updated_tx_idx)
        };

        if current_block_idx > updated_block_idx {
            // Finish the block the frontier stopped inside.
            self.ctx.tip = updated_block_idx - 1;
            let count = self.block_tx_count(updated_block_idx)?;
            for i in (updated_tx_idx + 1)..count {
                self.execute_recorded(updated_block_idx, i)?;
            }
            self.fold_tip_into_committed()?;
            // Replay every whole block between frontier and target.
            for block in (updated_block_idx + 1)..current_block_idx {
                self.ctx.tip = block - 1;
                let count = self.block_tx_count(block)?;
                for i in 0..count {
                    self.execute_recorded(block, i)?;
                }
                self.fold_tip_into_committed()?;
            }
            // Replay the target block up to (not including) the live tx.
            self.ctx.tip = tip;
            for i in 0..tx_idx {
                self.execute_recorded(current_block_idx, i)?;
            }
        } else if current_block_idx == updated_block_idx {
            self.ctx.tip = tip;
            if tx_idx <= updated_tx_idx {
                // The validator backed up inside the current block; rebuild
                // it from the committed layer.
                self.shared_mut()?.tip_current_state.clear();
                for i in 0..tx_idx {
                    self.execute_recorded(current_block_idx, i)?;
                }
            } else {
                for i in (updated_tx_idx + 1)..tx_idx {
                    self.execute_recorded(current_block_idx, i)?;
                }
            }
        }

        self.do_apply(cmd, query, guid, sighash)?;

        let shared = self.shared_mut()?;
        shared.updated_block_idx = current_block_idx;
        shared.updated_tx_idx = tx_idx;
        Ok(())
    }

    fn shared_ref(&self) -> Result<&ReplayShared, CcError> {
        self.shared
            .as_deref()
            .ok_or_else(|| CcError::internal("replay state missing"))
    }

    fn shared_mut(&mut self) -> Result<&mut ReplayShared, CcError> {
        self.shared
            .as_deref_mut()
            .ok_or_else(|| CcError::internal("replay state missing"))
    }

    fn replay_engine(&self) -> Result<&'a ReplayEngine, CcError> {
        self.engine
            .ok_or_else(|| CcError::internal("replay engine missing"))
    }

    fn block_tx_count(&self, block: i64) -> Result<i64, CcError> {
        let engine = self.replay_engine()?;
        engine
            .blocks
            .get(block as usize)
            .map(|b| b.txs.len() as i64)
            .ok_or_else(|| CcError::internal("block index outside migration log"))
    }

    fn execute_recorded(&mut self, block: i64, tx: i64) -> Result<(), CcError> {
        let engine = self.replay_engine()?;
        let record = engine
            .blocks
            .get(block as usize)
            .and_then(|b| b.txs.get(tx as usize))
            .ok_or_else(|| CcError::internal("transaction index outside migration log"))?;
        if record.sighash.is_empty() {
            return Ok(());
        }
        self.execute(&record.payload, &record.guid, &record.sighash)
    }

    /// Replay one recorded transaction: same verbs, writes captured in the
    /// layered maps only.
    fn execute(&mut self, payload: &[u8], guid: &str, sighash: &str) -> Result<(), CcError> {
        if payload.is_empty() || guid.is_empty() {
            return Ok(());
        }
        let (cmd, query) = cbor::command_and_params(payload)?;
        self.ctx.replaying = true;
        let result = self.do_apply(&cmd, &query, guid, sighash);
        self.ctx.replaying = false;
        result
    }

    fn do_apply(
        &mut self,
        cmd: &str,
        query: &CborParams,
        guid: &str,
        sighash: &str,
    ) -> Result<(), CcError> {
        self.ctx.guid = guid.to_string();
        self.ctx.sighash = sighash.to_string();

        self.dispatch(cmd, query)?;

        // Transaction boundary: fold this transaction's writes into the tip
        // layer. The fresh writes win over anything staged earlier.
        if self.shared.is_some() {
            let mut merged = std::mem::take(&mut self.ctx.current_state);
            let shared = self.shared_mut()?;
            for (key, value) in std::mem::take(&mut shared.tip_current_state) {
                merged.entry(key).or_insert(value);
            }
            shared.tip_current_state = merged;
        }
        Ok(())
    }

    fn fold_tip_into_committed(&mut self) -> Result<(), CcError> {
        let shared = self.shared_mut()?;
        let tip = std::mem::take(&mut shared.tip_current_state);
        for (key, value) in tip {
            shared.transitioning_state.insert(key, value);
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────
    // Dispatch
    // ─────────────────────────────────────────────────────────────────

    fn dispatch(&mut self, cmd: &str, query: &CborParams) -> Result<(), CcError> {
        // Hard cutover: once the chain passes creditcoin.v2block, 1.x
        // transactions are rejected outright.
        if let Some(text) = self.rt.settings.get(V2BLOCK_KEY) {
            if let Ok(v2block) = parse_positive(&text) {
                if !v2block.is_zero()
                    && self.last_block_int()? > v2block
                    && self.request.family_version.starts_with('1')
                {
                    return Err(CcError::invalid(
                        "Version 1 transactions are not accepted after 2.0",
                    ));
                }
            }
        }

        if cmd.eq_ignore_ascii_case("SendFunds") {
            self.send_funds(query)
        } else if cmd.eq_ignore_ascii_case("RegisterAddress") {
            self.register_address(query)
        } else if cmd.eq_ignore_ascii_case("RegisterTransfer") {
            self.register_transfer(query)
        } else if cmd.eq_ignore_ascii_case("AddAskOrder") {
            self.add_ask_order(query)
        } else if cmd.eq_ignore_ascii_case("AddBidOrder") {
            self.add_bid_order(query)
        } else if cmd.eq_ignore_ascii_case("AddOffer") {
            self.add_offer(query)
        } else if cmd.eq_ignore_ascii_case("AddDealOrder") {
            self.add_deal_order(query)
        } else if cmd.eq_ignore_ascii_case("CompleteDealOrder") {
            self.complete_deal_order(query)
        } else if cmd.eq_ignore_ascii_case("LockDealOrder") {
            self.lock_deal_order(query)
        } else if cmd.eq_ignore_ascii_case("CloseDealOrder") {
            self.close_deal_order(query)
        } else if cmd.eq_ignore_ascii_case("Exempt") {
            self.exempt(query)
        } else if cmd.eq_ignore_ascii_case("AddRepaymentOrder") {
            self.add_repayment_order(query)
        } else if cmd.eq_ignore_ascii_case("CompleteRepaymentOrder") {
            self.complete_repayment_order(query)
        } else if cmd.eq_ignore_ascii_case("CloseRepaymentOrder") {
            self.close_repayment_order(query)
        } else if cmd.eq_ignore_ascii_case("CollectCoins") {
            self.collect_coins(query)
        } else if cmd.eq_ignore_ascii_case("Housekeeping") {
            self.housekeeping(query)
        } else {
            Err(CcError::invalid(format!("invalid command: '{}'", cmd)))
        }
    }

    // ─────────────────────────────────────────────────────────────────
    // State access (replay-layered)
    // ─────────────────────────────────────────────────────────────────

    /// Index of the last committed block from this transaction's viewpoint.
    fn last_block_int(&self) -> Result<BigInt, CcError> {
        if self.ctx.transitioning {
            Ok(BigInt::from(self.ctx.tip))
        } else {
            Ok(BigInt::from(self.state.tip()?) - 1)
        }
    }

    fn last_block(&self) -> Result<String, CcError> {
        Ok(self.last_block_int()?.to_string())
    }

    fn get_sighash(&self) -> Result<String, CcError> {
        if self.ctx.transitioning {
            Ok(self.ctx.sighash.clone())
        } else {
            Ok(sighash_from_public_key(&self.request.signer_public_key)?)
        }
    }

    fn get_guid(&self) -> String {
        if self.ctx.transitioning {
            self.ctx.guid.clone()
        } else {
            self.request.nonce.clone()
        }
    }

    fn get_state(&self, id: &str) -> Result<Option<Vec<u8>>, CcError> {
        if self.ctx.transitioning {
            if let Some(value) = self.ctx.current_state.get(id) {
                return Ok(Some(value.clone()));
            }
            let shared = self.shared_ref()?;
            if let Some(value) = shared.tip_current_state.get(id) {
                return Ok(Some(value.clone()));
            }
            if let Some(value) = shared.transitioning_state.get(id) {
                return Ok(Some(value.clone()));
            }
            Ok(None)
        } else {
            self.state.get(id)
        }
    }

    /// Read one entry; with `existing` the entry must be present and
    /// non-empty.
    fn get_state_data(&self, id: &str, existing: bool) -> Result<Vec<u8>, CcError> {
        let data = self.get_state(id)?.unwrap_or_default();
        if existing && data.is_empty() {
            return Err(CcError::invalid(format!("Existing state expected {}", id)));
        }
        Ok(data)
    }

    fn set_states(&mut self, entries: Vec<(String, Vec<u8>)>) -> Result<(), CcError> {
        if self.ctx.transitioning {
            for (key, value) in &entries {
                self.ctx.current_state.insert(key.clone(), value.clone());
            }
        }
        if !self.ctx.replaying {
            self.state.set(&entries)?;
        }
        Ok(())
    }

    fn set_state(&mut self, id: &str, data: Vec<u8>) -> Result<(), CcError> {
        self.set_states(vec![(id.to_string(), data)])
    }

    fn delete_state(&mut self, id: &str) -> Result<(), CcError> {
        if self.ctx.transitioning {
            // An empty value is the deletion marker inside the layered maps.
            self.ctx.current_state.insert(id.to_string(), Vec::new());
        }
        if !self.ctx.replaying {
            self.state.delete(id)?;
        }
        Ok(())
    }

    /// Every non-empty entry under `prefix`, through the replay layers when
    /// transitioning, paginated from the host otherwise.
    fn collect_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, CcError> {
        if self.ctx.transitioning {
            let shared = self.shared_ref()?;
            let mut overlay = self.ctx.current_state.clone();
            for (key, value) in &shared.tip_current_state {
                overlay.entry(key.clone()).or_insert_with(|| value.clone());
            }
            let mut out = Vec::new();
            for (key, value) in &shared.transitioning_state {
                if !overlay.contains_key(key) && key.starts_with(prefix) && !value.is_empty() {
                    out.push((key.clone(), value.clone()));
                }
            }
            for (key, value) in overlay {
                if key.starts_with(prefix) && !value.is_empty() {
                    out.push((key, value));
                }
            }
            Ok(out)
        } else {
            scan_all(self.rt.contextless.as_ref(), prefix).map_err(|e| match e {
                CcError::InvalidTransaction(_) => e,
                CcError::InternalError(m) => CcError::InvalidTransaction(m),
            })
        }
    }

    // ─────────────────────────────────────────────────────────────────
    // Fees, rewards, gateway
    // ─────────────────────────────────────────────────────────────────

    /// Debit the flat fee from an existing wallet.
    fn charge(&self, sighash: &str) -> Result<(String, Wallet), CcError> {
        let wallet_id = wallet_id_of(sighash);
        let state_data = self.get_state_data(&wallet_id, true)?;
        let mut wallet: Wallet = decode(&state_data)?;

        let balance = parse_positive(&wallet.amount)?;
        if balance < *cc_core::tx_fee() {
            return Err(CcError::invalid("Insufficient funds"));
        }
        wallet.amount = (balance - cc_core::tx_fee()).to_string();
        Ok((wallet_id, wallet))
    }

    /// Stage a fee receipt for this transaction.
    fn add_fee(&self, sighash: &str, states: &mut Vec<(String, Vec<u8>)>) -> Result<(), CcError> {
        let guid = self.get_guid();
        let fee_id = make_address(FEE, &guid);
        let fee = Fee {
            sighash: sighash.to_string(),
            block: self.last_block()?,
        };
        add_state(states, &fee_id, &fee);
        Ok(())
    }

    fn add_fee_and_wallet(
        &self,
        sighash: &str,
        states: &mut Vec<(String, Vec<u8>)>,
        wallet_id: &str,
        wallet: &Wallet,
    ) -> Result<(), CcError> {
        self.add_fee(sighash, states)?;
        add_state(states, wallet_id, wallet);
        Ok(())
    }

    fn verify_gateway_signer(&self) -> Result<(), CcError> {
        if self.rt.transitioning() {
            return Ok(());
        }
        let my_sighash = self.get_sighash()?;
        let mut configured = self.rt.settings.get(GATEWAY_SIGHASH_KEY);
        if configured.is_none() {
            // The cache may simply not have run yet; force one scan.
            crate::settings::refresh(self.rt);
            configured = self.rt.settings.get(GATEWAY_SIGHASH_KEY);
            if configured.is_none() {
                return Err(CcError::invalid("Gateway sighash is not configured"));
            }
        }
        if configured.as_deref() != Some(my_sighash.as_str()) {
            return Err(CcError::invalid(
                "Only gateway sighash can perform this operation",
            ));
        }
        Ok(())
    }

    /// Off-chain attestation; skipped entirely while replaying history.
    fn verify_gateway(&self, command: &str) -> Result<(), CcError> {
        if self.rt.transitioning() {
            return Ok(());
        }
        self.rt.gateway.verify(command)
    }

    /// Credit the block reward of `block_idx` to its signer's wallet.
    fn award(
        &mut self,
        new_formula: bool,
        block_idx: &BigInt,
        signer: &str,
    ) -> Result<(), CcError> {
        let reward = block_reward(new_formula, block_idx);
        if reward > BigInt::zero() {
            let signer_sighash = sha512_id(signer);
            let wallet_id = wallet_id_of(&signer_sighash);
            let state_data = self.get_state_data(&wallet_id, false)?;
            let wallet = if state_data.is_empty() {
                Wallet {
                    amount: reward.to_string(),
                }
            } else {
                let mut wallet: Wallet = decode(&state_data)?;
                wallet.amount = (parse_positive(&wallet.amount)? + reward).to_string();
                wallet
            };
            let mut states = Vec::new();
            add_state(&mut states, &wallet_id, &wallet);
            self.set_states(states)?;
        }
        Ok(())
    }

    /// Pay rewards for every block in (processed, upto]; upto == 0 means
    /// the idle path covering the next BLOCK_REWARD_PROCESSING_COUNT.
    fn reward(&mut self, processed: &BigInt, upto: &BigInt) -> Result<(), CcError> {
        match self.reward_inner(processed, upto) {
            Err(CcError::InternalError(_)) => Err(CcError::invalid(RPC_FAILURE)),
            other => other,
        }
    }

    fn reward_inner(&mut self, processed: &BigInt, upto: &BigInt) -> Result<(), CcError> {
        let mut new_formula = false;

        if self.ctx.transitioning {
            let update_block =
                if (AMBIGUOUS_UPDATE_TIP_FIRST..=AMBIGUOUS_UPDATE_TIP_LAST).contains(&self.ctx.tip) {
                    TRANSITION_UPDATE_BLOCK_EARLY
                } else {
                    TRANSITION_UPDATE_BLOCK_LATE
                };
            if BigInt::from(update_block) + BigInt::from(500) < *processed {
                new_formula = true;
            }

            // Signers come from the migration log; the recorded order walks
            // the range tip-down.
            let mut i = upto.clone();
            while &i > processed {
                let idx = i
                    .to_usize()
                    .ok_or_else(|| CcError::internal("block index out of range"))?;
                let signer = self
                    .replay_engine()?
                    .blocks
                    .get(idx)
                    .map(|b| b.signer.clone())
                    .ok_or_else(|| CcError::internal("block index outside migration log"))?;
                self.award(new_formula, &i, &signer)?;
                i -= 1;
            }
            return Ok(());
        }

        if let Some(text) = self.rt.settings.get(UPDATE1_KEY) {
            let update_block = parse_positive(&text)?;
            if update_block + BigInt::from(500) < *processed {
                new_formula = true;
            }
        }

        let last_block_idx = if upto.is_zero() {
            processed + BigInt::from(BLOCK_REWARD_PROCESSING_COUNT)
        } else {
            upto.clone()
        };

        let block_signature = &self.request.block_signature;
        if block_signature.is_empty() {
            let mut i = processed + BigInt::from(1u8);
            while i <= last_block_idx {
                let height = i
                    .to_u64()
                    .ok_or_else(|| CcError::internal("block index out of range"))?;
                let signer = self.rt.contextless.sig_by_num(height)?;
                self.award(new_formula, &i, &signer)?;
                i += 1;
            }
        } else {
            let first = last_block_idx
                .to_u64()
                .ok_or_else(|| CcError::internal("block index out of range"))?;
            let last = (processed + BigInt::from(1u8))
                .to_u64()
                .ok_or_else(|| CcError::internal("block index out of range"))?;
            let signatures = self
                .rt
                .contextless
                .reward_block_signatures(block_signature, first, last)?;
            let mut i = processed.clone();
            for signature in signatures {
                i += 1;
                self.award(new_formula, &i, &signature)?;
            }
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────
    // Verbs
    // ─────────────────────────────────────────────────────────────────

    fn send_funds(&mut self, query: &CborParams) -> Result<(), CcError> {
        let (amount_text, amount) = query.get_bigint("p1", "amount")?;
        let sighash = query.get_string_lower("p2", "sighash")?;

        let my_sighash = self.get_sighash()?;
        if sighash == my_sighash {
            return Err(CcError::invalid("Invalid destination"));
        }

        let src_wallet_id = wallet_id_of(&my_sighash);
        let state_data = self.get_state_data(&src_wallet_id, true)?;
        let mut src_wallet: Wallet = decode(&state_data)?;

        let amount_plus_fee = &amount + cc_core::tx_fee();
        let mut src_balance = parse_positive(&src_wallet.amount)?;
        if src_balance < amount_plus_fee {
            return Err(CcError::invalid("Insufficient funds"));
        }
        src_balance -= amount_plus_fee;
        src_wallet.amount = src_balance.to_string();

        let dst_wallet_id = wallet_id_of(&sighash);
        let state_data = self.get_state_data(&dst_wallet_id, false)?;
        let dst_wallet = if state_data.is_empty() {
            Wallet { amount: amount_text }
        } else {
            let mut wallet: Wallet = decode(&state_data)?;
            wallet.amount = (parse_positive(&wallet.amount)? + &amount).to_string();
            wallet
        };

        let mut states = Vec::new();
        add_state(&mut states, &dst_wallet_id, &dst_wallet);
        self.add_fee_and_wallet(&my_sighash, &mut states, &src_wallet_id, &src_wallet)?;
        self.set_states(states)
    }

    fn register_address(&mut self, query: &CborParams) -> Result<(), CcError> {
        let blockchain = query.get_string_lower("p1", "blockchain")?;
        let address_string = query.get_string("p2", "address")?;
        let network = query.get_string_lower("p3", "network")?;
        let address_string_lower = address_string.to_lowercase();

        let my_sighash = self.get_sighash()?;
        let (wallet_id, wallet) = self.charge(&my_sighash)?;

        let id = make_address(
            ADDR,
            &format!("{}{}{}", blockchain, address_string_lower, network),
        );
        let state_data = self.get_state_data(&id, false)?;
        if !state_data.is_empty() {
            return Err(CcError::invalid("The address has been already registered"));
        }

        let address = Address {
            blockchain,
            value: address_string,
            network,
            sighash: my_sighash.clone(),
        };

        let mut states = Vec::new();
        add_state(&mut states, &id, &address);
        add_state(&mut states, &wallet_id, &wallet);
        self.add_fee(&my_sighash, &mut states)?;
        self.set_states(states)
    }

    fn register_transfer(&mut self, query: &CborParams) -> Result<(), CcError> {
        let my_sighash = self.get_sighash()?;
        let (wallet_id, wallet) = self.charge(&my_sighash)?;

        let gain_string = query.get_string("p1", "gain")?;
        let gain = parse_bigint(&gain_string, true)?;
        let order_id = query.get_string_lower("p2", "orderId")?;
        let blockchain_tx_id = query.get_string_lower("p3", "blockchainTxId")?;

        let src_address_id;
        let dst_address_id;
        let mut amount_string;

        let state_data = self.get_state_data(&order_id, true)?;
        if order_id.starts_with(&format!("{}{}", namespace_prefix(), DEAL_ORDER)) {
            let order: DealOrder = decode(&state_data)?;
            if gain.is_zero() {
                src_address_id = order.src_address;
                dst_address_id = order.dst_address;
            } else {
                dst_address_id = order.src_address;
                src_address_id = order.dst_address;
            }
            amount_string = order.amount;
        } else if order_id.starts_with(&format!("{}{}", namespace_prefix(), REPAYMENT_ORDER)) {
            if !gain.is_zero() {
                return Err(CcError::invalid("gain must be 0 for repayment orders"));
            }
            let order: RepaymentOrder = decode(&state_data)?;
            src_address_id = order.src_address;
            dst_address_id = order.dst_address;
            amount_string = order.amount;
        } else {
            return Err(CcError::invalid("unexpected referred order"));
        }

        let state_data = self.get_state_data(&src_address_id, true)?;
        let src_address: Address = decode(&state_data)?;
        let state_data = self.get_state_data(&dst_address_id, true)?;
        let dst_address: Address = decode(&state_data)?;

        if src_address.sighash != my_sighash {
            return Err(CcError::invalid("Only the owner can register"));
        }
        let blockchain = src_address.blockchain.clone();
        if dst_address.blockchain != blockchain {
            return Err(CcError::invalid(
                "Source and destination addresses must be on the same blockchain",
            ));
        }
        let network = src_address.network.clone();
        if dst_address.network != network {
            return Err(CcError::invalid(
                "Source and destination addresses must be on the same network",
            ));
        }

        let transfer_id = make_address(
            TRANSFER,
            &format!("{}{}{}", blockchain, blockchain_tx_id, network),
        );
        let state_data = self.get_state_data(&transfer_id, false)?;
        if !state_data.is_empty() {
            return Err(CcError::invalid("The transfer has been already registered"));
        }

        if blockchain_tx_id == "0" {
            amount_string = "0".to_string();
        } else {
            let amount = parse_positive(&amount_string)? + &gain;
            amount_string = amount.to_string();

            let command = format!(
                "{} verify {} {} {} {} {} {}",
                blockchain,
                src_address.value,
                dst_address.value,
                order_id,
                amount_string,
                blockchain_tx_id,
                network
            );
            self.verify_gateway(&command)?;
        }

        let transfer = Transfer {
            blockchain,
            src_address: src_address_id,
            dst_address: dst_address_id,
            order: order_id,
            amount: amount_string,
            tx: blockchain_tx_id,
            block: self.last_block()?,
            processed: false,
            sighash: my_sighash.clone(),
        };

        let mut states = Vec::new();
        add_state(&mut states, &transfer_id, &transfer);
        self.add_fee_and_wallet(&my_sighash, &mut states, &wallet_id, &wallet)?;
        self.set_states(states)
    }

    fn add_ask_order(&mut self, query: &CborParams) -> Result<(), CcError> {
        let my_sighash = self.get_sighash()?;
        let (wallet_id, wallet) = self.charge(&my_sighash)?;

        let address_id = query.get_string_lower("p1", "addressId")?;
        let (amount_string, _) = query.get_bigint("p2", "amount")?;
        let (interest, _) = query.get_bigint("p3", "interest")?;
        let (maturity, _) = query.get_bigint("p4", "maturity")?;
        let (fee, _) = query.get_bigint("p5", "fee")?;
        let expiration = query.get_u64("p6", "expiration")?;

        let guid = self.get_guid();
        let id = make_address(ASK_ORDER, &guid);
        let state_data = self.get_state_data(&id, false)?;
        if !state_data.is_empty() {
            return Err(CcError::invalid("Duplicate id"));
        }

        let state_data = self.get_state_data(&address_id, true)?;
        let address: Address = decode(&state_data)?;
        if address.sighash != my_sighash {
            return Err(CcError::invalid("The address doesn't belong to the party"));
        }

        let ask_order = AskOrder {
            blockchain: address.blockchain,
            address: address_id,
            amount: amount_string,
            interest,
            maturity,
            fee,
            expiration,
            block: self.last_block()?,
            sighash: my_sighash.clone(),
        };

        let mut states = Vec::new();
        add_state(&mut states, &id, &ask_order);
        self.add_fee_and_wallet(&my_sighash, &mut states, &wallet_id, &wallet)?;
        self.set_states(states)
    }

    fn add_bid_order(&mut self, query: &CborParams) -> Result<(), CcError> {
        let my_sighash = self.get_sighash()?;
        let (wallet_id, wallet) = self.charge(&my_sighash)?;

        let address_id = query.get_string_lower("p1", "addressId")?;
        let (amount_string, _) = query.get_bigint("p2", "amount")?;
        let (interest, _) = query.get_bigint("p3", "interest")?;
        let (maturity, _) = query.get_bigint("p4", "maturity")?;
        let (fee, _) = query.get_bigint("p5", "fee")?;
        let expiration = query.get_u64("p6", "expiration")?;

        let guid = self.get_guid();
        let id = make_address(BID_ORDER, &guid);
        let state_data = self.get_state_data(&id, false)?;
        if !state_data.is_empty() {
            return Err(CcError::invalid("Duplicate id"));
        }

        let state_data = self.get_state_data(&address_id, true)?;
        let address: Address = decode(&state_data)?;
        if address.sighash != my_sighash {
            return Err(CcError::invalid("The address doesn't belong to the party"));
        }

        let bid_order = BidOrder {
            blockchain: address.blockchain,
            address: address_id,
            amount: amount_string,
            interest,
            maturity,
            fee,
            expiration,
            block: self.last_block()?,
            sighash: my_sighash.clone(),
        };

        let mut states = Vec::new();
        add_state(&mut states, &id, &bid_order);
        self.add_fee_and_wallet(&my_sighash, &mut states, &wallet_id, &wallet)?;
        self.set_states(states)
    }

    fn add_offer(&mut self, query: &CborParams) -> Result<(), CcError> {
        let my_sighash = self.get_sighash()?;
        let (wallet_id, wallet) = self.charge(&my_sighash)?;

        let ask_order_id = query.get_string_lower("p1", "askOrderId")?;
        let bid_order_id = query.get_string_lower("p2", "bidOrderId")?;
        let expiration = query.get_u64("p3", "expiration")?;

        let id = make_address(OFFER, &format!("{}{}", ask_order_id, bid_order_id));
        let state_data = self.get_state_data(&id, false)?;
        if !state_data.is_empty() {
            return Err(CcError::invalid("Duplicate id"));
        }

        let state_data = self.get_state_data(&ask_order_id, true)?;
        let ask_order: AskOrder = decode(&state_data)?;
        if ask_order.sighash != my_sighash {
            return Err(CcError::invalid("Only an investor can add an offer"));
        }
        let head = self.last_block_int()?;
        let start = parse_positive(&ask_order.block)?;
        let elapsed = &head - &start;
        if BigInt::from(ask_order.expiration) < elapsed {
            return Err(CcError::invalid("The order has expired"));
        }

        let state_data = self.get_state_data(&ask_order.address, true)?;
        let src_address: Address = decode(&state_data)?;

        let state_data = self.get_state_data(&bid_order_id, true)?;
        let bid_order: BidOrder = decode(&state_data)?;
        if bid_order.sighash == my_sighash {
            return Err(CcError::invalid("The ask and bid orders are from the same party"));
        }
        let start = parse_positive(&bid_order.block)?;
        let elapsed = &head - &start;
        if BigInt::from(bid_order.expiration) < elapsed {
            return Err(CcError::invalid("The order has expired"));
        }

        let state_data = self.get_state_data(&bid_order.address, true)?;
        let dst_address: Address = decode(&state_data)?;

        if src_address.blockchain != dst_address.blockchain
            || src_address.network != dst_address.network
        {
            return Err(CcError::invalid(
                "The ask and bid orders must be on the same blockchain and network",
            ));
        }

        // Rates compare by integer division: interest per maturity tick.
        let ask_maturity = parse_positive(&ask_order.maturity)?;
        let bid_maturity = parse_positive(&bid_order.maturity)?;
        let rates_mismatch = if ask_maturity.is_zero() || bid_maturity.is_zero() {
            true
        } else {
            parse_positive(&ask_order.interest)? / ask_maturity
                > parse_positive(&bid_order.interest)? / bid_maturity
        };
        if ask_order.amount != bid_order.amount
            || parse_positive(&ask_order.fee)? > parse_positive(&bid_order.fee)?
            || rates_mismatch
        {
            return Err(CcError::invalid("The ask and bid orders do not match"));
        }

        let offer = Offer {
            blockchain: src_address.blockchain,
            ask_order: ask_order_id,
            bid_order: bid_order_id,
            expiration,
            block: self.last_block()?,
            sighash: my_sighash.clone(),
        };

        let mut states = Vec::new();
        add_state(&mut states, &id, &offer);
        self.add_fee_and_wallet(&my_sighash, &mut states, &wallet_id, &wallet)?;
        self.set_states(states)
    }

    fn add_deal_order(&mut self, query: &CborParams) -> Result<(), CcError> {
        let offer_id = query.get_string_lower("p1", "offerId")?;
        let expiration = query.get_u64("p2", "expiration")?;

        let id = make_address(DEAL_ORDER, &offer_id);
        let state_data = self.get_state_data(&id, false)?;
        if !state_data.is_empty() {
            return Err(CcError::invalid("Duplicate id"));
        }

        let my_sighash = self.get_sighash()?;

        let state_data = self.get_state_data(&offer_id, true)?;
        let offer: Offer = decode(&state_data)?;
        let head = self.last_block_int()?;
        let start = parse_positive(&offer.block)?;
        let elapsed = &head - &start;
        if BigInt::from(offer.expiration) < elapsed {
            return Err(CcError::invalid("The order has expired"));
        }

        let state_data = self.get_state_data(&offer.bid_order, true)?;
        let bid_order: BidOrder = decode(&state_data)?;
        if bid_order.sighash != my_sighash {
            return Err(CcError::invalid("Only a fundraiser can add a deal order"));
        }
        let state_data = self.get_state_data(&offer.ask_order, true)?;
        let ask_order: AskOrder = decode(&state_data)?;

        let wallet_id = wallet_id_of(&my_sighash);
        let state_data = self.get_state_data(&wallet_id, true)?;
        let mut wallet: Wallet = decode(&state_data)?;
        let mut balance = parse_positive(&wallet.amount)?;
        let fee = parse_positive(&bid_order.fee)? + cc_core::tx_fee();
        if balance < fee {
            return Err(CcError::invalid("Insufficient funds"));
        }
        balance -= fee;
        wallet.amount = balance.to_string();

        let deal_order = DealOrder {
            blockchain: offer.blockchain,
            src_address: ask_order.address,
            dst_address: bid_order.address,
            amount: bid_order.amount,
            interest: bid_order.interest,
            maturity: bid_order.maturity,
            fee: bid_order.fee,
            expiration,
            block: self.last_block()?,
            loan_transfer: String::new(),
            lock: String::new(),
            repayment_transfer: String::new(),
            sighash: my_sighash.clone(),
        };

        let mut states = Vec::new();
        add_state(&mut states, &id, &deal_order);
        self.add_fee_and_wallet(&my_sighash, &mut states, &wallet_id, &wallet)?;
        self.set_states(states)?;
        self.delete_state(&offer.ask_order)?;
        self.delete_state(&offer.bid_order)?;
        self.delete_state(&offer_id)
    }

    fn complete_deal_order(&mut self, query: &CborParams) -> Result<(), CcError> {
        let deal_order_id = query.get_string_lower("p1", "dealOrderId")?;
        let transfer_id = query.get_string_lower("p2", "transferId")?;

        let my_sighash = self.get_sighash()?;

        let state_data = self.get_state_data(&deal_order_id, true)?;
        let mut deal_order: DealOrder = decode(&state_data)?;
        if !deal_order.loan_transfer.is_empty() {
            return Err(CcError::invalid("The deal has been already completed"));
        }

        let state_data = self.get_state_data(&deal_order.src_address, true)?;
        let src_address: Address = decode(&state_data)?;
        if src_address.sighash != my_sighash {
            return Err(CcError::invalid("Only an investor can complete a deal"));
        }
        let head = self.last_block_int()?;
        let start = parse_positive(&deal_order.block)?;
        let elapsed = &head - &start;
        if BigInt::from(deal_order.expiration) < elapsed {
            return Err(CcError::invalid("The order has expired"));
        }

        let state_data = self.get_state_data(&transfer_id, true)?;
        let mut transfer: Transfer = decode(&state_data)?;

        if transfer.order != deal_order_id || transfer.amount != deal_order.amount {
            return Err(CcError::invalid("The transfer doesn't match the deal order"));
        }
        if transfer.sighash != my_sighash {
            return Err(CcError::invalid("The transfer doesn't match the signer"));
        }
        if transfer.processed {
            return Err(CcError::invalid("The transfer has been already processed"));
        }
        transfer.processed = true;

        // The deal fee flows to the investor here, net of the flat fee; a
        // deal fee below TX_FEE makes this a debit.
        let wallet_id = wallet_id_of(&my_sighash);
        let state_data = self.get_state_data(&wallet_id, true)?;
        let fee = parse_positive(&deal_order.fee)? - cc_core::tx_fee();

        let mut wallet: Wallet = decode(&state_data)?;
        let balance = parse_positive(&wallet.amount)? + fee;
        if balance < BigInt::zero() {
            return Err(CcError::invalid("Insufficient funds"));
        }
        wallet.amount = balance.to_string();

        deal_order.loan_transfer = transfer_id.clone();
        // The repayment clock starts at completion, not at deal creation.
        deal_order.block = self.last_block()?;

        let mut states = Vec::new();
        add_state(&mut states, &deal_order_id, &deal_order);
        add_state(&mut states, &transfer_id, &transfer);
        self.add_fee_and_wallet(&my_sighash, &mut states, &wallet_id, &wallet)?;
        self.set_states(states)
    }

    fn lock_deal_order(&mut self, query: &CborParams) -> Result<(), CcError> {
        let my_sighash = self.get_sighash()?;
        let (wallet_id, wallet) = self.charge(&my_sighash)?;

        let deal_order_id = query.get_string_lower("p1", "dealOrderId")?;

        let state_data = self.get_state_data(&deal_order_id, true)?;
        let mut deal_order: DealOrder = decode(&state_data)?;
        if !deal_order.lock.is_empty() {
            return Err(CcError::invalid("The deal has been already locked"));
        }
        if deal_order.loan_transfer.is_empty() {
            return Err(CcError::invalid("The deal has not been completed yet"));
        }
        if my_sighash != deal_order.sighash {
            return Err(CcError::invalid("Only a fundraiser can lock a deal"));
        }

        deal_order.lock = my_sighash.clone();

        let mut states = Vec::new();
        add_state(&mut states, &deal_order_id, &deal_order);
        self.add_fee_and_wallet(&my_sighash, &mut states, &wallet_id, &wallet)?;
        self.set_states(states)
    }

    fn close_deal_order(&mut self, query: &CborParams) -> Result<(), CcError> {
        let my_sighash = self.get_sighash()?;
        let (wallet_id, wallet) = self.charge(&my_sighash)?;

        let deal_order_id = query.get_string_lower("p1", "dealOrderId")?;
        let transfer_id = query.get_string_lower("p2", "transferId")?;

        let state_data = self.get_state_data(&deal_order_id, true)?;
        let mut deal_order: DealOrder = decode(&state_data)?;
        if !deal_order.repayment_transfer.is_empty() {
            return Err(CcError::invalid("The deal has been already closed"));
        }
        if my_sighash != deal_order.sighash {
            return Err(CcError::invalid("Only a fundraiser can close a deal"));
        }
        if deal_order.lock != my_sighash {
            return Err(CcError::invalid("The deal must be locked first"));
        }

        let state_data = self.get_state_data(&transfer_id, true)?;
        let mut repayment_transfer: Transfer = decode(&state_data)?;

        if repayment_transfer.order != deal_order_id {
            return Err(CcError::invalid("The transfer doesn't match the order"));
        }
        if repayment_transfer.sighash != my_sighash {
            return Err(CcError::invalid("The transfer doesn't match the signer"));
        }
        if repayment_transfer.processed {
            return Err(CcError::invalid("The transfer has been already processed"));
        }
        repayment_transfer.processed = true;

        let state_data = self.get_state_data(&deal_order.loan_transfer, true)?;
        let loan_transfer: Transfer = decode(&state_data)?;

        let head = self.last_block_int()?;
        let start = parse_positive(&loan_transfer.block)?;
        let maturity = parse_positive(&deal_order.maturity)?;
        if maturity.is_zero() {
            return Err(CcError::invalid("The transfer doesn't match the order"));
        }

        // Every started maturity period accrues one tick of interest.
        let ticks = ((&head - &start) + &maturity) / &maturity;
        let amount = calc_interest(
            &parse_positive(&deal_order.amount)?,
            &ticks,
            &parse_positive(&deal_order.interest)?,
        );
        if parse_positive(&repayment_transfer.amount)? < amount {
            return Err(CcError::invalid("The transfer doesn't match the order"));
        }

        deal_order.repayment_transfer = transfer_id.clone();

        let mut states = Vec::new();
        add_state(&mut states, &deal_order_id, &deal_order);
        add_state(&mut states, &transfer_id, &repayment_transfer);
        self.add_fee_and_wallet(&my_sighash, &mut states, &wallet_id, &wallet)?;
        self.set_states(states)
    }

    fn exempt(&mut self, query: &CborParams) -> Result<(), CcError> {
        let my_sighash = self.get_sighash()?;
        let (wallet_id, wallet) = self.charge(&my_sighash)?;

        let deal_order_id = query.get_string_lower("p1", "dealOrderId")?;
        let transfer_id = query.get_string_lower("p2", "transferId")?;

        let state_data = self.get_state_data(&deal_order_id, true)?;
        let mut deal_order: DealOrder = decode(&state_data)?;
        if !deal_order.repayment_transfer.is_empty() {
            return Err(CcError::invalid("The deal has been already closed"));
        }

        let state_data = self.get_state_data(&transfer_id, true)?;
        let mut transfer: Transfer = decode(&state_data)?;

        if transfer.order != deal_order_id {
            return Err(CcError::invalid("The transfer doesn't match the order"));
        }
        if transfer.processed {
            return Err(CcError::invalid("The transfer has been already processed"));
        }
        transfer.processed = true;

        let state_data = self.get_state_data(&deal_order.src_address, true)?;
        let address: Address = decode(&state_data)?;

        if my_sighash != address.sighash {
            return Err(CcError::invalid("Only an investor can exempt a deal"));
        }

        deal_order.repayment_transfer = transfer_id.clone();

        let mut states = Vec::new();
        add_state(&mut states, &deal_order_id, &deal_order);
        add_state(&mut states, &transfer_id, &transfer);
        self.add_fee_and_wallet(&my_sighash, &mut states, &wallet_id, &wallet)?;
        self.set_states(states)
    }

    fn add_repayment_order(&mut self, query: &CborParams) -> Result<(), CcError> {
        let my_sighash = self.get_sighash()?;
        let (wallet_id, wallet) = self.charge(&my_sighash)?;

        let deal_order_id = query.get_string_lower("p1", "dealOrderId")?;
        let address_id = query.get_string_lower("p2", "addressId")?;
        let (amount, _) = query.get_bigint("p3", "amount")?;
        let expiration = query.get_u64("p4", "expiration")?;

        let guid = self.get_guid();
        let id = make_address(REPAYMENT_ORDER, &guid);
        let state_data = self.get_state_data(&id, false)?;
        if !state_data.is_empty() {
            return Err(CcError::invalid("Duplicated id"));
        }

        let state_data = self.get_state_data(&deal_order_id, false)?;
        let deal_order: DealOrder = decode(&state_data)?;
        if deal_order.sighash == my_sighash {
            return Err(CcError::invalid("Fundraisers cannot create repayment orders"));
        }
        if deal_order.loan_transfer.is_empty() || !deal_order.repayment_transfer.is_empty() {
            return Err(CcError::invalid(
                "A repayment order can be created only for a deal with an active loan",
            ));
        }

        let state_data = self.get_state_data(&deal_order.src_address, false)?;
        let src_address: Address = decode(&state_data)?;
        if src_address.sighash == my_sighash {
            return Err(CcError::invalid("Investors cannot create repayment orders"));
        }

        let state_data = self.get_state_data(&address_id, false)?;
        let new_address: Address = decode(&state_data)?;

        if src_address.blockchain != new_address.blockchain
            || src_address.network != new_address.network
            || src_address.value == new_address.value
        {
            return Err(CcError::invalid("Invalid address"));
        }

        let repayment_order = RepaymentOrder {
            blockchain: src_address.blockchain,
            src_address: address_id,
            dst_address: deal_order.src_address,
            amount,
            expiration,
            block: self.last_block()?,
            deal: deal_order_id,
            sighash: my_sighash.clone(),
            previous_owner: String::new(),
            transfer: String::new(),
        };

        let mut states = Vec::new();
        add_state(&mut states, &id, &repayment_order);
        self.add_fee_and_wallet(&my_sighash, &mut states, &wallet_id, &wallet)?;
        self.set_states(states)
    }

    fn complete_repayment_order(&mut self, query: &CborParams) -> Result<(), CcError> {
        let my_sighash = self.get_sighash()?;
        let (wallet_id, wallet) = self.charge(&my_sighash)?;

        let repayment_order_id = query.get_string_lower("p1", "repaymentOrderId")?;

        let state_data = self.get_state_data(&repayment_order_id, true)?;
        let mut repayment_order: RepaymentOrder = decode(&state_data)?;

        let state_data = self.get_state_data(&repayment_order.dst_address, true)?;
        let address: Address = decode(&state_data)?;
        if address.sighash != my_sighash {
            return Err(CcError::invalid(
                "Only an investor can complete a repayment order",
            ));
        }

        let state_data = self.get_state_data(&repayment_order.deal, true)?;
        let mut deal_order: DealOrder = decode(&state_data)?;
        if !deal_order.lock.is_empty() {
            return Err(CcError::invalid("The deal has been already locked"));
        }

        repayment_order.previous_owner = my_sighash.clone();
        deal_order.lock = my_sighash.clone();

        let mut states = Vec::new();
        add_state(&mut states, &repayment_order_id, &repayment_order);
        add_state(&mut states, &repayment_order.deal, &deal_order);
        self.add_fee_and_wallet(&my_sighash, &mut states, &wallet_id, &wallet)?;
        self.set_states(states)
    }

    fn close_repayment_order(&mut self, query: &CborParams) -> Result<(), CcError> {
        let my_sighash = self.get_sighash()?;
        let (wallet_id, wallet) = self.charge(&my_sighash)?;

        let repayment_order_id = query.get_string_lower("p1", "repaymentOrderId")?;
        let transfer_id = query.get_string_lower("p2", "transferId")?;

        let state_data = self.get_state_data(&repayment_order_id, true)?;
        let mut repayment_order: RepaymentOrder = decode(&state_data)?;
        if repayment_order.sighash != my_sighash {
            return Err(CcError::invalid(
                "Only a collector can close a repayment order",
            ));
        }

        let state_data = self.get_state_data(&transfer_id, true)?;
        let mut transfer: Transfer = decode(&state_data)?;

        if transfer.order != repayment_order_id || transfer.amount != repayment_order.amount {
            return Err(CcError::invalid("The transfer doesn't match the order"));
        }
        if transfer.sighash != my_sighash {
            return Err(CcError::invalid("The transfer doesn't match the signer"));
        }
        if transfer.processed {
            return Err(CcError::invalid("The transfer has been already processed"));
        }
        transfer.processed = true;

        let state_data = self.get_state_data(&repayment_order.deal, true)?;
        let mut deal_order: DealOrder = decode(&state_data)?;
        let state_data = self.get_state_data(&deal_order.src_address, true)?;
        let src_address: Address = decode(&state_data)?;
        if deal_order.lock != src_address.sighash {
            return Err(CcError::invalid("The deal must be locked"));
        }

        // The collector takes over the loan: the deal's source address is
        // rebound to the repayment order's and the lock is released.
        deal_order.src_address = repayment_order.src_address.clone();
        deal_order.lock = String::new();
        repayment_order.transfer = transfer_id.clone();

        let mut states = Vec::new();
        add_state(&mut states, &repayment_order_id, &repayment_order);
        add_state(&mut states, &repayment_order.deal, &deal_order);
        add_state(&mut states, &transfer_id, &transfer);
        self.add_fee_and_wallet(&my_sighash, &mut states, &wallet_id, &wallet)?;
        self.set_states(states)
    }

    fn collect_coins(&mut self, query: &CborParams) -> Result<(), CcError> {
        let eth_address = query.get_string_lower("p1", "ethAddress")?;
        let (amount_string, amount) = query.get_bigint("p2", "amount")?;
        let blockchain_tx_id = query.get_string_lower("p3", "blockchainTxId")?;

        let id = make_address(ERC20, &blockchain_tx_id);
        let state_data = self.get_state_data(&id, false)?;
        if !state_data.is_empty() {
            return Err(CcError::invalid("Already collected"));
        }

        let my_sighash = self.get_sighash()?;

        let command = format!(
            "ethereum verify {} creditcoin {} {} {} unused",
            eth_address, my_sighash, amount_string, blockchain_tx_id
        );
        self.verify_gateway(&command)?;

        let wallet_id = wallet_id_of(&my_sighash);
        let state_data = self.get_state_data(&wallet_id, false)?;

        let wallet = if state_data.is_empty() {
            Wallet {
                amount: amount_string.clone(),
            }
        } else {
            let mut wallet: Wallet = decode(&state_data)?;
            wallet.amount = (parse_positive(&wallet.amount)? + &amount).to_string();
            wallet
        };

        let mut states = Vec::new();
        add_state(&mut states, &wallet_id, &wallet);
        states.push((id, amount_string.into_bytes()));
        self.set_states(states)
    }

    // ─────────────────────────────────────────────────────────────────
    // Housekeeping
    // ─────────────────────────────────────────────────────────────────

    fn housekeeping(&mut self, query: &CborParams) -> Result<(), CcError> {
        let (_, block_idx) = query.get_bigint("p1", "blockIdx")?;

        let processed_block_idx_id = format!(
            "{}{}{}",
            namespace_prefix(),
            PROCESSED_BLOCK,
            PROCESSED_BLOCK_ID
        );
        let state_data = self.get_state_data(&processed_block_idx_id, false)?;
        let last_processed_block_idx = if state_data.is_empty() {
            BigInt::zero()
        } else {
            parse_positive(&String::from_utf8_lossy(&state_data))?
        };

        if block_idx.is_zero() {
            // Idle path: any signer may nudge rewards forward once enough
            // confirmed blocks have stacked up.
            let head = self.last_block_int()?;
            if &last_processed_block_idx
                + BigInt::from(CONFIRMATION_COUNT * 2 + BLOCK_REWARD_PROCESSING_COUNT)
                < head
            {
                self.reward(&last_processed_block_idx, &BigInt::zero())?;
                let advanced =
                    last_processed_block_idx + BigInt::from(BLOCK_REWARD_PROCESSING_COUNT);
                self.set_state(&processed_block_idx_id, advanced.to_string().into_bytes())?;
            }
            return Ok(());
        }

        self.verify_gateway_signer()?;

        if block_idx < BigInt::from(CONFIRMATION_COUNT * 2)
            || block_idx <= last_processed_block_idx
        {
            return Ok(());
        }

        let tip = self.last_block_int()?;
        if block_idx >= &tip - BigInt::from(CONFIRMATION_COUNT) {
            println!("Premature processing");
            return Ok(());
        }

        let ns = namespace_prefix();

        for (address, data) in self.collect_prefix(&format!("{}{}", ns, ASK_ORDER))? {
            let ask_order: AskOrder = decode(&data)?;
            let start = parse_positive(&ask_order.block)?;
            let elapsed = &block_idx - &start;
            if BigInt::from(ask_order.expiration) < elapsed {
                self.delete_state(&address)?;
            }
        }

        for (address, data) in self.collect_prefix(&format!("{}{}", ns, BID_ORDER))? {
            let bid_order: BidOrder = decode(&data)?;
            let start = parse_positive(&bid_order.block)?;
            let elapsed = &block_idx - &start;
            if BigInt::from(bid_order.expiration) < elapsed {
                self.delete_state(&address)?;
            }
        }

        for (address, data) in self.collect_prefix(&format!("{}{}", ns, OFFER))? {
            let offer: Offer = decode(&data)?;
            let start = parse_positive(&offer.block)?;
            let elapsed = &block_idx - &start;
            if BigInt::from(offer.expiration) < elapsed {
                self.delete_state(&address)?;
            }
        }

        for (address, data) in self.collect_prefix(&format!("{}{}", ns, DEAL_ORDER))? {
            let deal_order: DealOrder = decode(&data)?;
            let start = parse_positive(&deal_order.block)?;
            let elapsed = &block_idx - &start;
            if BigInt::from(deal_order.expiration) < elapsed && deal_order.loan_transfer.is_empty()
            {
                // Refund the staged deal fee to the fundraiser, except in
                // the replay window below dealExpFixBlock, where the chain
                // was built without the refund and must stay that way.
                if self.ctx.tip == 0 || self.ctx.tip > self.rt.deal_exp_fix_block {
                    let wallet_id = wallet_id_of(&deal_order.sighash);
                    let state_data = self.get_state_data(&wallet_id, true)?;
                    let mut wallet: Wallet = decode(&state_data)?;
                    let balance =
                        parse_positive(&wallet.amount)? + parse_positive(&deal_order.fee)?;
                    wallet.amount = balance.to_string();

                    let mut states = Vec::new();
                    add_state(&mut states, &wallet_id, &wallet);
                    self.set_states(states)?;
                }
                self.delete_state(&address)?;
            }
        }

        for (address, data) in self.collect_prefix(&format!("{}{}", ns, REPAYMENT_ORDER))? {
            let repayment_order: RepaymentOrder = decode(&data)?;
            let start = parse_positive(&repayment_order.block)?;
            let elapsed = &block_idx - &start;
            if BigInt::from(repayment_order.expiration) < elapsed
                && repayment_order.previous_owner.is_empty()
            {
                self.delete_state(&address)?;
            }
        }

        for (address, data) in self.collect_prefix(&format!("{}{}", ns, FEE))? {
            let fee: Fee = decode(&data)?;
            let start = parse_positive(&fee.block)?;
            let elapsed = &block_idx - &start;
            if BigInt::from(YEAR_OF_BLOCKS) < elapsed {
                let wallet_id = wallet_id_of(&fee.sighash);
                let state_data = self.get_state(&wallet_id)?.unwrap_or_default();
                if state_data.is_empty() {
                    return Err(CcError::invalid(format!(
                        "Existing state expected {}",
                        wallet_id
                    )));
                }
                let mut wallet: Wallet = decode(&state_data)?;
                wallet.amount = (parse_positive(&wallet.amount)? + cc_core::tx_fee()).to_string();
                self.set_state(&wallet_id, wallet.encode_to_vec())?;
                self.delete_state(&address)?;
            }
        }

        self.reward(&last_processed_block_idx, &block_idx)?;
        self.set_state(&processed_block_idx_id, block_idx.to_string().into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wallet_ids_are_addresses() {
        let id = wallet_id_of("f358602934184b1524294e3981567f908b3dbb972d3f42d7e3cfe6c6430b");
        assert_eq!(id.len(), 70);
        assert!(id.starts_with("8a1a040000"));
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = decode::<Wallet>(&[0xff, 0xff, 0xff]).unwrap_err();
        assert_eq!(err, CcError::invalid("Failed to parse state entry"));
    }
}
