// Shared harness for processor integration tests: an in-memory chain with
// an always-approving gateway and direct access to the runtime internals.

use cc_core::messages::Wallet;
use cc_core::CcError;
use cc_processor::cbor::encode_params;
use cc_processor::handler::{CreditcoinHandler, TxRequest};
use cc_processor::settings::GATEWAY_SIGHASH_KEY;
use cc_processor::state::{InMemoryStateStore, StateStore};
use cc_processor::{Gateway, Runtime};
use prost::Message;
use std::cell::Cell;
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct ApprovingGateway;

impl Gateway for ApprovingGateway {
    fn verify(&self, _command: &str) -> Result<(), CcError> {
        Ok(())
    }
}

pub struct RejectingGateway;

impl Gateway for RejectingGateway {
    fn verify(&self, _command: &str) -> Result<(), CcError> {
        Err(CcError::invalid("Couldn't validate the transaction"))
    }
}

/// Two ready-made signers: hex public keys and their derived sighashes.
pub fn signer(tag: u8) -> String {
    format!("02{:02x}{}", tag, "ab".repeat(31))
}

pub fn sighash_of(key: &str) -> String {
    cc_crypto::sighash_from_public_key(key).unwrap()
}

pub struct TestChain {
    pub store: InMemoryStateStore,
    pub rt: Arc<Runtime>,
    pub handler: CreditcoinHandler,
    nonce: Cell<u64>,
}

impl TestChain {
    pub fn new() -> Self {
        Self::with_gateway(Arc::new(ApprovingGateway))
    }

    pub fn with_gateway(gateway: Arc<dyn Gateway>) -> Self {
        let store = InMemoryStateStore::new();
        let rt = Arc::new(Runtime::new(gateway, Arc::new(store.clone())));
        let handler = CreditcoinHandler::new(Arc::clone(&rt));
        TestChain {
            store,
            rt,
            handler,
            nonce: Cell::new(0),
        }
    }

    pub fn next_nonce(&self) -> String {
        self.nonce.set(self.nonce.get() + 1);
        format!("nonce{:04}", self.nonce.get())
    }

    pub fn apply(&self, key: &str, verb: &str, params: &[&str]) -> Result<String, CcError> {
        let nonce = self.next_nonce();
        self.apply_with_nonce(key, &nonce, verb, params)?;
        Ok(nonce)
    }

    pub fn apply_with_nonce(
        &self,
        key: &str,
        nonce: &str,
        verb: &str,
        params: &[&str],
    ) -> Result<(), CcError> {
        let request = TxRequest {
            payload: encode_params(verb, params),
            nonce: nonce.to_string(),
            signer_public_key: key.to_string(),
            family_version: "1.7".to_string(),
            block_signature: String::new(),
        };
        self.handler.apply(&request, &self.store)
    }

    pub fn wallet_id(&self, sighash: &str) -> String {
        format!("{}{}{}", cc_crypto::namespace_prefix(), cc_core::WALLET, sighash)
    }

    pub fn balance(&self, sighash: &str) -> Option<String> {
        let data = self.store.get(&self.wallet_id(sighash)).unwrap()?;
        Some(Wallet::decode(data.as_slice()).unwrap().amount)
    }

    /// Seed a wallet directly, bypassing CollectCoins.
    pub fn fund(&self, sighash: &str, amount: &str) {
        let wallet = Wallet {
            amount: amount.to_string(),
        };
        self.store
            .insert(&self.wallet_id(sighash), wallet.encode_to_vec());
    }

    /// Make `sighash` the authorized housekeeping caller.
    pub fn configure_gateway_signer(&self, sighash: &str) {
        self.rt.settings.replace(BTreeMap::from([(
            GATEWAY_SIGHASH_KEY.to_string(),
            sighash.to_string(),
        )]));
    }

    /// Record one signer for a whole range of block heights.
    pub fn set_signers(&self, range: std::ops::RangeInclusive<u64>, key: &str) {
        for height in range {
            self.store.set_block_signer(height, key);
        }
    }

    pub fn entries_under(&self, kind: &str) -> Vec<String> {
        let prefix = format!("{}{}", cc_crypto::namespace_prefix(), kind);
        self.store
            .entries()
            .into_iter()
            .filter(|(k, v)| k.starts_with(&prefix) && !v.is_empty())
            .map(|(k, _)| k)
            .collect()
    }
}
