// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CREDITCOIN - TRANSACTION PROCESSOR
//
// The deterministic state-transition engine: CBOR dispatch, the sixteen
// business verbs, fee/reward economics, the housekeeping sweeper, the
// settings cache, and the replay/migration engine used during protocol
// upgrades. The host validator delivers transactions and owns the merkle
// store; everything it provides arrives through the StateStore trait.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::sync::{Arc, Mutex, MutexGuard};

pub mod cbor;
pub mod handler;
pub mod replay;
pub mod settings;
pub mod state;
pub mod validator;
pub mod wire;

pub use cc_core::CcError;
pub use handler::{CreditcoinHandler, TxRequest};
pub use state::{InMemoryStateStore, StateStore};

/// Refunds for expired deals were skipped below this block by the original
/// sweeper; replays at or below it must keep skipping them or the rebuilt
/// state diverges from what the chain actually committed. Overridable with
/// `-dealExpFixBlock:N`.
pub const DEAL_EXP_FIX_BLOCK_DEFAULT: i64 = 278890;

/// Off-chain transfer attestation, seen from the verbs. The production
/// implementation is the ZMQ client in cc-gateway; tests substitute stubs.
pub trait Gateway: Send + Sync {
    /// Submit an ASCII verify command; Ok means the attestor replied "good".
    fn verify(&self, command: &str) -> Result<(), CcError>;
    /// Observe the external attestor address from chain settings.
    fn set_external_address(&self, _url: String) {}
}

impl Gateway for cc_gateway::GatewayClient {
    fn verify(&self, command: &str) -> Result<(), CcError> {
        cc_gateway::GatewayClient::verify(self, command).map_err(gateway_error)
    }

    fn set_external_address(&self, url: String) {
        cc_gateway::GatewayClient::set_external_address(self, url);
    }
}

/// Fold a gateway failure into the processor's two error classes: a
/// rejection is the transaction's fault, a dead socket is the host's.
pub fn gateway_error(e: cc_gateway::GatewayError) -> CcError {
    match e {
        cc_gateway::GatewayError::Rejected => CcError::invalid(e.to_string()),
        cc_gateway::GatewayError::Transport(m) => CcError::internal(m),
    }
}

/// Process-wide collaborators handed to every transaction: the settings
/// snapshot, the attestation gateway, a context-free view of committed
/// state, and the replay engine when a migration is in progress.
pub struct Runtime {
    pub settings: settings::SettingsCache,
    pub gateway: Arc<dyn Gateway>,
    pub contextless: Arc<dyn StateStore>,
    pub replay: Option<Arc<replay::ReplayEngine>>,
    pub deal_exp_fix_block: i64,
}

impl Runtime {
    pub fn new(gateway: Arc<dyn Gateway>, contextless: Arc<dyn StateStore>) -> Self {
        Runtime {
            settings: settings::SettingsCache::new(),
            gateway,
            contextless,
            replay: None,
            deal_exp_fix_block: DEAL_EXP_FIX_BLOCK_DEFAULT,
        }
    }

    pub fn transitioning(&self) -> bool {
        self.replay.is_some()
    }
}

/// Mutex lock that recovers from poisoning instead of cascading panics.
/// A transaction that panicked mid-apply has already been discarded by the
/// host; the shared maps it may have touched are rebuilt from state anyway.
pub(crate) fn safe_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            eprintln!("⚠️ WARNING: mutex was poisoned, recovering...");
            poisoned.into_inner()
        }
    }
}
