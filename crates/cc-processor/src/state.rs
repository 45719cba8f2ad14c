// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// STATE STORE — host merkle-state boundary
//
// Everything the processor needs from the validator's versioned key/value
// store, as one trait: point reads/writes/deletes, cursor-paginated prefix
// scans, the chain tip, and block-signer lookups for the reward path.
// The in-memory implementation backs every test and the replay engine's
// committed base; the ZMQ client in validator.rs is the production side.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use crate::safe_lock;
use cc_core::CcError;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

pub trait StateStore: Send + Sync {
    /// Read one entry. Absent and present-but-empty are both reported as
    /// None; the host has historically returned either for a missing key.
    fn get(&self, address: &str) -> Result<Option<Vec<u8>>, CcError>;

    /// Write a batch of entries.
    fn set(&self, entries: &[(String, Vec<u8>)]) -> Result<(), CcError>;

    /// Remove one entry.
    fn delete(&self, address: &str) -> Result<(), CcError>;

    /// One page of entries under `prefix`. `start` is the continuation
    /// cursor: empty on entry for the first page, reset to empty by the
    /// store once the final page has been returned.
    fn scan_prefix(
        &self,
        prefix: &str,
        start: &mut String,
    ) -> Result<Vec<(String, Vec<u8>)>, CcError>;

    /// Current chain tip (block count).
    fn tip(&self) -> Result<u64, CcError>;

    /// Public key of the signer of block `height`.
    fn sig_by_num(&self, height: u64) -> Result<String, CcError>;

    /// Signer public keys for blocks `last..=first`, in ascending height
    /// order, resolved from the block carrying `block_signature`.
    fn reward_block_signatures(
        &self,
        block_signature: &str,
        first: u64,
        last: u64,
    ) -> Result<Vec<String>, CcError>;
}

/// Drain every page of a prefix scan.
pub fn scan_all(
    store: &dyn StateStore,
    prefix: &str,
) -> Result<Vec<(String, Vec<u8>)>, CcError> {
    let mut out = Vec::new();
    let mut start = String::new();
    loop {
        out.extend(store.scan_prefix(prefix, &mut start)?);
        if start.is_empty() {
            return Ok(out);
        }
    }
}

#[derive(Default)]
struct InMemoryInner {
    entries: BTreeMap<String, Vec<u8>>,
    tip: u64,
    signers: BTreeMap<u64, String>,
}

/// BTreeMap-backed state store. Clones share the same underlying map, so a
/// test can hand the same store to the handler and to the runtime's
/// context-free view.
#[derive(Clone, Default)]
pub struct InMemoryStateStore {
    inner: Arc<Mutex<InMemoryInner>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_tip(&self, tip: u64) {
        safe_lock(&self.inner).tip = tip;
    }

    /// Record the signer public key of one block for the reward path.
    pub fn set_block_signer(&self, height: u64, signer: &str) {
        safe_lock(&self.inner)
            .signers
            .insert(height, signer.to_string());
    }

    /// Full snapshot of the entry map, for determinism comparisons.
    pub fn entries(&self) -> BTreeMap<String, Vec<u8>> {
        safe_lock(&self.inner).entries.clone()
    }

    pub fn insert(&self, address: &str, value: Vec<u8>) {
        safe_lock(&self.inner)
            .entries
            .insert(address.to_string(), value);
    }
}

impl StateStore for InMemoryStateStore {
    fn get(&self, address: &str) -> Result<Option<Vec<u8>>, CcError> {
        let inner = safe_lock(&self.inner);
        Ok(inner
            .entries
            .get(address)
            .filter(|v| !v.is_empty())
            .cloned())
    }

    fn set(&self, entries: &[(String, Vec<u8>)]) -> Result<(), CcError> {
        let mut inner = safe_lock(&self.inner);
        for (address, value) in entries {
            inner.entries.insert(address.clone(), value.clone());
        }
        Ok(())
    }

    fn delete(&self, address: &str) -> Result<(), CcError> {
        safe_lock(&self.inner).entries.remove(address);
        Ok(())
    }

    fn scan_prefix(
        &self,
        prefix: &str,
        start: &mut String,
    ) -> Result<Vec<(String, Vec<u8>)>, CcError> {
        // Single-page store.
        start.clear();
        let inner = safe_lock(&self.inner);
        Ok(inner
            .entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn tip(&self) -> Result<u64, CcError> {
        Ok(safe_lock(&self.inner).tip)
    }

    fn sig_by_num(&self, height: u64) -> Result<String, CcError> {
        safe_lock(&self.inner)
            .signers
            .get(&height)
            .cloned()
            .ok_or_else(|| CcError::internal(format!("no signer recorded for block {}", height)))
    }

    fn reward_block_signatures(
        &self,
        _block_signature: &str,
        first: u64,
        last: u64,
    ) -> Result<Vec<String>, CcError> {
        let inner = safe_lock(&self.inner);
        (last..=first)
            .map(|height| {
                inner.signers.get(&height).cloned().ok_or_else(|| {
                    CcError::internal(format!("no signer recorded for block {}", height))
                })
            })
            .collect()
    }
}
