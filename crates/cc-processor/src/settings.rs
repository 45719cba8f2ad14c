// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SETTINGS CACHE
//
// Chain-wide settings live as protobuf Setting entries under the host's
// "000000" namespace. A background thread rescans them every 6 seconds and
// swaps in a fresh immutable snapshot; readers clone the Arc and can never
// observe a half-merged map. Refresh failures are swallowed; the previous
// snapshot simply stays current.
//
// Recognized keys:
//   sawtooth.gateway.sighash    who may invoke gateway-only verbs
//   sawtooth.validator.gateway  external attestor URL (tcp:// auto-prefixed)
//   sawtooth.validator.update1  block where the reward formula changes
//   creditcoin.v2block          hard cutover rejecting 1.x transactions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use crate::state::scan_all;
use crate::Runtime;
use cc_core::messages::Setting;
use cc_core::SETTINGS_NAMESPACE;
use prost::Message;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

pub const GATEWAY_SIGHASH_KEY: &str = "sawtooth.gateway.sighash";
pub const VALIDATOR_GATEWAY_KEY: &str = "sawtooth.validator.gateway";
pub const UPDATE1_KEY: &str = "sawtooth.validator.update1";
pub const V2BLOCK_KEY: &str = "creditcoin.v2block";

const REFRESH_INTERVAL: Duration = Duration::from_secs(6);

type Snapshot = Arc<BTreeMap<String, String>>;

pub struct SettingsCache {
    map: RwLock<Snapshot>,
}

impl Default for SettingsCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsCache {
    pub fn new() -> Self {
        SettingsCache {
            map: RwLock::new(Arc::new(BTreeMap::new())),
        }
    }

    /// The current immutable snapshot.
    pub fn snapshot(&self) -> Snapshot {
        match self.map.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.snapshot().get(key).cloned()
    }

    /// Swap in a new snapshot atomically.
    pub fn replace(&self, settings: BTreeMap<String, String>) {
        let next = Arc::new(settings);
        match self.map.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }
}

/// Rescan the settings namespace and publish a fresh snapshot. Failures
/// leave the previous snapshot in place; settings only move forward.
pub fn refresh(rt: &Runtime) {
    debug_assert!(!rt.transitioning());

    let Ok(entries) = scan_all(rt.contextless.as_ref(), SETTINGS_NAMESPACE) else {
        return;
    };

    let mut merged = BTreeMap::new();
    for (_, data) in entries {
        let Ok(setting) = Setting::decode(data.as_slice()) else {
            continue;
        };
        for entry in setting.entries {
            merged.insert(entry.key, entry.value);
        }
    }
    rt.settings.replace(merged);

    if let Some(address) = rt.settings.get(VALIDATOR_GATEWAY_KEY) {
        let address = if address.starts_with("tcp://") {
            address
        } else {
            format!("tcp://{}", address)
        };
        rt.gateway.set_external_address(address);
    }
}

/// Start the background refresher. Detached; terminated with the process.
pub fn spawn_refresher(rt: Arc<Runtime>) {
    std::thread::spawn(move || loop {
        std::thread::sleep(REFRESH_INTERVAL);
        refresh(&rt);
    });
}
