// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// REPLAY / MIGRATION ENGINE
//
// During a protocol upgrade the processor starts against a migration log of
// every historical block and transaction. Live transactions arriving from
// the validator are located in that lineage by guid; the engine replays
// everything between the current frontier and the located position against
// in-memory state, then applies the live transaction for real. Replica
// determinism requires the rebuilt lineage to match the recorded chain
// bit-for-bit, which is why the layered maps and their merge order below
// are treated as consensus rules rather than implementation detail.
//
// Layers, innermost first:
//   ctx.currentState     staged writes of the transaction being applied
//   tipCurrentState      writes of transactions applied since the last
//                        block boundary
//   transitioningState   committed state of all fully replayed blocks
// An empty value marks a deletion. Reads hit the first layer that knows
// the key; block boundaries fold the tip layer down into the committed one.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use crate::safe_lock;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine as _;
use cc_core::num::parse_positive;
use cc_core::CcError;
use num_traits::ToPrimitive;
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Platform-fixed migration log location. Its presence at startup switches
/// the processor into transitioning mode.
#[cfg(target_os = "linux")]
pub const TRANSITION_FILE: &str = "/home/Creditcoin/cctt/data/transition.txt";
#[cfg(not(target_os = "linux"))]
pub const TRANSITION_FILE: &str = "C:\\transition.txt";

/// Idle time after which the watchdog assumes the validator has stopped
/// feeding revalidation transactions and shuts the migration down.
const IDLE_LIMIT: Duration = Duration::from_secs(300);
/// Watchdog poll interval, and the grace period before the final exit.
const CLEANUP_DELAY: Duration = Duration::from_secs(60);

/// One recorded transaction of the migration log.
#[derive(Debug)]
pub struct TxRecord {
    pub guid: String,
    pub sighash: String,
    pub payload: Vec<u8>,
}

/// One recorded block: its signer public key and ordered transactions.
#[derive(Default, Debug)]
pub struct SimpleBlock {
    pub signer: String,
    pub txs: Vec<TxRecord>,
}

/// Position of a transaction in the lineage. `block` holds the index of
/// the PREVIOUS block (the tip visible while the transaction executed).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TxPos {
    pub block: i64,
    pub tx_idx: i64,
}

/// Frontier and layered state, guarded by one mutex for the whole of each
/// frontier advance + live apply.
#[derive(Debug)]
pub struct ReplayShared {
    pub updated_block_idx: i64,
    /// −1 when no transaction of `updated_block_idx` has been applied yet.
    pub updated_tx_idx: i64,
    pub tip_current_state: BTreeMap<String, Vec<u8>>,
    pub transitioning_state: BTreeMap<String, Vec<u8>>,
}

#[derive(Debug)]
struct Watchdog {
    started: bool,
    last_apply: Instant,
}

#[derive(Debug)]
pub struct ReplayEngine {
    pub blocks: Vec<SimpleBlock>,
    positions: BTreeMap<String, TxPos>,
    pub shared: Mutex<ReplayShared>,
    transition_file: PathBuf,
    watchdog: Mutex<Watchdog>,
}

fn decode_base64(line: &str) -> Result<Vec<u8>, CcError> {
    // The recorded payloads may carry padding; everything from the first
    // '=' on is ignored.
    let data = line.split('=').next().unwrap_or("");
    STANDARD_NO_PAD
        .decode(data)
        .map_err(|_| CcError::invalid("Invalid character in base64"))
}

impl ReplayEngine {
    /// Load the migration log if one exists. `Ok(None)` means normal mode.
    pub fn load(path: &Path) -> Result<Option<ReplayEngine>, CcError> {
        let file = match std::fs::File::open(path) {
            Ok(file) => file,
            Err(_) => return Ok(None),
        };

        let mut lines = BufReader::new(file).lines();
        let mut next_line = move || -> Result<String, CcError> {
            match lines.next() {
                Some(Ok(line)) => Ok(line),
                Some(Err(e)) => Err(CcError::internal(format!(
                    "Failed to read migration log: {}",
                    e
                ))),
                None => Ok(String::new()),
            }
        };

        let mut blocks: Vec<SimpleBlock> = Vec::new();
        let mut positions = BTreeMap::new();
        loop {
            let line = next_line()?;
            if line.is_empty() {
                break;
            }
            let block_idx = parse_positive(&line)?
                .to_usize()
                .ok_or_else(|| CcError::invalid("Invalid number format"))?;
            let signer = next_line()?;
            if blocks.len() <= block_idx {
                blocks.resize_with(block_idx + 1, SimpleBlock::default);
            }
            let mut txs = Vec::new();
            let mut tx_count: i64 = 0;
            loop {
                let line = next_line()?;
                if line == "." {
                    break;
                }
                positions.insert(
                    line.clone(),
                    TxPos {
                        block: block_idx as i64 - 1,
                        tx_idx: tx_count,
                    },
                );
                let guid = line;
                let sighash = next_line()?;
                let payload = decode_base64(&next_line()?)?;
                txs.push(TxRecord {
                    guid,
                    sighash,
                    payload,
                });
                tx_count += 1;
            }
            blocks[block_idx] = SimpleBlock { signer, txs };
        }

        let updated_tx_idx = blocks
            .first()
            .map(|b| b.txs.len() as i64 - 1)
            .unwrap_or(-1);
        Ok(Some(ReplayEngine {
            blocks,
            positions,
            shared: Mutex::new(ReplayShared {
                updated_block_idx: 0,
                updated_tx_idx,
                tip_current_state: BTreeMap::new(),
                transitioning_state: BTreeMap::new(),
            }),
            transition_file: path.to_path_buf(),
            watchdog: Mutex::new(Watchdog {
                started: false,
                last_apply: Instant::now(),
            }),
        }))
    }

    /// Locate a live transaction in the recorded lineage.
    pub fn position(&self, guid: &str) -> Option<TxPos> {
        self.positions.get(guid).copied()
    }

    /// True once the frontier sits on the last transaction of the last
    /// block, meaning the migration has been fully revalidated.
    pub fn at_end(&self, shared: &ReplayShared) -> bool {
        shared.updated_block_idx == self.blocks.len() as i64 - 1
            && !self.blocks.is_empty()
            && shared.updated_tx_idx
                == self.blocks[shared.updated_block_idx as usize].txs.len() as i64 - 1
    }

    /// Record an apply and start the idle watchdog on the first one.
    pub fn touch(self: &Arc<Self>) {
        let mut watchdog = safe_lock(&self.watchdog);
        watchdog.last_apply = Instant::now();
        if !watchdog.started {
            watchdog.started = true;
            let engine = Arc::clone(self);
            std::thread::spawn(move || loop {
                std::thread::sleep(CLEANUP_DELAY);
                let idle = {
                    let watchdog = safe_lock(&engine.watchdog);
                    watchdog.last_apply.elapsed() > IDLE_LIMIT
                };
                if idle {
                    engine.cleanup();
                }
            });
        }
    }

    /// Finish the migration: give the validator a minute to settle, remove
    /// the log so the next start runs in normal mode, and exit cleanly.
    pub fn cleanup(&self) -> ! {
        std::thread::sleep(CLEANUP_DELAY);
        let _ = std::fs::remove_file(&self.transition_file);
        std::process::exit(0);
    }

    /// Detached cleanup, for the revalidation-complete path.
    pub fn schedule_cleanup(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        std::thread::spawn(move || engine.cleanup());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;
    use std::io::Write;

    fn write_log(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn absent_log_means_normal_mode() {
        let missing = Path::new("/definitely/not/a/transition.txt");
        assert!(ReplayEngine::load(missing).unwrap().is_none());
    }

    #[test]
    fn parses_blocks_guids_and_payloads() {
        let payload = STANDARD.encode(b"\xa1avhSendFunds");
        let log = format!(
            "1\nsigner-one\nguid-a\nsighash-a\n{payload}\nguid-b\nsighash-b\n{payload}\n.\n\
             2\nsigner-two\nguid-c\nsighash-c\n{payload}\n.\n"
        );
        let file = write_log(&log);
        let engine = ReplayEngine::load(file.path()).unwrap().unwrap();

        assert_eq!(engine.blocks.len(), 3); // block 0 implicit and empty
        assert_eq!(engine.blocks[1].signer, "signer-one");
        assert_eq!(engine.blocks[1].txs.len(), 2);
        assert_eq!(engine.blocks[2].txs.len(), 1);
        assert_eq!(engine.blocks[2].txs[0].payload, b"\xa1avhSendFunds");

        assert_eq!(engine.position("guid-a"), Some(TxPos { block: 0, tx_idx: 0 }));
        assert_eq!(engine.position("guid-b"), Some(TxPos { block: 0, tx_idx: 1 }));
        assert_eq!(engine.position("guid-c"), Some(TxPos { block: 1, tx_idx: 0 }));
        assert_eq!(engine.position("guid-zzz"), None);

        let shared = safe_lock(&engine.shared);
        assert_eq!(shared.updated_block_idx, 0);
        assert_eq!(shared.updated_tx_idx, -1); // block 0 has no transactions
        assert!(!engine.at_end(&shared));
    }

    #[test]
    fn bad_base64_is_reported() {
        let file = write_log("1\nsigner\nguid\nsighash\n!!notbase64!!\n.\n");
        assert_eq!(
            ReplayEngine::load(file.path()).unwrap_err(),
            CcError::invalid("Invalid character in base64")
        );
    }

    #[test]
    fn padding_is_tolerated() {
        assert_eq!(decode_base64("aGk=").unwrap(), b"hi");
        assert_eq!(decode_base64("aGV5").unwrap(), b"hey");
    }
}
