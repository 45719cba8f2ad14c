// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CREDITCOIN - PROCESSOR BINARY
//
// Usage: creditcoin-processor [-dealExpFixBlock:N] [validatorURL [gatewayURL]]
// Defaults: tcp://localhost:4004 (validator), tcp://localhost:55555 (gateway).
// Presence of the migration log at the platform-fixed path switches the
// processor into replay mode; otherwise the settings refresher starts and
// transactions are served normally. Exit code 0 on clean shutdown, -1 on an
// unexpected failure.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use cc_gateway::GatewayClient;
use cc_processor::handler::CreditcoinHandler;
use cc_processor::replay::{ReplayEngine, TRANSITION_FILE};
use cc_processor::validator::{TransactionProcessor, ValidatorConnection, ZmqStateStore};
use cc_processor::{settings, CcError, Runtime, DEAL_EXP_FIX_BLOCK_DEFAULT};
use std::path::Path;
use std::sync::Arc;

const URL_VALIDATOR_DEFAULT: &str = "tcp://localhost:4004";
const URL_GATEWAY_DEFAULT: &str = "tcp://localhost:55555";

struct Config {
    deal_exp_fix_block: i64,
    validator_url: String,
    gateway_url: String,
}

fn parse_args(args: &[String]) -> Result<Config, CcError> {
    let mut config = Config {
        deal_exp_fix_block: DEAL_EXP_FIX_BLOCK_DEFAULT,
        validator_url: URL_VALIDATOR_DEFAULT.to_string(),
        gateway_url: URL_GATEWAY_DEFAULT.to_string(),
    };

    let mut rest = args;
    if let Some(first) = rest.first() {
        if let Some(value) = first.strip_prefix("-dealExpFixBlock:") {
            config.deal_exp_fix_block = value
                .parse()
                .map_err(|_| CcError::internal(format!("Invalid -dealExpFixBlock value '{}'", value)))?;
            rest = &rest[1..];
        }
    }
    if let Some(url) = rest.first() {
        config.validator_url = url.clone();
    }
    if let Some(url) = rest.get(1) {
        config.gateway_url = url.clone();
    }
    Ok(config)
}

fn run() -> Result<(), CcError> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = parse_args(&args)?;

    println!("Connecting to {}", config.validator_url);
    println!("Using gateway URL: {}", config.gateway_url);

    let gateway = Arc::new(GatewayClient::new(&config.gateway_url).map_err(cc_processor::gateway_error)?);
    let conn = Arc::new(ValidatorConnection::connect(&config.validator_url)?);
    let contextless = Arc::new(ZmqStateStore::contextless(Arc::clone(&conn)));

    let replay = ReplayEngine::load(Path::new(TRANSITION_FILE))?;
    if let Some(engine) = &replay {
        println!(
            "🔁 Migration log found: revalidating {} blocks from {}",
            engine.blocks.len(),
            TRANSITION_FILE
        );
    }

    let mut rt = Runtime::new(gateway, contextless);
    rt.deal_exp_fix_block = config.deal_exp_fix_block;
    rt.replay = replay.map(Arc::new);
    let rt = Arc::new(rt);

    // The settings refresher reads committed state; during a migration the
    // committed state is being rebuilt in memory instead, so it stays off.
    if !rt.transitioning() {
        settings::spawn_refresher(Arc::clone(&rt));
    }

    let handler = CreditcoinHandler::new(Arc::clone(&rt));
    let processor = TransactionProcessor::new(conn, handler);

    println!("Running");
    processor.run()
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Unexpected exception: {}", e);
        std::process::exit(-1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn defaults_apply_with_no_args() {
        let config = parse_args(&[]).unwrap();
        assert_eq!(config.validator_url, URL_VALIDATOR_DEFAULT);
        assert_eq!(config.gateway_url, URL_GATEWAY_DEFAULT);
        assert_eq!(config.deal_exp_fix_block, DEAL_EXP_FIX_BLOCK_DEFAULT);
    }

    #[test]
    fn positional_urls_override_defaults() {
        let config = parse_args(&strings(&["tcp://validator:4004", "tcp://gateway:55555"])).unwrap();
        assert_eq!(config.validator_url, "tcp://validator:4004");
        assert_eq!(config.gateway_url, "tcp://gateway:55555");
    }

    #[test]
    fn deal_exp_fix_block_flag_shifts_positionals() {
        let config =
            parse_args(&strings(&["-dealExpFixBlock:300000", "tcp://validator:4004"])).unwrap();
        assert_eq!(config.deal_exp_fix_block, 300_000);
        assert_eq!(config.validator_url, "tcp://validator:4004");
        assert_eq!(config.gateway_url, URL_GATEWAY_DEFAULT);
    }

    #[test]
    fn bad_fix_block_is_an_error() {
        assert!(parse_args(&strings(&["-dealExpFixBlock:abc"])).is_err());
    }
}
