#![forbid(unsafe_code)]
//! Single-node OntiBlock miner

use clap::Parser;
use ontiblock::config::load_config;
use ontiblock::crypto::{KeyPair, Secp256k1Verifier};
use ontiblock::{Amount, ChainError, Ledger};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Run a single-node OntiBlock ledger and mine blocks",
    long_about = None
)]
struct Cli {
    /// Path to the TOML config; defaults apply when the file is missing
    #[arg(short, long, default_value = "ontiblock.toml")]
    config: PathBuf,
    /// Stop after this many blocks (0 mines until Ctrl-C)
    #[arg(short, long, default_value_t = 0)]
    blocks: u64,
    /// Address credited for mined blocks, overriding mining.validator_address
    #[arg(long)]
    validator: Option<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = load_config(&cli.config)?;
    info!("Starting OntiBlock node (network_id = {})", config.network_id);

    let validator = match cli.validator.or_else(|| config.mining.validator_address.clone()) {
        Some(address) => address,
        None => {
            let address = KeyPair::generate().address();
            warn!("No validator address configured, using ephemeral address {}", address);
            address
        }
    };
    let initial_stake = Amount::saturating_from_num(config.staking.initial_stake);

    // The ledger owns blocking resources (analytics worker, HTTP client), so
    // it is built and dropped outside the async runtime.
    let ledger = Arc::new(
        Ledger::builder(config)
            .verifier(Arc::new(Secp256k1Verifier))
            .build()?,
    );
    ledger.register_validator(&validator, initial_stake)?;

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    let result = runtime.block_on(run(ledger.clone(), validator, cli.blocks));
    drop(runtime);

    if let Err(e) = ledger.validate() {
        error!("Ledger failed final validation: {}", e);
        return Err(e.into());
    }
    if !ledger.flush_analytics(Duration::from_secs(5)) {
        warn!("Timed out waiting for analytics notifications");
    }
    result
}

async fn run(
    ledger: Arc<Ledger>,
    validator: String,
    blocks: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown requested, cancelling mining");
                cancel.store(true, Ordering::SeqCst);
            }
        });
    }

    let mut mined = 0u64;
    while blocks == 0 || mined < blocks {
        if cancel.load(Ordering::SeqCst) {
            break;
        }

        ledger.adjust_fee_structure(ledger.congestion())?;

        let task_ledger = ledger.clone();
        let task_validator = validator.clone();
        let task_cancel = cancel.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            task_ledger.mine_block_with_cancel(&task_validator, &task_cancel)
        })
        .await?;

        match outcome {
            Ok(_) => mined += 1,
            Err(ChainError::MiningCancelled) => break,
            Err(e) => return Err(e.into()),
        }

        if let Some(id) = ledger.distribute_fees(&validator)? {
            info!("Fee distribution queued as {}", id);
        }
    }

    let economics = ledger.get_token_economics();
    info!(
        "Stopped after {} blocks (height {}): supply {} {}, circulating {}, burned {}",
        mined,
        ledger.height(),
        economics.total_supply,
        economics.symbol,
        economics.circulating_supply,
        economics.total_burned
    );
    Ok(())
}
