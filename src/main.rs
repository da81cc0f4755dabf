// DCA keeper
// Runs the operator duties against a simulated market: seeds the configured
// positions, then fires aggregated swaps whenever a pair's window opens.

use alloy::primitives::U256;
use anyhow::{Context, Result};
use clap::Parser;
use dca_engine::{
    ConfigFile, CreateRequest, DcaEngine, FixedPriceMarket, InMemoryCustody, IntervalRegistry,
    Pair, SwapIntent,
};
use std::path::PathBuf;
use tracing::{info, warn, Level};

#[derive(Parser, Debug)]
#[command(name = "dca-keeper", about = "Operator loop for the batched DCA engine")]
struct Args {
    /// Path to the TOML configuration
    #[arg(long, default_value = "config/engine.toml")]
    config: PathBuf,
    /// Run a single tick and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    let config = ConfigFile::load(&args.config)?;
    let keeper = config
        .keeper
        .clone()
        .context("config has no [keeper] section")?;
    let governor = config.engine.governor;

    // Shared ledger backing both the engine's custody and the market.
    let ledger = InMemoryCustody::new(config.engine.engine_account);
    let mut market = FixedPriceMarket::new(ledger.clone(), keeper.market_account);
    for price in &keeper.prices {
        market.set_price(
            price.from,
            price.to,
            U256::from(price.numerator),
            U256::from(price.denominator),
        );
    }

    let mut engine = DcaEngine::new(config.engine.clone(), Box::new(ledger.clone()))
        .map_err(|e| anyhow::anyhow!("engine construction failed: {e}"))?;
    engine
        .add_swap_executor(governor, keeper.operator)
        .map_err(|e| anyhow::anyhow!("operator registration failed: {e}"))?;

    info!("DCA keeper starting: {} seed positions", keeper.positions.len());

    let now = unix_now();
    for seed in &keeper.positions {
        ledger.credit(seed.from, seed.owner, U256::from(seed.amount));
        let created = engine.create(
            seed.owner,
            &CreateRequest {
                from: seed.from,
                to: seed.to,
                interval: seed.interval,
                amount: U256::from(seed.amount),
                no_of_swaps: seed.no_of_swaps,
            },
            now,
        );
        match created {
            Ok(id) => info!(
                "seeded position {id} for {} ({} cadence)",
                seed.owner,
                IntervalRegistry::describe(seed.interval)
            ),
            Err(e) => warn!("seed position rejected: {e}"),
        }
    }
    drain_events(&mut engine);

    let pairs: Vec<Pair> = keeper
        .pairs
        .iter()
        .map(|p| Pair::new(p.from, p.to))
        .collect();

    let mut ticker = tokio::time::interval(tokio::time::Duration::from_secs(keeper.tick_secs));
    loop {
        ticker.tick().await;
        let now = unix_now();

        for &pair in &pairs {
            let wait = engine.seconds_until_next_swap(&[pair], now)[0];
            if wait == u64::MAX {
                continue;
            }
            if wait > 0 {
                info!("{pair}: next swap in {wait}s");
                continue;
            }

            let preview = engine.next_swap_info(&[pair], now).remove(0);
            let intent = SwapIntent {
                pair,
                declared_input: preview.total_input,
                min_out: U256::ZERO,
                proxy: keeper.market_account,
                data: vec![],
            };
            match engine.swap(keeper.operator, &[intent], keeper.operator, &mut market, now) {
                Ok(()) => drain_events(&mut engine),
                Err(e) => warn!("{pair}: swap failed: {e}"),
            }
        }

        if args.once {
            break;
        }
    }

    Ok(())
}

fn unix_now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

fn drain_events(engine: &mut DcaEngine) {
    for event in engine.take_events() {
        match serde_json::to_string(&event) {
            Ok(json) => info!("event: {json}"),
            Err(e) => warn!("event serialization failed: {e}"),
        }
    }
}
