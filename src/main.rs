// =============================================================================
// Spot Nexus Engine — Main Entry Point
// =============================================================================

mod config;
mod confluence;
mod cycle;
mod decision;
mod dynamic_optimizer;
mod errors;
mod executor;
mod gateway;
mod indicators;
mod macro_context;
mod market_data;
mod mathx;
mod position_store;
mod regime;
mod telemetry;
#[cfg(test)]
mod test_support;
mod token_ranker;
mod types;

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::EngineConfig;
use crate::cycle::{CycleConfig, CycleScheduler};
use crate::gateway::okx::OkxGateway;
use crate::macro_context::{MacroContext, NullMacroProvider};
use crate::market_data::MarketDataCache;
use crate::position_store::PositionStore;
use crate::regime::RegimeDetector;
use crate::token_ranker::TokenRanker;

#[derive(Parser)]
#[command(name = "spot-nexus-engine")]
struct Cli {
    /// Override the default config file location.
    #[arg(long, default_value = "runtime_config.json")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the engine's polling cycle loop until interrupted.
    Run,
    /// Print the current position store snapshot as pretty JSON.
    Positions,
    /// Force a reconciliation against live exchange state and exit.
    Reconcile {
        #[arg(long)]
        force: bool,
    },
}

fn credentials_from_env() -> anyhow::Result<(String, String, String)> {
    let api_key = std::env::var("OKX_API_KEY").map_err(|_| anyhow::anyhow!("OKX_API_KEY not set"))?;
    let api_secret = std::env::var("OKX_API_SECRET").map_err(|_| anyhow::anyhow!("OKX_API_SECRET not set"))?;
    let api_passphrase =
        std::env::var("OKX_API_PASSPHRASE").map_err(|_| anyhow::anyhow!("OKX_API_PASSPHRASE not set"))?;
    Ok((api_key, api_secret, api_passphrase))
}

#[tokio::main]
async fn main() {
    let code = run().await;
    std::process::exit(code);
}

async fn run() -> i32 {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let config = match EngineConfig::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(error = %e, path = %cli.config, "no usable config found, using defaults");
            EngineConfig::default()
        }
    };

    let (api_key, api_secret, api_passphrase) = match credentials_from_env() {
        Ok(creds) => creds,
        Err(e) => {
            error!(error = %e, "missing OKX API credentials");
            return 2;
        }
    };
    let gateway = Arc::new(OkxGateway::new(api_key, api_secret, api_passphrase));

    let cache = Arc::new(MarketDataCache::new());

    let store = Arc::new(PositionStore::new(&config.positions_path));
    if let Err(e) = store.load(gateway.as_ref(), cache.as_ref()).await {
        error!(error = %e, "fatal: position store failed to load against live exchange state");
        return 1;
    }

    match cli.command {
        Command::Positions => {
            match serde_json::to_string_pretty(&store.snapshot()) {
                Ok(json) => println!("{json}"),
                Err(e) => {
                    error!(error = %e, "failed to serialize position snapshot");
                    return 1;
                }
            }
            0
        }
        Command::Reconcile { force } => {
            match store.reconcile(gateway.as_ref(), force).await {
                Ok(()) => {
                    info!("reconciliation complete");
                    0
                }
                Err(e) => {
                    error!(error = %e, "reconciliation failed");
                    1
                }
            }
        }
        Command::Run => run_engine(gateway, store, cache, config).await,
    }
}

async fn run_engine(
    gateway: Arc<OkxGateway>,
    store: Arc<PositionStore>,
    cache: Arc<MarketDataCache>,
    config: EngineConfig,
) -> i32 {
    let ranker = Arc::new(TokenRanker::new(config.min_liquidity));
    let regime_detector = RegimeDetector::new();
    let macro_context = Arc::new(MacroContext::new(NullMacroProvider));

    let cycle_config = CycleConfig {
        quote: config.quote.clone(),
        min_quote_volume_usd: config.min_quote_volume_usd,
        discover_limit: 100,
        top_n_analyzed: config.top_n_analyzed,
        min_liquidity: config.min_liquidity,
        max_concurrent_positions: config.max_concurrent_positions,
        portfolio_equity: config.portfolio_equity_usd,
        default_lot_step: config.default_lot_step,
    };

    let scheduler = Arc::new(CycleScheduler::new(
        gateway,
        cache,
        ranker,
        regime_detector,
        macro_context,
        store,
        cycle_config,
    ));

    info!(
        polling_interval_seconds = config.polling_interval_seconds,
        max_concurrent_positions = config.max_concurrent_positions,
        "spot nexus engine starting"
    );

    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(config.polling_interval_seconds));

    loop {
        tokio::select! {
            _ = interval.tick() => {
                // Sequential per-symbol processing means ctrl-c below can
                // only land between cycles, never between a buy submission
                // and its OCO placement inside Executor.
                let summary = scheduler.run_cycle().await;
                info!(
                    symbols_considered = summary.symbols_considered,
                    decisions_made = summary.decisions_made,
                    executions = summary.executions,
                    "cycle finished"
                );
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("shutdown signal received, exiting after current cycle");
                break;
            }
        }
    }

    info!("spot nexus engine shut down complete");
    0
}
