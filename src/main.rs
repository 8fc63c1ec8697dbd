mod analytics;
mod config;
mod confluence;
mod exchange;
mod executor;
mod indicators;
mod ledger;
mod market_data;
mod risk;
mod strategies;
mod supervisor;
mod types;

use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use config::RuntimeConfig;
use exchange::{BinanceAdapter, ExchangeAdapter as _};
use supervisor::Supervisor;
use types::{Pair, TradingMode};

#[derive(Parser)]
#[command(name = "novapulse")]
#[command(version = "0.1.0")]
#[command(about = "Confluence-driven crypto trading supervisor for Binance.US", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Data directory for the instance lock and sqlite ledger
    #[arg(short, long, default_value = "./data")]
    data_dir: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the supervisor against simulated fills, no exchange orders placed
    Paper,
    /// Run the supervisor against live Binance.US orders
    Live,
    /// Show current market prices for the configured pairs
    Prices,
    /// Print a one-shot status snapshot and exit
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("novapulse v0.1.0");

    match cli.command {
        Commands::Paper => run_supervisor(&cli.config, &cli.data_dir, TradingMode::Paper).await,
        Commands::Live => run_supervisor(&cli.config, &cli.data_dir, TradingMode::Live).await,
        Commands::Prices => show_prices(&cli.config).await,
        Commands::Status => show_status(&cli.data_dir).await,
    }
}

fn load_exchange(config: &RuntimeConfig, mode: TradingMode) -> Result<BinanceAdapter> {
    if mode == TradingMode::Paper {
        return Ok(BinanceAdapter::public_only());
    }

    let key_var = config
        .exchange
        .api_key_env
        .as_ref()
        .ok_or_else(|| anyhow!("live mode requires exchange.api_key_env in config"))?;
    let secret_var = config
        .exchange
        .api_secret_env
        .as_ref()
        .ok_or_else(|| anyhow!("live mode requires exchange.api_secret_env in config"))?;
    let api_key = std::env::var(key_var).map_err(|_| anyhow!("env var {key_var} not set"))?;
    let secret_key = std::env::var(secret_var).map_err(|_| anyhow!("env var {secret_var} not set"))?;
    Ok(BinanceAdapter::new(api_key, secret_key, false))
}

async fn run_supervisor(config_path: &str, data_dir: &str, mode: TradingMode) -> Result<()> {
    let mut config = RuntimeConfig::load(config_path)?;
    config.mode.trading_mode = mode;

    let exchange = Arc::new(load_exchange(&config, mode)?);
    let supervisor = Supervisor::init(config, exchange, data_dir).await?;

    info!("warming up: backfilling candles and connecting to market data streams");
    let events = supervisor.warmup().await?;

    info!(mode = ?mode, "supervisor running, press Ctrl+C to stop");
    let supervisor_run = Arc::clone(&supervisor);
    let run_handle = tokio::spawn(async move { supervisor_run.run(events).await });

    tokio::select! {
        result = run_handle => {
            if let Ok(Err(e)) = result {
                error!(error = %e, "supervisor exited with an error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
            supervisor.control().kill().await;
        }
    }

    Ok(())
}

async fn show_prices(config_path: &str) -> Result<()> {
    let config = RuntimeConfig::load(config_path)?;
    let exchange = BinanceAdapter::public_only();

    println!("\n=== Current Prices ===");
    for pair_str in &config.trading.pairs {
        let pair: Pair = pair_str.parse().map_err(|e: String| anyhow!(e))?;
        match exchange.get_ticker(&pair).await {
            Ok(ticker) => println!("{pair}: bid {:.2} / ask {:.2} / last {:.2}", ticker.bid, ticker.ask, ticker.last),
            Err(e) => error!(pair = %pair, error = %e, "failed to fetch ticker"),
        }
    }
    Ok(())
}

async fn show_status(data_dir: &str) -> Result<()> {
    let db_path = format!("{data_dir}/novapulse.db");
    if !std::path::Path::new(&db_path).exists() {
        println!("No ledger found at {db_path} — supervisor has never run here.");
        return Ok(());
    }
    let ledger = ledger::Ledger::new(&db_path).await?;
    let open_trades = ledger.get_open_trades().await?;
    println!("\n=== Status ===");
    println!("Open trades: {}", open_trades.len());
    for trade in &open_trades {
        println!("  {} {} entry {:.4}", trade.trade_id, trade.pair, trade.entry_price);
    }
    Ok(())
}
