// Staged position scaling bot - CLI entry point

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use scale_trading_bot::clients::{run_price_feed, run_user_stream, BinanceFuturesClient};
use scale_trading_bot::{
    build_stage_schedule, CandleRecovery, Config, ConfirmationFacts, CycleSide, EventReconciler,
    FixedSide, ScalingController, Side, SignalSource,
};

#[derive(Parser)]
#[command(name = "scale-bot")]
#[command(version = "0.2.0")]
#[command(about = "Staged Position Scaling Bot", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a default configuration file
    Init,

    /// Print the stage schedule for a hypothetical account
    Plan {
        /// Available balance in quote currency
        #[arg(short, long)]
        balance: f64,

        /// Current instrument price
        #[arg(short, long)]
        price: f64,

        /// Exchange minimum order quantity
        #[arg(short, long, default_value = "0.001")]
        min_qty: f64,
    },

    /// Run the live controller
    Run,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    std::env::set_var("RUST_LOG", log_level);
    tracing_subscriber::fmt::init();

    info!("🚀 Scale Trading Bot v0.2.0");
    info!("📁 Config: {}", cli.config);

    match cli.command {
        Commands::Init => {
            let config = Config::load_or_create(&cli.config)?;
            info!(symbol = %config.trading.symbol, "configuration ready");
        }
        Commands::Plan {
            balance,
            price,
            min_qty,
        } => {
            let config = Config::from_file(&cli.config)?;
            plan(&config, balance, price, min_qty);
        }
        Commands::Run => {
            let config = Config::from_file(&cli.config)?;
            run(config).await?;
        }
    }

    Ok(())
}

fn plan(config: &Config, balance: f64, price: f64, min_qty: f64) {
    let schedule = build_stage_schedule(
        balance,
        price,
        config.trading.leverage,
        config.trading.growth_rate,
        min_qty,
        config.trading.safety_factor,
    );
    if schedule.stage_max() == 0 {
        warn!(balance, price, "balance cannot cover a minimum-sized entry");
        return;
    }
    info!(stages = schedule.stage_max(), "stage schedule");
    let mut total = 0.0;
    for (index, qty) in schedule.quantities().iter().enumerate() {
        total += qty;
        info!("  stage {:>3}: qty {:>12.8}  cumulative {:>12.8}", index, qty, total);
    }
    info!(
        notional = total * price,
        margin = total * price / config.trading.leverage as f64,
        "totals"
    );
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let exchange = Arc::new(BinanceFuturesClient::new(
        &config.exchange,
        &config.trading.symbol,
    )?);

    let facts = Arc::new(ConfirmationFacts::new());
    let cycle_side = Arc::new(CycleSide::new());

    let signal: Box<dyn SignalSource> = match config.trading.entry_side.as_str() {
        "long" => Box::new(FixedSide(Side::Long)),
        "short" => Box::new(FixedSide(Side::Short)),
        // validate() admits only the three names.
        _ => Box::new(CandleRecovery::new(exchange.clone(), config.signal.clone())),
    };

    let mut controller = ScalingController::new(
        exchange.clone(),
        facts.clone(),
        cycle_side.clone(),
        signal,
        config.trading.clone(),
    )
    .with_status_logging(config.logging.enable_status_logging)
    .with_tick_logging(config.logging.enable_tick_logging);

    controller.initialize().await?;

    let (tick_tx, tick_rx) = mpsc::channel(256);
    let (event_tx, event_rx) = mpsc::channel(256);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let reconciler = EventReconciler::new(facts, cycle_side);
    tokio::spawn(async move {
        reconciler.run(event_rx).await;
    });

    {
        let ws_url = config.exchange.ws_url.clone();
        let symbol = config.trading.symbol.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = run_price_feed(&ws_url, &symbol, tick_tx, shutdown).await {
                error!(error = %e, "price feed task failed");
            }
        });
    }

    {
        let ws_url = config.exchange.ws_url.clone();
        let symbol = config.trading.symbol.clone();
        let rest = exchange.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = run_user_stream(&ws_url, &symbol, rest, event_tx, shutdown).await {
                error!(error = %e, "user stream task failed");
            }
        });
    }

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    controller.run(tick_rx, shutdown_rx).await?;
    info!("👋 Controller stopped");
    Ok(())
}
