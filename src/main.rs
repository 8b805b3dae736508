use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use rust_decimal::Decimal;
use std::sync::Arc;
use tradewatch::api::YahooFinanceClient;
use tradewatch::auth::{hash_password, CredentialStore, StaticCredentialStore};
use tradewatch::config::{Settings, SinkKind};
use tradewatch::execution::{
    spawn_monitor, MonitorOutcome, MonitorRequest, PriceFeed, RandomWalkFeed, SettlementMode,
    TradeMonitor, TradeParams,
};
use tradewatch::models::universe::{company_name, nifty_50};
use tradewatch::models::{Stock, TradeRecord};
use tradewatch::persistence::{build_sink, TradeLogSink};
use tradewatch::screener::Screener;

#[derive(Parser)]
#[command(name = "tradewatch", version, about = "Virtual trading monitor for NSE equities")]
struct Cli {
    /// Config file (without extension is fine); defaults to ./tradewatch.*
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan symbols for recent EMA 20/50 crossovers
    Screen {
        /// Comma-separated symbols; defaults to the Nifty 50
        #[arg(long, value_delimiter = ',')]
        symbols: Vec<String>,
        /// Trailing samples to check
        #[arg(long)]
        window: Option<usize>,
        /// Also report EMA 50/100 crossovers
        #[arg(long)]
        slow_pair: bool,
        /// Use simulated quotes instead of the live feed
        #[arg(long)]
        simulate: bool,
    },
    /// Open a virtual position and watch it until stop-loss or target
    Monitor {
        #[arg(long)]
        user: String,
        /// Password; read from TRADEWATCH_PASSWORD when omitted
        #[arg(long, env = "TRADEWATCH_PASSWORD", hide_env_values = true)]
        password: Option<String>,
        #[arg(long)]
        symbol: String,
        #[arg(long, default_value_t = 1)]
        lot_size: u32,
        #[arg(long)]
        stop_loss_pct: Decimal,
        #[arg(long)]
        target_pct: Decimal,
        #[arg(long, value_enum)]
        settlement: Option<SettlementArg>,
        /// Use simulated quotes instead of the live feed
        #[arg(long)]
        simulate: bool,
        /// Keep the trade log in memory only
        #[arg(long)]
        dry_run: bool,
    },
    /// Print a user's settled trades
    History {
        #[arg(long)]
        user: String,
    },
    /// Print the digest to put under [users] in the config file
    HashPassword { password: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum SettlementArg {
    Boundary,
    TickPrice,
}

impl From<SettlementArg> for SettlementMode {
    fn from(arg: SettlementArg) -> Self {
        match arg {
            SettlementArg::Boundary => SettlementMode::Boundary,
            SettlementArg::TickPrice => SettlementMode::TickPrice,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let settings = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    }
    .context("failed to load settings")?;

    match cli.command {
        Command::Screen {
            symbols,
            window,
            slow_pair,
            simulate,
        } => run_screen(&settings, symbols, window, slow_pair, simulate).await,
        Command::Monitor {
            user,
            password,
            symbol,
            lot_size,
            stop_loss_pct,
            target_pct,
            settlement,
            simulate,
            dry_run,
        } => {
            authenticate(&settings, &user, password.as_deref())?;
            let request = MonitorRequest::new(
                user,
                symbol.to_uppercase(),
                TradeParams::new(lot_size, stop_loss_pct, target_pct),
            );
            run_monitor(&settings, request, settlement, simulate, dry_run).await
        }
        Command::History { user } => run_history(&settings, &user).await,
        Command::HashPassword { password } => {
            println!("{}", hash_password(&password));
            Ok(())
        }
    }
}

// ============================================================================
// Initialization Functions
// ============================================================================

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tradewatch=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn create_feed(settings: &Settings, simulate: bool) -> anyhow::Result<Arc<dyn PriceFeed>> {
    if simulate {
        let seed = rand::random::<u64>();
        tracing::info!(seed, "Using simulated quotes");
        return Ok(Arc::new(RandomWalkFeed::new(seed, 1000.0, 1.5)));
    }
    Ok(Arc::new(YahooFinanceClient::new(&settings.feed)?))
}

fn authenticate(settings: &Settings, user: &str, password: Option<&str>) -> anyhow::Result<()> {
    let store = StaticCredentialStore::new(settings.users.clone());
    if store.is_empty() {
        tracing::warn!("No users configured, skipping authentication");
        return Ok(());
    }

    let Some(password) = password else {
        bail!("a password is required (use --password or TRADEWATCH_PASSWORD)");
    };
    store.authenticate(user, password)?;
    Ok(())
}

// ============================================================================
// Commands
// ============================================================================

async fn run_screen(
    settings: &Settings,
    symbols: Vec<String>,
    window: Option<usize>,
    slow_pair: bool,
    simulate: bool,
) -> anyhow::Result<()> {
    let mut screener_settings = settings.screener.clone();
    if let Some(window) = window {
        screener_settings.window = window;
    }
    screener_settings.include_slow_pair |= slow_pair;

    let universe: Vec<Stock> = if symbols.is_empty() {
        nifty_50()
    } else {
        symbols
            .iter()
            .map(|s| {
                let symbol = s.trim().to_uppercase();
                let name = company_name(&symbol).to_string();
                Stock::new(symbol, name)
            })
            .collect()
    };

    let screener = Screener::new(create_feed(settings, simulate)?, &screener_settings);
    let report = screener.scan(&universe).await;

    println!("\n=== EMA Crossover Screen ({} symbols) ===\n", report.scanned);
    if report.hits.is_empty() {
        println!(
            "No stocks found with EMA crossovers in the last {} sessions.",
            screener_settings.window
        );
    }
    for hit in &report.hits {
        println!(
            "Symbol: {} | Name: {} | Price: ₹{:.2}",
            hit.stock.symbol, hit.stock.name, hit.latest_price
        );
        for event in &hit.events {
            println!("  - {}", event.describe());
        }
        println!("---");
    }
    for (symbol, reason) in &report.failures {
        println!("Error fetching data for {}: {}", symbol, reason);
    }

    Ok(())
}

async fn run_monitor(
    settings: &Settings,
    request: MonitorRequest,
    settlement: Option<SettlementArg>,
    simulate: bool,
    dry_run: bool,
) -> anyhow::Result<()> {
    let mut sink_settings = settings.sink.clone();
    if dry_run {
        sink_settings.kind = SinkKind::Memory;
    }
    let sink = build_sink(&sink_settings)?;

    let mut config = settings.monitor.to_monitor_config();
    if let Some(mode) = settlement {
        config.settlement = mode.into();
    }

    let feed = create_feed(settings, simulate)?;
    let monitor = TradeMonitor::start(feed, sink, request, config).await?;

    if let Some(position) = monitor.position() {
        println!(
            "Monitoring {} x{} | Entry ₹{:.2} | Stop-Loss ₹{:.2} | Target ₹{:.2}",
            position.symbol,
            position.lot_size,
            position.entry_price,
            position.stop_loss_price,
            position.target_price
        );
        println!("Press Ctrl+C to stop...\n");
    }

    let mut handle = spawn_monitor(monitor);
    let outcome = tokio::select! {
        joined = handle.finished() => joined?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C, stopping monitor...");
            handle.cancel();
            handle.join().await?
        }
    };

    match outcome {
        MonitorOutcome::Settled(settlement) => {
            print_record(&settlement.record);
            if let Some(cause) = &settlement.cause {
                println!("  cause: {}", cause);
            }
            if let Err(e) = settlement.persisted {
                bail!("trade settled but could not be saved: {}", e);
            }
        }
        MonitorOutcome::Cancelled(position) => {
            println!(
                "Stopped. {} position left open at entry ₹{:.2}; nothing was logged.",
                position.symbol, position.entry_price
            );
        }
    }

    Ok(())
}

async fn run_history(settings: &Settings, user: &str) -> anyhow::Result<()> {
    let sink = build_sink(&settings.sink)?;
    let records = sink.read_all(user).await?;

    if records.is_empty() {
        println!("No trades logged for {}.", user);
        return Ok(());
    }

    println!(
        "{:<20} {:<14} {:>10} {:>10} {:>10} {:>10} {:>12}  Status",
        "Timestamp", "Symbol", "Entry", "Stop", "Target", "Exit", "P/L"
    );
    for record in &records {
        println!(
            "{:<20} {:<14} {:>10.2} {:>10.2} {:>10.2} {:>10} {:>12}  {}",
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            record.symbol,
            record.entry_price,
            record.stop_loss_price,
            record.target_price,
            record.exit_price.map(|p| format!("{:.2}", p)).unwrap_or_else(|| "-".into()),
            record.profit_loss.map(|p| format!("{:.2}", p)).unwrap_or_else(|| "-".into()),
            record.status
        );
    }

    Ok(())
}

fn print_record(record: &TradeRecord) {
    match (record.exit_price, record.profit_loss) {
        (Some(exit), Some(pnl)) => println!(
            "{}: {} exited at ₹{:.2}, P/L ₹{:.2}",
            record.status, record.symbol, exit, pnl
        ),
        _ => println!(
            "{}: price feed failed for {}, position closed without settlement",
            record.status, record.symbol
        ),
    }
}
