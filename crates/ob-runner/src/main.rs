mod exchange;

use std::{
    fmt::Write as _,
    fs::OpenOptions,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{anyhow, Context, Result};
use chrono::{TimeDelta, Utc};
use clap::{Parser, Subcommand};
use exchange::{ExchangeConfig, ExchangeKind, Network, DEFAULT_SLIPPAGE};
use ob_common::{
    load_strategy_from_spec,
    schedule::{DEFAULT_PRICE_PRECISION, DEFAULT_QUANTITY_PRECISION},
    strategy::{
        GridStrategy, LimitStrategy, MarketStrategy, OcoStrategy, StopLimitStrategy,
        TwapStrategy,
    },
    CancelSignal, OrderBotError, OrderSide, Precision, RunArtifacts, SliceResult, SlicePlan, StrategyReport,
    StrategyRunner, StrategySpec,
};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Place futures orders and run TWAP or grid strategies"
)]
struct Cli {
    /// Exchange backend to route orders to
    #[arg(long, value_enum, default_value = "binance", global = true)]
    exchange: ExchangeKind,

    /// Network to target (mainnet, testnet)
    #[arg(long, value_enum, default_value = "testnet", global = true)]
    network: Network,

    /// Output directory. Defaults to runs/<timestamp>
    #[arg(long, global = true)]
    out: Option<PathBuf>,

    /// Log file, appended to on every run
    #[arg(long, default_value = "bot.log", global = true)]
    log_file: PathBuf,

    /// Decimal places for order quantities
    #[arg(long, default_value_t = DEFAULT_QUANTITY_PRECISION, global = true)]
    qty_precision: u32,

    /// Decimal places for grid prices
    #[arg(long, default_value_t = DEFAULT_PRICE_PRECISION, global = true)]
    price_precision: u32,

    /// Worst-price tolerance for market orders on venues without native ones
    #[arg(long, default_value_t = DEFAULT_SLIPPAGE, global = true)]
    slippage: f64,

    /// Build and record the plan without submitting anything
    #[arg(long, default_value_t = false, global = true)]
    dry_run: bool,

    /// Binance API key (env: API_KEY)
    #[arg(long, env = "API_KEY", hide_env_values = true, global = true)]
    api_key: Option<String>,

    /// Binance API secret (env: API_SECRET)
    #[arg(long, env = "API_SECRET", hide_env_values = true, global = true)]
    api_secret: Option<String>,

    /// Hex-encoded private key for the Hyperliquid wallet (env: HL_PRIVATE_KEY)
    #[arg(long, env = "HL_PRIVATE_KEY", hide_env_values = true, global = true)]
    private_key: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Place a market order
    #[command(allow_negative_numbers = true)]
    Market {
        symbol: String,
        side: String,
        quantity: f64,
    },
    /// Place a limit order (GTC)
    #[command(allow_negative_numbers = true)]
    Limit {
        symbol: String,
        side: String,
        quantity: f64,
        price: f64,
    },
    /// Place a stop-limit order
    #[command(allow_negative_numbers = true)]
    StopLimit {
        symbol: String,
        side: String,
        quantity: f64,
        stop_price: f64,
        limit_price: f64,
    },
    /// Place a take-profit limit and a stop-market exit for the same quantity
    #[command(allow_negative_numbers = true)]
    Oco {
        symbol: String,
        quantity: f64,
        tp_price: f64,
        stop_price: f64,
        /// Side of both exit orders
        #[arg(long, default_value = "sell")]
        side: String,
    },
    /// Split a quantity into equal market orders spaced in time
    #[command(allow_negative_numbers = true)]
    Twap {
        symbol: String,
        side: String,
        total_quantity: f64,
        parts: u32,
        interval_secs: u64,
    },
    /// Lay a ladder of limit orders between two prices
    #[command(allow_negative_numbers = true)]
    Grid {
        symbol: String,
        lower_price: f64,
        upper_price: f64,
        levels: u32,
        quantity_per_level: f64,
    },
    /// Run a strategy from a JSON file or JSONL file with :line selector (1-based)
    Run {
        #[arg(long)]
        strategy: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(&cli.log_file)?;

    let strategy = strategy_from_command(&cli.command).map_err(|err| {
        error!("invalid arguments: {err:#}");
        err
    })?;
    let Preflight { config, plan } = preflight(&cli, &strategy).map_err(|err| {
        match &err {
            OrderBotError::Configuration(_) => error!("configuration error: {err}"),
            _ => error!(symbol = strategy.symbol(), "invalid strategy parameters: {err}"),
        }
        err
    })?;
    info!(
        strategy = %plan.strategy(),
        symbol = strategy.symbol(),
        slices = plan.len(),
        total_quantity = plan.total_quantity(),
        "plan built"
    );

    let timestamp = Utc::now().format("%Y%m%d-%H%M%S").to_string();
    let out_dir = cli
        .out
        .clone()
        .unwrap_or_else(|| PathBuf::from("runs").join(&timestamp));

    let artifacts = RunArtifacts::create(&out_dir, &plan.as_json())?;
    let artifacts = Arc::new(Mutex::new(artifacts));

    let Some(config) = config else {
        let meta = build_run_meta(&cli, &timestamp, &out_dir, None, None)?;
        artifacts.lock().await.write_meta(&meta)?;
        print!("{}", format_plan(&plan));
        info!(
            "dry run, skipped execution. Artifacts under {}",
            out_dir.display()
        );
        return Ok(());
    };

    let client = exchange::connect(&config)
        .await
        .with_context(|| format!("failed to connect to {}", cli.exchange.as_str()))?;
    let offset = client
        .clock_offset()
        .await
        .context("failed to synchronise clock with exchange")?;
    info!(
        exchange = client.name(),
        network = cli.network.as_str(),
        offset_ms = offset.num_milliseconds(),
        "clock synchronised"
    );

    let (cancel_tx, cancel) = CancelSignal::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping at the next slice boundary");
            let _ = cancel_tx.send(true);
        }
    });

    let mut runner = StrategyRunner::new(client.as_ref())
        .with_cancel(cancel)
        .with_artifacts(artifacts.clone());
    let report = runner.run(&plan).await;

    let symbol = plan
        .slices()
        .first()
        .map_or(strategy.symbol(), |slice| slice.spec.symbol.as_str());
    print!("{}", format_report(symbol, &report));

    let meta = build_run_meta(&cli, &timestamp, &out_dir, Some(offset), Some(&report))?;
    artifacts.lock().await.write_meta(&meta)?;
    info!("run artifacts stored under {}", out_dir.display());

    if report.attempted() > 0 && report.succeeded.is_empty() {
        return Err(anyhow!(
            "all {} submitted orders failed",
            report.attempted()
        ));
    }
    Ok(())
}

struct Preflight {
    /// `None` on a dry run.
    config: Option<ExchangeConfig>,
    plan: SlicePlan,
}

/// Checks credentials, then builds the plan. Nothing is written and no
/// connection is opened until both pass.
fn preflight(cli: &Cli, strategy: &StrategySpec) -> Result<Preflight, OrderBotError> {
    let config = if cli.dry_run {
        None
    } else {
        let config = exchange_config(cli);
        config.validate()?;
        Some(config)
    };
    let precision = Precision {
        quantity: cli.qty_precision,
        price: cli.price_precision,
    };
    let plan = strategy.plan(precision)?;
    Ok(Preflight { config, plan })
}

fn exchange_config(cli: &Cli) -> ExchangeConfig {
    ExchangeConfig {
        kind: cli.exchange,
        network: cli.network,
        api_key: cli.api_key.clone(),
        api_secret: cli.api_secret.clone(),
        private_key: cli.private_key.clone(),
        slippage: cli.slippage,
    }
}

fn init_tracing(log_file: &Path) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .with_context(|| format!("failed to open log file {}", log_file.display()))?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(
            fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file)),
        )
        .init();
    Ok(())
}

fn strategy_from_command(command: &Command) -> Result<StrategySpec> {
    let strategy = match command {
        Command::Market {
            symbol,
            side,
            quantity,
        } => StrategySpec::Market(MarketStrategy {
            symbol: symbol.clone(),
            side: side.parse::<OrderSide>()?,
            quantity: *quantity,
        }),
        Command::Limit {
            symbol,
            side,
            quantity,
            price,
        } => StrategySpec::Limit(LimitStrategy {
            symbol: symbol.clone(),
            side: side.parse::<OrderSide>()?,
            quantity: *quantity,
            price: *price,
            tif: None,
        }),
        Command::StopLimit {
            symbol,
            side,
            quantity,
            stop_price,
            limit_price,
        } => StrategySpec::StopLimit(StopLimitStrategy {
            symbol: symbol.clone(),
            side: side.parse::<OrderSide>()?,
            quantity: *quantity,
            stop_price: *stop_price,
            limit_price: *limit_price,
        }),
        Command::Oco {
            symbol,
            quantity,
            tp_price,
            stop_price,
            side,
        } => StrategySpec::Oco(OcoStrategy {
            symbol: symbol.clone(),
            side: side.parse::<OrderSide>()?,
            quantity: *quantity,
            take_profit_price: *tp_price,
            stop_price: *stop_price,
        }),
        Command::Twap {
            symbol,
            side,
            total_quantity,
            parts,
            interval_secs,
        } => StrategySpec::Twap(TwapStrategy {
            symbol: symbol.clone(),
            side: side.parse::<OrderSide>()?,
            total_quantity: *total_quantity,
            parts: *parts,
            interval_secs: *interval_secs,
        }),
        Command::Grid {
            symbol,
            lower_price,
            upper_price,
            levels,
            quantity_per_level,
        } => StrategySpec::Grid(GridStrategy {
            symbol: symbol.clone(),
            lower_price: *lower_price,
            upper_price: *upper_price,
            levels: *levels,
            quantity_per_level: *quantity_per_level,
        }),
        Command::Run { strategy } => load_strategy_from_spec(strategy)?,
    };
    Ok(strategy)
}

fn build_run_meta(
    cli: &Cli,
    timestamp: &str,
    out_dir: &Path,
    offset: Option<TimeDelta>,
    report: Option<&StrategyReport>,
) -> Result<Value> {
    let mut meta = json!({
        "exchange": cli.exchange.as_str(),
        "network": cli.network.as_str(),
        "outDir": out_dir.display().to_string(),
        "timestamp": timestamp,
        "dryRun": cli.dry_run,
        "qtyPrecision": cli.qty_precision,
        "pricePrecision": cli.price_precision,
        "clockOffsetMs": offset.map(|offset| offset.num_milliseconds()),
    });

    if let Some(report) = report {
        meta["report"] = serde_json::to_value(report)?;
    }

    Ok(meta)
}

fn format_plan(plan: &SlicePlan) -> String {
    let mut out = format!("{} plan, {} slices\n", plan.strategy(), plan.len());
    for (idx, slice) in plan.slices().iter().enumerate() {
        let spec = &slice.spec;
        let _ = write!(
            out,
            "  #{} {} {} {} {}",
            idx + 1,
            spec.side,
            spec.order_type,
            spec.quantity,
            spec.symbol
        );
        if let Some(price) = spec.price {
            let _ = write!(out, " @ {price}");
        }
        if let Some(stop_price) = spec.stop_price {
            let _ = write!(out, " stop {stop_price}");
        }
        if !slice.delay_before_submit.is_zero() {
            let _ = write!(out, " after {}s", slice.delay_before_submit.as_secs_f64());
        }
        out.push('\n');
    }
    out
}

fn format_report(symbol: &str, report: &StrategyReport) -> String {
    let mut out = format!(
        "{} {}: {}/{} orders submitted, {} succeeded, {} failed{}\n",
        report.strategy,
        symbol,
        report.attempted(),
        report.total_slices,
        report.succeeded.len(),
        report.failed.len(),
        if report.cancelled { " (cancelled)" } else { "" }
    );
    for outcome in report.outcomes() {
        let spec = &outcome.spec;
        let _ = write!(
            out,
            "  #{} {} {} {}",
            outcome.index + 1,
            spec.side,
            spec.order_type,
            spec.quantity
        );
        if let Some(price) = spec.price {
            let _ = write!(out, " @ {price}");
        }
        match &outcome.result {
            SliceResult::Success { order_id, status } => {
                let _ = writeln!(out, " -> order {order_id} ({status})");
            }
            SliceResult::Failure { message, .. } => {
                let _ = writeln!(out, " -> failed: {message}");
            }
        }
    }
    out
}
