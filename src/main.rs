use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use tsla_valuation::assistant::client::AssistantClient;
use tsla_valuation::assistant::context::AssistantContext;
use tsla_valuation::config::{AppConfig, Secrets};
use tsla_valuation::db::store::Store;
use tsla_valuation::market::fundamentals::FundamentalsTracker;
use tsla_valuation::market::models::{ChartRange, Freshness, Fundamentals, Quote};
use tsla_valuation::market::yahoo::YahooClient;
use tsla_valuation::market::MarketDataSource;
use tsla_valuation::monitoring::alerts::AlertClient;
use tsla_valuation::monitoring::dashboard::{spawn_dashboard, DashboardState};
use tsla_valuation::monitoring::health::HealthState;
use tsla_valuation::monitoring::logger::{self, LogFormat};
use tsla_valuation::monitoring::rules::AlertRules;
use tsla_valuation::tracker::Tracker;
use tsla_valuation::valuation::engine::Access;
use tsla_valuation::valuation::metrics::boundary_markers;

#[derive(Parser)]
#[command(name = "tsla-valuation", version, about = "Price-to-sales valuation tracker")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "config/default.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Poll quotes, persist snapshots, send alerts and serve the dashboard.
    Watch,
    /// Value a single price offline and print the report as JSON.
    Evaluate {
        #[arg(long)]
        price: f64,
        #[arg(long)]
        previous_close: Option<f64>,
        /// Trailing revenue in billions. Defaults to the configured fallback.
        #[arg(long, requires = "shares")]
        revenue: Option<f64>,
        /// Shares outstanding in billions.
        #[arg(long, requires = "revenue")]
        shares: Option<f64>,
        #[arg(long, default_value = "pro")]
        access: Access,
    },
    /// Print the tier table with the price at each boundary.
    Tiers,
    /// Fetch price history and print it as JSON.
    Chart {
        #[arg(long, default_value = "1M")]
        range: ChartRange,
    },
    /// Ask the assistant a question about the current valuation.
    Ask {
        #[arg(long, default_value = "free")]
        access: Access,
        message: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, secrets) = AppConfig::load_from(&cli.config)?;

    let format = match cli.command {
        Command::Watch => LogFormat::Json,
        _ => LogFormat::Compact,
    };
    logger::init_logging(&config.monitoring, format)?;

    match cli.command {
        Command::Watch => run_watch(config, secrets).await,
        Command::Evaluate {
            price,
            previous_close,
            revenue,
            shares,
            access,
        } => run_evaluate(&config, price, previous_close, revenue.zip(shares), access),
        Command::Tiers => run_tiers(&config),
        Command::Chart { range } => run_chart(&config, range).await,
        Command::Ask { access, message } => run_ask(&config, secrets, access, &message).await,
    }
}

/// Poll until interrupted. Cycle failures are logged and the loop keeps going.
async fn run_watch(config: AppConfig, secrets: Secrets) -> Result<()> {
    let symbol = config.market_data.symbol.clone();
    let engine = Arc::new(config.engine()?);
    let store = Store::new(&config.database.path)
        .await?
        .with_snapshot_retention(config.database.snapshot_retention);
    let source: Arc<dyn MarketDataSource> =
        Arc::new(YahooClient::new(&config.market_data, &config.rate_limit)?);

    let health = HealthState::new(&symbol);
    let alerts = AlertClient::new(secrets.alert_webhook_url, config.alerts.enabled, &symbol);
    let rules = config.alerts.enabled.then(|| AlertRules::from(&config.alerts));

    let mut tracker = Tracker::new(
        symbol.clone(),
        engine.clone(),
        source,
        FundamentalsTracker::new(config.fundamentals.clone()),
        store.clone(),
        alerts,
        rules,
        health.clone(),
    );

    let dashboard = config.dashboard.enabled.then(|| {
        let state = DashboardState::new(store, health, engine, tracker.latest());
        spawn_dashboard(state, &config.dashboard.bind, config.dashboard.port)
    });

    info!(
        symbol = %symbol,
        poll_interval_s = config.market_data.poll_interval_seconds,
        alerts = config.alerts.enabled,
        dashboard = config.dashboard.enabled,
        "Tracker starting"
    );

    let mut ticker =
        tokio::time::interval(Duration::from_secs(config.market_data.poll_interval_seconds));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = tracker.run_cycle().await {
                    error!(error = %e, cycle = tracker.cycle_number(), "Cycle failed");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!(cycles = tracker.cycle_number(), "Shutdown requested");
                break;
            }
        }
    }

    if let Some(handle) = dashboard {
        handle.abort();
    }

    Ok(())
}

fn configured_fundamentals(config: &AppConfig) -> Fundamentals {
    let f = &config.fundamentals;
    Fundamentals::new(
        f.fallback_revenue,
        f.fallback_shares,
        f.fallback_as_of.clone(),
        Freshness::Cached,
    )
}

fn run_evaluate(
    config: &AppConfig,
    price: f64,
    previous_close: Option<f64>,
    overrides: Option<(f64, f64)>,
    access: Access,
) -> Result<()> {
    let engine = config.engine()?;
    let fundamentals = match overrides {
        Some((revenue, shares)) => Fundamentals::new(revenue, shares, "manual", Freshness::Cached),
        None => configured_fundamentals(config),
    };

    let quote = Quote::new(price, previous_close.unwrap_or(price));
    let report = engine
        .evaluate(&quote, Some(&fundamentals))?
        .redacted_for(access);

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run_tiers(config: &AppConfig) -> Result<()> {
    let engine = config.engine()?;
    let fundamentals = configured_fundamentals(config);

    println!(
        "{} tiers, reference {:.1}x, fundamentals {} (revenue ${:.2}B, {:.2}B shares)\n",
        config.market_data.symbol,
        engine.reference_multiple(),
        fundamentals.as_of,
        fundamentals.trailing_revenue,
        fundamentals.shares_outstanding,
    );

    for tier in engine.table().tiers() {
        let upper = if tier.max_multiple.is_finite() {
            format!("{:.1}x", tier.max_multiple)
        } else {
            "and up".to_string()
        };
        println!(
            "{:<16} {:>5.1}x - {:<7} {}",
            tier.label, tier.min_multiple, upper, tier.signal
        );
    }

    println!();
    for marker in boundary_markers(Some(&fundamentals), engine.table()) {
        println!(
            "{:<16} starts at ${:.2} ({:.1}x)",
            marker.label, marker.implied_price, marker.multiple
        );
    }

    Ok(())
}

async fn run_chart(config: &AppConfig, range: ChartRange) -> Result<()> {
    let client = YahooClient::new(&config.market_data, &config.rate_limit)?;
    let candles = client
        .candles(range)
        .await
        .with_context(|| format!("Failed to fetch {range} chart"))?;

    info!(range = %range, candles = candles.len(), "Chart fetched");
    println!("{}", serde_json::to_string_pretty(&candles)?);
    Ok(())
}

async fn run_ask(config: &AppConfig, secrets: Secrets, access: Access, message: &str) -> Result<()> {
    let symbol = &config.market_data.symbol;
    let engine = config.engine()?;
    let client = YahooClient::new(&config.market_data, &config.rate_limit)?;

    let mut fundamentals = FundamentalsTracker::new(config.fundamentals.clone());
    fundamentals.refresh(&client).await;

    let context = match client.quote().await {
        Ok(quote) => {
            let report = engine.evaluate(&quote, Some(fundamentals.current()))?;
            AssistantContext::from_report(symbol.as_str(), &report, access)
        }
        Err(e) => {
            warn!(error = %e, "Live quote unavailable, answering without market data");
            AssistantContext::empty(symbol.as_str(), access)
        }
    };

    let assistant = AssistantClient::new(&config.assistant, secrets.assistant_api_key)?;
    let reply = assistant.reply(&context, message).await;

    info!(source = ?reply.source, "Assistant replied");
    println!("{}", reply.text);
    Ok(())
}
