//! ARBITER: automated multi-strategy trading engine
//!
//! Entry point. Initialises structured logging, loads configuration
//! (defaults when the file is absent), wires the strategy store,
//! opportunity feed and executor into the engine, and runs until Ctrl+C,
//! draining the in-flight cycle on the way out.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use arbiter::config::AppConfig;
use arbiter::dashboard;
use arbiter::engine::events::log_events;
use arbiter::engine::executor::PaperExecutor;
use arbiter::engine::source::FeedReplaySource;
use arbiter::engine::Engine;
use arbiter::strategy::StrategyStore;

const BANNER: &str = r#"
    _    ____  ____ ___ _____ _____ ____
   / \  |  _ \| __ )_ _|_   _| ____|  _ \
  / _ \ | |_) |  _ \| |  | | |  _| | |_) |
 / ___ \|  _ <| |_) | |  | | | |___|  _ <
/_/   \_\_| \_\____/___| |_| |_____|_| \_\

  Multi-strategy opportunity engine
  v0.1.0 (paper execution)
"#;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    init_logging();

    let config_path =
        std::env::var("ARBITER_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let cfg = AppConfig::load_or_default(&config_path)?;

    println!("{BANNER}");
    info!(
        name = %cfg.engine.name,
        config = %config_path,
        cycle_ms = cfg.engine.cycle_interval_ms,
        confidence_threshold = cfg.decision.confidence_threshold,
        min_profit = format!("${:.2}", cfg.decision.min_profit_usd),
        risk_enabled = cfg.risk.enabled,
        "ARBITER starting up"
    );

    // -- Initialise components -------------------------------------------

    let store = Arc::new(StrategyStore::with_defaults());
    for strategy in store.list_all().await {
        info!("{strategy}");
    }

    let source = FeedReplaySource::from_file(&cfg.feed.path)
        .context("Opportunity feed is required in paper mode")?;
    if source.is_empty() {
        warn!(path = %cfg.feed.path, "Opportunity feed is empty; cycles will find nothing");
    }

    let dashboard_cfg = cfg.dashboard.clone();
    let engine = Arc::new(Engine::new(
        cfg,
        store,
        Arc::new(source),
        Arc::new(PaperExecutor),
        None,
    ));

    tokio::spawn(log_events(engine.subscribe()));

    if dashboard_cfg.enabled {
        dashboard::spawn_dashboard(engine.clone(), dashboard_cfg.port).await?;
    }

    // -- Run -------------------------------------------------------------

    engine.start().await?;
    info!("Engine running. Press Ctrl+C to stop.");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received.");

    engine.stop().await;

    let m = engine.metrics().await;
    info!(
        cycles = engine.cycles_completed(),
        trades = m.total_trades,
        success_rate = format!("{:.1}%", m.success_rate),
        net = format!("${:.2}", m.net_profit_usd),
        "ARBITER shut down cleanly."
    );

    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("arbiter=info"));

    let json_logging = std::env::var("ARBITER_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
