use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

mod api;
mod config;
mod db;
mod engine;
mod error;
mod feeds;
mod scheduler;

use api::AppState;
use config::{Cli, Command, Config};
use db::models::{GameContext, PredictionStatus, Recommendation};
use db::Database;
use engine::consensus::StakeSettings;
use engine::curve_cache::CurveCache;
use engine::{EngineSettings, PredictionEngine};
use feeds::{
    AnalysisProvider, EspnResultFeed, HttpAnalysisProvider, HttpSituationalFeed, SituationalFeed,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    cli.config.validate()?;

    let db = Database::open(&cli.config.database_path)
        .with_context(|| format!("Failed to open database {}", cli.config.database_path))?;
    info!("Database opened: {}", cli.config.database_path);

    let engine = build_engine(&cli.config, db)?;

    match cli.command {
        Command::Serve {
            listen_addr,
            reconcile_interval_secs,
        } => {
            scheduler::start_reconcile_loop(
                engine.clone(),
                Duration::from_secs(reconcile_interval_secs.max(1)),
            );

            let app = api::router(AppState { engine });
            let addr: SocketAddr = listen_addr
                .parse()
                .with_context(|| format!("Invalid listen address {}", listen_addr))?;
            info!("API listening on http://{}", addr);
            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, app).await?;
        }
        Command::Recommend { context, track } => {
            let context: GameContext = read_json(&context)?;
            let rec = engine.compute_recommendation(context).await?;
            print_json(&rec)?;
            if track {
                let id = engine.track_recommendation(&rec)?;
                println!("tracking_id: {}", id);
            }
        }
        Command::Track { recommendation } => {
            let rec: Recommendation = read_json(&recommendation)?;
            println!("{}", engine.track_recommendation(&rec)?);
        }
        Command::Reconcile { lookback_days } => {
            let summary = engine.reconcile_outcomes(lookback_days).await?;
            print_json(&summary)?;
        }
        Command::Stats { days } => {
            let stats = engine.calibration_stats().await?;
            print_json(&serde_json::json!({
                "calibration": stats,
                "predictions": engine.status_counts()?,
                "performance": engine.performance_summary(days)?,
            }))?;
        }
        Command::List { status, limit } => {
            let status = status
                .as_deref()
                .map(str::parse::<PredictionStatus>)
                .transpose()?;
            for p in engine.list_predictions(status, limit)? {
                println!(
                    "{}  {:<9} {:<6} {} @ {}  pick={} raw={:.3} cal={:.3}",
                    p.tracking_id,
                    p.status.as_str(),
                    p.sport.as_str(),
                    p.away_team,
                    p.home_team,
                    p.pick.label(),
                    p.raw_confidence,
                    p.calibrated_confidence
                );
            }
        }
    }

    Ok(())
}

fn build_engine(config: &Config, db: Database) -> Result<PredictionEngine> {
    let timeout = Duration::from_secs(config.fetch_timeout_secs);

    let mut providers: Vec<Arc<dyn AnalysisProvider>> = Vec::new();
    for (name, url) in config.providers()? {
        providers.push(Arc::new(HttpAnalysisProvider::new(&name, &url, timeout)?));
    }
    let mut situational: Vec<Arc<dyn SituationalFeed>> = Vec::new();
    for (kind, url) in config.feeds()? {
        situational.push(Arc::new(HttpSituationalFeed::new(kind, &url, timeout)?));
    }
    info!(
        "Configured {} analysis provider(s), {} situational feed(s)",
        providers.len(),
        situational.len()
    );

    let result_feed = Arc::new(EspnResultFeed::new(Some(&config.result_feed_url), timeout)?);
    let cache = CurveCache::new(
        Duration::from_secs(config.calibration_ttl_secs),
        config.min_bin_samples,
        config.calibration_history_limit.max(1) as u64,
    );
    let settings = EngineSettings {
        fetch_timeout: timeout,
        stake: StakeSettings {
            kelly_multiplier: config.kelly_fraction,
            kelly_cap: config.kelly_cap,
        },
        history_limit: config.calibration_history_limit,
        lookback_days: config.lookback_days,
    };

    Ok(PredictionEngine::new(
        db,
        providers,
        situational,
        result_feed,
        cache,
        settings,
    ))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
