//! # News Relay
//!
//! A feed relay that picks the most recent item per category from a small
//! set of RSS sources, fills in a real article image and a full description,
//! and hands each item to a publisher exactly once per ledger lifetime.
//!
//! ## Usage
//!
//! ```sh
//! news_relay --config news_relay.yaml --outbox-dir ./outbox
//! ```
//!
//! ## Architecture
//!
//! Each cycle runs as a pipeline:
//! 1. **Selection**: fetch every feed and claim the first item per target
//!    category
//! 2. **Enrichment**: resolve image and description for each claim on the
//!    I/O pool, merge on the CPU pool
//! 3. **Dedup**: skip URLs already in the ledger
//! 4. **Delivery**: publish to the category's destination, record on success
//!
//! An adaptive manager resizes both worker pools in the background. Ctrl-C
//! stops scheduling, stops the manager and drains the pools.

use clap::Parser;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod aggregator;
mod cli;
mod config;
mod cycle;
mod enrich;
mod error;
mod feed;
mod fetch;
mod ledger;
mod models;
mod pool;
mod pool_manager;
mod publish;
mod taxonomy;
#[cfg(test)]
mod testing;
mod utils;

use aggregator::Aggregator;
use cli::Cli;
use config::RelayConfig;
use cycle::Relay;
use enrich::Enricher;
use fetch::{Fetcher, PageSource};
use ledger::{DedupLedger, FileLedger};
use pool::Pools;
use pool_manager::AdaptivePoolManager;
use publish::{LogPublisher, OutboxPublisher, Publisher};
use taxonomy::Taxonomy;
use utils::ensure_writable_dir;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!(version = env!("CARGO_PKG_VERSION"), "news_relay starting up");

    let args = Cli::parse();
    debug!(?args, "Parsed CLI arguments");

    // ---- Config, with CLI overrides ----
    let mut config = RelayConfig::load(&args.config)?;
    if let Some(ledger) = &args.ledger {
        config.ledger_path = ledger.display().to_string();
    }
    if let Some(secs) = args.interval_secs {
        if secs == 0 {
            return Err("--interval-secs must be positive".into());
        }
        config.schedule.interval_ms = secs.saturating_mul(1000);
    }
    let targets = config.targets();
    info!(
        feeds = config.feeds.len(),
        targets = %itertools::join(&targets, ", "),
        channels = config.channels.len(),
        ledger = %config.ledger_path,
        "Loaded configuration"
    );
    for slug in targets.iter().filter(|slug| !config.channels.contains_key(*slug)) {
        warn!(category = %slug, "Target category has no destination; its items will be skipped");
    }

    // ---- Components ----
    let pools = Pools::from_settings(&config.pools)?;
    let fetcher = Arc::new(Fetcher::new(
        &config.request.user_agent,
        config.request.policy(),
    )?);
    let enricher = Enricher::new(fetcher, pools.clone(), &config.enrichment)?;
    let aggregator = Aggregator::new(enricher, Taxonomy::new(config.categories.clone()));
    let ledger = Arc::new(FileLedger::load(&config.ledger_path).await?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    let signal_tx = Arc::clone(&shutdown_tx);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested; finishing the current cycle"),
            Err(e) => error!(error = %e, "Cannot listen for Ctrl-C; stopping"),
        }
        signal_tx.send_replace(true);
    });
    let manager = tokio::spawn(
        AdaptivePoolManager::from_settings(&pools, &config.pools).run(shutdown_rx.clone()),
    );

    let every = Duration::from_millis(config.schedule.interval_ms);
    let feeds = config.feeds.clone();
    let channels = config.channels.clone();

    // ---- Schedule cycles ----
    match &args.outbox_dir {
        Some(dir) => {
            if let Err(e) = ensure_writable_dir(dir).await {
                error!(path = %dir, error = %e, "Outbox directory is not writable");
                return Err(e);
            }
            let publisher = Arc::new(OutboxPublisher::new(dir));
            info!(path = %publisher.root().display(), "Publishing to outbox");
            let relay = Relay::new(
                aggregator,
                ledger,
                publisher,
                pools.clone(),
                feeds,
                targets,
                channels,
            );
            serve(&relay, every, args.once, shutdown_rx).await;
        }
        None => {
            info!("No outbox configured; deliveries are logged only");
            let relay = Relay::new(
                aggregator,
                ledger,
                Arc::new(LogPublisher),
                pools.clone(),
                feeds,
                targets,
                channels,
            );
            serve(&relay, every, args.once, shutdown_rx).await;
        }
    }

    // ---- Shutdown ----
    shutdown_tx.send_replace(true);
    if let Err(e) = manager.await {
        warn!(error = %e, "Pool manager task ended abnormally");
    }
    pools
        .shutdown(Duration::from_millis(config.pools.shutdown_grace_ms))
        .await;

    info!(
        elapsed_secs = start_time.elapsed().as_secs(),
        "news_relay stopped"
    );
    Ok(())
}

/// Run cycles until `shutdown` flips to `true`.
///
/// # Arguments
///
/// * `relay` - the wired pipeline; one `run_cycle` per tick
/// * `every` - period between cycle starts; the first cycle starts at once
/// * `once` - run a single cycle and return
/// * `shutdown` - stop signal shared with the pool manager
///
/// A cycle already running when the signal arrives is finished, so every
/// confirmed delivery gets recorded before the pools drain. No new cycle
/// starts after the signal.
#[instrument(level = "info", skip_all, fields(interval_ms = every.as_millis() as u64, once))]
async fn serve<S, L, P>(
    relay: &Relay<S, L, P>,
    every: Duration,
    once: bool,
    mut shutdown: watch::Receiver<bool>,
) where
    S: PageSource,
    L: DedupLedger,
    P: Publisher,
{
    if once {
        relay.run_cycle().await;
        return;
    }

    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                relay.run_cycle().await;
            }
        }
    }
    info!("Scheduler stopped");
}
