//! fare-radar: periodic cheapest-fare scanner.
//!
//! Single-binary Tokio application that:
//! 1. Expands configured routes into month-pair queries
//! 2. Fetches fare grids with bounded concurrency and retries
//! 3. Keeps the K cheapest fares per group and publishes a snapshot
//! 4. Serves the latest snapshot and an on-demand refresh over HTTP

mod api;
mod config;
mod journal;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use clap::Parser;
use serde_json::json;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{error, info, warn};

use common::config::AppConfig;
use fare_grid_client::FareGridClient;
use refresh_engine::{CacheSnapshot, RefreshOrchestrator, RefreshSettings};

use crate::journal::FareJournal;

/// Cheapest-fare refresh service
#[derive(Parser)]
#[command(name = "fare-radar", about = "Periodic cheapest-fare scanner")]
struct Cli {
    /// Path to a TOML config file (defaults to ./config.toml when present).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run a single refresh cycle, print a summary, and exit.
    #[arg(long)]
    once: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,
}

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);
const SCHEDULE_STOP_GRACE: Duration = Duration::from_secs(5);

type SharedJournal = Arc<Mutex<Option<FareJournal>>>;

async fn write_journal_event(journal: &SharedJournal, event: serde_json::Value) {
    if let Some(j) = journal.lock().await.as_mut() {
        j.write_event(event);
    }
}

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "fare_radar=info,refresh_engine=info,fare_grid_client=info".into()
    });
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn build_orchestrator(
    cfg: &AppConfig,
    listener: Option<mpsc::UnboundedSender<Arc<CacheSnapshot>>>,
) -> Result<RefreshOrchestrator, common::Error> {
    let client = FareGridClient::new(&cfg.upstream)?;
    let orchestrator =
        RefreshOrchestrator::new(Arc::new(client), RefreshSettings::from_config(cfg));
    Ok(match listener {
        Some(tx) => orchestrator.with_publish_listener(tx),
        None => orchestrator,
    })
}

fn print_summary(snapshot: &CacheSnapshot, currency: &str) {
    println!(
        "Cycle {} at {}: {} queries, {} priced, {} no price, {} failed{}",
        snapshot.cycle_id,
        snapshot.refreshed_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        snapshot.stats.queries,
        snapshot.stats.priced,
        snapshot.stats.no_price,
        snapshot.stats.failed_total(),
        if snapshot.stats.timed_out { " (timed out)" } else { "" }
    );
    for (key, entries) in &snapshot.groups {
        match entries.first() {
            Some(best) => println!(
                "  {:<16} {:>10.2} {}  {}",
                key.as_str(),
                best.price(),
                currency,
                best.query.months
            ),
            None => println!("  {:<16} {:>10}", key.as_str(), "-"),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    info!("fare-radar starting up...");

    let cfg = match config::load_config(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Routes: {} origins x {} destinations, window={} months ({:?}), group_by={:?}, top_k={}",
        cfg.search.origins.len(),
        cfg.search.destinations.len(),
        cfg.search.window_months,
        cfg.search.inbound_policy,
        cfg.search.group_by,
        cfg.search.top_k,
    );
    info!(
        "Upstream: {} market={} currency={} concurrency={} attempts={}",
        cfg.upstream.base_url,
        cfg.upstream.market,
        cfg.upstream.currency,
        cfg.refresh.max_concurrency,
        cfg.upstream.max_attempts,
    );

    // ── Single cycle mode ────────────────────────────────────────────
    if cli.once {
        let orchestrator = match build_orchestrator(&cfg, None) {
            Ok(o) => o,
            Err(e) => {
                error!("Failed to build fare client: {}", e);
                std::process::exit(1);
            }
        };
        match orchestrator.refresh_now().await {
            Ok(snapshot) => print_summary(&snapshot, &cfg.upstream.currency),
            Err(e) => {
                error!("Refresh failed: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    // ── Fare journal ─────────────────────────────────────────────────
    let (publish_tx, mut publish_rx) = mpsc::unbounded_channel::<Arc<CacheSnapshot>>();
    let journal = match &cfg.journal_dir {
        Some(dir) => match FareJournal::open(dir.clone()) {
            Ok(j) => {
                info!("Fare journal path: {}", j.current_path().display());
                Some(j)
            }
            Err(e) => {
                error!("Failed to initialize fare journal: {}", e);
                std::process::exit(1);
            }
        },
        None => None,
    };
    let fare_journal: SharedJournal = Arc::new(Mutex::new(journal));
    write_journal_event(
        &fare_journal,
        json!({
            "ts": now_iso(),
            "kind": "service_start",
            "window_months": cfg.search.window_months,
            "top_k": cfg.search.top_k,
            "max_concurrency": cfg.refresh.max_concurrency,
        }),
    )
    .await;

    let orchestrator = match build_orchestrator(&cfg, Some(publish_tx)) {
        Ok(o) => Arc::new(o),
        Err(e) => {
            error!("Failed to build fare client: {}", e);
            std::process::exit(1);
        }
    };

    let currency = cfg.upstream.currency.clone();
    let publish_journal = fare_journal.clone();
    tokio::spawn(async move {
        while let Some(snapshot) = publish_rx.recv().await {
            if let Some(j) = publish_journal.lock().await.as_mut() {
                j.record_snapshot(&snapshot, &currency);
            }
        }
    });

    // ── Schedule ─────────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let schedule_handle = tokio::spawn(orchestrator.clone().run_schedule(
        Duration::from_secs(cfg.refresh.interval_secs),
        cfg.refresh.refresh_on_start,
        shutdown_rx,
    ));

    // ── Heartbeat ────────────────────────────────────────────────────
    let hb_orchestrator = orchestrator.clone();
    let heartbeat_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let store = hb_orchestrator.store();
            let (groups, entries) = store
                .load()
                .map(|s| (s.groups.len(), s.entry_count()))
                .unwrap_or_default();
            info!(
                "HEARTBEAT: phase={:?} published={} groups={} entries={}",
                hb_orchestrator.phase(),
                store.published_count(),
                groups,
                entries
            );
        }
    });

    // ── HTTP API ─────────────────────────────────────────────────────
    let listener = match tokio::net::TcpListener::bind(&cfg.server.bind).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind {}: {}", cfg.server.bind, e);
            std::process::exit(1);
        }
    };
    let app = api::router(
        api::AppState {
            orchestrator: orchestrator.clone(),
            currency: Arc::from(cfg.upstream.currency.as_str()),
        },
        api::cors_layer(&cfg.server.cors_origins),
    );
    let server_handle = tokio::spawn(async move { axum::serve(listener, app).await });

    // ── Wait for shutdown ────────────────────────────────────────────
    info!("fare-radar listening on {}. Press Ctrl+C to stop.", cfg.server.bind);

    let shutdown_reason = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            "ctrl_c"
        }
        r = server_handle => {
            error!("HTTP server exited: {:?}", r);
            "server_exit"
        }
        r = heartbeat_handle => {
            error!("Heartbeat task exited: {:?}", r);
            "heartbeat_task_exit"
        }
    };

    let _ = shutdown_tx.send(true);
    if tokio::time::timeout(SCHEDULE_STOP_GRACE, schedule_handle)
        .await
        .is_err()
    {
        warn!("Refresh cycle still running at shutdown; abandoning it");
    }

    write_journal_event(
        &fare_journal,
        json!({
            "ts": now_iso(),
            "kind": "service_shutdown",
            "reason": shutdown_reason,
        }),
    )
    .await;

    info!("fare-radar shut down.");
}
