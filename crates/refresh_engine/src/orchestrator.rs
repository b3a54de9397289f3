//! Refresh cycle driver: generate, fan out, fold, publish.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{AppConfig, FetchOutcome, GroupBy, InboundPolicy, RouteSpec};
use fare_grid_client::FareSource;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tracing::{error, info, instrument, warn, Span};

use crate::generator::{generate, GenerationError};
use crate::limiter::ConcurrencyLimiter;
use crate::retention::{CacheEntry, RetentionCache};
use crate::snapshot::{CacheSnapshot, CycleStats, SnapshotStore};

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("refresh already in progress")]
    AlreadyInProgress,

    #[error(transparent)]
    Generation(#[from] GenerationError),
}

/// Where the current cycle is. `Idle` between cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum RefreshPhase {
    Idle = 0,
    Generating = 1,
    Dispatching = 2,
    Awaiting = 3,
    Folding = 4,
    Published = 5,
}

impl RefreshPhase {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Generating,
            2 => Self::Dispatching,
            3 => Self::Awaiting,
            4 => Self::Folding,
            5 => Self::Published,
            _ => Self::Idle,
        }
    }
}

/// Resets the phase to `Idle` however the cycle ends.
struct PhaseGuard<'a>(&'a AtomicU8);

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.0.store(RefreshPhase::Idle as u8, Ordering::SeqCst);
    }
}

/// Everything a cycle needs besides the fare source.
#[derive(Debug, Clone)]
pub struct RefreshSettings {
    pub routes: Vec<RouteSpec>,
    pub window_months: u32,
    pub inbound_policy: InboundPolicy,
    pub group_by: GroupBy,
    pub top_k: usize,
    pub max_concurrency: usize,
    /// `None` lets a cycle run until every fetch returns.
    pub cycle_timeout: Option<Duration>,
}

impl RefreshSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        let timeout_secs = config.refresh.cycle_timeout_secs;
        Self {
            routes: RouteSpec::cross_product(&config.search.origins, &config.search.destinations),
            window_months: config.search.window_months,
            inbound_policy: config.search.inbound_policy,
            group_by: config.search.group_by,
            top_k: config.search.top_k,
            max_concurrency: config.refresh.max_concurrency,
            cycle_timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
        }
    }
}

pub struct RefreshOrchestrator {
    source: Arc<dyn FareSource>,
    settings: RefreshSettings,
    store: Arc<SnapshotStore>,
    cycle_lock: Mutex<()>,
    phase: AtomicU8,
    cycles: AtomicU64,
    on_publish: Option<mpsc::UnboundedSender<Arc<CacheSnapshot>>>,
}

impl RefreshOrchestrator {
    pub fn new(source: Arc<dyn FareSource>, settings: RefreshSettings) -> Self {
        Self {
            source,
            settings,
            store: Arc::new(SnapshotStore::new()),
            cycle_lock: Mutex::new(()),
            phase: AtomicU8::new(RefreshPhase::Idle as u8),
            cycles: AtomicU64::new(0),
            on_publish: None,
        }
    }

    /// Every published snapshot is also sent to `tx`.
    pub fn with_publish_listener(mut self, tx: mpsc::UnboundedSender<Arc<CacheSnapshot>>) -> Self {
        self.on_publish = Some(tx);
        self
    }

    pub fn store(&self) -> Arc<SnapshotStore> {
        self.store.clone()
    }

    pub fn phase(&self) -> RefreshPhase {
        RefreshPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    pub fn is_refreshing(&self) -> bool {
        self.phase() != RefreshPhase::Idle
    }

    /// Run one cycle now. Fails immediately if another cycle is running.
    pub async fn refresh_now(&self) -> Result<Arc<CacheSnapshot>, RefreshError> {
        let _cycle = self
            .cycle_lock
            .try_lock()
            .map_err(|_| RefreshError::AlreadyInProgress)?;
        let _phase = PhaseGuard(&self.phase);
        self.run_cycle().await
    }

    /// Run a cycle on its own task so the caller going away cannot cancel it.
    pub fn spawn_refresh(self: &Arc<Self>) -> JoinHandle<Result<Arc<CacheSnapshot>, RefreshError>> {
        let this = self.clone();
        tokio::spawn(async move { this.refresh_now().await })
    }

    /// Refresh every `every` until `shutdown` flips or its sender is dropped.
    pub async fn run_schedule(
        self: Arc<Self>,
        every: Duration,
        run_immediately: bool,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        if !run_immediately {
            ticker.tick().await;
        }
        info!("Refresh schedule started (every {:?})", every);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.refresh_now().await {
                        Ok(_) => {}
                        Err(RefreshError::AlreadyInProgress) => {
                            info!("Skipping scheduled refresh: a cycle is already running");
                        }
                        Err(e) => error!("Scheduled refresh failed: {}", e),
                    }
                }
                _ = shutdown.changed() => {
                    info!("Refresh schedule stopping");
                    break;
                }
            }
        }
    }

    fn set_phase(&self, phase: RefreshPhase) {
        self.phase.store(phase as u8, Ordering::SeqCst);
    }

    #[instrument(name = "refresh_cycle", skip(self), fields(cycle_id = tracing::field::Empty))]
    async fn run_cycle(&self) -> Result<Arc<CacheSnapshot>, RefreshError> {
        let started = Instant::now();
        let settings = &self.settings;

        self.set_phase(RefreshPhase::Generating);
        let queries = generate(
            Utc::now(),
            settings.window_months,
            &settings.routes,
            settings.inbound_policy,
        )
        .inspect_err(|e| error!("Cannot start refresh cycle: {}", e))?;

        let cycle_id = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;
        Span::current().record("cycle_id", cycle_id);
        info!(
            "Refresh cycle {} started: {} queries, concurrency {}",
            cycle_id,
            queries.len(),
            settings.max_concurrency
        );

        let mut cache = RetentionCache::new(settings.top_k);
        for query in &queries {
            cache.register(settings.group_by.key(query));
        }
        let mut stats = CycleStats {
            queries: queries.len(),
            ..CycleStats::default()
        };

        self.set_phase(RefreshPhase::Dispatching);
        let (tx, mut rx) = mpsc::unbounded_channel::<FetchOutcome>();
        let mut limiter = ConcurrencyLimiter::new(settings.max_concurrency);
        for query in queries {
            let source = self.source.clone();
            let tx = tx.clone();
            limiter.submit(async move {
                let outcome = source.fetch(&query).await;
                // The receiver only goes away once the cycle is over.
                let _ = tx.send(outcome);
            });
        }
        drop(tx);

        self.set_phase(RefreshPhase::Awaiting);
        let group_by = settings.group_by;
        let collect = async {
            while let Some(outcome) = rx.recv().await {
                accept(&mut cache, &mut stats, group_by, outcome);
            }
        };
        let timed_out = match settings.cycle_timeout {
            Some(limit) => timeout(limit, collect).await.is_err(),
            None => {
                collect.await;
                false
            }
        };

        if timed_out {
            limiter.abort_all().await;
            while let Ok(outcome) = rx.try_recv() {
                accept(&mut cache, &mut stats, group_by, outcome);
            }
            warn!(
                "Refresh cycle {} hit its deadline: {}/{} queries completed",
                cycle_id,
                stats.completed(),
                stats.queries
            );
        } else {
            limiter.drain().await;
        }

        self.set_phase(RefreshPhase::Folding);
        stats.timed_out = timed_out;
        stats.duration_ms = started.elapsed().as_millis() as u64;
        let snapshot = Arc::new(CacheSnapshot {
            cycle_id,
            refreshed_at: Utc::now(),
            groups: cache.finalize(),
            stats,
        });

        self.store.publish(snapshot.clone());
        self.set_phase(RefreshPhase::Published);
        info!(
            "Refresh cycle {} published: {} priced, {} no price, {} failed, {} entries in {} groups ({} ms)",
            cycle_id,
            snapshot.stats.priced,
            snapshot.stats.no_price,
            snapshot.stats.failed_total(),
            snapshot.entry_count(),
            snapshot.groups.len(),
            snapshot.stats.duration_ms
        );

        if let Some(listener) = &self.on_publish {
            if listener.send(snapshot.clone()).is_err() {
                warn!("Publish listener is gone");
            }
        }

        Ok(snapshot)
    }
}

fn accept(cache: &mut RetentionCache, stats: &mut CycleStats, group_by: GroupBy, outcome: FetchOutcome) {
    stats.record(&outcome);
    if let FetchOutcome::Priced { query, quote } = outcome {
        let key = group_by.key(&query);
        cache.offer(key, CacheEntry { query, quote });
    }
}
