//! Published cycle results and the store readers load them from.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use common::{FetchErrorKind, FetchOutcome, GroupKey};
use serde::Serialize;

use crate::retention::CacheEntry;

/// Counters for one refresh cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleStats {
    pub queries: usize,
    pub priced: usize,
    pub no_price: usize,
    pub failed: BTreeMap<FetchErrorKind, usize>,
    pub timed_out: bool,
    pub duration_ms: u64,
}

impl CycleStats {
    pub fn record(&mut self, outcome: &FetchOutcome) {
        match outcome {
            FetchOutcome::Priced { .. } => self.priced += 1,
            FetchOutcome::NoPrice { .. } => self.no_price += 1,
            FetchOutcome::Failed { error, .. } => *self.failed.entry(*error).or_default() += 1,
        }
    }

    pub fn failed_total(&self) -> usize {
        self.failed.values().sum()
    }

    /// Outcomes received; lower than `queries` when the cycle timed out.
    pub fn completed(&self) -> usize {
        self.priced + self.no_price + self.failed_total()
    }
}

/// Immutable result of one cycle. Readers hold it by `Arc`.
#[derive(Debug, Clone, Serialize)]
pub struct CacheSnapshot {
    pub cycle_id: u64,
    pub refreshed_at: DateTime<Utc>,
    pub groups: BTreeMap<GroupKey, Vec<CacheEntry>>,
    pub stats: CycleStats,
}

impl CacheSnapshot {
    pub fn entry_count(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    pub fn group(&self, key: &GroupKey) -> Option<&[CacheEntry]> {
        self.groups.get(key).map(Vec::as_slice)
    }
}

/// Holds the latest published snapshot. Loads never block on publishing.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    current: ArcSwapOption<CacheSnapshot>,
    published: AtomicU64,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest snapshot, or `None` before the first publish.
    pub fn load(&self) -> Option<Arc<CacheSnapshot>> {
        self.current.load_full()
    }

    pub fn publish(&self, snapshot: Arc<CacheSnapshot>) {
        self.current.store(Some(snapshot));
        self.published.fetch_add(1, Ordering::SeqCst);
    }

    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::SeqCst)
    }

    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.load().map(|s| s.refreshed_at)
    }
}
