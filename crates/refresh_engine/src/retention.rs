//! Top-K retention of the cheapest priced outcomes per group.
//!
//! The cache is a plain single-owner structure: the orchestrator funnels
//! every completion through one accumulator, so no locking happens here.

use std::collections::{BTreeMap, HashMap};

use common::{FareQuote, GroupKey, Query};
use serde::Serialize;

/// A priced outcome kept because it is among the K cheapest of its group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEntry {
    pub query: Query,
    pub quote: FareQuote,
}

impl CacheEntry {
    pub fn price(&self) -> f64 {
        self.quote.min_price
    }
}

/// What `offer` did with the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    Inserted,
    /// Inserted and the previous maximum was evicted.
    Replaced,
    Rejected,
}

/// Per-group bounded, ascending lists of the cheapest entries.
#[derive(Debug, Clone)]
pub struct RetentionCache {
    k: usize,
    groups: HashMap<GroupKey, Vec<CacheEntry>>,
}

impl RetentionCache {
    pub fn new(k: usize) -> Self {
        Self {
            k: k.max(1),
            groups: HashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.k
    }

    /// Make sure `key` shows up in the snapshot even with no priced entries.
    pub fn register(&mut self, key: GroupKey) {
        self.groups.entry(key).or_default();
    }

    /// Offer an entry to its group.
    ///
    /// Below capacity the entry is always inserted; at capacity it must be
    /// strictly cheaper than the current maximum. Equal prices are placed
    /// after the entries already holding that price and never displace them.
    pub fn offer(&mut self, key: GroupKey, entry: CacheEntry) -> Offer {
        let price = entry.price();
        if !price.is_finite() {
            return Offer::Rejected;
        }

        let k = self.k;
        let group = self
            .groups
            .entry(key)
            .or_insert_with(|| Vec::with_capacity(k));

        if group.len() >= k {
            match group.last() {
                Some(max) if price < max.price() => {}
                _ => return Offer::Rejected,
            }
        }

        let pos = group.partition_point(|e| e.price() <= price);
        group.insert(pos, entry);

        if group.len() > k {
            group.pop();
            Offer::Replaced
        } else {
            Offer::Inserted
        }
    }

    /// Current entries for one group, cheapest first.
    pub fn group(&self, key: &GroupKey) -> Option<&[CacheEntry]> {
        self.groups.get(key).map(Vec::as_slice)
    }

    /// Sorted, immutable view of every group. Does not consume the cache.
    pub fn finalize(&self) -> BTreeMap<GroupKey, Vec<CacheEntry>> {
        self.groups
            .iter()
            .map(|(key, entries)| (key.clone(), entries.clone()))
            .collect()
    }

    /// Number of retained entries across all groups.
    pub fn len(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
