//! # Key Store Garbage Collector
//!
//! Keeps a `RateStore` from growing without bound over a long replay.
//!
//! The collector is deliberately coarse. It never looks at the store while
//! the store is small (`len <= scan_size`), and once it is large it only
//! sweeps on every `prune_period`-th brand-new key. A sweep drops every key
//! whose newest retained hit is at least one interval older than the
//! request that triggered the sweep, using that single cutoff for all keys.
//! Idle keys can therefore linger well past their expiry between sweeps.

use serde::{Deserialize, Serialize};

use super::rate_state::RateStore;
use crate::GcConfig;

/// Running totals for one collector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcStats {
    /// New keys inserted into the store over the whole run.
    pub inserts: u64,

    /// Sweeps performed.
    pub sweeps: u64,

    /// Keys evicted across all sweeps.
    pub evicted: u64,

    /// Largest store size observed.
    pub peak_store_size: usize,
}

/// Outcome of a single sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    /// Keys last seen at or before this timestamp were condemned.
    pub cutoff: i64,

    /// Keys removed by the sweep.
    pub evicted: usize,

    /// Store size after the sweep.
    pub remaining: usize,
}

pub struct GarbageCollector {
    scan_size: usize,
    prune_period: u64,
    stats: GcStats,
}

impl GarbageCollector {
    /// `config.prune_period` must be positive, as `ReplayConfig::validate`
    /// enforces. A zero period never sweeps.
    pub fn new(config: &GcConfig) -> Self {
        Self {
            scan_size: config.scan_size,
            prune_period: config.prune_period,
            stats: GcStats::default(),
        }
    }

    /// Called after every store update with the update's `inserted` flag
    /// and the triggering request's timestamp.
    ///
    /// Returns the sweep's outcome when one ran. The expiry interval is the
    /// store's own.
    pub fn after_update(
        &mut self,
        store: &mut RateStore,
        inserted: bool,
        now: i64,
    ) -> Option<SweepStats> {
        if !inserted {
            return None;
        }

        self.stats.inserts += 1;
        self.stats.peak_store_size = self.stats.peak_store_size.max(store.len());

        if store.len() <= self.scan_size {
            return None;
        }
        if !self.stats.inserts.is_multiple_of(self.prune_period) {
            return None;
        }

        Some(self.sweep(store, now))
    }

    /// Collect condemned keys in one read-only pass, then delete them.
    fn sweep(&mut self, store: &mut RateStore, now: i64) -> SweepStats {
        let cutoff = now.saturating_sub(store.interval());
        let condemned = store.idle_keys(cutoff);
        let evicted = store.remove_keys(&condemned);

        self.stats.sweeps += 1;
        self.stats.evicted += evicted as u64;

        log::debug!(
            "GC sweep #{}: evicted {} idle keys (cutoff {}), {} remain",
            self.stats.sweeps,
            evicted,
            cutoff,
            store.len(),
        );

        SweepStats {
            cutoff,
            evicted,
            remaining: store.len(),
        }
    }

    pub fn stats(&self) -> GcStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CountingMode;

    fn collector(scan_size: usize, prune_period: u64) -> GarbageCollector {
        GarbageCollector::new(&GcConfig { scan_size, prune_period })
    }

    /// Insert a new key and run the collector the way a detector would.
    /// Returns the evicted count when a sweep ran.
    fn insert(store: &mut RateStore, gc: &mut GarbageCollector, key: &str, t: i64) -> Option<usize> {
        let update = store.record(key, t);
        gc.after_update(store, update.inserted, t).map(|sweep| sweep.evicted)
    }

    #[test]
    fn test_no_sweep_while_store_is_small() {
        let mut store = RateStore::new(CountingMode::Decay, 1);
        let mut gc = collector(10, 1);
        for i in 0..10 {
            assert_eq!(insert(&mut store, &mut gc, &format!("k{}", i), i * 100), None);
        }
        assert_eq!(store.len(), 10);
        assert_eq!(gc.stats().sweeps, 0);
    }

    #[test]
    fn test_sweep_only_on_prune_period_insert() {
        let mut store = RateStore::new(CountingMode::Decay, 5);
        let mut gc = collector(2, 4);
        // Inserts 1..=3: third exceeds scan_size but 3 % 4 != 0.
        assert_eq!(insert(&mut store, &mut gc, "a", 0), None);
        assert_eq!(insert(&mut store, &mut gc, "b", 1), None);
        assert_eq!(insert(&mut store, &mut gc, "c", 2), None);
        // Updates to existing keys never trigger, even far in the future.
        let update = store.record("a", 50);
        assert!(gc.after_update(&mut store, update.inserted, 50).is_none());
        // Fourth insert sweeps: "b" (1) and "c" (2) are idle, "a" (50) and "d" are fresh.
        assert_eq!(insert(&mut store, &mut gc, "d", 51), Some(2));
        assert!(store.get("a").is_some());
        assert!(store.get("d").is_some());
        assert_eq!(store.len(), 2);
        assert_eq!(gc.stats().sweeps, 1);
        assert_eq!(gc.stats().evicted, 2);
        assert_eq!(gc.stats().inserts, 4);
        assert_eq!(gc.stats().peak_store_size, 4);
    }

    #[test]
    fn test_sweep_keeps_keys_within_interval() {
        let mut store = RateStore::new(CountingMode::Window, 10);
        let mut gc = collector(1, 1);
        insert(&mut store, &mut gc, "stale", 0);
        insert(&mut store, &mut gc, "boundary", 10);
        // Triggered at t=20: cutoff is 10, so "boundary" is evicted too,
        // while "recent" at 11 is one second inside the interval.
        store.record("recent", 11);
        let update = store.record("trigger", 20);
        let sweep = gc.after_update(&mut store, update.inserted, 20).expect("sweep");
        assert_eq!(sweep, SweepStats { cutoff: 10, evicted: 1, remaining: 2 });
        assert!(store.get("stale").is_none());
        assert!(store.get("boundary").is_none());
        assert!(store.get("recent").is_some());
        assert!(store.get("trigger").is_some());
    }

    #[test]
    fn test_counter_advances_below_scan_size() {
        // Inserts made while the store is small still count toward the period.
        let mut store = RateStore::new(CountingMode::Decay, 1);
        let mut gc = collector(3, 5);
        for (i, key) in ["a", "b", "c", "d"].iter().enumerate() {
            assert_eq!(insert(&mut store, &mut gc, key, i as i64), None);
        }
        assert_eq!(insert(&mut store, &mut gc, "e", 100), Some(4));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_zero_period_is_taken_as_given() {
        // Validation rejects a zero period; the collector itself does not
        // substitute another value, so such a store is never swept.
        let mut store = RateStore::new(CountingMode::Decay, 1);
        let mut gc = collector(1, 0);
        for t in 0..20 {
            assert_eq!(insert(&mut store, &mut gc, &format!("k{}", t), t * 10), None);
        }
        assert_eq!(store.len(), 20);
        assert_eq!(gc.stats().inserts, 20);
    }
}
