//! # Rate State Store
//!
//! Keyed per-client rate state. Every request updates exactly one entry and
//! yields a `RateReading`: how many hits the key has accumulated and over how
//! many seconds.
//!
//! Two counting modes are supported, fixed for the lifetime of a store:
//!
//! - **Decay** (default): a renewing single timer. Each hit closer than
//!   `interval` to the previous hit increments the count; a quiet gap of at
//!   least `interval` resets it. Because the timer renews on every hit, a
//!   steady trickle spaced just under the interval keeps counting without
//!   bound over a span far longer than the interval itself.
//! - **Window**: an exact sliding window holding every hit timestamp younger
//!   than `interval` relative to the newest.
//!
//! Durations carry a +1 to account for one-second timestamp granularity: a
//! burst entirely within one second reports a duration of 1.
//!
//! Callers must feed timestamps in non-decreasing order per key.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};

use crate::CountingMode;

/// Hit count and covered span after one update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateReading {
    /// Hits currently attributed to the key. Always >= 1.
    pub hit_count: u64,

    /// `1 + (newest - oldest)` seconds covered by those hits.
    pub duration: i64,
}

/// Decay-mode state for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterState {
    /// Timestamp of the hit that started the current run.
    pub window_start: i64,

    /// Hits in the current run.
    pub hit_count: u64,

    /// Timestamp of the most recent hit.
    pub last_seen: i64,
}

impl CounterState {
    pub fn start(timestamp: i64) -> Self {
        Self {
            window_start: timestamp,
            hit_count: 1,
            last_seen: timestamp,
        }
    }

    /// Register a hit. The timer renews whether or not the count was reset.
    pub fn record(&mut self, timestamp: i64, interval: i64) {
        if timestamp - self.last_seen < interval {
            self.hit_count += 1;
        } else {
            self.hit_count = 1;
            self.window_start = timestamp;
        }
        self.last_seen = timestamp;
    }

    pub fn reading(&self) -> RateReading {
        RateReading {
            hit_count: self.hit_count,
            duration: 1 + (self.last_seen - self.window_start),
        }
    }
}

/// Window-mode state for one key: ascending hit timestamps, duplicates kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowState {
    timestamps: VecDeque<i64>,
}

impl WindowState {
    pub fn start(timestamp: i64) -> Self {
        Self {
            timestamps: VecDeque::from([timestamp]),
        }
    }

    /// Expire hits at least `interval` older than `timestamp`, then append it.
    pub fn record(&mut self, timestamp: i64, interval: i64) {
        while let Some(&oldest) = self.timestamps.front() {
            if timestamp - oldest >= interval {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
        self.timestamps.push_back(timestamp);
    }

    pub fn reading(&self) -> RateReading {
        match (self.timestamps.front(), self.timestamps.back()) {
            (Some(&oldest), Some(&newest)) => RateReading {
                hit_count: self.timestamps.len() as u64,
                duration: 1 + (newest - oldest),
            },
            // Unreachable through the public API: a window is never empty.
            _ => RateReading {
                hit_count: 1,
                duration: 1,
            },
        }
    }

    pub fn timestamps(&self) -> impl Iterator<Item = i64> + '_ {
        self.timestamps.iter().copied()
    }

    fn newest(&self) -> Option<i64> {
        self.timestamps.back().copied()
    }
}

/// State held for a single key. The variant follows the store's mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyEntry {
    Counter(CounterState),
    Window(WindowState),
}

impl KeyEntry {
    pub fn start(mode: CountingMode, timestamp: i64) -> Self {
        match mode {
            CountingMode::Decay => KeyEntry::Counter(CounterState::start(timestamp)),
            CountingMode::Window => KeyEntry::Window(WindowState::start(timestamp)),
        }
    }

    pub fn record(&mut self, timestamp: i64, interval: i64) {
        match self {
            KeyEntry::Counter(state) => state.record(timestamp, interval),
            KeyEntry::Window(state) => state.record(timestamp, interval),
        }
    }

    pub fn reading(&self) -> RateReading {
        match self {
            KeyEntry::Counter(state) => state.reading(),
            KeyEntry::Window(state) => state.reading(),
        }
    }

    /// Most recent retained timestamp; the garbage collector's idle measure.
    pub fn last_seen(&self) -> i64 {
        match self {
            KeyEntry::Counter(state) => state.last_seen,
            KeyEntry::Window(state) => state.newest().unwrap_or(i64::MIN),
        }
    }
}

/// Result of feeding one hit into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreUpdate {
    pub reading: RateReading,

    /// True when the key was not present before this hit.
    pub inserted: bool,
}

/// Mapping of key to rate state for one detection category.
///
/// Grows with every distinct key; only `GarbageCollector` shrinks it.
#[derive(Debug, Clone)]
pub struct RateStore {
    mode: CountingMode,
    interval: i64,
    entries: HashMap<String, KeyEntry>,
}

impl RateStore {
    pub fn new(mode: CountingMode, interval: i64) -> Self {
        Self {
            mode,
            interval,
            entries: HashMap::new(),
        }
    }

    /// Record a hit for `key` at `timestamp`.
    pub fn record(&mut self, key: &str, timestamp: i64) -> StoreUpdate {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut slot) => {
                let entry = slot.get_mut();
                entry.record(timestamp, self.interval);
                StoreUpdate {
                    reading: entry.reading(),
                    inserted: false,
                }
            }
            Entry::Vacant(slot) => {
                let entry = slot.insert(KeyEntry::start(self.mode, timestamp));
                StoreUpdate {
                    reading: entry.reading(),
                    inserted: true,
                }
            }
        }
    }

    pub fn mode(&self) -> CountingMode {
        self.mode
    }

    pub fn interval(&self) -> i64 {
        self.interval
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&KeyEntry> {
        self.entries.get(key)
    }

    /// Keys whose most recent retained hit is at or before `cutoff`.
    ///
    /// Read-only; pair with `remove_keys` to evict.
    pub fn idle_keys(&self, cutoff: i64) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.last_seen() <= cutoff)
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Remove the given keys, returning how many were present.
    pub fn remove_keys(&mut self, keys: &[String]) -> usize {
        keys.iter()
            .filter(|key| self.entries.remove(key.as_str()).is_some())
            .count()
    }
}
